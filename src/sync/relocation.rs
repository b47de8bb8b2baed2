//! Key relocation
//!
//! A relocation rewrites a leading prefix of a source key. Only the first
//! matching rule applies, and keys that match no rule keep their name.

use serde::{Deserialize, Serialize};

/// Prefix rewrite from source key space to target key space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub source_prefix: String,
    pub target_prefix: String,
}

impl Relocation {
    pub fn new(source_prefix: impl Into<String>, target_prefix: impl Into<String>) -> Self {
        Self {
            source_prefix: source_prefix.into(),
            target_prefix: target_prefix.into(),
        }
    }

    /// Parse `FROM:TO`
    pub fn parse(value: &str) -> Option<Self> {
        let (from, to) = value.split_once(':')?;
        Some(Self::new(from, to))
    }

    /// Rewrite `key`, or `None` when the rule does not apply
    fn apply(&self, key: &str) -> Option<String> {
        let rest = key.strip_prefix(self.source_prefix.as_str())?;

        let mapped = if self.source_prefix.is_empty() && !self.target_prefix.is_empty() {
            format!("{}/{}", self.target_prefix, rest)
        } else if self.target_prefix.is_empty() {
            rest.trim_start_matches('/').to_string()
        } else {
            format!("{}{}", self.target_prefix, rest)
        };

        // A rule that would erase the whole key does not match
        if mapped.is_empty() || mapped.ends_with('/') {
            return None;
        }
        Some(mapped)
    }
}

/// Maps source keys to target keys
#[derive(Debug, Clone, Default)]
pub struct KeyMapper {
    relocations: Vec<Relocation>,
}

impl KeyMapper {
    pub fn new(relocations: Vec<Relocation>) -> Self {
        Self { relocations }
    }

    /// Target key for `source_key`
    pub fn map(&self, source_key: &str) -> String {
        self.relocations
            .iter()
            .find_map(|rule| rule.apply(source_key))
            .unwrap_or_else(|| source_key.to_string())
    }

    /// True when every key maps to itself
    pub fn is_identity(&self) -> bool {
        self.relocations.is_empty()
    }
}
