//! Include/exclude filtering of source keys
//!
//! Rules are checked in declaration order and the LAST rule whose predicate
//! matches decides. A key that no rule matches is included. This mirrors the
//! usual CLI filter semantics (`--exclude '*' --include '*.txt'` keeps only
//! text files) and is easy to get backwards as first-match-wins.

use crate::error::{Result, SyncError};
use globset::{Glob, GlobMatcher};
use std::fmt;
use std::sync::Arc;

/// Predicate over a source key
#[derive(Clone)]
pub enum KeyPredicate {
    /// Glob pattern; `*` also matches across `/`
    Glob { pattern: String, matcher: GlobMatcher },
    /// Arbitrary function
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl KeyPredicate {
    /// Compile a glob pattern
    pub fn glob(pattern: &str) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .map_err(|e| SyncError::config(format!("Invalid filter pattern '{}': {}", pattern, e)))?
            .compile_matcher();
        Ok(Self::Glob {
            pattern: pattern.to_string(),
            matcher,
        })
    }

    /// Wrap a function
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Test a key
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Glob { matcher, .. } => matcher.is_match(key),
            Self::Custom(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob { pattern, .. } => write!(f, "Glob({:?})", pattern),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A single filter rule
#[derive(Debug, Clone)]
pub enum FilterRule {
    Include(KeyPredicate),
    Exclude(KeyPredicate),
}

impl FilterRule {
    /// Include keys matching a glob
    pub fn include(pattern: &str) -> Result<Self> {
        KeyPredicate::glob(pattern).map(Self::Include)
    }

    /// Exclude keys matching a glob
    pub fn exclude(pattern: &str) -> Result<Self> {
        KeyPredicate::glob(pattern).map(Self::Exclude)
    }

    fn predicate(&self) -> &KeyPredicate {
        match self {
            Self::Include(p) | Self::Exclude(p) => p,
        }
    }

    fn is_include(&self) -> bool {
        matches!(self, Self::Include(_))
    }
}

/// Ordered rule list
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    rules: Vec<FilterRule>,
}

impl FilterChain {
    /// Build a chain from rules in declaration order
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Does the key take part in the sync?
    pub fn accepts(&self, key: &str) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.predicate().matches(key))
            .map_or(true, FilterRule::is_include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(rules: &[(&str, bool)]) -> FilterChain {
        FilterChain::new(
            rules
                .iter()
                .map(|(pattern, include)| {
                    if *include {
                        FilterRule::include(pattern).unwrap()
                    } else {
                        FilterRule::exclude(pattern).unwrap()
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn test_last_matching_rule_wins() {
        let filters = chain(&[("*", false), ("*.txt", true), ("flowers/*", true)]);

        assert!(filters.accepts("flowers/red/rose.png"));
        assert!(filters.accepts("notes.txt"));
        assert!(!filters.accepts("notes.md"));
    }

    #[test]
    fn test_not_first_match() {
        // First-match-wins would include everything here
        let filters = chain(&[("*", true), ("*.tmp", false)]);
        assert!(!filters.accepts("cache/file.tmp"));
        assert!(filters.accepts("cache/file.dat"));
    }

    #[test]
    fn test_default_is_include() {
        assert!(FilterChain::default().accepts("anything"));

        let filters = chain(&[("*.log", false)]);
        assert!(filters.accepts("data.csv"));
        assert!(!filters.accepts("deep/dir/app.log"));
    }

    #[test]
    fn test_custom_predicate() {
        let filters = FilterChain::new(vec![FilterRule::Exclude(KeyPredicate::custom(|key| {
            key.len() > 10
        }))]);
        assert!(filters.accepts("short"));
        assert!(!filters.accepts("a/very/long/key"));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = FilterRule::include("a[").unwrap_err();
        assert!(err.is_configuration());
    }
}
