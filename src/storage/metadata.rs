//! Per-object metadata options
//!
//! Each field is either a fixed value or a function of the pending object,
//! resolved lazily when the operation executes.

use crate::storage::ObjectDescriptor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Function deriving a metadata value from the source object and target key
pub type DeriveFn<T> = Arc<dyn Fn(&ObjectDescriptor, &str) -> Option<T> + Send + Sync>;

/// A metadata value, fixed or derived per object
#[derive(Clone)]
pub enum MetadataValue<T> {
    /// Same value for every object
    Fixed(T),
    /// Computed from the source descriptor and the target key
    Derived(DeriveFn<T>),
}

impl<T: Clone> MetadataValue<T> {
    /// Create a derived value
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&ObjectDescriptor, &str) -> Option<T> + Send + Sync + 'static,
    {
        Self::Derived(Arc::new(f))
    }

    /// Resolve for one object
    pub fn resolve(&self, source: &ObjectDescriptor, target_key: &str) -> Option<T> {
        match self {
            Self::Fixed(value) => Some(value.clone()),
            Self::Derived(f) => f(source, target_key),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MetadataValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

// Derived values cannot be persisted and serialize as null.
impl<T: Serialize> Serialize for MetadataValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fixed(value) => value.serialize(serializer),
            Self::Derived(_) => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for MetadataValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self::Fixed)
    }
}

/// Metadata applied to uploaded and copied objects
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataOptions {
    /// MIME type
    pub content_type: Option<MetadataValue<String>>,
    /// Cache-Control header
    pub cache_control: Option<MetadataValue<String>>,
    /// Content-Disposition header
    pub content_disposition: Option<MetadataValue<String>>,
    /// Content-Encoding header
    pub content_encoding: Option<MetadataValue<String>>,
    /// Storage class (STANDARD, GLACIER, ...)
    pub storage_class: Option<MetadataValue<String>>,
    /// User-defined metadata
    pub user_metadata: Option<MetadataValue<BTreeMap<String, String>>>,
}

impl MetadataOptions {
    /// Derive the content type from the target key's extension
    pub fn guess_content_type(mut self) -> Self {
        self.content_type = Some(MetadataValue::derived(|_, key| {
            content_type_for_key(key).map(str::to_string)
        }));
        self
    }

    /// Resolve every field for one pending operation
    pub fn resolve(&self, source: &ObjectDescriptor, target_key: &str) -> ResolvedMetadata {
        let field = |value: &Option<MetadataValue<String>>| {
            value.as_ref().and_then(|v| v.resolve(source, target_key))
        };

        ResolvedMetadata {
            content_type: field(&self.content_type),
            cache_control: field(&self.cache_control),
            content_disposition: field(&self.content_disposition),
            content_encoding: field(&self.content_encoding),
            storage_class: field(&self.storage_class),
            user_metadata: self
                .user_metadata
                .as_ref()
                .and_then(|v| v.resolve(source, target_key))
                .unwrap_or_default(),
        }
    }
}

/// Metadata values for one concrete object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMetadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub storage_class: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
}

impl ResolvedMetadata {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none()
            && self.cache_control.is_none()
            && self.content_disposition.is_none()
            && self.content_encoding.is_none()
            && self.storage_class.is_none()
            && self.user_metadata.is_empty()
    }
}

/// Guess a MIME type from a key's extension
pub fn content_type_for_key(key: &str) -> Option<&'static str> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let (_, extension) = name.rsplit_once('.')?;

    let mime = match extension.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn descriptor(key: &str) -> ObjectDescriptor {
        ObjectDescriptor::local(key, 10, Utc::now())
    }

    #[test]
    fn test_content_type_for_key() {
        assert_eq!(content_type_for_key("a/b/index.HTML"), Some("text/html"));
        assert_eq!(content_type_for_key("photo.jpeg"), Some("image/jpeg"));
        assert_eq!(content_type_for_key("Makefile"), None);
        assert_eq!(content_type_for_key("dir.d/noext"), None);
    }

    #[test]
    fn test_resolve_fixed_and_derived() {
        let options = MetadataOptions {
            cache_control: Some(MetadataValue::Fixed("max-age=60".to_string())),
            user_metadata: Some(MetadataValue::derived(|source: &ObjectDescriptor, _: &str| {
                let mut map = BTreeMap::new();
                map.insert("source-key".to_string(), source.key.clone());
                Some(map)
            })),
            ..Default::default()
        }
        .guess_content_type();

        let resolved = options.resolve(&descriptor("docs/readme.md"), "mirror/readme.md");
        assert_eq!(resolved.content_type.as_deref(), Some("text/markdown"));
        assert_eq!(resolved.cache_control.as_deref(), Some("max-age=60"));
        assert_eq!(resolved.user_metadata["source-key"], "docs/readme.md");
        assert!(!resolved.is_empty());

        assert!(MetadataOptions::default()
            .resolve(&descriptor("x"), "x")
            .is_empty());
    }

    #[test]
    fn test_serde_skips_derived() {
        let options = MetadataOptions {
            storage_class: Some(MetadataValue::Fixed("GLACIER".to_string())),
            ..Default::default()
        }
        .guess_content_type();

        let json = serde_json::to_string(&options).unwrap();
        let parsed: MetadataOptions = serde_json::from_str(&json).unwrap();

        assert!(parsed.content_type.is_none());
        let resolved = parsed.resolve(&descriptor("a.bin"), "a.bin");
        assert_eq!(resolved.storage_class.as_deref(), Some("GLACIER"));
    }
}
