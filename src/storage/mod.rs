//! Storage collaborators
//!
//! The sync engine never talks to a filesystem or an object store directly.
//! It goes through two capability traits:
//! - [`RemoteStore`] - paginated listing, get/put/copy/delete and multipart
//!   sessions against bucket-addressed objects
//! - [`LocalStore`] - ordered recursive walk, streamed and ranged reads,
//!   streamed writes and deletes on a local directory tree
//!
//! Concrete implementations: [`LocalFs`] (tokio + walkdir), [`MemoryStore`]
//! (in-process, instrumented) and `NativeS3Store` (AWS SDK, behind the
//! `native_s3` feature).

mod local;
mod location;
mod memory;
mod metadata;
#[cfg(feature = "native_s3")]
mod native_s3;

pub use local::{is_path_safe_key, key_to_path, LocalFs};
pub use location::{Location, Scenario};
pub use memory::{MemoryStore, StoreCall, StoreOp};
pub use metadata::{content_type_for_key, MetadataOptions, MetadataValue, ResolvedMetadata};
#[cfg(feature = "native_s3")]
pub use native_s3::{NativeS3Config, NativeS3Store};

use crate::error::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncRead;

/// Streamed object or file body
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lazy listing of descriptors produced by a collaborator
pub type DescriptorListing = BoxStream<'static, StorageResult<ObjectDescriptor>>;

/// Metadata for a single object in a collection
///
/// `key` is relative to the collection root (local) or the collection prefix
/// (remote) and always uses `/` as separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Key within the collection
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Whether the object lives on the local filesystem
    pub is_local: bool,
}

impl ObjectDescriptor {
    /// Create a descriptor for a remote object
    pub fn remote(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            is_local: false,
        }
    }

    /// Create a descriptor for a local file
    pub fn local(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            is_local: true,
        }
    }
}

/// One page of a remote listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in this page, keys are full object keys
    pub entries: Vec<ObjectDescriptor>,
    /// Cursor for the next page, `None` when the listing is exhausted
    pub next_token: Option<String>,
}

/// Completion token of one uploaded part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    /// Token returned by the store (ETag for S3)
    pub token: String,
}

/// Object storage capability interface
///
/// Implementations own authentication, retries and wire encoding. Every error
/// they return is treated as final by the engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List one page of objects under `prefix`, in ascending key order
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> StorageResult<ListPage>;

    /// Open an object for streamed reading
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ByteReader>;

    /// Store `size` bytes from `body` as a single object, returning its completion token
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteReader,
        size: u64,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<String>;

    /// Server-side copy of an object
    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<()>;

    /// Delete an object
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Open a multipart session, returning its upload id
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<String>;

    /// Upload one part of a session
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> StorageResult<String>;

    /// Finalize a session from its parts in part order
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()>;

    /// Abandon a session and release its stored parts
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()>;
}

/// Local filesystem capability interface
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Check whether `root` exists
    async fn exists(&self, root: &Path) -> bool;

    /// Recursively list regular files under `root`, keys relative to it in
    /// ascending byte-wise order
    fn walk(&self, root: &Path) -> DescriptorListing;

    /// Open a file for streamed reading
    async fn open(&self, path: &Path) -> StorageResult<ByteReader>;

    /// Read `len` bytes starting at `offset`
    async fn read_range(&self, path: &Path, offset: u64, len: u64) -> StorageResult<Vec<u8>>;

    /// Write `body` to `path`, creating parent directories; stamps the
    /// modification time when given. Returns the number of bytes written.
    async fn write(
        &self,
        path: &Path,
        body: ByteReader,
        modified: Option<DateTime<Utc>>,
    ) -> StorageResult<u64>;

    /// Remove a file; a missing file is not an error
    async fn remove(&self, path: &Path) -> StorageResult<()>;
}

/// Join a collection prefix and a relative key into a full object key
pub fn full_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key() {
        assert_eq!(full_key("", "a/b.txt"), "a/b.txt");
        assert_eq!(full_key("backup/2024", "a/b.txt"), "backup/2024/a/b.txt");
    }

    #[test]
    fn test_descriptor_constructors() {
        let now = Utc::now();
        assert!(ObjectDescriptor::local("x", 1, now).is_local);
        assert!(!ObjectDescriptor::remote("x", 1, now).is_local);
    }
}
