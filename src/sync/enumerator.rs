//! Collection enumerators
//!
//! An [`Enumerator`] turns a collection into a lazy stream of descriptors in
//! ascending key order. Remote listings follow continuation tokens until the
//! store reports no further page; consumers only see a flat stream.

use crate::error::{Result, SyncError};
use crate::storage::{is_path_safe_key, LocalStore, ObjectDescriptor, RemoteStore};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::path::PathBuf;
use std::sync::Arc;

/// Lazy stream of descriptors with keys relative to the collection
pub type DescriptorStream = BoxStream<'static, Result<ObjectDescriptor>>;

/// Pagination state of a remote listing
enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Producer of a collection's descriptors
#[derive(Clone)]
pub enum Enumerator {
    /// Local directory tree
    Local {
        store: Arc<dyn LocalStore>,
        root: PathBuf,
        /// Treat a missing root as an empty collection
        missing_ok: bool,
    },
    /// Bucket and prefix
    Remote {
        store: Arc<dyn RemoteStore>,
        bucket: String,
        prefix: String,
        /// Skip keys that cannot be placed under a local root
        local_paths: bool,
    },
}

impl Enumerator {
    /// Human-readable name used in errors and logs
    pub fn label(&self) -> String {
        match self {
            Self::Local { root, .. } => root.display().to_string(),
            Self::Remote { bucket, prefix, .. } if prefix.is_empty() => format!("s3://{}", bucket),
            Self::Remote { bucket, prefix, .. } => format!("s3://{}/{}", bucket, prefix),
        }
    }

    /// Start a fresh enumeration
    pub fn stream(&self) -> DescriptorStream {
        match self {
            Self::Local {
                store,
                root,
                missing_ok,
            } => local_stream(Arc::clone(store), root.clone(), *missing_ok, self.label()),
            Self::Remote {
                store,
                bucket,
                prefix,
                local_paths,
            } => remote_stream(
                Arc::clone(store),
                bucket.clone(),
                prefix.clone(),
                *local_paths,
                self.label(),
            ),
        }
    }
}

fn local_stream(
    store: Arc<dyn LocalStore>,
    root: PathBuf,
    missing_ok: bool,
    label: String,
) -> DescriptorStream {
    stream::once(async move {
        if missing_ok && !store.exists(&root).await {
            tracing::debug!("{} does not exist yet, treating as empty", label);
            return stream::empty().boxed();
        }
        store
            .walk(&root)
            .map_err(move |e| SyncError::enumeration(label.clone(), e))
            .boxed()
    })
    .flatten()
    .boxed()
}

fn remote_stream(
    store: Arc<dyn RemoteStore>,
    bucket: String,
    prefix: String,
    local_paths: bool,
    label: String,
) -> DescriptorStream {
    let list_prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{}/", prefix)
    };

    let pages = stream::try_unfold(Cursor::Start, move |cursor| {
        let store = Arc::clone(&store);
        let bucket = bucket.clone();
        let list_prefix = list_prefix.clone();
        let label = label.clone();

        async move {
            let token = match cursor {
                Cursor::Done => return Ok(None),
                Cursor::Start => None,
                Cursor::Next(token) => Some(token),
            };

            let page = store
                .list(&bucket, &list_prefix, token.as_deref())
                .await
                .map_err(|e| SyncError::enumeration(label, e))?;
            tracing::trace!(
                "Listed {} objects under s3://{}/{}",
                page.entries.len(),
                bucket,
                list_prefix
            );

            let next = match page.next_token {
                Some(token) => Cursor::Next(token),
                None => Cursor::Done,
            };

            let entries: Vec<Result<ObjectDescriptor>> = page
                .entries
                .into_iter()
                .filter_map(|entry| relativize(entry, &list_prefix))
                .filter(|entry| {
                    if local_paths && !is_path_safe_key(&entry.key) {
                        tracing::warn!("Skipping '{}': not a valid local path", entry.key);
                        return false;
                    }
                    true
                })
                .map(Ok)
                .collect();

            Ok::<_, SyncError>(Some((stream::iter(entries), next)))
        }
    });

    pages.try_flatten().boxed()
}

/// Strip the collection prefix; directory placeholders are dropped
fn relativize(mut entry: ObjectDescriptor, list_prefix: &str) -> Option<ObjectDescriptor> {
    let relative = entry.key.strip_prefix(list_prefix)?;
    if relative.is_empty() || relative.ends_with('/') {
        return None;
    }
    entry.key = relative.to_string();
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalFs, MemoryStore, StoreOp};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_remote_pagination_is_transparent() {
        let store = Arc::new(MemoryStore::new().with_page_size(3));
        for i in 0..10 {
            store.insert("bucket", &format!("data/file-{:02}", i), vec![0; i], Utc::now());
        }
        store.insert("bucket", "other/skip", vec![], Utc::now());

        let enumerator = Enumerator::Remote {
            store: store.clone(),
            bucket: "bucket".to_string(),
            prefix: "data".to_string(),
            local_paths: false,
        };
        let entries: Vec<ObjectDescriptor> = enumerator.stream().try_collect().await.unwrap();

        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].key, "file-00");
        assert_eq!(entries[9].key, "file-09");
        assert_eq!(entries[9].size, 9);
        let list_calls = store.calls().iter().filter(|c| c.op == StoreOp::List).count();
        assert_eq!(list_calls, 4);
    }

    #[tokio::test]
    async fn test_remote_skips_directory_markers() {
        let store = Arc::new(MemoryStore::new());
        store.insert("bucket", "dir/", vec![], Utc::now());
        store.insert("bucket", "dir/file", vec![1], Utc::now());

        let enumerator = Enumerator::Remote {
            store,
            bucket: "bucket".to_string(),
            prefix: String::new(),
            local_paths: false,
        };
        let keys: Vec<String> = enumerator
            .stream()
            .map_ok(|d| d.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["dir/file"]);
    }

    #[tokio::test]
    async fn test_remote_skips_keys_unfit_for_local_paths() {
        let store = Arc::new(MemoryStore::new().with_page_size(2));
        for key in ["in/../escaped.txt", "in/a//b", "in/a/b", "in/ok.txt"] {
            store.insert("bucket", key, vec![1], Utc::now());
        }

        let download = Enumerator::Remote {
            store: store.clone(),
            bucket: "bucket".to_string(),
            prefix: "in".to_string(),
            local_paths: true,
        };
        let keys: Vec<String> = download.stream().map_ok(|d| d.key).try_collect().await.unwrap();
        assert_eq!(keys, vec!["a/b", "ok.txt"]);

        let copy = Enumerator::Remote {
            store,
            bucket: "bucket".to_string(),
            prefix: "in".to_string(),
            local_paths: false,
        };
        let keys: Vec<String> = copy.stream().map_ok(|d| d.key).try_collect().await.unwrap();
        assert_eq!(keys, vec!["../escaped.txt", "a//b", "a/b", "ok.txt"]);
    }

    #[tokio::test]
    async fn test_listing_error_is_enumeration_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_on(StoreOp::List, "");

        let enumerator = Enumerator::Remote {
            store,
            bucket: "bucket".to_string(),
            prefix: String::new(),
            local_paths: false,
        };
        let result: Result<Vec<ObjectDescriptor>> = enumerator.stream().try_collect().await;
        assert!(matches!(result, Err(SyncError::Enumeration { .. })));
    }

    #[tokio::test]
    async fn test_local_missing_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("not-yet");

        let target = Enumerator::Local {
            store: Arc::new(LocalFs::new()),
            root: missing.clone(),
            missing_ok: true,
        };
        let entries: Vec<ObjectDescriptor> = target.stream().try_collect().await.unwrap();
        assert!(entries.is_empty());

        let source = Enumerator::Local {
            store: Arc::new(LocalFs::new()),
            root: missing,
            missing_ok: false,
        };
        let result: Result<Vec<ObjectDescriptor>> = source.stream().try_collect().await;
        assert!(matches!(result, Err(SyncError::Enumeration { .. })));
    }

    #[tokio::test]
    async fn test_stream_is_restartable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one"), b"1").unwrap();

        let enumerator = Enumerator::Local {
            store: Arc::new(LocalFs::new()),
            root: dir.path().to_path_buf(),
            missing_ok: false,
        };
        for _ in 0..2 {
            let entries: Vec<ObjectDescriptor> = enumerator.stream().try_collect().await.unwrap();
            assert_eq!(entries.len(), 1);
        }
    }
}
