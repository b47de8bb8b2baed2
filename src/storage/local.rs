//! Local filesystem store
//!
//! Walks a directory tree with `walkdir` on a blocking thread and feeds the
//! entries to an async stream. Sibling entries are sorted so that the emitted
//! keys are in ascending byte-wise order: a directory `name` sorts as `name/`,
//! which places `a.txt` before everything under `a/`.

use crate::error::{IoResultExt, StorageError, StorageResult};
use crate::storage::{ByteReader, DescriptorListing, LocalStore, ObjectDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use futures::stream::{self, StreamExt};
use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use walkdir::{DirEntry, WalkDir};

/// Number of walk results buffered ahead of the consumer
const WALK_BUFFER: usize = 1024;

/// Whether every `/`-separated segment of `key` is a plain file name
///
/// Empty, `.` and `..` segments are refused, as is anything the platform
/// would read as a root or drive prefix.
pub fn is_path_safe_key(key: &str) -> bool {
    key.split('/').all(|segment| {
        let mut components = Path::new(segment).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None) if name == segment
        )
    })
}

/// Convert a `/`-separated key into a path under `root`
pub fn key_to_path(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if !is_path_safe_key(key) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let mut path = root.to_path_buf();
    path.extend(key.split('/'));
    Ok(path)
}

/// Local filesystem implementation of [`LocalStore`]
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    follow_symlinks: bool,
}

impl LocalFs {
    /// Create a store that does not follow symbolic links
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow symbolic links while walking
    pub fn follow_symlinks(mut self, enable: bool) -> Self {
        self.follow_symlinks = enable;
        self
    }
}

/// Sort key for one directory entry
fn walk_order_key(entry: &DirEntry) -> Vec<u8> {
    let mut key = entry.file_name().to_string_lossy().into_owned().into_bytes();
    if entry.file_type().is_dir() {
        key.push(b'/');
    }
    key
}

fn walk_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    walk_order_key(a).cmp(&walk_order_key(b))
}

/// Build the relative `/`-separated key of a walked file
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

fn descriptor_for(root: &Path, entry: &DirEntry) -> Option<StorageResult<ObjectDescriptor>> {
    if !entry.file_type().is_file() {
        return None;
    }

    let Some(key) = relative_key(root, entry.path()) else {
        tracing::warn!("Skipping non UTF-8 path {}", entry.path().display());
        return None;
    };
    if key.is_empty() {
        return None;
    }

    let metadata = match entry.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "metadata unavailable"));
            return Some(Err(StorageError::io(entry.path(), source)));
        }
    };

    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::SystemTime::UNIX_EPOCH));

    Some(Ok(ObjectDescriptor::local(key, metadata.len(), modified)))
}

fn walk_blocking(
    root: PathBuf,
    follow_symlinks: bool,
    tx: mpsc::Sender<StorageResult<ObjectDescriptor>>,
) {
    let walker = WalkDir::new(&root)
        .follow_links(follow_symlinks)
        .sort_by(walk_order);

    for entry in walker {
        let item = match entry {
            Ok(entry) => match descriptor_for(&root, &entry) {
                Some(item) => item,
                None => continue,
            },
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                let source = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "directory walk failed"));
                Err(StorageError::io(path, source))
            }
        };

        let failed = item.is_err();
        // Receiver dropped: the consumer stopped listening.
        if tx.blocking_send(item).is_err() || failed {
            return;
        }
    }
}

#[async_trait]
impl LocalStore for LocalFs {
    async fn exists(&self, root: &Path) -> bool {
        tokio::fs::metadata(root).await.is_ok()
    }

    fn walk(&self, root: &Path) -> DescriptorListing {
        let (tx, rx) = mpsc::channel(WALK_BUFFER);
        let root = root.to_path_buf();
        let follow_symlinks = self.follow_symlinks;

        tokio::task::spawn_blocking(move || walk_blocking(root, follow_symlinks, tx));

        stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .boxed()
    }

    async fn open(&self, path: &Path) -> StorageResult<ByteReader> {
        let file = tokio::fs::File::open(path).await.with_path(path)?;
        Ok(Box::new(file))
    }

    async fn read_range(&self, path: &Path, offset: u64, len: u64) -> StorageResult<Vec<u8>> {
        let mut file = tokio::fs::File::open(path).await.with_path(path)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .with_path(path)?;

        let mut buffer = vec![0u8; len as usize];
        file.read_exact(&mut buffer).await.with_path(path)?;
        Ok(buffer)
    }

    async fn write(
        &self,
        path: &Path,
        mut body: ByteReader,
        modified: Option<DateTime<Utc>>,
    ) -> StorageResult<u64> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_path(parent)?;
        }

        let mut file = tokio::fs::File::create(path).await.with_path(path)?;
        let written = tokio::io::copy(&mut body, &mut file).await.with_path(path)?;
        file.flush().await.with_path(path)?;
        drop(file);

        if let Some(modified) = modified {
            let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
            let target = path.to_path_buf();
            tokio::task::spawn_blocking(move || filetime::set_file_mtime(&target, mtime))
                .await
                .map_err(|e| StorageError::io(path, std::io::Error::new(std::io::ErrorKind::Other, e)))?
                .with_path(path)?;
        }

        Ok(written)
    }

    async fn remove(&self, path: &Path) -> StorageResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::fs;
    use tempfile::TempDir;

    fn create_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("a/nested")).unwrap();
        fs::write(root.join("a.txt"), b"top").unwrap();
        fs::write(root.join("a0"), b"zero").unwrap();
        fs::write(root.join("a/b.txt"), b"bee").unwrap();
        fs::write(root.join("a/nested/deep.bin"), vec![7u8; 100]).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        dir
    }

    #[test]
    fn test_key_to_path() {
        let path = key_to_path(Path::new("/root"), "a/b/c.txt").unwrap();
        assert_eq!(path, Path::new("/root").join("a").join("b").join("c.txt"));
    }

    #[test]
    fn test_key_to_path_rejects_escaping_keys() {
        for key in ["../up.txt", "in/../../up.txt", "a//b", "./a", "a/.", "/abs", "trailing/", ""] {
            assert!(!is_path_safe_key(key), "{key:?} should be refused");
            assert!(matches!(
                key_to_path(Path::new("/root"), key),
                Err(StorageError::InvalidKey(k)) if k == key
            ));
        }
        assert!(is_path_safe_key("a/..b/c.d"));
        assert!(is_path_safe_key(".hidden/file"));
    }

    #[tokio::test]
    async fn test_walk_is_bytewise_sorted() {
        let dir = create_tree();
        let store = LocalFs::new();

        let entries: Vec<ObjectDescriptor> = store.walk(dir.path()).try_collect().await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();

        assert_eq!(keys, vec!["a.txt", "a/b.txt", "a/nested/deep.bin", "a0"]);
        assert!(entries.iter().all(|e| e.is_local));
        assert_eq!(entries[2].size, 100);
    }

    #[tokio::test]
    async fn test_walk_missing_root_errors() {
        let dir = TempDir::new().unwrap();
        let store = LocalFs::new();

        assert!(!store.exists(&dir.path().join("nope")).await);
        let result: StorageResult<Vec<ObjectDescriptor>> =
            store.walk(&dir.path().join("nope")).try_collect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_sets_mtime() {
        let dir = TempDir::new().unwrap();
        let store = LocalFs::new();
        let path = key_to_path(dir.path(), "x/y/z.txt").unwrap();
        let modified = DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap();

        let body: ByteReader = Box::new(std::io::Cursor::new(b"hello".to_vec()));
        let written = store.write(&path, body, Some(modified)).await.unwrap();

        assert_eq!(written, 5);
        assert_eq!(fs::read(&path).unwrap(), b"hello");
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
    }

    #[tokio::test]
    async fn test_read_range_and_remove() {
        let dir = create_tree();
        let store = LocalFs::new();
        let path = dir.path().join("a0");

        assert_eq!(store.read_range(&path, 1, 2).await.unwrap(), b"er");

        store.remove(&path).await.unwrap();
        assert!(!path.exists());
        // Removing twice is fine
        store.remove(&path).await.unwrap();
    }
}
