//! In-memory object store
//!
//! A complete [`RemoteStore`] backed by ordered maps. Besides serving as a
//! lightweight store for embedding, it records every call in a journal,
//! tracks the peak number of concurrently running calls, and can inject
//! failures and latency. The engine tests use it as their storage double.

use crate::error::{StorageError, StorageResult};
use crate::storage::{
    ByteReader, CompletedPart, ListPage, ObjectDescriptor, RemoteStore, ResolvedMetadata,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Default number of entries per listing page
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Kind of store call, used for the journal and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Get,
    Put,
    Copy,
    Delete,
    CreateMultipart,
    UploadPart,
    CompleteMultipart,
    AbortMultipart,
}

impl StoreOp {
    /// Does this call change stored state?
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::List | Self::Get)
    }
}

/// One journaled call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub bucket: String,
    pub key: String,
    /// Part number for `UploadPart`
    pub part_number: Option<u32>,
    /// Body length for `Put` and `UploadPart`
    pub len: Option<u64>,
}

/// A stored object
#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    metadata: ResolvedMetadata,
}

#[derive(Debug)]
struct PendingUpload {
    bucket: String,
    key: String,
    metadata: ResolvedMetadata,
    parts: BTreeMap<u32, (String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, PendingUpload>,
    journal: Vec<StoreCall>,
    failures: Vec<(StoreOp, String)>,
    next_upload: u64,
    next_etag: u64,
}

/// In-memory implementation of [`RemoteStore`]
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
    latency: Option<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one running call for the concurrency high-water mark
struct ActiveCall<'a> {
    store: &'a MemoryStore,
}

impl<'a> ActiveCall<'a> {
    fn enter(store: &'a MemoryStore) -> Self {
        let now = store.active.fetch_add(1, Ordering::SeqCst) + 1;
        store.peak.fetch_max(now, Ordering::SeqCst);
        Self { store }
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.store.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size: DEFAULT_PAGE_SIZE,
            latency: None,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Limit listing pages to `page_size` entries
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly, bypassing the journal
    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>, last_modified: DateTime<Utc>) {
        self.lock().buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified,
                metadata: ResolvedMetadata::default(),
            },
        );
    }

    /// Read an object's bytes
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
    }

    /// Read an object's stored metadata
    pub fn metadata(&self, bucket: &str, key: &str) -> Option<ResolvedMetadata> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|object| object.metadata.clone())
    }

    /// All keys of a bucket in ascending order
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Make calls of kind `op` on keys containing `key_fragment` fail
    pub fn fail_on(&self, op: StoreOp, key_fragment: &str) {
        self.lock().failures.push((op, key_fragment.to_string()));
    }

    /// Snapshot of the call journal
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().journal.clone()
    }

    /// Number of journaled calls that change stored state
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|call| call.op.is_mutation())
            .count()
    }

    /// Highest number of calls observed running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Multipart sessions neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Journal the call and apply injected failures
    fn record(
        &self,
        op: StoreOp,
        bucket: &str,
        key: &str,
        part_number: Option<u32>,
        len: Option<u64>,
    ) -> StorageResult<()> {
        let mut inner = self.lock();
        inner.journal.push(StoreCall {
            op,
            bucket: bucket.to_string(),
            key: key.to_string(),
            part_number,
            len,
        });

        let injected = inner
            .failures
            .iter()
            .any(|(failing_op, fragment)| *failing_op == op && key.contains(fragment.as_str()));
        if injected {
            return Err(StorageError::remote(format!("injected {:?} failure for '{}'", op, key)));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn store_object(&self, bucket: &str, key: &str, data: Vec<u8>, metadata: ResolvedMetadata) -> String {
        let mut inner = self.lock();
        inner.next_etag += 1;
        let etag = format!("\"etag-{}\"", inner.next_etag);
        inner.buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
                metadata,
            },
        );
        etag
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> StorageResult<ListPage> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::List, bucket, prefix, None, None)?;
        self.simulate_latency().await;

        let inner = self.lock();
        let Some(objects) = inner.buckets.get(bucket) else {
            return Ok(ListPage::default());
        };

        let start = continuation.unwrap_or(prefix);
        let mut entries = Vec::new();
        let mut next_token = None;

        for (key, object) in objects.range::<str, _>((
            std::ops::Bound::Included(start),
            std::ops::Bound::Unbounded,
        )) {
            if !key.starts_with(prefix) {
                break;
            }
            if entries.len() == self.page_size {
                next_token = Some(key.clone());
                break;
            }
            entries.push(ObjectDescriptor::remote(
                key.clone(),
                object.data.len() as u64,
                object.last_modified,
            ));
        }

        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ByteReader> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::Get, bucket, key, None, None)?;
        self.simulate_latency().await;

        let data = self
            .object(bucket, key)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))?;
        Ok(Box::new(std::io::Cursor::new(data)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ByteReader,
        size: u64,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<String> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::Put, bucket, key, None, Some(size))?;
        self.simulate_latency().await;

        let mut data = Vec::with_capacity(size as usize);
        body.read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::remote(format!("body read failed: {}", e)))?;
        if data.len() as u64 != size {
            return Err(StorageError::remote(format!(
                "body length {} does not match declared size {}",
                data.len(),
                size
            )));
        }

        Ok(self.store_object(bucket, key, data, metadata.clone()))
    }

    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        target_bucket: &str,
        target_key: &str,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<()> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::Copy, target_bucket, target_key, None, None)?;
        self.simulate_latency().await;

        let data = self
            .object(source_bucket, source_key)
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", source_bucket, source_key)))?;
        let metadata = if metadata.is_empty() {
            self.metadata(source_bucket, source_key).unwrap_or_default()
        } else {
            metadata.clone()
        };
        self.store_object(target_bucket, target_key, data, metadata);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::Delete, bucket, key, None, None)?;
        self.simulate_latency().await;

        if let Some(objects) = self.lock().buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ResolvedMetadata,
    ) -> StorageResult<String> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::CreateMultipart, bucket, key, None, None)?;
        self.simulate_latency().await;

        let mut inner = self.lock();
        inner.next_upload += 1;
        let upload_id = format!("upload-{}", inner.next_upload);
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                metadata: metadata.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Vec<u8>,
    ) -> StorageResult<String> {
        let _call = ActiveCall::enter(self);
        self.record(
            StoreOp::UploadPart,
            bucket,
            key,
            Some(part_number),
            Some(body.len() as u64),
        )?;
        self.simulate_latency().await;

        let mut inner = self.lock();
        inner.next_etag += 1;
        let token = format!("\"part-{}\"", inner.next_etag);
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::NotFound(format!("upload {}", upload_id)))?;
        upload.parts.insert(part_number, (token.clone(), body));
        Ok(token)
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<()> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::CompleteMultipart, bucket, key, None, None)?;
        self.simulate_latency().await;

        let upload = self
            .lock()
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StorageError::NotFound(format!("upload {}", upload_id)))?;

        let mut data = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            if part.part_number as usize != index + 1 {
                return Err(StorageError::remote(format!(
                    "parts out of order: expected {}, got {}",
                    index + 1,
                    part.part_number
                )));
            }
            match upload.parts.get(&part.part_number) {
                Some((token, bytes)) if *token == part.token => data.extend_from_slice(bytes),
                _ => {
                    return Err(StorageError::remote(format!(
                        "invalid token for part {}",
                        part.part_number
                    )))
                }
            }
        }

        self.store_object(&upload.bucket, &upload.key, data, upload.metadata);
        Ok(())
    }

    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) -> StorageResult<()> {
        let _call = ActiveCall::enter(self);
        self.record(StoreOp::AbortMultipart, bucket, key, None, None)?;

        self.lock().uploads.remove(upload_id);
        Ok(())
    }
}
