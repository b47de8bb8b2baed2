//! Multipart upload strategy
//!
//! Files larger than the part size are split into consecutive byte ranges.
//! Every part read and upload runs under a permit of the global transfer
//! budget, so parts compete with top-level operations instead of fanning
//! out on their own. A session that fails or is cancelled is aborted.

use super::Interrupt;
use crate::error::{MultipartError, MultipartStage, StorageError};
use crate::progress::TransferMonitor;
use crate::storage::{CompletedPart, LocalStore, RemoteStore, ResolvedMetadata};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::Path;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Byte range of one part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number
    pub number: u32,
    pub offset: u64,
    pub len: u64,
}

/// Does an object of `size` bytes need the multipart path?
pub fn needs_multipart(size: u64, part_size: u64) -> bool {
    size > part_size
}

/// Split `size` bytes into parts of `part_size`; the last part may be shorter
pub fn part_ranges(size: u64, part_size: u64) -> Vec<PartRange> {
    let part_size = part_size.max(1);
    let mut parts = Vec::with_capacity(((size + part_size - 1) / part_size) as usize);
    let mut offset = 0;
    let mut number = 1;

    while offset < size {
        let len = part_size.min(size - offset);
        parts.push(PartRange {
            number,
            offset,
            len,
        });
        offset += len;
        number += 1;
    }
    parts
}

/// Object to upload in parts
pub(crate) struct MultipartRequest<'r> {
    pub path: &'r Path,
    pub size: u64,
    pub bucket: &'r str,
    pub key: &'r str,
    pub metadata: &'r ResolvedMetadata,
}

/// Executes one multipart session
pub(crate) struct MultipartUpload<'a> {
    pub local: &'a dyn LocalStore,
    pub remote: &'a dyn RemoteStore,
    pub budget: &'a Semaphore,
    pub monitor: &'a TransferMonitor,
    pub part_size: u64,
    /// Parts kept pending at once; each still waits for a budget permit
    pub concurrency: usize,
}

impl MultipartUpload<'_> {
    /// Upload `request`; `permit` is the caller's admission permit and is
    /// released as soon as the session exists
    pub async fn run(
        &self,
        request: MultipartRequest<'_>,
        permit: SemaphorePermit<'_>,
    ) -> Result<(), Interrupt> {
        let upload_id = self
            .remote
            .create_multipart(request.bucket, request.key, request.metadata)
            .await?;
        drop(permit);

        tracing::debug!(
            "Multipart upload {} for {} ({} bytes)",
            upload_id,
            request.key,
            request.size
        );

        let outcome = tokio::select! {
            biased;
            _ = self.monitor.cancelled() => Err(Interrupt::Cancelled),
            result = self.finish(&request, &upload_id) => result,
        };

        if outcome.is_err() {
            self.abort(&request, &upload_id).await;
        }
        outcome
    }

    async fn finish(&self, request: &MultipartRequest<'_>, upload_id: &str) -> Result<(), Interrupt> {
        let mut parts: Vec<CompletedPart> = stream::iter(part_ranges(request.size, self.part_size))
            .map(|range| self.upload_part(request, upload_id, range))
            .buffer_unordered(self.concurrency.max(1))
            .try_collect()
            .await?;
        parts.sort_by_key(|part| part.part_number);

        let _permit = self.budget.acquire().await.map_err(|_| Interrupt::Cancelled)?;
        self.remote
            .complete_multipart(request.bucket, request.key, upload_id, &parts)
            .await
            .map_err(|source| failed(upload_id, MultipartStage::Complete, source))
    }

    async fn upload_part(
        &self,
        request: &MultipartRequest<'_>,
        upload_id: &str,
        range: PartRange,
    ) -> Result<CompletedPart, Interrupt> {
        let _permit = self.budget.acquire().await.map_err(|_| Interrupt::Cancelled)?;
        if self.monitor.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }

        let stage = MultipartStage::Part(range.number);
        let body = self
            .local
            .read_range(request.path, range.offset, range.len)
            .await
            .map_err(|source| failed(upload_id, stage, source))?;
        let token = self
            .remote
            .upload_part(request.bucket, request.key, upload_id, range.number, body)
            .await
            .map_err(|source| failed(upload_id, stage, source))?;

        self.monitor.add_bytes(range.len);
        Ok(CompletedPart {
            part_number: range.number,
            token,
        })
    }

    async fn abort(&self, request: &MultipartRequest<'_>, upload_id: &str) {
        match self
            .remote
            .abort_multipart(request.bucket, request.key, upload_id)
            .await
        {
            Ok(()) => tracing::warn!("Aborted multipart upload {} for {}", upload_id, request.key),
            Err(e) => tracing::warn!(
                "Failed to abort multipart upload {} for {}: {}",
                upload_id,
                request.key,
                e
            ),
        }
    }
}

fn failed(upload_id: &str, stage: MultipartStage, source: StorageError) -> Interrupt {
    Interrupt::Failed(
        MultipartError {
            upload_id: upload_id.to_string(),
            stage,
            source,
        }
        .into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalFs, MemoryStore, StoreOp};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_part_boundary() {
        assert!(!needs_multipart(100, 100));
        assert!(needs_multipart(101, 100));

        let parts = part_ranges(101, 100);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], PartRange { number: 1, offset: 0, len: 100 });
        assert_eq!(parts[1], PartRange { number: 2, offset: 100, len: 1 });

        let even = part_ranges(300, 100);
        assert_eq!(even.len(), 3);
        assert!(even.iter().all(|p| p.len == 100));
        assert!(part_ranges(0, 100).is_empty());
    }

    struct Fixture {
        _dir: TempDir,
        path: std::path::PathBuf,
        local: LocalFs,
        remote: Arc<MemoryStore>,
        budget: Semaphore,
        monitor: TransferMonitor,
    }

    fn fixture(data: &[u8]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, data).unwrap();
        Fixture {
            _dir: dir,
            path,
            local: LocalFs::new(),
            remote: Arc::new(MemoryStore::new()),
            budget: Semaphore::new(2),
            monitor: TransferMonitor::new(),
        }
    }

    async fn upload(f: &Fixture, size: u64) -> Result<(), Interrupt> {
        let upload = MultipartUpload {
            local: &f.local,
            remote: f.remote.as_ref(),
            budget: &f.budget,
            monitor: &f.monitor,
            part_size: 4,
            concurrency: 2,
        };
        let metadata = ResolvedMetadata::default();
        let request = MultipartRequest {
            path: &f.path,
            size,
            bucket: "bucket",
            key: "big.bin",
            metadata: &metadata,
        };
        let permit = f.budget.acquire().await.unwrap();
        upload.run(request, permit).await
    }

    #[tokio::test]
    async fn test_upload_in_parts() {
        let data = b"0123456789".to_vec();
        let f = fixture(&data);

        upload(&f, data.len() as u64).await.unwrap();

        assert_eq!(f.remote.object("bucket", "big.bin").unwrap(), data);
        let parts: Vec<_> = f
            .remote
            .calls()
            .into_iter()
            .filter(|c| c.op == StoreOp::UploadPart)
            .map(|c| c.len)
            .collect();
        assert_eq!(parts.len(), 3);
        assert!(parts.contains(&Some(2)));
        assert_eq!(f.monitor.progress().bytes_current, 10);
        assert_eq!(f.budget.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_session() {
        let f = fixture(b"0123456789");
        f.remote.fail_on(StoreOp::UploadPart, "big");

        let result = upload(&f, 10).await;
        assert!(matches!(result, Err(Interrupt::Failed(_))));
        assert_eq!(f.remote.open_uploads(), 0);
        assert!(f
            .remote
            .calls()
            .iter()
            .any(|c| c.op == StoreOp::AbortMultipart));
        assert!(f.remote.object("bucket", "big.bin").is_none());
    }

    #[tokio::test]
    async fn test_cancelled_session_is_aborted() {
        let f = fixture(b"0123456789");
        f.monitor.cancel();

        let result = upload(&f, 10).await;
        assert!(matches!(result, Err(Interrupt::Cancelled)));
        assert_eq!(f.remote.open_uploads(), 0);
    }
}
