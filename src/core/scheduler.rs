//! Transfer scheduling
//!
//! Executes an operation plan with bounded concurrency on the calling task:
//! - At most `max_concurrent_transfers` operations are pending at once
//! - Every collaborator call holds a permit of one shared budget, including
//!   the parts of multipart uploads
//! - The first failure trips the monitor's cancellation signal, in-flight
//!   operations unwind and the run reports that failure

use super::multipart::{needs_multipart, MultipartRequest, MultipartUpload};
use super::route::Route;
use super::Interrupt;
use crate::error::{Result, SyncError};
use crate::progress::TransferMonitor;
use crate::storage::{key_to_path, MetadataOptions, ObjectDescriptor};
use crate::sync::{OperationStream, SyncOperation};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Default number of concurrent transfers
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 4;

/// Default multipart part size (8 MiB)
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on simultaneously running operations and collaborator calls
    pub max_concurrent_transfers: usize,
    /// Uploads above this size use multipart sessions
    pub part_size: u64,
    /// Metadata applied to uploads and copies
    pub metadata: MetadataOptions,
    /// Register each operation with the monitor when it is admitted
    pub register_on_admit: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            part_size: DEFAULT_PART_SIZE,
            metadata: MetadataOptions::default(),
            register_on_admit: false,
        }
    }
}

/// Runs the operations of one sync call
pub struct TransferScheduler {
    route: Route,
    monitor: Arc<TransferMonitor>,
    budget: Semaphore,
    config: SchedulerConfig,
}

impl TransferScheduler {
    pub fn new(route: Route, monitor: Arc<TransferMonitor>, config: SchedulerConfig) -> Self {
        let max = config.max_concurrent_transfers.max(1);
        Self {
            route,
            monitor,
            budget: Semaphore::new(max),
            config: SchedulerConfig {
                max_concurrent_transfers: max,
                ..config
            },
        }
    }

    /// Execute `plan`, returning the completed operations in plan order
    ///
    /// Fails with the first terminal error; operations completed before it
    /// stay applied.
    pub async fn execute(&self, mut plan: OperationStream) -> Result<Vec<SyncOperation>> {
        let max = self.config.max_concurrent_transfers;
        let mut in_flight = FuturesUnordered::new();
        let mut completed: Vec<(usize, SyncOperation)> = Vec::new();
        let mut failure: Option<SyncError> = None;
        let mut exhausted = false;
        let mut admitted = 0usize;

        loop {
            let admitting = failure.is_none() && !exhausted && in_flight.len() < max;
            if !admitting && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.monitor.cancelled(), if failure.is_none() => {
                    tracing::info!(
                        "Cancellation observed, unwinding {} in-flight operations",
                        in_flight.len()
                    );
                    self.stop(SyncError::Cancelled, &mut failure);
                }

                Some((index, operation, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    match outcome {
                        Ok(()) => {
                            self.monitor.complete_object();
                            completed.push((index, operation));
                        }
                        Err(interrupt) => {
                            let error = Interrupt::into_error(interrupt, operation.target_key());
                            self.stop(error, &mut failure);
                        }
                    }
                }

                next = plan.next(), if admitting => match next {
                    None => exhausted = true,
                    Some(Err(e)) => self.stop(e, &mut failure),
                    Some(Ok(operation)) => {
                        if self.config.register_on_admit {
                            self.monitor.register(1, operation.bytes());
                        }
                        in_flight.push(self.run_one(admitted, operation));
                        admitted += 1;
                    }
                },

                else => break,
            }
        }

        if let Some(error) = failure {
            tracing::debug!(
                "{} of {} admitted operations completed before the run stopped",
                completed.len(),
                admitted
            );
            return Err(error);
        }

        completed.sort_by_key(|(index, _)| *index);
        Ok(completed.into_iter().map(|(_, operation)| operation).collect())
    }

    /// Record the first terminal error and unwind everything else
    fn stop(&self, error: SyncError, failure: &mut Option<SyncError>) {
        if failure.is_some() {
            tracing::debug!("Ignoring error after run stopped: {}", error);
            return;
        }
        if !error.is_cancellation() {
            tracing::error!("{}", error);
        }
        self.monitor.cancel();
        self.budget.close();
        *failure = Some(error);
    }

    async fn run_one(
        &self,
        index: usize,
        operation: SyncOperation,
    ) -> (usize, SyncOperation, std::result::Result<(), Interrupt>) {
        let outcome = async {
            let permit = self.budget.acquire().await.map_err(|_| Interrupt::Cancelled)?;
            if self.monitor.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            tracing::debug!("Starting {}", operation);
            self.perform(&operation, permit).await
        }
        .await;

        (index, operation, outcome)
    }

    async fn perform(
        &self,
        operation: &SyncOperation,
        permit: SemaphorePermit<'_>,
    ) -> std::result::Result<(), Interrupt> {
        match operation {
            SyncOperation::Delete { target_key } => {
                let _permit = permit;
                self.delete(target_key).await
            }
            SyncOperation::Transfer {
                source, target_key, ..
            } => self.transfer(source, target_key, permit).await,
        }
    }

    async fn delete(&self, target_key: &str) -> std::result::Result<(), Interrupt> {
        match &self.route {
            Route::Upload { remote, bucket, .. } | Route::Copy {
                remote,
                target_bucket: bucket,
                ..
            } => {
                let key = self.route.target_object_key(target_key);
                self.cancellable(async { Ok::<_, Interrupt>(remote.delete(bucket, &key).await?) })
                    .await
            }
            Route::Download { local, root, .. } => {
                let path = key_to_path(root, target_key)?;
                self.cancellable(async { Ok::<_, Interrupt>(local.remove(&path).await?) })
                    .await
            }
        }
    }

    async fn transfer(
        &self,
        source: &ObjectDescriptor,
        target_key: &str,
        permit: SemaphorePermit<'_>,
    ) -> std::result::Result<(), Interrupt> {
        let metadata = self.config.metadata.resolve(source, target_key);

        match &self.route {
            Route::Upload {
                local,
                root,
                remote,
                bucket,
                ..
            } => {
                let path = key_to_path(root, &source.key)?;
                let key = self.route.target_object_key(target_key);

                if needs_multipart(source.size, self.config.part_size) {
                    let upload = MultipartUpload {
                        local: local.as_ref(),
                        remote: remote.as_ref(),
                        budget: &self.budget,
                        monitor: &self.monitor,
                        part_size: self.config.part_size,
                        concurrency: self.config.max_concurrent_transfers,
                    };
                    let request = MultipartRequest {
                        path: &path,
                        size: source.size,
                        bucket,
                        key: &key,
                        metadata: &metadata,
                    };
                    return upload.run(request, permit).await;
                }

                let _permit = permit;
                self.cancellable(async {
                    let body = local.open(&path).await?;
                    remote.put(bucket, &key, body, source.size, &metadata).await?;
                    Ok::<_, Interrupt>(())
                })
                .await?;
                self.monitor.add_bytes(source.size);
                Ok(())
            }

            Route::Download {
                remote,
                bucket,
                local,
                root,
                ..
            } => {
                let _permit = permit;
                let key = self.route.source_object_key(&source.key);
                let path = key_to_path(root, target_key)?;

                let body = self
                    .cancellable(async { Ok::<_, Interrupt>(remote.get(bucket, &key).await?) })
                    .await?;
                let written = self
                    .cancellable(async {
                        Ok::<_, Interrupt>(local.write(&path, body, Some(source.last_modified)).await?)
                    })
                    .await;

                match written {
                    Ok(bytes) => {
                        self.monitor.add_bytes(bytes);
                        Ok(())
                    }
                    Err(interrupt) => {
                        // Never leave a truncated file behind
                        if let Err(e) = local.remove(&path).await {
                            tracing::warn!("Failed to remove partial file {}: {}", path.display(), e);
                        }
                        Err(interrupt)
                    }
                }
            }

            Route::Copy {
                remote,
                source_bucket,
                target_bucket,
                ..
            } => {
                let _permit = permit;
                let source_key = self.route.source_object_key(&source.key);
                let key = self.route.target_object_key(target_key);

                self.cancellable(async {
                    Ok::<_, Interrupt>(remote
                        .copy(source_bucket, &source_key, target_bucket, &key, &metadata)
                        .await?)
                })
                .await?;
                self.monitor.add_bytes(source.size);
                Ok(())
            }
        }
    }

    /// Race `work` against the cancellation signal
    async fn cancellable<T>(
        &self,
        work: impl Future<Output = std::result::Result<T, Interrupt>>,
    ) -> std::result::Result<T, Interrupt> {
        tokio::select! {
            biased;
            _ = self.monitor.cancelled() => Err(Interrupt::Cancelled),
            result = work => result,
        }
    }
}
