//! Transfer monitor
//!
//! Shared progress counters and the cancellation signal of a sync run.
//! Counters live in a `watch` channel and are only changed through
//! `send_modify`, so concurrent increments are never lost and subscribers
//! always see the latest totals.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, Notify};

/// Progress counters of a sync run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferProgress {
    /// Bytes transferred so far
    pub bytes_current: u64,
    /// Bytes registered for transfer
    pub bytes_total: u64,
    /// Operations finished so far
    pub objects_current: u64,
    /// Operations registered
    pub objects_total: u64,
}

impl TransferProgress {
    /// Completion by bytes, falling back to objects when no bytes are planned
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_current as f64 / self.bytes_total as f64) * 100.0
        } else if self.objects_total > 0 {
            (self.objects_current as f64 / self.objects_total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// All registered operations have finished
    pub fn is_complete(&self) -> bool {
        self.objects_current >= self.objects_total
    }
}

/// Progress accumulator and cancellation trigger observable by the caller
///
/// A monitor may be reused for several runs; call [`TransferMonitor::reset`]
/// in between. The engine never resets it on its own.
#[derive(Debug)]
pub struct TransferMonitor {
    progress: watch::Sender<TransferProgress>,
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for TransferMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferMonitor {
    pub fn new() -> Self {
        let (progress, _) = watch::channel(TransferProgress::default());
        Self {
            progress,
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Current counters
    pub fn progress(&self) -> TransferProgress {
        *self.progress.borrow()
    }

    /// Receive every counter change
    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    /// Add operations and bytes to the totals
    pub fn register(&self, objects: u64, bytes: u64) {
        self.progress.send_modify(|p| {
            p.objects_total += objects;
            p.bytes_total += bytes;
        });
    }

    /// Record transferred bytes
    pub fn add_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.progress.send_modify(|p| p.bytes_current += bytes);
        }
    }

    /// Record a finished operation
    pub fn complete_object(&self) {
        self.progress.send_modify(|p| p.objects_current += 1);
    }

    /// Request cancellation
    ///
    /// Returns true if this call set the signal; once set it stays set until
    /// [`TransferMonitor::reset`].
    pub fn cancel(&self) -> bool {
        let transitioned = self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if transitioned {
            tracing::debug!("Cancellation requested");
            self.notify.notify_waiters();
        }
        transitioned
    }

    /// Has cancellation been requested?
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Clear counters and the cancellation signal for another run
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.progress.send_modify(|p| *p = TransferProgress::default());
    }
}
