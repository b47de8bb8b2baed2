//! Core sync engine module
//!
//! Provides the sync orchestration, the bounded-concurrency transfer
//! scheduler and the multipart upload strategy.

mod engine;
mod multipart;
mod route;
mod scheduler;

pub use engine::{SyncEngine, SyncReport};
pub use multipart::{needs_multipart, part_ranges, PartRange};
pub use route::Route;
pub use scheduler::{
    SchedulerConfig, TransferScheduler, DEFAULT_MAX_CONCURRENT_TRANSFERS, DEFAULT_PART_SIZE,
};

use crate::error::{StorageError, SyncError, TransferCause};

/// Why a single operation stopped early
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// The monitor's cancellation signal was observed
    Cancelled,
    /// A collaborator call failed
    Failed(TransferCause),
}

impl Interrupt {
    /// Attach the operation's target key
    fn into_error(self, key: &str) -> SyncError {
        match self {
            Self::Cancelled => SyncError::Cancelled,
            Self::Failed(cause) => SyncError::transfer(key, cause),
        }
    }
}

impl From<StorageError> for Interrupt {
    fn from(e: StorageError) -> Self {
        Self::Failed(e.into())
    }
}
