//! # BucketSync - Mirror Directories and Object-Storage Prefixes
//!
//! BucketSync makes a target collection mirror a source collection. A
//! collection is either a local directory tree or a bucket plus key prefix.
//! Three directions are supported: upload (local to bucket), download (bucket
//! to local) and copy (bucket to bucket, server-side).
//!
//! ## Features
//!
//! - **Streaming Diff**: Sorted merge of two lazy listings, no full snapshot in memory
//! - **Bounded Concurrency**: One shared budget for whole-object transfers and multipart parts
//! - **Multipart Uploads**: Large files are split into ranged parts, aborted on failure
//! - **Filters and Relocation**: Ordered include/exclude globs and prefix rewriting
//! - **Dry Run**: The exact plan a real run would execute, without any mutation
//! - **Cancellation**: A shared monitor stops admissions and unwinds in-flight work
//!
//! ## Quick Start
//!
//! ```no_run
//! use bucketsync::config::SyncOptions;
//! use bucketsync::core::SyncEngine;
//! use bucketsync::storage::{LocalFs, MemoryStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> bucketsync::Result<()> {
//! let engine = SyncEngine::new(Arc::new(LocalFs::new()), Arc::new(MemoryStore::new()));
//!
//! let options = SyncOptions {
//!     delete: true,
//!     ..Default::default()
//! };
//! let report = engine.sync_addresses("./site", "s3://bucket/www", &options).await?;
//! report.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Progress and Cancellation
//!
//! ```no_run
//! use bucketsync::config::SyncOptions;
//! use bucketsync::progress::TransferMonitor;
//! use std::sync::Arc;
//!
//! let monitor = Arc::new(TransferMonitor::new());
//! let options = SyncOptions::default().with_monitor(Arc::clone(&monitor));
//!
//! // From another task:
//! let progress = monitor.progress();
//! println!("{:.1}% done", progress.percentage());
//! monitor.cancel();
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod progress;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use config::{SyncOptions, SyncProfile};
pub use core::{SyncEngine, SyncReport};
pub use error::{Result, SyncError};
pub use progress::{ProgressReporter, TransferMonitor};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use bucketsync::prelude::*;
    //! ```

    pub use crate::config::{ProgressTotals, SyncOptions, SyncProfile};
    pub use crate::core::{SyncEngine, SyncReport};
    pub use crate::error::{Result, StorageError, SyncError};
    pub use crate::progress::{ProgressReporter, TransferMonitor, TransferProgress};
    pub use crate::storage::{LocalFs, LocalStore, Location, MemoryStore, MetadataOptions, RemoteStore, Scenario};
    pub use crate::sync::{FilterRule, Relocation, SyncOperation, TransferReason};
}
