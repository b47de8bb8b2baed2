//! Progress and cancellation
//!
//! The [`TransferMonitor`] is the only state shared between concurrently
//! running operations. [`ProgressReporter`] draws it as progress bars.

mod monitor;
mod reporter;

pub use monitor::{TransferMonitor, TransferProgress};
pub use reporter::ProgressReporter;
