//! Sync planning module
//!
//! Turns two collections into an ordered operation plan:
//! - Enumerators stream object descriptors in ascending key order
//! - The filter chain decides which source keys take part
//! - The key mapper relocates source keys into the target key space
//! - The diff engine merges both streams into transfers and deletes

mod diff;
mod enumerator;
mod filter;
mod operation;
mod relocation;

pub use diff::{policy_for, ComparePolicy, DiffEngine, SizeAndTimestamp, SizeOnly};
pub use enumerator::{DescriptorStream, Enumerator};
pub use filter::{FilterChain, FilterRule, KeyPredicate};
pub use operation::{OperationStream, SyncOperation, TransferReason};
pub use relocation::{KeyMapper, Relocation};
