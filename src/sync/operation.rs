//! Planned sync operations

use crate::error::Result;
use crate::storage::ObjectDescriptor;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lazy, ordered operation plan
pub type OperationStream = BoxStream<'static, Result<SyncOperation>>;

/// Why an object is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferReason {
    /// Key does not exist in the target
    NotInTarget,
    /// Sizes differ
    SizeDiffers,
    /// Source was modified after the target
    TimestampNewer,
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotInTarget => "new",
            Self::SizeDiffers => "size differs",
            Self::TimestampNewer => "source newer",
        };
        f.write_str(text)
    }
}

/// One step of a sync plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOperation {
    /// Create or update `target_key` from `source`
    Transfer {
        source: ObjectDescriptor,
        target_key: String,
        reason: TransferReason,
    },
    /// Remove `target_key` from the target
    Delete { target_key: String },
}

impl SyncOperation {
    /// Key of the object in the target collection
    pub fn target_key(&self) -> &str {
        match self {
            Self::Transfer { target_key, .. } | Self::Delete { target_key } => target_key,
        }
    }

    /// Bytes this operation moves
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Transfer { source, .. } => source.size,
            Self::Delete { .. } => 0,
        }
    }

    /// Is this a delete?
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer {
                source,
                target_key,
                reason,
            } if source.key == *target_key => write!(f, "transfer {} ({})", target_key, reason),
            Self::Transfer {
                source,
                target_key,
                reason,
            } => write!(f, "transfer {} -> {} ({})", source.key, target_key, reason),
            Self::Delete { target_key } => write!(f, "delete {}", target_key),
        }
    }
}
