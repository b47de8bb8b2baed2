//! Collection addresses and scenario resolution

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// URI scheme for remote collections
const REMOTE_SCHEME: &str = "s3://";

/// Address of a collection: a local directory tree or a bucket + prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    /// Local directory tree
    Local {
        /// Root directory
        root: PathBuf,
    },
    /// Bucket with an optional key prefix (no leading/trailing `/`)
    Remote {
        /// Bucket name
        bucket: String,
        /// Key prefix, empty for the whole bucket
        prefix: String,
    },
}

impl Location {
    /// Parse `s3://bucket/prefix` or a local path
    pub fn parse(address: &str) -> Result<Self> {
        let Some(rest) = address.strip_prefix(REMOTE_SCHEME) else {
            if address.trim().is_empty() {
                return Err(SyncError::InvalidAddress("empty path".to_string()));
            }
            return Ok(Self::local(address));
        };

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(SyncError::InvalidAddress(format!(
                "missing bucket name in '{}'",
                address
            )));
        }

        Ok(Self::remote(bucket, prefix))
    }

    /// Local collection rooted at `root`
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::Local { root: root.into() }
    }

    /// Remote collection; surrounding `/` on the prefix are dropped
    pub fn remote(bucket: impl Into<String>, prefix: &str) -> Self {
        Self::Remote {
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Is this a local directory tree?
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { root } => write!(f, "{}", root.display()),
            Self::Remote { bucket, prefix } if prefix.is_empty() => {
                write!(f, "{}{}", REMOTE_SCHEME, bucket)
            }
            Self::Remote { bucket, prefix } => write!(f, "{}{}/{}", REMOTE_SCHEME, bucket, prefix),
        }
    }
}

/// Direction of a sync run, decided from the shape of both addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Local tree to bucket
    Upload,
    /// Bucket to local tree
    Download,
    /// Bucket to bucket, server-side copies
    Copy,
}

impl Scenario {
    /// Resolve the scenario for a source/target pair
    pub fn resolve(source: &Location, target: &Location) -> Result<Self> {
        match (source.is_local(), target.is_local()) {
            (true, false) => Ok(Self::Upload),
            (false, true) => Ok(Self::Download),
            (false, false) => Ok(Self::Copy),
            (true, true) => Err(SyncError::config(format!(
                "cannot sync two local directories ('{}' -> '{}'); one side must be a bucket",
                source, target
            ))),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Copy => "copy",
        };
        f.write_str(name)
    }
}
