//! Collaborators bound to a resolved scenario

use crate::error::{Result, SyncError};
use crate::storage::{full_key, LocalStore, Location, RemoteStore, Scenario};
use crate::sync::Enumerator;
use std::path::PathBuf;
use std::sync::Arc;

/// Where objects are read from and written to during one sync run
#[derive(Clone)]
pub enum Route {
    /// Local tree to bucket
    Upload {
        local: Arc<dyn LocalStore>,
        root: PathBuf,
        remote: Arc<dyn RemoteStore>,
        bucket: String,
        prefix: String,
    },
    /// Bucket to local tree
    Download {
        remote: Arc<dyn RemoteStore>,
        bucket: String,
        prefix: String,
        local: Arc<dyn LocalStore>,
        root: PathBuf,
    },
    /// Bucket to bucket through server-side copies
    Copy {
        remote: Arc<dyn RemoteStore>,
        source_bucket: String,
        source_prefix: String,
        target_bucket: String,
        target_prefix: String,
    },
}

impl Route {
    /// Bind the collaborators to a source/target pair
    pub fn resolve(
        source: &Location,
        target: &Location,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        // Rejects local -> local with a descriptive message
        Scenario::resolve(source, target)?;

        let route = match (source, target) {
            (Location::Local { root }, Location::Remote { bucket, prefix }) => Self::Upload {
                local,
                root: root.clone(),
                remote,
                bucket: bucket.clone(),
                prefix: prefix.clone(),
            },
            (Location::Remote { bucket, prefix }, Location::Local { root }) => Self::Download {
                remote,
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                local,
                root: root.clone(),
            },
            (
                Location::Remote {
                    bucket: source_bucket,
                    prefix: source_prefix,
                },
                Location::Remote {
                    bucket: target_bucket,
                    prefix: target_prefix,
                },
            ) => Self::Copy {
                remote,
                source_bucket: source_bucket.clone(),
                source_prefix: source_prefix.clone(),
                target_bucket: target_bucket.clone(),
                target_prefix: target_prefix.clone(),
            },
            (Location::Local { .. }, Location::Local { .. }) => {
                return Err(SyncError::config("both collections are local"))
            }
        };
        Ok(route)
    }

    pub fn scenario(&self) -> Scenario {
        match self {
            Self::Upload { .. } => Scenario::Upload,
            Self::Download { .. } => Scenario::Download,
            Self::Copy { .. } => Scenario::Copy,
        }
    }

    /// Enumerator over the source collection
    pub fn source(&self) -> Enumerator {
        match self {
            Self::Upload { local, root, .. } => Enumerator::Local {
                store: Arc::clone(local),
                root: root.clone(),
                missing_ok: false,
            },
            Self::Download {
                remote,
                bucket,
                prefix,
                ..
            } => Enumerator::Remote {
                store: Arc::clone(remote),
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                local_paths: true,
            },
            Self::Copy {
                remote,
                source_bucket,
                source_prefix,
                ..
            } => Enumerator::Remote {
                store: Arc::clone(remote),
                bucket: source_bucket.clone(),
                prefix: source_prefix.clone(),
                local_paths: false,
            },
        }
    }

    /// Enumerator over the target collection
    pub fn target(&self) -> Enumerator {
        match self {
            Self::Upload {
                remote,
                bucket,
                prefix,
                ..
            } => Enumerator::Remote {
                store: Arc::clone(remote),
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                local_paths: false,
            },
            Self::Download { local, root, .. } => Enumerator::Local {
                store: Arc::clone(local),
                root: root.clone(),
                missing_ok: true,
            },
            Self::Copy {
                remote,
                target_bucket,
                target_prefix,
                ..
            } => Enumerator::Remote {
                store: Arc::clone(remote),
                bucket: target_bucket.clone(),
                prefix: target_prefix.clone(),
                local_paths: false,
            },
        }
    }

    /// Full object key of a source key, for remote sources
    pub(crate) fn source_object_key(&self, key: &str) -> String {
        match self {
            Self::Download { prefix, .. } => full_key(prefix, key),
            Self::Copy { source_prefix, .. } => full_key(source_prefix, key),
            Self::Upload { .. } => key.to_string(),
        }
    }

    /// Full object key of a target key, for remote targets
    pub(crate) fn target_object_key(&self, key: &str) -> String {
        match self {
            Self::Upload { prefix, .. } => full_key(prefix, key),
            Self::Copy { target_prefix, .. } => full_key(target_prefix, key),
            Self::Download { .. } => key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalFs, MemoryStore};

    fn route(source: &str, target: &str) -> Result<Route> {
        Route::resolve(
            &Location::parse(source)?,
            &Location::parse(target)?,
            Arc::new(LocalFs::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    #[test]
    fn test_scenarios() {
        assert_eq!(route("/data", "s3://b/p").unwrap().scenario(), Scenario::Upload);
        assert_eq!(route("s3://b/p", "/data").unwrap().scenario(), Scenario::Download);
        assert_eq!(route("s3://a", "s3://b/p").unwrap().scenario(), Scenario::Copy);
        assert!(matches!(route("/a", "/b"), Err(e) if e.is_configuration()));
    }

    #[test]
    fn test_object_keys() {
        let copy = route("s3://a/in", "s3://b").unwrap();
        assert_eq!(copy.source_object_key("x/y"), "in/x/y");
        assert_eq!(copy.target_object_key("x/y"), "x/y");
        assert_eq!(copy.source().label(), "s3://a/in");
        assert_eq!(copy.target().label(), "s3://b");
    }
}
