//! Diff engine
//!
//! Merges a source and a target descriptor stream, both in ascending key
//! order, into an ordered plan of transfers and deletes. Source keys are
//! filtered on their original name and relocated before they are matched
//! against target keys.

use crate::error::{Result, StorageError, SyncError};
use crate::storage::ObjectDescriptor;
use crate::sync::enumerator::DescriptorStream;
use crate::sync::filter::FilterChain;
use crate::sync::operation::{OperationStream, SyncOperation, TransferReason};
use crate::sync::relocation::KeyMapper;
use futures::stream::{self, BoxStream, Fuse, StreamExt, TryStreamExt};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::sync::Arc;

/// Decides whether an object present on both sides must be re-transferred
pub trait ComparePolicy: Debug + Send + Sync {
    /// `Some(reason)` when `source` should replace `target`
    fn compare(&self, source: &ObjectDescriptor, target: &ObjectDescriptor) -> Option<TransferReason>;
}

/// Default policy: sizes differ, or the source is strictly newer
///
/// Timestamps are compared at whole-second precision since object stores
/// commonly report modification times truncated to seconds. A same-size
/// edit made within the same second as the previous transfer is therefore
/// not detected; use a different size or a later run to pick it up.
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeAndTimestamp;

impl ComparePolicy for SizeAndTimestamp {
    fn compare(&self, source: &ObjectDescriptor, target: &ObjectDescriptor) -> Option<TransferReason> {
        if source.size != target.size {
            Some(TransferReason::SizeDiffers)
        } else if source.last_modified.timestamp() > target.last_modified.timestamp() {
            Some(TransferReason::TimestampNewer)
        } else {
            None
        }
    }
}

/// Size is authoritative; timestamps are ignored
#[derive(Debug, Clone, Copy, Default)]
pub struct SizeOnly;

impl ComparePolicy for SizeOnly {
    fn compare(&self, source: &ObjectDescriptor, target: &ObjectDescriptor) -> Option<TransferReason> {
        (source.size != target.size).then_some(TransferReason::SizeDiffers)
    }
}

/// Policy selected by the `size_only` option
pub fn policy_for(size_only: bool) -> Arc<dyn ComparePolicy> {
    if size_only {
        Arc::new(SizeOnly)
    } else {
        Arc::new(SizeAndTimestamp)
    }
}

/// Source descriptor paired with the key it maps to in the target
#[derive(Debug)]
struct Candidate {
    target_key: String,
    source: ObjectDescriptor,
}

type CandidateStream = BoxStream<'static, Result<Candidate>>;

/// Builds operation plans from two collections
#[derive(Debug, Clone)]
pub struct DiffEngine {
    filters: FilterChain,
    mapper: KeyMapper,
    policy: Arc<dyn ComparePolicy>,
    delete: bool,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(Arc::new(SizeAndTimestamp))
    }
}

impl DiffEngine {
    pub fn new(policy: Arc<dyn ComparePolicy>) -> Self {
        Self {
            filters: FilterChain::default(),
            mapper: KeyMapper::default(),
            policy,
            delete: false,
        }
    }

    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_mapper(mut self, mapper: KeyMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Emit deletes for keys only present in the target
    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Merge `source` and `target` into a lazy plan in ascending target-key order
    ///
    /// `source_label` and `target_label` name the collections in ordering
    /// errors. The first error from either side ends the plan.
    pub fn plan(
        &self,
        source: DescriptorStream,
        source_label: &str,
        target: DescriptorStream,
        target_label: &str,
    ) -> OperationStream {
        let candidates = self.candidates(ensure_ascending(source, source_label));
        let state = Merge {
            source: candidates.fuse(),
            target: ensure_ascending(target, target_label).fuse(),
            source_head: None,
            target_head: None,
            policy: Arc::clone(&self.policy),
            delete: self.delete,
        };

        stream::try_unfold(state, Merge::next_operation).boxed()
    }

    /// Filter and relocate source descriptors
    fn candidates(&self, source: DescriptorStream) -> CandidateStream {
        let filters = self.filters.clone();
        let mapper = self.mapper.clone();

        let mapped = source.try_filter_map(move |descriptor| {
            let candidate = if filters.accepts(&descriptor.key) {
                Some(Candidate {
                    target_key: mapper.map(&descriptor.key),
                    source: descriptor,
                })
            } else {
                tracing::trace!("Filtered out {}", descriptor.key);
                None
            };
            futures::future::ready(Ok::<_, SyncError>(candidate))
        });

        if self.mapper.is_identity() {
            return mapped.boxed();
        }

        // Relocation can reorder keys, so the source side is materialized
        stream::once(async move {
            let candidates = mapped.try_collect::<Vec<_>>().await?;
            Ok::<_, SyncError>(stream::iter(resort(candidates).into_iter().map(Ok::<_, SyncError>)))
        })
        .try_flatten()
        .boxed()
    }
}

/// Sort by target key; the first source key mapping to a target key wins
fn resort(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.target_key.cmp(&b.target_key));

    let mut unique: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match unique.last() {
            Some(kept) if kept.target_key == candidate.target_key => {
                tracing::warn!(
                    "'{}' and '{}' both relocate to '{}', skipping '{}'",
                    kept.source.key,
                    candidate.source.key,
                    candidate.target_key,
                    candidate.source.key
                );
            }
            _ => unique.push(candidate),
        }
    }
    unique
}

/// Reject a listing whose keys are not strictly ascending
fn ensure_ascending(stream: DescriptorStream, label: &str) -> DescriptorStream {
    let label = label.to_string();
    let mut previous: Option<String> = None;

    stream
        .map(move |item| {
            let descriptor = item?;
            if let Some(prev) = previous.as_deref() {
                if descriptor.key.as_str() <= prev {
                    return Err(SyncError::enumeration(
                        label.clone(),
                        StorageError::OutOfOrder {
                            previous: prev.to_string(),
                            key: descriptor.key,
                        },
                    ));
                }
            }
            previous = Some(descriptor.key.clone());
            Ok(descriptor)
        })
        .boxed()
}

/// Two-pointer merge state
struct Merge {
    source: Fuse<CandidateStream>,
    target: Fuse<DescriptorStream>,
    source_head: Option<Candidate>,
    target_head: Option<ObjectDescriptor>,
    policy: Arc<dyn ComparePolicy>,
    delete: bool,
}

impl Merge {
    async fn next_operation(mut self) -> Result<Option<(SyncOperation, Self)>> {
        loop {
            let source = match self.source_head.take() {
                Some(candidate) => Some(candidate),
                None => self.source.try_next().await?,
            };

            // Without deletes the rest of the target cannot produce operations
            if source.is_none() && !self.delete {
                return Ok(None);
            }

            let target = match self.target_head.take() {
                Some(descriptor) => Some(descriptor),
                None => self.target.try_next().await?,
            };

            let operation = match (source, target) {
                (None, None) => return Ok(None),
                (Some(candidate), None) => Some(transfer(candidate, TransferReason::NotInTarget)),
                (None, Some(target)) => self.delete_of(target),
                (Some(candidate), Some(target)) => match candidate.target_key.as_str().cmp(target.key.as_str()) {
                    Ordering::Less => {
                        self.target_head = Some(target);
                        Some(transfer(candidate, TransferReason::NotInTarget))
                    }
                    Ordering::Greater => {
                        self.source_head = Some(candidate);
                        self.delete_of(target)
                    }
                    Ordering::Equal => self
                        .policy
                        .compare(&candidate.source, &target)
                        .map(|reason| transfer(candidate, reason)),
                },
            };

            if let Some(operation) = operation {
                return Ok(Some((operation, self)));
            }
        }
    }

    fn delete_of(&self, target: ObjectDescriptor) -> Option<SyncOperation> {
        self.delete.then(|| SyncOperation::Delete {
            target_key: target.key,
        })
    }
}

fn transfer(candidate: Candidate, reason: TransferReason) -> SyncOperation {
    SyncOperation::Transfer {
        source: candidate.source,
        target_key: candidate.target_key,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{FilterRule, Relocation};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn listing(entries: &[(&str, u64, i64)]) -> DescriptorStream {
        let descriptors: Vec<Result<ObjectDescriptor>> = entries
            .iter()
            .map(|(key, size, secs)| {
                Ok(ObjectDescriptor::remote(*key, *size, epoch() + Duration::seconds(*secs)))
            })
            .collect();
        stream::iter(descriptors).boxed()
    }

    async fn run(engine: &DiffEngine, source: DescriptorStream, target: DescriptorStream) -> Result<Vec<SyncOperation>> {
        engine.plan(source, "source", target, "target").try_collect().await
    }

    fn summary(plan: &[SyncOperation]) -> Vec<String> {
        plan.iter()
            .map(|op| match op {
                SyncOperation::Transfer { target_key, reason, .. } => format!("+{} {:?}", target_key, reason),
                SyncOperation::Delete { target_key } => format!("-{}", target_key),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_merge_classifies_keys() {
        let engine = DiffEngine::default().with_delete(true);
        let source = listing(&[("a", 1, 0), ("b", 2, 0), ("c", 3, 10), ("e", 5, 0)]);
        let target = listing(&[("b", 2, 0), ("c", 3, 0), ("d", 4, 0), ("e", 6, 0)]);

        let plan = run(&engine, source, target).await.unwrap();
        assert_eq!(
            summary(&plan),
            vec!["+a NotInTarget", "+c TimestampNewer", "-d", "+e SizeDiffers"]
        );
    }

    #[tokio::test]
    async fn test_deletes_only_when_enabled() {
        let engine = DiffEngine::default();
        let plan = run(&engine, listing(&[("b", 1, 0)]), listing(&[("a", 1, 0), ("c", 1, 0)]))
            .await
            .unwrap();
        assert_eq!(summary(&plan), vec!["+b NotInTarget"]);
    }

    #[tokio::test]
    async fn test_target_newer_or_equal_is_skipped() {
        let engine = DiffEngine::default();
        let plan = run(&engine, listing(&[("a", 1, 0), ("b", 1, 0)]), listing(&[("a", 1, 0), ("b", 1, 30)]))
            .await
            .unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_subsecond_difference_is_not_newer() {
        let engine = DiffEngine::default();
        let source = stream::iter(vec![Ok(ObjectDescriptor::local(
            "a",
            1,
            epoch() + Duration::milliseconds(900),
        ))])
        .boxed();
        let plan = run(&engine, source, listing(&[("a", 1, 0)])).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_size_only_ignores_timestamps() {
        let engine = DiffEngine::new(policy_for(true));
        let plan = run(&engine, listing(&[("a", 1, 500), ("b", 2, 0)]), listing(&[("a", 1, 0), ("b", 3, 0)]))
            .await
            .unwrap();
        assert_eq!(summary(&plan), vec!["+b SizeDiffers"]);
    }

    #[tokio::test]
    async fn test_filtered_keys_are_dropped() {
        let filters = FilterChain::new(vec![
            FilterRule::exclude("*").unwrap(),
            FilterRule::include("*.txt").unwrap(),
        ]);
        let engine = DiffEngine::default().with_filters(filters);
        let plan = run(&engine, listing(&[("a.txt", 1, 0), ("b.md", 1, 0)]), listing(&[]))
            .await
            .unwrap();
        assert_eq!(summary(&plan), vec!["+a.txt NotInTarget"]);
    }

    #[tokio::test]
    async fn test_relocation_reorders_and_keeps_source_key() {
        let mapper = KeyMapper::new(vec![Relocation::new("a/b", "zzz")]);
        let engine = DiffEngine::default().with_mapper(mapper).with_delete(true);

        let source = listing(&[("a/b/c.txt", 1, 0), ("m.txt", 1, 0)]);
        let target = listing(&[("m.txt", 1, 0), ("zzz/c.txt", 2, 0)]);
        let plan = run(&engine, source, target).await.unwrap();

        assert_eq!(summary(&plan), vec!["+zzz/c.txt SizeDiffers"]);
        match &plan[0] {
            SyncOperation::Transfer { source, .. } => assert_eq!(source.key, "a/b/c.txt"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relocation_collision_first_wins() {
        let mapper = KeyMapper::new(vec![
            Relocation::new("x/", "same/"),
            Relocation::new("y/", "same/"),
        ]);
        let engine = DiffEngine::default().with_mapper(mapper);
        let plan = run(&engine, listing(&[("x/f", 1, 0), ("y/f", 2, 0)]), listing(&[]))
            .await
            .unwrap();

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].bytes(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_listing_is_rejected() {
        let engine = DiffEngine::default().with_delete(true);
        let result = run(&engine, listing(&[("b", 1, 0), ("a", 1, 0)]), listing(&[])).await;
        assert!(matches!(
            result,
            Err(SyncError::Enumeration {
                source: StorageError::OutOfOrder { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_source_error_ends_plan() {
        let engine = DiffEngine::default();
        let source = stream::iter(vec![
            Ok(ObjectDescriptor::remote("a", 1, epoch())),
            Err(SyncError::enumeration("source", StorageError::remote("boom"))),
        ])
        .boxed();
        let result = run(&engine, source, listing(&[])).await;
        assert!(matches!(result, Err(SyncError::Enumeration { .. })));
    }

    fn state() -> impl Strategy<Value = BTreeMap<String, (u64, i64)>> {
        prop::collection::btree_map("[a-c]{1,3}(/[a-c]{1,2})?", (0u64..4, 0i64..3), 0..24)
    }

    fn as_listing(map: &BTreeMap<String, (u64, i64)>) -> DescriptorStream {
        let descriptors: Vec<Result<ObjectDescriptor>> = map
            .iter()
            .map(|(key, (size, secs))| {
                Ok(ObjectDescriptor::remote(key.clone(), *size, epoch() + Duration::seconds(*secs)))
            })
            .collect();
        stream::iter(descriptors).boxed()
    }

    proptest! {
        #[test]
        fn prop_plan_is_ordered_and_deletes_exactly_missing(
            source in state(),
            target in state(),
            delete in any::<bool>(),
        ) {
            let engine = DiffEngine::default().with_delete(delete);
            let plan = tokio_test::block_on(run(&engine, as_listing(&source), as_listing(&target))).unwrap();

            let keys: Vec<&str> = plan.iter().map(|op| op.target_key()).collect();
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));

            let deleted: Vec<&str> = plan.iter().filter(|op| op.is_delete()).map(|op| op.target_key()).collect();
            let expected: Vec<&str> = if delete {
                target.keys().filter(|k| !source.contains_key(*k)).map(String::as_str).collect()
            } else {
                Vec::new()
            };
            prop_assert_eq!(deleted, expected);

            for key in source.keys().filter(|k| !target.contains_key(*k)) {
                prop_assert!(keys.contains(&key.as_str()));
            }
        }

        #[test]
        fn prop_applying_plan_converges(source in state(), target in state()) {
            let engine = DiffEngine::new(policy_for(true)).with_delete(true);
            let plan = tokio_test::block_on(run(&engine, as_listing(&source), as_listing(&target))).unwrap();

            let mut applied = target.clone();
            for op in &plan {
                match op {
                    SyncOperation::Transfer { source: descriptor, target_key, .. } => {
                        applied.insert(target_key.clone(), (descriptor.size, 0));
                    }
                    SyncOperation::Delete { target_key } => {
                        applied.remove(target_key);
                    }
                }
            }

            let second = tokio_test::block_on(run(&engine, as_listing(&source), as_listing(&applied))).unwrap();
            prop_assert!(second.is_empty());
        }
    }
}
