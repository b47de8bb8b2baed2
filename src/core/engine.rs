//! Sync orchestration
//!
//! Resolves the scenario from both collection addresses, wires enumerators,
//! filters, relocations and the diff engine into a plan, and either returns
//! the plan (dry run) or executes it through the scheduler.

use super::route::Route;
use super::scheduler::{SchedulerConfig, TransferScheduler};
use crate::config::{ProgressTotals, SyncOptions};
use crate::error::{Result, SyncError};
use crate::progress::TransferMonitor;
use crate::storage::{LocalStore, Location, RemoteStore, Scenario};
use crate::sync::{policy_for, DiffEngine, FilterChain, KeyMapper, OperationStream, SyncOperation};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Outcome of a sync call
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub scenario: Scenario,
    /// Executed operations, or the planned ones for a dry run, in plan order
    pub operations: Vec<SyncOperation>,
    pub dry_run: bool,
    pub bytes_transferred: u64,
    pub objects_transferred: u64,
    pub objects_deleted: u64,
    pub duration: Duration,
}

impl SyncReport {
    fn new(scenario: Scenario, operations: Vec<SyncOperation>, dry_run: bool, duration: Duration) -> Self {
        let objects_deleted = operations.iter().filter(|op| op.is_delete()).count() as u64;
        Self {
            scenario,
            bytes_transferred: operations.iter().map(SyncOperation::bytes).sum(),
            objects_transferred: operations.len() as u64 - objects_deleted,
            objects_deleted,
            operations,
            dry_run,
            duration,
        }
    }

    /// Did the run change (or plan to change) nothing?
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        let heading = if self.dry_run { "Sync Plan (dry run)" } else { "Sync Summary" };
        println!("\n=== {} ===", heading);
        println!("Scenario:        {}", self.scenario);
        println!("Transfers:       {}", self.objects_transferred);
        println!("Deletes:         {}", self.objects_deleted);
        println!(
            "Bytes:           {}",
            humansize::format_size(self.bytes_transferred, humansize::BINARY)
        );
        println!("Duration:        {:.2?}", self.duration);

        if !self.dry_run && self.duration.as_secs_f64() > 0.0 {
            let throughput = self.bytes_transferred as f64 / self.duration.as_secs_f64();
            println!(
                "Throughput:      {}/s",
                humansize::format_size(throughput as u64, humansize::BINARY)
            );
        }
    }
}

/// Entry point for sync calls
///
/// Holds the storage collaborators; every call resolves its own scenario.
#[derive(Clone)]
pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
}

impl SyncEngine {
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { local, remote }
    }

    /// Parse both addresses and sync
    pub async fn sync_addresses(&self, source: &str, target: &str, options: &SyncOptions) -> Result<SyncReport> {
        let source = Location::parse(source)?;
        let target = Location::parse(target)?;
        self.sync(&source, &target, options).await
    }

    /// Make `target` mirror `source`
    pub async fn sync(&self, source: &Location, target: &Location, options: &SyncOptions) -> Result<SyncReport> {
        options.validate()?;
        let route = Route::resolve(source, target, Arc::clone(&self.local), Arc::clone(&self.remote))?;
        let span = tracing::info_span!("sync", scenario = %route.scenario());

        self.run(route, source, target, options).instrument(span).await
    }

    /// Lazy operation plan for a resolved route
    pub fn plan(&self, route: &Route, options: &SyncOptions) -> OperationStream {
        let filters = FilterChain::new(options.filters.clone());
        let mapper = KeyMapper::new(options.relocations.clone());
        let diff = DiffEngine::new(policy_for(options.size_only))
            .with_filters(filters)
            .with_mapper(mapper)
            .with_delete(options.delete);

        let source = route.source();
        let target = route.target();
        diff.plan(source.stream(), &source.label(), target.stream(), &target.label())
    }

    async fn run(&self, route: Route, source: &Location, target: &Location, options: &SyncOptions) -> Result<SyncReport> {
        let started = Instant::now();
        let scenario = route.scenario();
        tracing::info!("Syncing {} -> {}", source, target);

        if options.dry_run {
            let operations = collect_plan(self.plan(&route, options), options.monitor.as_deref()).await?;
            for operation in &operations {
                tracing::info!("(dry run) {}", operation);
            }
            return Ok(SyncReport::new(scenario, operations, true, started.elapsed()));
        }

        let monitor = options
            .monitor
            .clone()
            .unwrap_or_else(|| Arc::new(TransferMonitor::new()));

        let plan = match options.progress_totals {
            ProgressTotals::Upfront => {
                let operations = collect_plan(self.plan(&route, options), Some(&monitor)).await?;
                let bytes = operations.iter().map(SyncOperation::bytes).sum();
                monitor.register(operations.len() as u64, bytes);
                tracing::debug!("Planned {} operations ({} bytes)", operations.len(), bytes);
                stream::iter(operations.into_iter().map(Ok::<_, SyncError>)).boxed()
            }
            ProgressTotals::Incremental => self.plan(&route, options),
        };

        let scheduler = TransferScheduler::new(
            route,
            monitor,
            SchedulerConfig {
                max_concurrent_transfers: options.max_concurrent_transfers,
                part_size: options.part_size,
                metadata: options.metadata.clone(),
                register_on_admit: options.progress_totals == ProgressTotals::Incremental,
            },
        );
        let operations = scheduler.execute(plan).await?;

        let report = SyncReport::new(scenario, operations, false, started.elapsed());
        tracing::info!(
            "Sync complete: {} transferred, {} deleted, {} bytes in {:.2?}",
            report.objects_transferred,
            report.objects_deleted,
            report.bytes_transferred,
            report.duration
        );
        Ok(report)
    }
}

/// Drain a plan, unwinding as soon as the monitor is cancelled
async fn collect_plan(plan: OperationStream, monitor: Option<&TransferMonitor>) -> Result<Vec<SyncOperation>> {
    let Some(monitor) = monitor else {
        return plan.try_collect().await;
    };
    if monitor.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = monitor.cancelled() => {
            tracing::debug!("Cancelled while planning");
            Err(SyncError::Cancelled)
        }
        operations = plan.try_collect() => operations,
    }
}
