//! BucketSync CLI - one-way sync between local trees and object storage

use anyhow::Context;
use bucketsync::config::{CliArgs, OutputFormat, SyncOptions, SyncProfile};
use bucketsync::core::{SyncEngine, SyncReport};
use bucketsync::progress::{ProgressReporter, TransferMonitor};
use bucketsync::storage::{LocalFs, RemoteStore};
use bucketsync::SyncError;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Exit code for a user-initiated stop (128 + SIGINT)
const EXIT_CANCELLED: i32 = 130;
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse_args();
    init_logging(&args);

    if let Err(e) = run(args).await {
        let code = match e.downcast_ref::<SyncError>() {
            Some(err) if err.is_cancellation() => EXIT_CANCELLED,
            Some(err) if err.is_configuration() => EXIT_CONFIG,
            _ => 1,
        };
        eprintln!("Error: {:#}", e);
        std::process::exit(code);
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = match (args.quiet, args.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bucketsync={}", default_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let profile = match &args.config {
        Some(path) => SyncProfile::load(path)?,
        None => SyncProfile::default(),
    };
    let monitor = Arc::new(TransferMonitor::new());
    let options = args.apply_to(profile).into_options()?.with_monitor(Arc::clone(&monitor));

    if args.verbose > 0 {
        print_options(&args, &options);
    }

    let local = Arc::new(LocalFs::new().follow_symlinks(args.follow_symlinks));
    let engine = SyncEngine::new(local, remote_store().await?);

    // Ctrl-C stops admissions and unwinds in-flight transfers
    let interrupt = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling");
                monitor.cancel();
            }
        })
    };

    let reporter = if args.progress && !args.quiet && !options.dry_run {
        Some(Arc::new(ProgressReporter::new()))
    } else {
        None
    };
    let follower = reporter.as_ref().map(|r| r.follow(&monitor));

    let outcome = engine.sync_addresses(&args.source, &args.target, &options).await;

    interrupt.abort();
    if let Some(follower) = follower {
        follower.abort();
    }
    if let Some(reporter) = &reporter {
        reporter.update(&monitor.progress());
        match &outcome {
            Ok(_) => reporter.finish_success("Sync complete"),
            Err(e) if e.is_cancellation() => reporter.finish_error("Cancelled"),
            Err(_) => reporter.finish_error("Sync failed"),
        }
    }

    let report = outcome?;
    if !args.quiet {
        print_report(&report, args.output_format)?;
    }
    Ok(())
}

#[cfg(feature = "native_s3")]
async fn remote_store() -> anyhow::Result<Arc<dyn RemoteStore>> {
    use bucketsync::storage::{NativeS3Config, NativeS3Store};
    Ok(Arc::new(NativeS3Store::new(NativeS3Config::from_env()).await))
}

#[cfg(not(feature = "native_s3"))]
async fn remote_store() -> anyhow::Result<Arc<dyn RemoteStore>> {
    Err(SyncError::config("object storage support requires building with --features native_s3"))
        .context("no remote store available")
}

fn print_report(report: &SyncReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            if report.dry_run {
                for operation in &report.operations {
                    println!("{}", operation);
                }
            }
            report.print_summary();
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report).context("failed to encode report")?;
            println!("{}", json);
        }
    }
    Ok(())
}

fn print_options(args: &CliArgs, options: &SyncOptions) {
    println!("=== BucketSync Configuration ===");
    println!("Source:          {}", args.source);
    println!("Target:          {}", args.target);
    println!("Delete:          {}", options.delete);
    println!("Dry run:         {}", options.dry_run);
    println!("Size only:       {}", options.size_only);
    println!("Filters:         {}", options.filters.len());
    println!("Relocations:     {}", options.relocations.len());
    println!("Concurrency:     {}", options.max_concurrent_transfers);
    println!(
        "Part size:       {}",
        humansize::format_size(options.part_size, humansize::BINARY)
    );
    println!("Totals:          {:?}", options.progress_totals);
    println!();
}
