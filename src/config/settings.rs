//! Configuration settings for BucketSync
//!
//! Three layers feed a sync run:
//! - [`CliArgs`] parsed from the command line
//! - an optional JSON [`SyncProfile`] (`--config`), overridden by CLI flags
//! - the runtime [`SyncOptions`] handed to the engine

use crate::core::{DEFAULT_MAX_CONCURRENT_TRANSFERS, DEFAULT_PART_SIZE};
use crate::error::{Result, SyncError};
use crate::progress::TransferMonitor;
use crate::storage::{MetadataOptions, MetadataValue};
use crate::sync::{FilterRule, Relocation};
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// BucketSync - mirror a directory tree and an object storage prefix
#[derive(Parser, Debug, Clone)]
#[command(name = "bucketsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "One-way sync between local directories and object storage")]
#[command(long_about = r#"
BucketSync makes a target collection mirror a source collection, transferring
only new or changed objects.

A collection is a local directory or s3://bucket[/prefix].

Examples:
  bucketsync ./site s3://www/site --delete          # Upload, remove stale objects
  bucketsync s3://logs/2024 ./logs --size-only      # Download by size only
  bucketsync s3://a/in s3://b/out --dry-run         # Show a bucket-to-bucket plan
  bucketsync ./photos s3://p --exclude '*' --include '*.jpg'
"#)]
pub struct CliArgs {
    /// Source collection (local path or s3://bucket/prefix)
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Target collection (local path or s3://bucket/prefix)
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Delete target objects that do not exist in the source
    #[arg(long)]
    pub delete: bool,

    /// Show the plan without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Compare objects by size only
    #[arg(long)]
    pub size_only: bool,

    /// Include keys matching a glob (last matching filter wins)
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Exclude keys matching a glob (last matching filter wins)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Rewrite a source key prefix: FROM:TO (repeatable, first match wins)
    #[arg(long, value_name = "FROM:TO", value_parser = parse_relocation)]
    pub relocate: Vec<Relocation>,

    /// Maximum concurrent transfers
    #[arg(short = 'j', long, value_name = "NUM")]
    pub max_concurrent_transfers: Option<usize>,

    /// Multipart part size (e.g., 8M, 64M)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub part_size: Option<u64>,

    /// Content-Type for uploaded and copied objects
    #[arg(long, value_name = "MIME")]
    pub content_type: Option<String>,

    /// Derive Content-Type from the key's extension
    #[arg(long)]
    pub guess_content_type: bool,

    /// Cache-Control for uploaded and copied objects
    #[arg(long, value_name = "VALUE")]
    pub cache_control: Option<String>,

    /// Storage class for uploaded and copied objects
    #[arg(long, value_name = "CLASS")]
    pub storage_class: Option<String>,

    /// How progress totals are computed
    #[arg(long, value_enum, value_name = "MODE")]
    pub totals: Option<ProgressTotals>,

    /// JSON profile with default options
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Follow symbolic links in local trees
    #[arg(short = 'L', long)]
    pub follow_symlinks: bool,

    /// Show progress bars
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Output format for the report
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Include/exclude filters in command-line order
    #[arg(skip)]
    pub filters: Vec<FilterPattern>,
}

impl CliArgs {
    /// Parse the process arguments, keeping the relative order of
    /// `--include` and `--exclude`
    pub fn parse_args() -> Self {
        let matches = Self::command().get_matches();
        match Self::from_matches(&matches) {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Build arguments from already parsed matches
    pub fn from_matches(matches: &ArgMatches) -> std::result::Result<Self, clap::Error> {
        let mut args = Self::from_arg_matches(matches)?;
        args.filters = ordered_filters(matches);
        Ok(args)
    }

    /// Merge the flags over `profile`
    pub fn apply_to(&self, mut profile: SyncProfile) -> SyncProfile {
        profile.delete |= self.delete;
        profile.dry_run |= self.dry_run;
        profile.size_only |= self.size_only;
        profile.guess_content_type |= self.guess_content_type;
        profile.filters.extend(self.filters.iter().cloned());
        profile.relocations.extend(self.relocate.iter().cloned());

        if self.max_concurrent_transfers.is_some() {
            profile.max_concurrent_transfers = self.max_concurrent_transfers;
        }
        if self.part_size.is_some() {
            profile.part_size = self.part_size;
        }
        if let Some(totals) = self.totals {
            profile.progress_totals = totals;
        }
        if let Some(content_type) = &self.content_type {
            profile.metadata.content_type = Some(MetadataValue::Fixed(content_type.clone()));
        }
        if let Some(cache_control) = &self.cache_control {
            profile.metadata.cache_control = Some(MetadataValue::Fixed(cache_control.clone()));
        }
        if let Some(storage_class) = &self.storage_class {
            profile.metadata.storage_class = Some(MetadataValue::Fixed(storage_class.clone()));
        }
        profile
    }
}

/// Interleave `--include` and `--exclude` values by their argv position
fn ordered_filters(matches: &ArgMatches) -> Vec<FilterPattern> {
    let mut indexed: Vec<(usize, FilterPattern)> = Vec::new();

    for (id, make) in [
        ("include", FilterPattern::Include as fn(String) -> FilterPattern),
        ("exclude", FilterPattern::Exclude as fn(String) -> FilterPattern),
    ] {
        let (Some(indices), Some(values)) = (matches.indices_of(id), matches.get_many::<String>(id)) else {
            continue;
        };
        indexed.extend(indices.zip(values).map(|(index, value)| (index, make(value.clone()))));
    }

    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, pattern)| pattern).collect()
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// When progress totals are registered with the monitor
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProgressTotals {
    /// Compute the whole plan first, then register its totals
    #[default]
    Upfront,
    /// Register each operation as it starts
    Incremental,
}

/// Filter as written in a profile or on the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterPattern {
    Include(String),
    Exclude(String),
}

impl FilterPattern {
    /// Compile into a filter rule
    pub fn compile(&self) -> Result<FilterRule> {
        match self {
            Self::Include(pattern) => FilterRule::include(pattern),
            Self::Exclude(pattern) => FilterRule::exclude(pattern),
        }
    }
}

/// Serializable sync defaults, loaded from `--config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncProfile {
    pub delete: bool,
    pub dry_run: bool,
    pub size_only: bool,
    pub filters: Vec<FilterPattern>,
    pub relocations: Vec<Relocation>,
    pub max_concurrent_transfers: Option<usize>,
    pub part_size: Option<u64>,
    pub progress_totals: ProgressTotals,
    pub metadata: MetadataOptions,
    pub guess_content_type: bool,
}

impl SyncProfile {
    /// Load a profile from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SyncError::config(format!("Cannot read profile {}: {}", path.display(), e)))?;
        Self::from_json(&text)
            .map_err(|e| SyncError::config(format!("Invalid profile {}: {}", path.display(), e)))
    }

    /// Parse a profile from JSON text
    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Build and validate runtime options
    pub fn into_options(self) -> Result<SyncOptions> {
        let filters = self
            .filters
            .iter()
            .map(FilterPattern::compile)
            .collect::<Result<Vec<_>>>()?;

        let metadata = if self.guess_content_type && self.metadata.content_type.is_none() {
            self.metadata.guess_content_type()
        } else {
            self.metadata
        };

        let options = SyncOptions {
            delete: self.delete,
            dry_run: self.dry_run,
            size_only: self.size_only,
            filters,
            relocations: self.relocations,
            max_concurrent_transfers: self
                .max_concurrent_transfers
                .unwrap_or(DEFAULT_MAX_CONCURRENT_TRANSFERS),
            part_size: self.part_size.unwrap_or(DEFAULT_PART_SIZE),
            metadata,
            progress_totals: self.progress_totals,
            monitor: None,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Options of one sync call
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Delete target objects absent from the source
    pub delete: bool,
    /// Compute the plan without executing it
    pub dry_run: bool,
    /// Compare by size only
    pub size_only: bool,
    /// Include/exclude rules, last match wins
    pub filters: Vec<FilterRule>,
    /// Prefix relocations, first match wins
    pub relocations: Vec<Relocation>,
    pub max_concurrent_transfers: usize,
    pub part_size: u64,
    /// Metadata for uploads and copies
    pub metadata: MetadataOptions,
    pub progress_totals: ProgressTotals,
    /// Progress and cancellation observed by the caller
    pub monitor: Option<Arc<TransferMonitor>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete: false,
            dry_run: false,
            size_only: false,
            filters: Vec::new(),
            relocations: Vec::new(),
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            part_size: DEFAULT_PART_SIZE,
            metadata: MetadataOptions::default(),
            progress_totals: ProgressTotals::default(),
            monitor: None,
        }
    }
}

impl SyncOptions {
    /// Reject invalid values before any I/O
    pub fn validate(&self) -> Result<()> {
        if self.part_size == 0 {
            return Err(SyncError::config("part size must be greater than zero"));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(SyncError::config(
                "max concurrent transfers must be greater than zero",
            ));
        }
        if let Some(relocation) = self
            .relocations
            .iter()
            .find(|r| r.source_prefix.is_empty() && r.target_prefix.is_empty())
        {
            return Err(SyncError::config(format!(
                "relocation {:?} has no effect",
                relocation
            )));
        }
        Ok(())
    }

    /// Attach a monitor
    pub fn with_monitor(mut self, monitor: Arc<TransferMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();
    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let digits_end = size
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(size.len());
    let (num_str, unit) = size.split_at(digits_end);

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024u64 * 1024 * 1024 * 1024,
        other => return Err(format!("Unknown size unit: {}", other)),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    Ok((num * multiplier as f64) as u64)
}

fn parse_relocation(value: &str) -> std::result::Result<Relocation, String> {
    Relocation::parse(value).ok_or_else(|| format!("expected FROM:TO, got '{}'", value))
}
