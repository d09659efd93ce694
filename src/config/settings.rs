//! Configuration settings for HeapSync
//!
//! Defines the CLI arguments, the JSON tap configuration file and the
//! per-stream configuration handed to each sync executor.

use crate::error::{HeapSyncError, IoResultExt, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default prefix under which dump manifests are stored
pub const DEFAULT_MANIFEST_PREFIX: &str = "manifests";

/// HeapSync - incremental replication of Heap Connect dumps
#[derive(Parser, Debug, Clone)]
#[command(name = "heapsync")]
#[command(author = "HeapSync Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incrementally replicate Heap Connect dumps from object storage")]
#[command(long_about = r#"
HeapSync reads the dump manifests a Heap Connect export writes to a bucket,
plans which dumps and files are new for each table, and emits the rows as
Singer RECORD messages on stdout, followed by STATE messages that let the
next run resume where this one stopped.

Examples:
  heapsync --config config.json --discover > catalog.json
  heapsync --config config.json --state state.json
  heapsync --config config.json --table users --replication-method full-table
"#)]
pub struct CliArgs {
    /// Path to the JSON tap configuration
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: PathBuf,

    /// Path to a Singer state file to resume from
    #[arg(short = 's', long, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// Path to a catalog selecting the streams to sync
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Print the discovered catalog and exit
    #[arg(short = 'd', long)]
    pub discover: bool,

    /// Only sync these tables (repeatable)
    #[arg(short = 't', long = "table", value_name = "NAME")]
    pub tables: Vec<String>,

    /// Override the replication method from the config file
    #[arg(long, value_enum, value_name = "METHOD")]
    pub replication_method: Option<ReplicationMethod>,

    /// Mirror every persisted state to this file
    #[arg(long, value_name = "PATH")]
    pub state_output: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON on stderr
    #[arg(long)]
    pub log_json: bool,
}

/// How a table is replicated
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    /// Process every dump at or after the checkpoint, in order
    #[default]
    #[value(name = "incremental")]
    Incremental,
    /// Resync only the latest dump containing the table
    #[value(name = "full-table")]
    FullTable,
}

impl ReplicationMethod {
    /// Singer name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "INCREMENTAL",
            Self::FullTable => "FULL_TABLE",
        }
    }
}

/// Container format of the data files referenced by manifests
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// Avro object container files
    #[default]
    Avro,
    /// Newline-delimited JSON objects
    Jsonl,
}

/// Tap configuration loaded from the `--config` file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    /// Bucket holding the Heap Connect export
    pub bucket: String,
    /// Add the `_sdc_sync_id` column to every record
    #[serde(default = "default_true")]
    pub additional_info: bool,
    /// Prefix under which manifests are listed
    #[serde(default = "default_manifest_prefix")]
    pub manifest_prefix: String,
    /// Serve the bucket from a local directory instead of S3
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL for S3-compatible services
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Force path-style S3 addressing
    #[serde(default)]
    pub force_path_style: bool,
    /// Retries for a failed object download
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Directory for transient downloads (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Data file format
    #[serde(default)]
    pub file_format: FileFormat,
    /// Replication method applied to every stream
    #[serde(default)]
    pub replication_method: ReplicationMethod,
}

fn default_true() -> bool {
    true
}

fn default_manifest_prefix() -> String {
    DEFAULT_MANIFEST_PREFIX.to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_retries() -> u32 {
    3
}

impl TapConfig {
    /// Create a config for a bucket with every other option at its default
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            additional_info: true,
            manifest_prefix: default_manifest_prefix(),
            local_root: None,
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            max_retries: default_max_retries(),
            temp_dir: None,
            file_format: FileFormat::default(),
            replication_method: ReplicationMethod::default(),
        }
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| HeapSyncError::parse(path.display().to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(method) = args.replication_method {
            self.replication_method = method;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(HeapSyncError::config("`bucket` is required"));
        }
        if self.manifest_prefix.trim().is_empty() {
            return Err(HeapSyncError::config("`manifest_prefix` must not be empty"));
        }
        if self.local_root.is_none() && !cfg!(feature = "native_s3") {
            return Err(HeapSyncError::config(
                "S3 access requires the `native_s3` feature; set `local_root` to read a local copy",
            ));
        }
        if self.file_format == FileFormat::Avro && !cfg!(feature = "avro") {
            return Err(HeapSyncError::config(
                "Avro files require the `avro` feature; set `file_format` to \"jsonl\"",
            ));
        }
        Ok(())
    }

    /// Directory for transient downloads
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Configuration owned by a single stream's executor
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Table being replicated
    pub table: String,
    /// Bucket, used to strip `s3://<bucket>/` from manifest paths
    pub bucket: String,
    /// Replication method
    pub replication_method: ReplicationMethod,
    /// Whether records carry the `_sdc_sync_id` column
    pub additional_info: bool,
    /// Directory for transient downloads
    pub temp_dir: PathBuf,
}

impl StreamConfig {
    /// Build a stream's configuration from the tap configuration
    pub fn from_tap(tap: &TapConfig, table: &str) -> Self {
        Self {
            table: table.to_string(),
            bucket: tap.bucket.clone(),
            replication_method: tap.replication_method,
            additional_info: tap.additional_info,
            temp_dir: tap.temp_dir(),
        }
    }
}
