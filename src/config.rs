//! TOML configuration for a sluice run.
//!
//! One file describes the queue between connectors and workers, the stage
//! list, the delivery sink, and every connector instance:
//!
//! ```toml
//! [runner]
//! queue_capacity = 100
//! workers = 4
//!
//! [pipeline]
//! name = "docs"
//!
//! [[pipeline.stages]]
//! type = "chunk_text"
//! source = "file_content"
//! chunking_method = "paragraph"
//!
//! [indexer]
//! type = "jsonl"
//! path = "./out/records.jsonl"
//!
//! [connectors.filesystem.docs]
//! root = "./docs"
//! include_globs = ["**/*.md"]
//! content_as_text = true
//! ```
//!
//! Stage options are checked later, when the pipeline is assembled.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sluice_core::pipeline::PipelineConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_workers(),
        }
    }
}

fn default_queue_capacity() -> usize {
    100
}
fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexerKind {
    #[default]
    Stdout,
    Jsonl,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default, rename = "type")]
    pub kind: IndexerKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            kind: IndexerKind::default(),
            path: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    200
}

/// Named connector instances, keyed by type then instance name.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemConnectorConfig>,
    #[serde(default)]
    pub jsonl: BTreeMap<String, JsonlConnectorConfig>,
    #[serde(default)]
    pub csv: BTreeMap<String, CsvConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub doc_id_prefix: String,
    #[serde(default)]
    pub content_as_text: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct JsonlConnectorConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub doc_id_prefix: String,
}

/// One record per CSV row; the first row holds the column names.
#[derive(Debug, Deserialize, Clone)]
pub struct CsvConnectorConfig {
    pub path: PathBuf,
    /// Column whose value identifies the row. Defaults to the first column.
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub doc_id_prefix: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

impl Config {
    /// Parse and validate a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.runner.workers == 0 {
            bail!("runner.workers must be >= 1");
        }
        if self.runner.queue_capacity == 0 {
            bail!("runner.queue_capacity must be >= 1");
        }

        if self.pipeline.stages.is_empty() {
            bail!("pipeline.stages must list at least one stage");
        }
        for (index, stage) in self.pipeline.stages.iter().enumerate() {
            if stage.stage_type().is_none() {
                bail!(
                    "pipeline.stages[{}] must have a string 'type' option",
                    index
                );
            }
        }

        for (name, csv) in &self.connectors.csv {
            if !csv.delimiter.is_ascii() {
                bail!("connectors.csv.{}.delimiter must be a single ASCII character", name);
            }
        }

        if self.indexer.kind == IndexerKind::Jsonl && self.indexer.path.is_none() {
            bail!("indexer.path is required when indexer.type is 'jsonl'");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content).with_context(|| format!("Invalid config: {}", path.display()))
}
