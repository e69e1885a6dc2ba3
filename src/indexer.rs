//! Delivery of finished records to a downstream sink.
//!
//! An [`Indexer`] acknowledges a record by returning `Ok` and rejects it by
//! returning an error whose message becomes the failure reason.
//! [`deliver_with_retry`] retries rejected records with exponential backoff
//! and reports the outcome as a [`Receipt`] when the record belongs to a run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sluice_core::record::Record;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::{IndexerConfig, IndexerKind};

#[async_trait]
pub trait Indexer: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one record. `Err` is a rejection.
    async fn deliver(&self, record: &Record) -> Result<()>;

    /// Flush and release the sink after the last record.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReceiptStatus {
    Succeeded,
    Failed(String),
}

/// Final delivery outcome for one record of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub record_id: String,
    pub run_id: String,
    #[serde(flatten)]
    pub status: ReceiptStatus,
}

impl Receipt {
    pub fn succeeded(record_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            run_id: run_id.into(),
            status: ReceiptStatus::Succeeded,
        }
    }

    pub fn failed(
        record_id: impl Into<String>,
        run_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            run_id: run_id.into(),
            status: ReceiptStatus::Failed(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Deliver `record`, retrying rejections. Returns `Ok` on acknowledgement or
/// the last rejection reason once retries are exhausted.
pub async fn deliver_with_retry(
    indexer: &dyn Indexer,
    record: &Record,
    policy: &RetryPolicy,
) -> Result<(), String> {
    let mut attempt = 0;
    loop {
        match indexer.deliver(record).await {
            Ok(()) => {
                debug!(record = record.id(), indexer = indexer.name(), attempt, "delivered");
                return Ok(());
            }
            Err(e) if attempt < policy.max_retries => {
                let wait = policy.backoff(attempt);
                warn!(
                    record = record.id(),
                    indexer = indexer.name(),
                    attempt,
                    error = %e,
                    "delivery rejected; retrying in {:?}",
                    wait
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(format!("{:#}", e)),
        }
    }
}

/// Build the sink named in `[indexer]`.
pub fn from_config(config: &IndexerConfig) -> Result<Arc<dyn Indexer>> {
    match config.kind {
        IndexerKind::Stdout => Ok(Arc::new(StdoutIndexer)),
        IndexerKind::Jsonl => {
            let path = config
                .path
                .as_ref()
                .context("indexer.path is required for the jsonl indexer")?;
            Ok(Arc::new(JsonlIndexer::open(path)?))
        }
    }
}

/// Appends one JSON object per record to a file.
pub struct JsonlIndexer {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlIndexer {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: tokio::sync::Mutex::new(tokio::fs::File::from_std(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Indexer for JsonlIndexer {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn deliver(&self, record: &Record) -> Result<()> {
        let mut line = record.to_json_string();
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Prints each record as a JSON line.
pub struct StdoutIndexer;

#[async_trait]
impl Indexer for StdoutIndexer {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn deliver(&self, record: &Record) -> Result<()> {
        println!("{}", record.to_json_string());
        Ok(())
    }
}

/// Keeps delivered records in memory.
#[derive(Default)]
pub struct MemoryIndexer {
    records: Mutex<Vec<Record>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Indexer for MemoryIndexer {
    fn name(&self) -> &str {
        "memory"
    }

    async fn deliver(&self, record: &Record) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory indexer lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
