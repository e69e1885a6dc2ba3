//! End-to-end runs through the library API: real connectors, the stage
//! registry, and in-memory or file sinks.

use anyhow::Result;
use async_trait::async_trait;
use sluice::config::Config;
use sluice::connector::{Connector, ConnectorRegistry};
use sluice::indexer::{Indexer, JsonlIndexer, MemoryIndexer, ReceiptStatus};
use sluice::publisher::Publisher;
use sluice::runner::run_pipeline;
use sluice::stages::stage_registry;
use sluice_core::record::Record;
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

// ─── Helpers ─────────────────────────────────────────────────────────

fn write_docs(dir: &std::path::Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("one.md"), "First paragraph.\n\nSecond paragraph.\n\nThird.").unwrap();
    fs::write(dir.join("two.md"), "Only paragraph.").unwrap();
}

fn config(body: &str) -> Config {
    Config::from_toml(body).unwrap()
}

fn chunk_config(root: &std::path::Path, extra_stages: &str) -> Config {
    config(&format!(
        r#"
[runner]
workers = 3
queue_capacity = 2

[[pipeline.stages]]
type = "chunk_text"
source = "file_content"
chunking_method = "paragraph"
{extra}

[connectors.filesystem.docs]
root = "{root}"
content_as_text = true
doc_id_prefix = "doc-"
"#,
        root = root.display(),
        extra = extra_stages
    ))
}

async fn run(config: &Config, indexer: Arc<dyn Indexer>) -> sluice::runner::RunSummary {
    let connectors = ConnectorRegistry::from_config(config);
    run_pipeline(config, Arc::new(stage_registry()), &connectors, indexer, None)
        .await
        .unwrap()
}

// ─── Filesystem → chunk → memory ─────────────────────────────────────

#[tokio::test]
async fn test_filesystem_chunks_into_memory() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let config = chunk_config(tmp.path(), "");
    let sink = Arc::new(MemoryIndexer::new());

    let summary = run(&config, sink.clone()).await;
    assert_eq!(summary.published, 2);
    assert_eq!(summary.delivered, 2);
    assert_eq!(summary.succeeded(), 2);

    let mut records = sink.records();
    records.sort_by_key(|r| r.get_str("file_path").unwrap_or_default().to_string());
    assert!(records[0].id().starts_with("doc-"));

    let chunks: Vec<&str> = records[0]
        .children()
        .iter()
        .map(|c| c.get_str("chunk").unwrap())
        .collect();
    assert_eq!(chunks, vec!["First paragraph.", "Second paragraph.", "Third."]);
    assert_eq!(records[0].children()[2].get_i64("total_chunks"), Some(3));
    assert_eq!(records[1].children().len(), 1);
}

#[tokio::test]
async fn test_emitted_chunks_are_delivered_individually() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let config = chunk_config(
        tmp.path(),
        "\n[[pipeline.stages]]\ntype = \"emit_nested_children\"\ndrop_parent = true\n",
    );
    let sink = Arc::new(MemoryIndexer::new());

    let summary = run(&config, sink.clone()).await;
    assert_eq!(summary.published, 2);
    assert_eq!(summary.delivered, 4);
    assert_eq!(summary.receipts.len(), 4);
    for receipt in &summary.receipts {
        assert_eq!(receipt.run_id, summary.run_id);
        assert_eq!(receipt.status, ReceiptStatus::Succeeded);
    }
    for record in sink.records() {
        assert!(record.has("parent_id"));
        assert_eq!(record.run_id(), Some(summary.run_id.as_str()));
    }
}

// ─── Stage failures ──────────────────────────────────────────────────

#[tokio::test]
async fn test_stage_failure_yields_failed_receipt() {
    let tmp = TempDir::new().unwrap();
    write_docs(tmp.path());
    let config = chunk_config(
        tmp.path(),
        "\n[[pipeline.stages]]\ntype = \"copy_fields\"\nfield_mapping = { file_path = \"run_id\" }\n",
    );
    let sink = Arc::new(MemoryIndexer::new());

    let summary = run(&config, sink.clone()).await;
    assert_eq!(summary.delivered, 0);
    assert_eq!(summary.failed, 2);
    assert!(sink.is_empty());
    let failures = summary.receipt_failures();
    assert_eq!(failures.len(), 2);
    match &failures[0].status {
        ReceiptStatus::Failed(reason) => assert!(reason.contains("copy_fields")),
        other => panic!("unexpected status {:?}", other),
    }
}

// ─── JSONL round trip ────────────────────────────────────────────────

#[tokio::test]
async fn test_jsonl_output_replays_with_children() {
    let tmp = TempDir::new().unwrap();
    write_docs(&tmp.path().join("docs"));
    let out = tmp.path().join("out/records.jsonl");

    let first = chunk_config(&tmp.path().join("docs"), "");
    let jsonl = Arc::new(JsonlIndexer::open(&out).unwrap());
    let first_summary = run(&first, jsonl).await;
    assert_eq!(first_summary.delivered, 2);

    let replay = config(&format!(
        r#"
[[pipeline.stages]]
type = "rename_fields"
field_mapping = {{ file_content = "text" }}

[connectors.jsonl.replay]
path = "{}"
"#,
        out.display()
    ));
    let sink = Arc::new(MemoryIndexer::new());
    let second_summary = run(&replay, sink.clone()).await;
    assert_eq!(second_summary.published, 2);
    assert_ne!(second_summary.run_id, first_summary.run_id);

    let records = sink.records();
    let total_children: usize = records.iter().map(|r| r.children().len()).sum();
    assert_eq!(total_children, 4);
    for record in &records {
        assert!(record.has("text"));
        assert!(!record.has("file_content"));
        assert_eq!(record.run_id(), Some(second_summary.run_id.as_str()));
    }
}

// ─── Delivery retry ──────────────────────────────────────────────────

/// Rejects every record whose id is in `reject`, and the first
/// `transient` attempts of everything else.
struct Unreliable {
    reject: Vec<String>,
    transient: AtomicU32,
    accepted: MemoryIndexer,
}

#[async_trait]
impl Indexer for Unreliable {
    fn name(&self) -> &str {
        "unreliable"
    }

    async fn deliver(&self, record: &Record) -> Result<()> {
        if self.reject.iter().any(|id| id == record.id()) {
            anyhow::bail!("rejected {}", record.id());
        }
        if self
            .transient
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("temporarily unavailable");
        }
        self.accepted.deliver(record).await
    }
}

struct Fixed(Vec<&'static str>);

#[async_trait]
impl Connector for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    fn description(&self) -> &str {
        "Publishes a fixed list of records"
    }

    async fn execute(&self, publisher: &Publisher) -> Result<()> {
        for id in &self.0 {
            publisher.publish(Record::new(*id)).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_rejected_delivery_retried_then_failed() {
    let config = config(
        r#"
[runner]
workers = 1

[[pipeline.stages]]
type = "timestamp"
dest_field = "seen_at"

[indexer]
max_retries = 2
retry_backoff_ms = 1
"#,
    );
    let mut connectors = ConnectorRegistry::new();
    connectors.register(Box::new(Fixed(vec!["good", "bad"])));
    let sink = Arc::new(Unreliable {
        reject: vec!["bad".to_string()],
        transient: AtomicU32::new(1),
        accepted: MemoryIndexer::new(),
    });

    let summary = run_pipeline(
        &config,
        Arc::new(stage_registry()),
        &connectors,
        sink.clone(),
        Some("custom:fixed"),
    )
    .await
    .unwrap();

    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(sink.accepted.len(), 1);

    let failed = summary.receipt_failures();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].record_id, "bad");
    assert_eq!(
        failed[0].status,
        ReceiptStatus::Failed("rejected bad".to_string())
    );
}
