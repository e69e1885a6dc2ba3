//! One run: connectors → bounded queue → workers → indexer.
//!
//! # Flow
//!
//! ```text
//! ┌────────────┐ publish ┌──────────────┐ recv ┌─────────────────┐ deliver ┌─────────┐
//! │ Connectors │────────▶│ mpsc (bounded)│─────▶│ workers (N)     │────────▶│ Indexer │
//! │ sequential │         └──────────────┘      │ Pipeline::process│        └────┬────┘
//! └────────────┘                                └─────────────────┘             ▼
//!                                                                           Receipts
//! ```
//!
//! The pipeline is assembled and started before any connector runs, so a
//! bad stage option aborts the run before a single record is read. Each
//! record is processed on the blocking pool; a semaphore caps how many are
//! in flight at once.

use anyhow::{Context, Result};
use sluice_core::pipeline::{Pipeline, PipelineOutput};
use sluice_core::record::Record;
use sluice_core::registry::StageRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connector::{Connector, ConnectorRegistry};
use crate::indexer::{deliver_with_retry, Indexer, Receipt, RetryPolicy};
use crate::publisher::Publisher;

/// Totals for one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: String,
    /// Records accepted from connectors.
    pub published: u64,
    /// Records acknowledged by the indexer (children of a dropped record
    /// and fan-out records count individually).
    pub delivered: u64,
    /// Records abandoned by a stage or rejected by the indexer.
    pub failed: u64,
    /// Connectors that failed in any phase.
    pub connector_errors: u64,
    pub receipts: Vec<Receipt>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.receipts.iter().filter(|r| r.is_success()).count()
    }

    pub fn receipt_failures(&self) -> Vec<&Receipt> {
        self.receipts.iter().filter(|r| !r.is_success()).collect()
    }

    pub fn print(&self) {
        println!("run {}", self.run_id);
        println!("  published: {}", self.published);
        println!("  delivered: {}", self.delivered);
        println!("  failed: {}", self.failed);
        if self.connector_errors > 0 {
            println!("  connector errors: {}", self.connector_errors);
        }
        for receipt in self.receipt_failures() {
            if let crate::indexer::ReceiptStatus::Failed(reason) = &receipt.status {
                println!("  FAILED {}: {}", receipt.record_id, reason);
            }
        }
        println!("ok");
    }
}

#[derive(Default)]
struct Outcome {
    delivered: u64,
    failed: u64,
    receipts: Vec<Receipt>,
}

impl Outcome {
    fn merge(&mut self, other: Outcome) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.receipts.extend(other.receipts);
    }
}

/// Assemble and start the configured pipeline on the blocking pool.
pub async fn start_pipeline(config: &Config, registry: Arc<StageRegistry>) -> Result<Pipeline> {
    let pipeline_config = config.pipeline.clone();
    tokio::task::spawn_blocking(move || -> Result<Pipeline> {
        let mut pipeline = Pipeline::from_config(&pipeline_config, &registry)
            .context("Failed to assemble pipeline")?;
        pipeline.start().context("Failed to start pipeline")?;
        Ok(pipeline)
    })
    .await?
}

/// Stop a pipeline (and drop its stages) on the blocking pool.
pub async fn stop_pipeline(mut pipeline: Pipeline) -> Result<()> {
    tokio::task::spawn_blocking(move || pipeline.stop())
        .await?
        .context("Failed to stop pipeline")
}

/// Run the connectors selected by `filter` through the pipeline into `indexer`.
pub async fn run_pipeline(
    config: &Config,
    stages: Arc<StageRegistry>,
    connectors: &ConnectorRegistry,
    indexer: Arc<dyn Indexer>,
    filter: Option<&str>,
) -> Result<RunSummary> {
    let selected = connectors.select(filter)?;
    let pipeline = Arc::new(start_pipeline(config, stages).await?);

    let run_id = Uuid::new_v4().to_string();
    info!(run_id = %run_id, pipeline = pipeline.name(), connectors = selected.len(), "run started");

    let (publisher, receiver) = Publisher::channel(run_id.clone(), config.runner.queue_capacity);
    let workers = tokio::spawn(consume(
        receiver,
        Arc::clone(&pipeline),
        Arc::clone(&indexer),
        RetryPolicy::from_config(&config.indexer),
        config.runner.workers,
    ));

    let mut connector_errors = 0;
    for connector in selected {
        if let Err(e) = run_connector(connector, &publisher).await {
            connector_errors += 1;
            error!(connector = %connector.source_label(), error = %format!("{:#}", e), "connector failed");
        }
    }
    let published = publisher.published();
    drop(publisher);

    let outcome = workers.await.context("worker pool panicked")?;

    match Arc::try_unwrap(pipeline) {
        Ok(pipeline) => stop_pipeline(pipeline).await?,
        Err(shared) => {
            warn!("pipeline still shared after the run; skipping stop");
            tokio::task::spawn_blocking(move || drop(shared)).await?;
        }
    }
    indexer.close().await.context("Failed to close indexer")?;

    info!(
        run_id = %run_id,
        published,
        delivered = outcome.delivered,
        failed = outcome.failed,
        "run finished"
    );

    Ok(RunSummary {
        run_id,
        published,
        delivered: outcome.delivered,
        failed: outcome.failed,
        connector_errors,
        receipts: outcome.receipts,
    })
}

async fn run_connector(connector: &dyn Connector, publisher: &Publisher) -> Result<()> {
    let label = connector.source_label();
    info!(connector = %label, "connector starting");
    connector.pre_execute(publisher.run_id()).await?;
    connector.execute(publisher).await?;
    connector.post_execute(publisher.run_id()).await?;
    info!(connector = %label, "connector finished");
    Ok(())
}

/// Pull records off the queue until every publisher is gone, processing up
/// to `workers` of them at once.
async fn consume(
    mut receiver: mpsc::Receiver<Record>,
    pipeline: Arc<Pipeline>,
    indexer: Arc<dyn Indexer>,
    policy: RetryPolicy,
    workers: usize,
) -> Outcome {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut outcome = Outcome::default();

    while let Some(record) = receiver.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let pipeline = Arc::clone(&pipeline);
        let indexer = Arc::clone(&indexer);
        tasks.spawn(async move {
            let result = process_one(record, pipeline, indexer.as_ref(), &policy).await;
            drop(permit);
            result
        });

        while let Some(done) = tasks.try_join_next() {
            collect(&mut outcome, done);
        }
    }

    while let Some(done) = tasks.join_next().await {
        collect(&mut outcome, done);
    }
    outcome
}

fn collect(outcome: &mut Outcome, done: Result<Outcome, tokio::task::JoinError>) {
    match done {
        Ok(result) => outcome.merge(result),
        Err(e) => {
            error!(error = %e, "worker task failed");
            outcome.failed += 1;
        }
    }
}

async fn process_one(
    record: Record,
    pipeline: Arc<Pipeline>,
    indexer: &dyn Indexer,
    policy: &RetryPolicy,
) -> Outcome {
    let record_id = record.id().to_string();
    let run_id = record.run_id().map(str::to_string);
    let mut outcome = Outcome::default();

    let processed = tokio::task::spawn_blocking(move || pipeline.process(record)).await;
    let output = match processed {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return whole_record_failed(record_id, run_id, e.to_string()),
        Err(e) => return whole_record_failed(record_id, run_id, format!("worker panicked: {}", e)),
    };

    let PipelineOutput { records, failures } = output;
    for failure in failures {
        outcome.failed += 1;
        if let Some(run_id) = failure.run_id {
            outcome.receipts.push(Receipt::failed(
                failure.record_id,
                run_id,
                format!("stage {}: {}", failure.stage, failure.reason),
            ));
        }
    }

    for record in records {
        let result = deliver_with_retry(indexer, &record, policy).await;
        match &result {
            Ok(()) => outcome.delivered += 1,
            Err(reason) => {
                outcome.failed += 1;
                error!(record = record.id(), indexer = indexer.name(), error = %reason, "delivery failed");
            }
        }
        if let Some(run_id) = record.run_id() {
            outcome.receipts.push(match result {
                Ok(()) => Receipt::succeeded(record.id(), run_id),
                Err(reason) => Receipt::failed(record.id(), run_id, reason),
            });
        }
    }
    outcome
}

fn whole_record_failed(record_id: String, run_id: Option<String>, reason: String) -> Outcome {
    error!(record = %record_id, error = %reason, "record could not be processed");
    Outcome {
        delivered: 0,
        failed: 1,
        receipts: run_id
            .map(|run_id| vec![Receipt::failed(record_id, run_id, reason)])
            .unwrap_or_default(),
    }
}
