//! Hands connector output to the pipeline workers.
//!
//! A [`Publisher`] owns the sending half of a bounded queue. Publishing
//! stamps the record with the current run id and waits for queue capacity,
//! so a fast connector is slowed to the pace of the workers instead of
//! buffering without limit.

use anyhow::{anyhow, Context, Result};
use sluice_core::record::Record;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

pub struct Publisher {
    run_id: String,
    sender: mpsc::Sender<Record>,
    published: AtomicU64,
}

impl Publisher {
    /// Create a publisher and the receiving end of its queue.
    pub fn channel(run_id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let publisher = Self {
            run_id: run_id.into(),
            sender,
            published: AtomicU64::new(0),
        };
        (publisher, receiver)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Number of records accepted so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Stamp `record` with this run and queue it, waiting while the queue is
    /// full. Fails once the receiving side has gone away.
    pub async fn publish(&self, mut record: Record) -> Result<()> {
        record.clear_run_id();
        record
            .initialize_run_id(self.run_id.clone())
            .context("Failed to stamp run id")?;
        let id = record.id().to_string();
        self.sender
            .send(record)
            .await
            .map_err(|_| anyhow!("pipeline has shut down; cannot publish record '{}'", id))?;
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(record = %id, run_id = %self.run_id, "published");
        Ok(())
    }
}
