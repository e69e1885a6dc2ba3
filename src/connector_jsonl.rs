//! Republish records from a JSON Lines file, one record per line.
//!
//! Lines are in the format the JSONL indexer writes, so a previous run's
//! output can be fed back through a pipeline with nested children intact.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sluice_core::record::Record;
use tracing::{info, warn};

use crate::config::JsonlConnectorConfig;
use crate::connector::Connector;
use crate::publisher::Publisher;

pub struct JsonlConnector {
    name: String,
    config: JsonlConnectorConfig,
}

impl JsonlConnector {
    pub fn new(name: String, config: JsonlConnectorConfig) -> Self {
        Self { name, config }
    }

    /// Parse one line into a record ready to be republished.
    pub fn parse_line(&self, line: &str) -> Result<Record> {
        let json: serde_json::Value = serde_json::from_str(line)?;
        let prefix = &self.config.doc_id_prefix;
        let mut record = Record::from_json_with(&json, &|id: &str| format!("{}{}", prefix, id))?;
        clear_run_ids(&mut record);
        Ok(record)
    }
}

fn clear_run_ids(record: &mut Record) {
    record.clear_run_id();
    for child in record.children_mut() {
        clear_run_ids(child);
    }
}

#[async_trait]
impl Connector for JsonlConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Publish records from a JSON Lines file"
    }

    fn connector_type(&self) -> &str {
        "jsonl"
    }

    async fn execute(&self, publisher: &Publisher) -> Result<()> {
        let content = tokio::fs::read_to_string(&self.config.path)
            .await
            .with_context(|| format!("Failed to read {}", self.config.path.display()))?;

        let mut skipped = 0usize;
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match self.parse_line(line) {
                Ok(record) => publisher.publish(record).await?,
                Err(e) => {
                    skipped += 1;
                    warn!(
                        connector = %self.name,
                        line = index + 1,
                        error = %e,
                        "skipping unparseable line"
                    );
                }
            }
        }
        info!(connector = %self.source_label(), skipped, "finished reading jsonl");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn connector(path: PathBuf, prefix: &str) -> JsonlConnector {
        JsonlConnector::new(
            "replay".to_string(),
            JsonlConnectorConfig {
                path,
                doc_id_prefix: prefix.to_string(),
            },
        )
    }

    #[test]
    fn test_parse_line_prefixes_and_clears_run_ids() {
        let c = connector(PathBuf::from("unused"), "re-");
        let line = r#"{"id":"p","run_id":"old","text":"hi",".children":[{"id":"p-1","run_id":"old"}]}"#;
        let record = c.parse_line(line).unwrap();
        assert_eq!(record.id(), "re-p");
        assert_eq!(record.run_id(), None);
        assert_eq!(record.get_str("text"), Some("hi"));
        assert_eq!(record.children()[0].id(), "re-p-1");
        assert_eq!(record.children()[0].run_id(), None);
    }

    #[tokio::test]
    async fn test_bad_lines_are_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("in.jsonl");
        std::fs::write(&path, "{\"id\":\"a\"}\nnot json\n\n{\"no_id\":1}\n{\"id\":\"b\"}\n").unwrap();

        let c = connector(path, "");
        let (publisher, mut rx) = Publisher::channel("run-2", 8);
        c.execute(&publisher).await.unwrap();
        drop(publisher);

        let mut ids = Vec::new();
        while let Some(record) = rx.recv().await {
            assert_eq!(record.run_id(), Some("run-2"));
            ids.push(record.id().to_string());
        }
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let c = connector(PathBuf::from("/no/such/file.jsonl"), "");
        let (publisher, _rx) = Publisher::channel("run", 1);
        assert!(c.execute(&publisher).await.is_err());
    }
}
