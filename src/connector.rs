//! The connector extension point.
//!
//! A connector reads an external source and publishes one record per item
//! through the run's [`Publisher`]. Built-in connectors are resolved from
//! the config file; custom ones are registered in code.
//!
//! # Lifecycle
//!
//! ```text
//! pre_execute(run_id) ──▶ execute(&publisher) ──▶ post_execute(run_id)
//! ```
//!
//! Connectors of one run execute one after another. A failure in any phase
//! is reported for that connector and the run moves on to the next.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use sluice::connector::{Connector, ConnectorRegistry};
//! use sluice::publisher::Publisher;
//! use sluice_core::record::Record;
//!
//! struct Greeting;
//!
//! #[async_trait]
//! impl Connector for Greeting {
//!     fn name(&self) -> &str { "hello" }
//!     fn description(&self) -> &str { "Publish a single greeting" }
//!
//!     async fn execute(&self, publisher: &Publisher) -> Result<()> {
//!         let mut record = Record::new("greeting-1");
//!         record.set_field("text", "hello")?;
//!         publisher.publish(record).await
//!     }
//! }
//!
//! let mut connectors = ConnectorRegistry::new();
//! connectors.register(Box::new(Greeting));
//! assert_eq!(connectors.connectors()[0].source_label(), "custom:hello");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::publisher::Publisher;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Instance name, e.g. `"docs"`.
    fn name(&self) -> &str;

    /// One-line description for `sluice sources`.
    fn description(&self) -> &str;

    /// Type identifier (`"filesystem"`, `"jsonl"`, `"custom"`).
    fn connector_type(&self) -> &str {
        "custom"
    }

    /// `"{type}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Runs before [`execute`](Connector::execute). An error skips the connector.
    async fn pre_execute(&self, _run_id: &str) -> Result<()> {
        Ok(())
    }

    /// Read the source and publish every item.
    async fn execute(&self, publisher: &Publisher) -> Result<()>;

    /// Runs after a successful [`execute`](Connector::execute).
    async fn post_execute(&self, _run_id: &str) -> Result<()> {
        Ok(())
    }
}

/// `prefix` followed by the hex SHA-256 of `locator`.
pub fn record_id(prefix: &str, locator: &str) -> String {
    let digest = Sha256::digest(locator.as_bytes());
    format!("{}{}", prefix, hex::encode(digest))
}

pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// A registry holding every connector instance named in the config.
    pub fn from_config(config: &Config) -> Self {
        use crate::connector_csv::CsvConnector;
        use crate::connector_fs::FilesystemConnector;
        use crate::connector_jsonl::JsonlConnector;

        let mut registry = Self::new();
        for (name, cfg) in &config.connectors.filesystem {
            registry.register(Box::new(FilesystemConnector::new(name.clone(), cfg.clone())));
        }
        for (name, cfg) in &config.connectors.jsonl {
            registry.register(Box::new(JsonlConnector::new(name.clone(), cfg.clone())));
        }
        for (name, cfg) in &config.connectors.csv {
            registry.register(Box::new(CsvConnector::new(name.clone(), cfg.clone())));
        }
        registry
    }

    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    /// Find a connector by its `type:name` label.
    pub fn find(&self, label: &str) -> Option<&dyn Connector> {
        self.connectors
            .iter()
            .find(|c| c.source_label() == label)
            .map(|c| c.as_ref())
    }

    pub fn connectors_by_type(&self, connector_type: &str) -> Vec<&dyn Connector> {
        self.connectors
            .iter()
            .filter(|c| c.connector_type() == connector_type)
            .map(|c| c.as_ref())
            .collect()
    }

    /// Resolve a `--connector` filter: nothing (all), a type, or `type:name`.
    pub fn select(&self, filter: Option<&str>) -> Result<Vec<&dyn Connector>> {
        let selected: Vec<&dyn Connector> = match filter {
            None | Some("all") => self.connectors.iter().map(|c| c.as_ref()).collect(),
            Some(label) if label.contains(':') => self.find(label).into_iter().collect(),
            Some(connector_type) => self.connectors_by_type(connector_type),
        };
        if selected.is_empty() {
            match filter {
                None | Some("all") => bail!("No connectors configured"),
                Some(f) => bail!("No configured connector matches '{}'", f),
            }
        }
        Ok(selected)
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Print the configured connectors.
pub fn list_sources(registry: &ConnectorRegistry) {
    println!("{:<28} DESCRIPTION", "CONNECTOR");
    for connector in registry.connectors() {
        println!("{:<28} {}", connector.source_label(), connector.description());
    }
    if registry.is_empty() {
        println!("(no connectors configured)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Connector for Named {
        fn name(&self) -> &str {
            self.1
        }
        fn description(&self) -> &str {
            "test"
        }
        fn connector_type(&self) -> &str {
            self.0
        }
        async fn execute(&self, _publisher: &Publisher) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        registry.register(Box::new(Named("filesystem", "docs")));
        registry.register(Box::new(Named("filesystem", "notes")));
        registry.register(Box::new(Named("jsonl", "replay")));
        registry
    }

    fn labels(selected: Vec<&dyn Connector>) -> Vec<String> {
        selected.iter().map(|c| c.source_label()).collect()
    }

    #[test]
    fn test_select_filters() {
        let registry = registry();
        assert_eq!(registry.select(None).unwrap().len(), 3);
        assert_eq!(registry.select(Some("all")).unwrap().len(), 3);
        assert_eq!(
            labels(registry.select(Some("filesystem")).unwrap()),
            vec!["filesystem:docs", "filesystem:notes"]
        );
        assert_eq!(
            labels(registry.select(Some("jsonl:replay")).unwrap()),
            vec!["jsonl:replay"]
        );
        assert!(registry.select(Some("jsonl:nope")).is_err());
        assert!(registry.select(Some("git")).is_err());
        assert!(ConnectorRegistry::new().select(None).is_err());
    }

    #[test]
    fn test_record_id() {
        let id = record_id("fs-", "/tmp/a.txt");
        assert!(id.starts_with("fs-"));
        assert_eq!(id.len(), 3 + 64);
        assert_eq!(id, record_id("fs-", "/tmp/a.txt"));
        assert_ne!(id, record_id("fs-", "/tmp/b.txt"));
    }
}
