//! CSV connector: one record per data row.
//!
//! The header row names the fields. The row's id column (`id_field`, or the
//! first column) is combined with the file path and hashed into the record
//! id, so ids stay stable across runs. An empty id cell falls back to the
//! line number. Columns named like reserved record fields are skipped.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sluice_core::record::{is_reserved, Record};
use tracing::{debug, info, warn};

use crate::config::CsvConnectorConfig;
use crate::connector::{record_id, Connector};
use crate::connector_fs::FILE_PATH;
use crate::publisher::Publisher;

pub const CSV_LINE_NUMBER: &str = "csv_line_number";

pub struct CsvConnector {
    name: String,
    config: CsvConnectorConfig,
}

/// Rows that parsed, plus how many were skipped.
#[derive(Debug, Default)]
pub struct CsvRows {
    pub records: Vec<Record>,
    pub skipped: usize,
}

impl CsvConnector {
    pub fn new(name: String, config: CsvConnectorConfig) -> Self {
        Self { name, config }
    }

    /// Read the whole file into records. Blocking.
    pub fn read_rows(&self) -> Result<CsvRows> {
        read_rows(&self.name, &self.config)
    }
}

fn read_rows(name: &str, config: &CsvConnectorConfig) -> Result<CsvRows> {
    let path: &Path = &config.path;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter as u8)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers of {}", path.display()))?
        .clone();
    if headers.is_empty() {
        bail!("{} has no header row", path.display());
    }

    let id_index = match &config.id_field {
        Some(field) => headers
            .iter()
            .position(|h| h == field)
            .with_context(|| format!("id_field '{}' is not a column of {}", field, path.display()))?,
        None => 0,
    };
    for header in headers.iter().filter(|h| is_reserved(h)) {
        debug!(connector = %name, column = header, "skipping reserved column");
    }

    let path_str = path.to_string_lossy().to_string();
    let mut rows = CsvRows::default();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                rows.skipped += 1;
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                warn!(connector = %name, line, error = %e, "skipping unreadable row");
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or_default();
        let id_value = match row.get(id_index).filter(|v| !v.is_empty()) {
            Some(value) => value.to_string(),
            None => line.to_string(),
        };

        let mut record = Record::new(record_id(
            &config.doc_id_prefix,
            &format!("{}:{}", path_str, id_value),
        ));
        record.set_field(FILE_PATH, path_str.as_str())?;
        record.set_field(CSV_LINE_NUMBER, line as i64)?;
        for (header, value) in headers.iter().zip(row.iter()) {
            if is_reserved(header) || header.is_empty() {
                continue;
            }
            record.set_field(header, value)?;
        }
        rows.records.push(record);
    }
    Ok(rows)
}

#[async_trait]
impl Connector for CsvConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Publish the rows of a CSV file"
    }

    fn connector_type(&self) -> &str {
        "csv"
    }

    async fn execute(&self, publisher: &Publisher) -> Result<()> {
        let name = self.name.clone();
        let config = self.config.clone();
        let rows = tokio::task::spawn_blocking(move || read_rows(&name, &config))
            .await
            .context("csv read panicked")??;
        info!(
            connector = %self.source_label(),
            rows = rows.records.len(),
            skipped = rows.skipped,
            "read csv"
        );
        for record in rows.records {
            publisher.publish(record).await?;
        }
        Ok(())
    }
}
