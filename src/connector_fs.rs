//! Filesystem connector: one record per matching file under a root.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sluice_core::record::Record;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::FilesystemConnectorConfig;
use crate::connector::{record_id, Connector};
use crate::publisher::Publisher;

pub const FILE_PATH: &str = "file_path";
pub const FILE_MODIFICATION_DATE: &str = "file_modification_date";
pub const FILE_CREATION_DATE: &str = "file_creation_date";
pub const FILE_SIZE_BYTES: &str = "file_size_bytes";
pub const FILE_CONTENT: &str = "file_content";

#[derive(Clone)]
pub struct FilesystemConnector {
    name: String,
    config: FilesystemConnectorConfig,
}

impl FilesystemConnector {
    pub fn new(name: String, config: FilesystemConnectorConfig) -> Self {
        Self { name, config }
    }

    /// Matching files under the root, sorted by path.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let root = &self.config.root;
        let include_set = build_globset(&self.config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(self.config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let mut files = Vec::new();
        let walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(connector = %self.name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }

    fn file_to_record(&self, path: &Path) -> Result<Record> {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let path_str = path.to_string_lossy().to_string();
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        let created: DateTime<Utc> = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);

        let mut record = Record::new(record_id(&self.config.doc_id_prefix, &path_str));
        record.set_field(FILE_PATH, path_str.as_str())?;
        record.set_field(FILE_MODIFICATION_DATE, modified)?;
        record.set_field(FILE_CREATION_DATE, created)?;
        record.set_field(FILE_SIZE_BYTES, metadata.len() as i64)?;
        if self.config.content_as_text {
            record.set_field(FILE_CONTENT, String::from_utf8_lossy(&content).into_owned())?;
        } else {
            record.set_field(FILE_CONTENT, content)?;
        }
        Ok(record)
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Publish files under a local directory"
    }

    fn connector_type(&self) -> &str {
        "filesystem"
    }

    async fn pre_execute(&self, _run_id: &str) -> Result<()> {
        let is_dir = tokio::fs::metadata(&self.config.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            bail!(
                "Filesystem connector root does not exist: {}",
                self.config.root.display()
            );
        }
        Ok(())
    }

    async fn execute(&self, publisher: &Publisher) -> Result<()> {
        let scanner = self.clone();
        let files = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .context("filesystem scan panicked")??;
        info!(connector = %self.source_label(), files = files.len(), "scanned filesystem");
        for path in files {
            let reader = self.clone();
            let read = tokio::task::spawn_blocking(move || reader.file_to_record(&path))
                .await
                .context("file read panicked")?;
            match read {
                Ok(record) => publisher.publish(record).await?,
                Err(e) => warn!(connector = %self.name, error = %e, "skipping file"),
            }
        }
        Ok(())
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn connector(root: &Path, f: impl FnOnce(&mut FilesystemConnectorConfig)) -> FilesystemConnector {
        let mut config = FilesystemConnectorConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            doc_id_prefix: String::new(),
            content_as_text: false,
        };
        f(&mut config);
        FilesystemConnector::new("docs".to_string(), config)
    }

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/pkg")).unwrap();
        fs::write(tmp.path().join("a.md"), "# A").unwrap();
        fs::write(tmp.path().join("b.txt"), "b").unwrap();
        fs::write(tmp.path().join("sub/c.md"), "c").unwrap();
        fs::write(tmp.path().join("node_modules/pkg/d.md"), "d").unwrap();
        tmp
    }

    #[test]
    fn test_scan_globs_and_default_excludes() {
        let tmp = tree();
        let all = connector(tmp.path(), |_| {}).scan().unwrap();
        assert_eq!(all.len(), 3);

        let md = connector(tmp.path(), |c| c.include_globs = vec!["**/*.md".into()])
            .scan()
            .unwrap();
        let names: Vec<_> = md
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "c.md"]);

        let excluded = connector(tmp.path(), |c| c.exclude_globs = vec!["sub/**".into()])
            .scan()
            .unwrap();
        assert_eq!(excluded.len(), 2);
    }

    #[test]
    fn test_record_fields() {
        let tmp = tree();
        let c = connector(tmp.path(), |c| c.doc_id_prefix = "fs-".into());
        let record = c.file_to_record(&tmp.path().join("a.md")).unwrap();
        assert!(record.id().starts_with("fs-"));
        assert_eq!(record.get_i64(FILE_SIZE_BYTES), Some(3));
        assert_eq!(record.get_bytes(FILE_CONTENT), Some(b"# A".to_vec()));
        assert!(record.get_str(FILE_PATH).unwrap().ends_with("a.md"));
        assert!(record.get_timestamp(FILE_MODIFICATION_DATE).is_some());
        assert!(record.get_timestamp(FILE_CREATION_DATE).is_some());
    }

    #[test]
    fn test_content_as_text() {
        let tmp = tree();
        let c = connector(tmp.path(), |c| c.content_as_text = true);
        let record = c.file_to_record(&tmp.path().join("a.md")).unwrap();
        assert_eq!(record.get_str(FILE_CONTENT), Some("# A"));
    }

    #[tokio::test]
    async fn test_missing_root_fails_pre_execute() {
        let tmp = TempDir::new().unwrap();
        let c = connector(&tmp.path().join("missing"), |_| {});
        assert!(c.pre_execute("run").await.is_err());
    }

    #[tokio::test]
    async fn test_execute_publishes_every_file() {
        let tmp = tree();
        let c = connector(tmp.path(), |_| {});
        let (publisher, mut rx) = Publisher::channel("run-1", 16);
        c.execute(&publisher).await.unwrap();
        drop(publisher);
        let mut count = 0;
        while let Some(record) = rx.recv().await {
            assert_eq!(record.run_id(), Some("run-1"));
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_execute_with_backpressure_on_single_thread() {
        let tmp = tree();
        let c = connector(tmp.path(), |c| c.content_as_text = true);
        let (publisher, mut rx) = Publisher::channel("run-1", 1);
        let reader = tokio::spawn(async move {
            let mut contents = Vec::new();
            while let Some(record) = rx.recv().await {
                contents.push(record.get_str(FILE_CONTENT).unwrap_or_default().to_string());
            }
            contents
        });
        c.execute(&publisher).await.unwrap();
        drop(publisher);
        let mut contents = reader.await.unwrap();
        contents.sort();
        assert_eq!(contents, vec!["# A", "b", "c"]);
    }
}
