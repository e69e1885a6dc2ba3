//! The [`Stage`] trait and the configuration contract every stage declares.
//!
//! A stage is built once from a [`StageConfig`] (a flat map of named
//! options), validated against its [`StageSpec`], started once, then handed
//! records one at a time.
//!
//! # Lifecycle
//!
//! ```text
//! new(config) ──▶ start() ──▶ process_record()* ──▶ stop()
//!   Config errors   fatal        per-record
//! ```
//!
//! Construction and `start` failures abort pipeline assembly before any
//! record is touched. `process_record` takes `&self`: anything built in
//! `start` is read-only afterwards, so one started stage may serve several
//! worker threads at once.
//!
//! # Example
//!
//! ```rust
//! use sluice_core::error::StageError;
//! use sluice_core::record::Record;
//! use sluice_core::stage::{Stage, StageConfig, StageSpec};
//!
//! struct Shout {
//!     name: String,
//!     field: String,
//! }
//!
//! impl Shout {
//!     fn new(config: &StageConfig) -> Result<Self, StageError> {
//!         StageSpec::new().required(&["field"]).validate(config)?;
//!         Ok(Self { name: config.label("shout"), field: config.require_str("field")? })
//!     }
//! }
//!
//! impl Stage for Shout {
//!     fn name(&self) -> &str { &self.name }
//!
//!     fn process_record(&self, record: &mut Record) -> Result<Option<Vec<Record>>, StageError> {
//!         if let Some(text) = record.get_str(&self.field).map(str::to_uppercase) {
//!             record.set_field(&self.field, text)?;
//!         }
//!         Ok(None)
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::record::{Record, UpdateMode};

/// Options every stage accepts in addition to its own.
pub const COMMON_OPTIONS: [&str; 2] = ["type", "name"];

/// Outcome of processing one record: `None` or a list of fan-out records.
pub type StageResult = Result<Option<Vec<Record>>, StageError>;

/// A named transformation step.
///
/// Implementations must be `Send + Sync`; mutable state lives in the record,
/// never in the stage, once `start` has returned.
pub trait Stage: Send + Sync {
    /// Instance name used in logs and failure reports.
    fn name(&self) -> &str;

    /// One-time setup before the first record (compile matchers, build
    /// clients, load models). Failure aborts the pipeline.
    fn start(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Transform `record` in place.
    ///
    /// Returning `Some(records)` fans out: each returned record continues
    /// from the next stage on, before `record` itself does. To suppress
    /// delivery, call [`Record::mark_dropped`]. To attach inert nested
    /// records, use [`Record::add_child`].
    fn process_record(&self, record: &mut Record) -> StageResult;

    /// Teardown after the last record.
    fn stop(&mut self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Required and optional option names a stage accepts.
#[derive(Debug, Clone, Default)]
pub struct StageSpec {
    required: Vec<&'static str>,
    optional: Vec<&'static str>,
}

impl StageSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, names: &[&'static str]) -> Self {
        self.required.extend_from_slice(names);
        self
    }

    pub fn optional(mut self, names: &[&'static str]) -> Self {
        self.optional.extend_from_slice(names);
        self
    }

    pub fn required_names(&self) -> &[&'static str] {
        &self.required
    }

    pub fn optional_names(&self) -> &[&'static str] {
        &self.optional
    }

    /// Fail on a missing required option or an option nobody declared.
    pub fn validate(&self, config: &StageConfig) -> Result<(), StageError> {
        let label = config.label("stage");

        let missing: Vec<&str> = self
            .required
            .iter()
            .copied()
            .filter(|name| !config.has(name))
            .collect();
        if !missing.is_empty() {
            return Err(StageError::config(
                label,
                format!("missing required option(s): {}", missing.join(", ")),
            ));
        }

        let unknown: Vec<&str> = config
            .keys()
            .filter(|key| {
                !COMMON_OPTIONS
                    .iter()
                    .chain(&self.required)
                    .chain(&self.optional)
                    .any(|known| known == key)
            })
            .collect();
        if !unknown.is_empty() {
            return Err(StageError::config(
                label,
                format!("unknown option(s): {}", unknown.join(", ")),
            ));
        }

        Ok(())
    }
}

/// Flat option map for one stage, e.g. one `[[pipeline.stages]]` table.
///
/// Accessors return `Ok(None)` for a missing option and a
/// [`StageError::Config`] when the option has the wrong shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageConfig {
    options: serde_json::Map<String, serde_json::Value>,
}

impl StageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style option setter.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    pub fn from_map(options: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { options }
    }

    pub fn stage_type(&self) -> Option<&str> {
        self.options.get("type").and_then(|v| v.as_str())
    }

    /// The configured `name`, falling back to `type`, then to `default`.
    pub fn label(&self, default: &str) -> String {
        self.options
            .get("name")
            .and_then(|v| v.as_str())
            .or_else(|| self.stage_type())
            .unwrap_or(default)
            .to_string()
    }

    pub fn has(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(|k| k.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>, StageError> {
        match self.options.get(key) {
            None => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.wrong_type(key, "a string")),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<String, StageError> {
        self.get_str(key)?.ok_or_else(|| {
            StageError::config(self.label("stage"), format!("missing required option: {}", key))
        })
    }

    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, StageError> {
        match self.options.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.wrong_type(key, "an integer")),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, StageError> {
        match self.options.get(key) {
            None => Ok(None),
            Some(serde_json::Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.wrong_type(key, "a boolean")),
        }
    }

    pub fn get_str_list(&self, key: &str) -> Result<Option<Vec<String>>, StageError> {
        match self.options.get(key) {
            None => Ok(None),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.wrong_type(key, "a list of strings"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(self.wrong_type(key, "a list of strings")),
        }
    }

    /// A table of string to string, in declaration order.
    pub fn get_str_map(&self, key: &str) -> Result<Option<Vec<(String, String)>>, StageError> {
        match self.options.get(key) {
            None => Ok(None),
            Some(serde_json::Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    v.as_str()
                        .map(|s| (k.clone(), s.to_string()))
                        .ok_or_else(|| self.wrong_type(key, "a table of strings"))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(self.wrong_type(key, "a table of strings")),
        }
    }

    /// The `update_mode` option, defaulting to overwrite.
    pub fn update_mode(&self) -> Result<UpdateMode, StageError> {
        match self.get_str("update_mode")? {
            None => Ok(UpdateMode::default()),
            Some(s) => s
                .parse()
                .map_err(|e: String| StageError::config(self.label("stage"), e)),
        }
    }

    fn wrong_type(&self, key: &str, expected: &str) -> StageError {
        StageError::config(
            self.label("stage"),
            format!("option '{}' must be {}", key, expected),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> StageSpec {
        StageSpec::new().required(&["source"]).optional(&["dest"])
    }

    #[test]
    fn test_validate_accepts_declared_and_common_options() {
        let config = StageConfig::new()
            .with("type", "chunk_text")
            .with("name", "chunker")
            .with("source", "text")
            .with("dest", "chunk");
        assert!(spec().validate(&config).is_ok());
    }

    #[test]
    fn test_validate_missing_required() {
        let config = StageConfig::new().with("type", "t");
        let err = spec().validate(&config).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn test_validate_unknown_option() {
        let config = StageConfig::new().with("source", "a").with("sorce", "b");
        let err = spec().validate(&config).unwrap_err();
        assert!(err.to_string().contains("sorce"));
    }

    #[test]
    fn test_accessor_type_errors() {
        let config = StageConfig::new()
            .with("n", "five")
            .with("flag", 1)
            .with("list", serde_json::json!(["a", 2]));
        assert!(config.get_i64("n").is_err());
        assert!(config.get_bool("flag").is_err());
        assert!(config.get_str_list("list").is_err());
        assert_eq!(config.get_i64("missing").unwrap(), None);
    }

    #[test]
    fn test_str_map_keeps_order() {
        let config = StageConfig::new().with("m", serde_json::json!({"z": "1", "a": "2"}));
        let map = config.get_str_map("m").unwrap().unwrap();
        assert_eq!(
            map,
            vec![("z".to_string(), "1".to_string()), ("a".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_label_fallbacks() {
        assert_eq!(StageConfig::new().label("x"), "x");
        assert_eq!(StageConfig::new().with("type", "t").label("x"), "t");
        assert_eq!(
            StageConfig::new().with("type", "t").with("name", "n").label("x"),
            "n"
        );
    }

    #[test]
    fn test_update_mode_option() {
        let config = StageConfig::new().with("update_mode", "append");
        assert_eq!(config.update_mode().unwrap(), UpdateMode::Append);
        let bad = StageConfig::new().with("update_mode", "sideways");
        assert!(bad.update_mode().is_err());
    }
}
