//! Rename fields according to a `field_mapping` table.

use tracing::debug;

use crate::error::StageError;
use crate::record::{Record, UpdateMode};
use crate::stage::{Stage, StageConfig, StageResult, StageSpec};

pub struct RenameFields {
    name: String,
    mapping: Vec<(String, String)>,
    mode: UpdateMode,
}

impl RenameFields {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new()
            .required(&["field_mapping"])
            .optional(&["update_mode"])
            .validate(config)?;
        Ok(Self {
            name: config.label("rename_fields"),
            mapping: config.get_str_map("field_mapping")?.unwrap_or_default(),
            mode: config.update_mode()?,
        })
    }
}

impl Stage for RenameFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), StageError> {
        if self.mapping.is_empty() {
            return Err(StageError::start(&self.name, "field_mapping is empty"));
        }
        Ok(())
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        for (old, new) in &self.mapping {
            if !record.has(old) {
                debug!(record = record.id(), field = %old, "rename source missing");
                continue;
            }
            record.rename_field(old, new, self.mode)?;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage(mapping: serde_json::Value, mode: Option<&str>) -> RenameFields {
        let mut config = StageConfig::new().with("field_mapping", mapping);
        if let Some(mode) = mode {
            config = config.with("update_mode", mode);
        }
        let mut stage = RenameFields::new(&config).unwrap();
        stage.start().unwrap();
        stage
    }

    #[test]
    fn test_rename_in_order() {
        let s = stage(json!({"a": "b", "b": "c"}), None);
        let mut record = Record::new("r");
        record.set_field("a", "x").unwrap();
        s.process_record(&mut record).unwrap();
        assert!(!record.has("a"));
        assert!(!record.has("b"));
        assert_eq!(record.get_str("c"), Some("x"));
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let s = stage(json!({"nope": "b"}), None);
        let mut record = Record::new("r");
        record.set_field("keep", 1i64).unwrap();
        s.process_record(&mut record).unwrap();
        assert!(!record.has("b"));
        assert_eq!(record.get_i64("keep"), Some(1));
    }

    #[test]
    fn test_append_mode() {
        let s = stage(json!({"a": "b"}), Some("append"));
        let mut record = Record::new("r");
        record.set_field("a", "new").unwrap();
        record.set_field("b", "old").unwrap();
        s.process_record(&mut record).unwrap();
        assert_eq!(record.get_strings("b"), vec!["old", "new"]);
    }

    #[test]
    fn test_skip_mode_keeps_destination() {
        let s = stage(json!({"a": "b"}), Some("skip"));
        let mut record = Record::new("r");
        record.set_field("a", "new").unwrap();
        record.set_field("b", "old").unwrap();
        s.process_record(&mut record).unwrap();
        assert!(!record.has("a"));
        assert_eq!(record.get_str("b"), Some("old"));
    }

    #[test]
    fn test_empty_mapping_fails_start() {
        let mut s = RenameFields::new(&StageConfig::new().with("field_mapping", json!({}))).unwrap();
        assert!(matches!(s.start(), Err(StageError::Start { .. })));
    }

    #[test]
    fn test_non_string_mapping_is_config_error() {
        let config = StageConfig::new().with("field_mapping", json!({"a": 1}));
        assert!(RenameFields::new(&config).err().unwrap().is_config());
    }
}
