//! Drop every record, or only those whose field holds one of a set of values.

use crate::error::StageError;
use crate::record::{Record, ID_FIELD, RUN_ID_FIELD};
use crate::stage::{Stage, StageConfig, StageResult, StageSpec};

pub struct DropRecord {
    name: String,
    filter: Option<(String, Vec<String>)>,
}

impl DropRecord {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new().optional(&["field", "values"]).validate(config)?;
        let name = config.label("drop_record");
        let filter = match (config.get_str("field")?, config.get_str_list("values")?) {
            (Some(field), Some(values)) => Some((field, values)),
            (None, None) => None,
            _ => {
                return Err(StageError::config(
                    name,
                    "field and values must be given together",
                ))
            }
        };
        Ok(Self { name, filter })
    }
}

impl Stage for DropRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        let drop = match &self.filter {
            None => true,
            Some((field, values)) => field_values(record, field)
                .iter()
                .any(|v| values.contains(v)),
        };
        if drop {
            record.mark_dropped();
        }
        Ok(None)
    }
}

fn field_values(record: &Record, field: &str) -> Vec<String> {
    match field {
        ID_FIELD | RUN_ID_FIELD => record.get_str(field).map(str::to_string).into_iter().collect(),
        _ => record.get_strings(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_drop_all() {
        let stage = DropRecord::new(&StageConfig::new()).unwrap();
        let mut record = Record::new("r");
        stage.process_record(&mut record).unwrap();
        assert!(record.is_dropped());
    }

    #[test]
    fn test_drop_matching_only() {
        let config = StageConfig::new()
            .with("field", "status")
            .with("values", json!(["deleted", "spam"]));
        let stage = DropRecord::new(&config).unwrap();

        let mut keep = Record::new("keep");
        keep.set_field("status", "live").unwrap();
        stage.process_record(&mut keep).unwrap();
        assert!(!keep.is_dropped());

        let mut gone = Record::new("gone");
        gone.add_to_field("status", "live").unwrap();
        gone.add_to_field("status", "spam").unwrap();
        stage.process_record(&mut gone).unwrap();
        assert!(gone.is_dropped());

        let mut missing = Record::new("missing");
        stage.process_record(&mut missing).unwrap();
        assert!(!missing.is_dropped());
    }

    #[test]
    fn test_match_on_id() {
        let config = StageConfig::new()
            .with("field", "id")
            .with("values", json!(["bad"]));
        let stage = DropRecord::new(&config).unwrap();
        let mut record = Record::new("bad");
        stage.process_record(&mut record).unwrap();
        assert!(record.is_dropped());
    }

    #[test]
    fn test_field_without_values_is_config_error() {
        let config = StageConfig::new().with("field", "status");
        assert!(DropRecord::new(&config).err().unwrap().is_config());
    }
}
