//! Copy field values into other fields.

use crate::error::StageError;
use crate::record::{Record, UpdateMode};
use crate::stage::{Stage, StageConfig, StageResult, StageSpec};
use crate::value::Value;

pub struct CopyFields {
    name: String,
    mapping: Vec<(String, String)>,
    mode: UpdateMode,
}

impl CopyFields {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new()
            .required(&["field_mapping"])
            .optional(&["update_mode"])
            .validate(config)?;
        let name = config.label("copy_fields");
        let mapping = config.get_str_map("field_mapping")?.unwrap_or_default();
        if mapping.is_empty() {
            return Err(StageError::config(name, "field_mapping is empty"));
        }
        Ok(Self {
            name,
            mapping,
            mode: config.update_mode()?,
        })
    }
}

impl Stage for CopyFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        for (source, dest) in &self.mapping {
            let values: Vec<Value> = match record.get_many(source) {
                Some(values) => values.iter().flatten().cloned().collect(),
                None => match record.get_str(source) {
                    // id and run_id live outside the field store
                    Some(s) => vec![Value::from(s)],
                    None => continue,
                },
            };
            record.update(dest, self.mode, values)?;
        }
        Ok(None)
    }
}
