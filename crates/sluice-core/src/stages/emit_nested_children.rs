//! Turn attached children into fan-out records.

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig, StageResult, StageSpec};

pub struct EmitNestedChildren {
    name: String,
    drop_parent: bool,
}

impl EmitNestedChildren {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new().optional(&["drop_parent"]).validate(config)?;
        Ok(Self {
            name: config.label("emit_nested_children"),
            drop_parent: config.get_bool("drop_parent")?.unwrap_or(false),
        })
    }
}

impl Stage for EmitNestedChildren {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        if self.drop_parent {
            record.mark_dropped();
        }
        if !record.has_children() {
            return Ok(None);
        }
        let mut children = record.take_children();
        if let Some(run_id) = record.run_id() {
            for child in children.iter_mut() {
                child.inherit_run_id(run_id);
            }
        }
        Ok(Some(children))
    }
}
