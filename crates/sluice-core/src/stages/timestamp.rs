//! Stamp records with the current time.

use chrono::Utc;

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig, StageResult, StageSpec};

pub struct Timestamp {
    name: String,
    dest_field: String,
}

impl Timestamp {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new().required(&["dest_field"]).validate(config)?;
        Ok(Self {
            name: config.label("timestamp"),
            dest_field: config.require_str("dest_field")?,
        })
    }
}

impl Stage for Timestamp {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        record.set_field(&self.dest_field, Utc::now())?;
        Ok(None)
    }
}
