//! Tag records whose fields mention any of a list of words.
//!
//! Words are matched whole (see [`WordMatcher`]), and the scan stops at the
//! first hit.

use crate::error::StageError;
use crate::record::{Record, UpdateMode};
use crate::stage::{Stage, StageConfig, StageResult, StageSpec};
use crate::stages::word_matcher::WordMatcher;
use crate::value::Value;

pub struct Contains {
    name: String,
    words: Vec<String>,
    output: String,
    value: String,
    fields: Vec<String>,
    ignore_case: bool,
    matcher: Option<WordMatcher>,
}

impl Contains {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new()
            .required(&["contains", "output", "value", "fields"])
            .optional(&["ignore_case"])
            .validate(config)?;
        Ok(Self {
            name: config.label("contains"),
            words: config.get_str_list("contains")?.unwrap_or_default(),
            output: config.require_str("output")?,
            value: config.require_str("value")?,
            fields: config.get_str_list("fields")?.unwrap_or_default(),
            ignore_case: config.get_bool("ignore_case")?.unwrap_or(true),
            matcher: None,
        })
    }

    fn matches(&self, matcher: &WordMatcher, record: &Record) -> bool {
        self.fields.iter().any(|field| {
            record
                .get_strings(field)
                .iter()
                .any(|text| matcher.is_match(text))
        })
    }
}

impl Stage for Contains {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), StageError> {
        if self.words.is_empty() {
            return Err(StageError::start(&self.name, "contains list is empty"));
        }
        let matcher = WordMatcher::new(&self.words, self.ignore_case)
            .map_err(|e| StageError::start(&self.name, e))?;
        self.matcher = Some(matcher);
        Ok(())
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        let matcher = self
            .matcher
            .as_ref()
            .ok_or_else(|| StageError::lifecycle(&self.name, "matcher not built; call start() first"))?;
        if self.matches(matcher, record) {
            record.update(
                &self.output,
                UpdateMode::Overwrite,
                vec![Value::from(self.value.as_str())],
            )?;
        }
        Ok(None)
    }
}
