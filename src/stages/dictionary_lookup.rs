//! Map whole field values through a dictionary.
//!
//! Each value of a `source` field is looked up as an exact term; every
//! payload of a hit is written to the matching `dest` field. Partial
//! matches never count. With a single `dest`, every source feeds it.
//!
//! | Option | Default | |
//! |--------|---------|-|
//! | `source` | | list of fields to read |
//! | `dest` | | list of fields to write, one per source or exactly one |
//! | `dict_path` | | dictionary file, loaded in `start()` |
//! | `ignore_case` | `false` | compare lowercased values |
//! | `update_mode` | `overwrite` | how an existing `dest` is treated |

use std::collections::HashMap;
use std::path::PathBuf;

use sluice_core::error::StageError;
use sluice_core::record::{Record, UpdateMode};
use sluice_core::stage::{Stage, StageConfig, StageResult, StageSpec};
use sluice_core::value::Value;
use tracing::debug;

use super::dictionary::load_dictionary;

#[derive(Debug)]
pub struct DictionaryLookup {
    name: String,
    sources: Vec<String>,
    dests: Vec<String>,
    dict_path: PathBuf,
    ignore_case: bool,
    update_mode: UpdateMode,
    dictionary: Option<HashMap<String, Vec<String>>>,
}

impl DictionaryLookup {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new()
            .required(&["source", "dest", "dict_path"])
            .optional(&["ignore_case", "update_mode"])
            .validate(config)?;
        let name = config.label("dictionary_lookup");
        let (sources, dests) = source_dest_lists(config, &name)?;
        Ok(Self {
            sources,
            dests,
            dict_path: PathBuf::from(config.require_str("dict_path")?),
            ignore_case: config.get_bool("ignore_case")?.unwrap_or(false),
            update_mode: config.update_mode()?,
            dictionary: None,
            name,
        })
    }

    fn key(&self, value: &str) -> String {
        if self.ignore_case {
            value.to_lowercase()
        } else {
            value.to_string()
        }
    }
}

/// Read `source` and `dest` lists; `dest` has one entry per source or one
/// entry overall.
pub(crate) fn source_dest_lists(
    config: &StageConfig,
    name: &str,
) -> Result<(Vec<String>, Vec<String>), StageError> {
    let sources = config.get_str_list("source")?.unwrap_or_default();
    let dests = config.get_str_list("dest")?.unwrap_or_default();
    if sources.is_empty() {
        return Err(StageError::config(name, "source must list at least one field"));
    }
    if dests.len() != 1 && dests.len() != sources.len() {
        return Err(StageError::config(
            name,
            format!(
                "dest must list one field or one per source ({}), got {}",
                sources.len(),
                dests.len()
            ),
        ));
    }
    Ok((sources, dests))
}

/// Destination for the source at `index`.
pub(crate) fn dest_for(dests: &[String], index: usize) -> &str {
    if dests.len() == 1 {
        &dests[0]
    } else {
        &dests[index]
    }
}

/// Write gathered values per destination, preserving first-seen order.
pub(crate) fn write_outputs(
    record: &mut Record,
    outputs: Vec<(String, Vec<Value>)>,
    mode: UpdateMode,
) -> Result<(), StageError> {
    for (dest, values) in outputs {
        record.update(&dest, mode, values)?;
    }
    Ok(())
}

pub(crate) fn push_output(outputs: &mut Vec<(String, Vec<Value>)>, dest: &str, values: Vec<Value>) {
    if values.is_empty() {
        return;
    }
    match outputs.iter_mut().find(|(name, _)| name == dest) {
        Some((_, existing)) => existing.extend(values),
        None => outputs.push((dest.to_string(), values)),
    }
}

impl Stage for DictionaryLookup {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), StageError> {
        let entries = load_dictionary(&self.dict_path)
            .map_err(|e| StageError::start(&self.name, format!("{:#}", e)))?;
        let mut dictionary: HashMap<String, Vec<String>> = HashMap::new();
        for entry in entries {
            dictionary
                .entry(self.key(&entry.term))
                .or_default()
                .extend(entry.payloads);
        }
        debug!(stage = %self.name, terms = dictionary.len(), "dictionary loaded");
        self.dictionary = Some(dictionary);
        Ok(())
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        let dictionary = self
            .dictionary
            .as_ref()
            .ok_or_else(|| StageError::lifecycle(&self.name, "dictionary not loaded; call start() first"))?;

        let mut outputs = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            let values: Vec<Value> = record
                .get_strings(source)
                .iter()
                .filter_map(|value| dictionary.get(&self.key(value)))
                .flatten()
                .map(|payload| Value::from(payload.as_str()))
                .collect();
            push_output(&mut outputs, dest_for(&self.dests, index), values);
        }
        write_outputs(record, outputs, self.update_mode)?;
        Ok(None)
    }

    fn stop(&mut self) -> Result<(), StageError> {
        self.dictionary = None;
        Ok(())
    }
}
