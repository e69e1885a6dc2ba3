//! Extract dictionary terms found anywhere inside text fields.
//!
//! The dictionaries are compiled into one [`WordMatcher`] in `start()`.
//! Each hit contributes its payloads (or the term itself when
//! `use_payloads` is off) to the destination field, in text order.
//!
//! | Option | Default | |
//! |--------|---------|-|
//! | `source` | | list of fields to scan |
//! | `dest` | | one field per source, or one shared field |
//! | `dictionaries` | | dictionary files |
//! | `ignore_case` | `false` | |
//! | `only_whole_words` | `true` | reject hits inside longer words |
//! | `ignore_overlaps` | `true` | keep the leftmost, longest of overlapping hits |
//! | `stop_on_hit` | `false` | keep only the first hit per source field |
//! | `use_payloads` | `true` | |
//! | `update_mode` | `overwrite` | |

use sluice_core::error::StageError;
use sluice_core::record::{Record, UpdateMode};
use sluice_core::stage::{Stage, StageConfig, StageResult, StageSpec};
use sluice_core::stages::WordMatcher;
use sluice_core::value::Value;
use tracing::debug;

use super::dictionary::{load_dictionaries, DictionaryEntry};
use super::dictionary_lookup::{dest_for, push_output, source_dest_lists, write_outputs};

pub struct ExtractEntities {
    name: String,
    sources: Vec<String>,
    dests: Vec<String>,
    dictionaries: Vec<String>,
    ignore_case: bool,
    only_whole_words: bool,
    ignore_overlaps: bool,
    stop_on_hit: bool,
    use_payloads: bool,
    update_mode: UpdateMode,
    loaded: Option<(WordMatcher, Vec<DictionaryEntry>)>,
}

impl ExtractEntities {
    pub fn new(config: &StageConfig) -> Result<Self, StageError> {
        StageSpec::new()
            .required(&["source", "dest", "dictionaries"])
            .optional(&[
                "ignore_case",
                "only_whole_words",
                "ignore_overlaps",
                "stop_on_hit",
                "use_payloads",
                "update_mode",
            ])
            .validate(config)?;
        let name = config.label("extract_entities");
        let (sources, dests) = source_dest_lists(config, &name)?;
        let dictionaries = config.get_str_list("dictionaries")?.unwrap_or_default();
        if dictionaries.is_empty() {
            return Err(StageError::config(&name, "dictionaries must list at least one file"));
        }
        Ok(Self {
            sources,
            dests,
            dictionaries,
            ignore_case: config.get_bool("ignore_case")?.unwrap_or(false),
            only_whole_words: config.get_bool("only_whole_words")?.unwrap_or(true),
            ignore_overlaps: config.get_bool("ignore_overlaps")?.unwrap_or(true),
            stop_on_hit: config.get_bool("stop_on_hit")?.unwrap_or(false),
            use_payloads: config.get_bool("use_payloads")?.unwrap_or(true),
            update_mode: config.update_mode()?,
            loaded: None,
            name,
        })
    }

    fn extract(&self, matcher: &WordMatcher, entries: &[DictionaryEntry], text: &str) -> Vec<Value> {
        let mut hits = matcher.find_all(text, self.ignore_overlaps);
        if self.stop_on_hit {
            hits.truncate(1);
        }
        let mut values = Vec::new();
        for hit in hits {
            let entry = &entries[hit.term];
            if self.use_payloads {
                values.extend(entry.payloads.iter().map(|p| Value::from(p.as_str())));
            } else {
                values.push(Value::from(entry.term.as_str()));
            }
        }
        values
    }
}

impl Stage for ExtractEntities {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), StageError> {
        let entries = load_dictionaries(&self.dictionaries)
            .map_err(|e| StageError::start(&self.name, format!("{:#}", e)))?;
        if entries.is_empty() {
            return Err(StageError::start(&self.name, "dictionaries contain no terms"));
        }
        let terms: Vec<&str> = entries.iter().map(|e| e.term.as_str()).collect();
        let matcher = WordMatcher::new(&terms, self.ignore_case)
            .map_err(|e| StageError::start(&self.name, e))?
            .with_whole_words(self.only_whole_words);
        debug!(stage = %self.name, terms = entries.len(), "entity matcher built");
        self.loaded = Some((matcher, entries));
        Ok(())
    }

    fn process_record(&self, record: &mut Record) -> StageResult {
        let (matcher, entries) = self
            .loaded
            .as_ref()
            .ok_or_else(|| StageError::lifecycle(&self.name, "matcher not built; call start() first"))?;

        let mut outputs = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            let mut values = Vec::new();
            for text in record.get_strings(source) {
                values.extend(self.extract(matcher, entries, &text));
                if self.stop_on_hit && !values.is_empty() {
                    break;
                }
            }
            push_output(&mut outputs, dest_for(&self.dests, index), values);
        }
        write_outputs(record, outputs, self.update_mode)?;
        Ok(None)
    }

    fn stop(&mut self) -> Result<(), StageError> {
        self.loaded = None;
        Ok(())
    }
}
