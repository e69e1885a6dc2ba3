//! The unit of work flowing through a pipeline.
//!
//! A [`Record`] has an immutable id, an optional run id, a [`FieldStore`], an
//! ordered list of owned child records, and a `dropped` flag. Children form a
//! strict ownership tree and travel with their parent through cloning and
//! serialization.
//!
//! # Reserved fields
//!
//! `id`, `run_id`, `errors` and `.children` cannot be written through the
//! generic field setters. The error list is appended to with
//! [`Record::log_error`]; the run id has its own lifecycle.
//!
//! # JSON form
//!
//! ```json
//! { "id": "doc-1", "run_id": "r1", "title": "x", "tags": ["a", "b"],
//!   ".children": [ { "id": "doc-1-1", "chunk": "..." } ] }
//! ```
//!
//! Multi-valued fields are arrays; children nest recursively. A single JSON
//! document that would read back as a multi-valued field (an array) or as
//! this wrapper itself is written as `{".json": <document>}`. The `dropped`
//! flag is processing state and is not serialized.

use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FieldError;
use crate::fields::{FieldStore, Slot};
use crate::value::{Value, ValueType};

pub const ID_FIELD: &str = "id";
pub const RUN_ID_FIELD: &str = "run_id";
pub const ERRORS_FIELD: &str = "errors";
pub const CHILDREN_FIELD: &str = ".children";

/// Key of the wrapper object around a single-valued JSON document.
pub const JSON_WRAPPER_KEY: &str = ".json";

pub const RESERVED_FIELDS: [&str; 4] = [ID_FIELD, RUN_ID_FIELD, ERRORS_FIELD, CHILDREN_FIELD];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}

/// How a write treats a destination field that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Replace the existing values.
    #[default]
    Overwrite,
    /// Keep the existing values and add the new ones after them.
    Append,
    /// Leave an existing field untouched.
    Skip,
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(UpdateMode::Overwrite),
            "append" => Ok(UpdateMode::Append),
            "skip" => Ok(UpdateMode::Skip),
            other => Err(format!(
                "unknown update mode '{}': expected overwrite, append, or skip",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    id: String,
    run_id: Option<String>,
    fields: FieldStore,
    children: Vec<Record>,
    dropped: bool,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            run_id: None,
            fields: FieldStore::new(),
            children: Vec::new(),
            dropped: false,
        }
    }

    pub fn with_run_id(id: impl Into<String>, run_id: impl Into<String>) -> Self {
        let mut record = Self::new(id);
        record.run_id = Some(run_id.into());
        record
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Stamp the record with the run it belongs to. A record joins at most
    /// one run until [`clear_run_id`](Self::clear_run_id) is called.
    pub fn initialize_run_id(&mut self, run_id: impl Into<String>) -> Result<(), FieldError> {
        if self.run_id.is_some() {
            return Err(FieldError::RunIdAlreadySet(self.id.clone()));
        }
        self.run_id = Some(run_id.into());
        Ok(())
    }

    pub fn clear_run_id(&mut self) {
        self.run_id = None;
    }

    /// Join `run_id` unless the record already belongs to a run.
    pub fn inherit_run_id(&mut self, run_id: &str) {
        if self.run_id.is_none() {
            self.run_id = Some(run_id.to_string());
        }
    }

    pub fn fields(&self) -> &FieldStore {
        &self.fields
    }

    /// True if the field exists, even when null. `id` always exists and
    /// `run_id` exists once initialized.
    pub fn has(&self, name: &str) -> bool {
        match name {
            ID_FIELD => true,
            RUN_ID_FIELD => self.run_id.is_some(),
            CHILDREN_FIELD => !self.children.is_empty(),
            _ => self.fields.contains(name),
        }
    }

    pub fn has_non_null(&self, name: &str) -> bool {
        self.get_one(name).is_some()
    }

    pub fn is_multi_valued(&self, name: &str) -> bool {
        self.fields.is_multi_valued(name)
    }

    pub fn value_type(&self, name: &str) -> Option<ValueType> {
        self.fields.value_type(name)
    }

    pub fn length(&self, name: &str) -> Result<usize, FieldError> {
        self.fields.length(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.names()
    }

    pub fn get_one(&self, name: &str) -> Option<&Value> {
        self.fields.get_one(name)
    }

    pub fn get_many(&self, name: &str) -> Option<&[Option<Value>]> {
        self.fields.get_many(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match name {
            ID_FIELD => Some(&self.id),
            RUN_ID_FIELD => self.run_id(),
            _ => self.get_one(name).and_then(Value::as_str),
        }
    }

    /// Every non-null value of the field rendered as text.
    pub fn get_strings(&self, name: &str) -> Vec<String> {
        self.get_many(name)
            .map(|values| values.iter().flatten().map(Value::to_text).collect())
            .unwrap_or_default()
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        match self.get_one(name)? {
            Value::Int(v) => Some(*v),
            Value::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_one(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_one(name).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get_one(name).and_then(Value::as_bool)
    }

    /// Timestamp value, also accepting RFC 3339 text (as read back from JSON).
    pub fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get_one(name)? {
            Value::Timestamp(t) => Some(*t),
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Binary value, also accepting base64 text (as read back from JSON).
    pub fn get_bytes(&self, name: &str) -> Option<Vec<u8>> {
        match self.get_one(name)? {
            Value::Bytes(b) => Some(b.clone()),
            Value::Text(s) => STANDARD.decode(s).ok(),
            _ => None,
        }
    }

    pub fn get_json(&self, name: &str) -> Option<&serde_json::Value> {
        match self.get_one(name)? {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        check_writable(name)?;
        self.fields.put_one(name, Some(value.into()))
    }

    pub fn set_null(&mut self, name: &str) -> Result<(), FieldError> {
        check_writable(name)?;
        self.fields.put_one(name, None)
    }

    pub fn set_values(&mut self, name: &str, values: Vec<Option<Value>>) -> Result<(), FieldError> {
        check_writable(name)?;
        self.fields.put_many(name, values)
    }

    pub fn add_to_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        check_writable(name)?;
        self.fields.add(name, Some(value.into()))
    }

    pub fn set_or_add(&mut self, name: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        check_writable(name)?;
        self.fields.set_or_add(name, Some(value.into()))
    }

    /// Write `values` into `name` according to `mode`. The field is created
    /// if absent regardless of mode.
    pub fn update(&mut self, name: &str, mode: UpdateMode, values: Vec<Value>) -> Result<(), FieldError> {
        check_writable(name)?;
        if values.is_empty() {
            return Ok(());
        }
        if mode == UpdateMode::Skip && self.fields.contains(name) {
            return Ok(());
        }
        match mode {
            UpdateMode::Append => {
                for value in values {
                    self.fields.set_or_add(name, Some(value))?;
                }
                Ok(())
            }
            UpdateMode::Overwrite | UpdateMode::Skip => {
                let mut values: Vec<Option<Value>> = values.into_iter().map(Some).collect();
                if values.len() == 1 {
                    self.fields.put_one(name, values.pop().flatten())
                } else {
                    self.fields.put_many(name, values)
                }
            }
        }
    }

    /// Copy one field from `other`, appending if this record already has it.
    pub fn set_or_add_from(&mut self, name: &str, other: &Record) -> Result<(), FieldError> {
        check_writable(name)?;
        let Some(slot) = other.fields.slot(name) else {
            return Err(FieldError::NotFound(name.to_string()));
        };
        if self.fields.contains(name) {
            for value in slot.values() {
                self.fields.add(name, value.clone())?;
            }
            return Ok(());
        }
        match slot {
            Slot::Single(v) => self.fields.put_one(name, v.clone()),
            Slot::Multi(vs) => self.fields.put_many(name, vs.clone()),
        }
    }

    /// Copy every non-reserved field of `other` with [`set_or_add_from`](Self::set_or_add_from).
    pub fn set_or_add_all(&mut self, other: &Record) -> Result<(), FieldError> {
        for name in other.fields.names() {
            if is_reserved(name) {
                continue;
            }
            self.set_or_add_from(name, other)?;
        }
        Ok(())
    }

    /// Rename `old` to `new`. Missing `old` is a no-op; an existing `new` is
    /// resolved by `mode`. The source field is gone afterwards in every case.
    pub fn rename_field(&mut self, old: &str, new: &str, mode: UpdateMode) -> Result<(), FieldError> {
        check_writable(old)?;
        check_writable(new)?;
        if !self.fields.contains(old) || old == new {
            return Ok(());
        }
        if !self.fields.contains(new) {
            return self.fields.rename(old, new);
        }
        match mode {
            UpdateMode::Overwrite => {
                self.fields.remove(new)?;
                self.fields.rename(old, new)
            }
            UpdateMode::Append => {
                if let (Some(found), Some(declared)) =
                    (self.fields.value_type(old), self.fields.value_type(new))
                {
                    if found != declared {
                        return Err(FieldError::InvalidType {
                            field: new.to_string(),
                            found,
                            declared: Some(declared),
                        });
                    }
                }
                for value in self.fields.remove(old)? {
                    self.fields.add(new, value)?;
                }
                Ok(())
            }
            UpdateMode::Skip => self.fields.remove(old).map(|_| ()),
        }
    }

    pub fn remove_field(&mut self, name: &str) -> Result<(), FieldError> {
        check_writable(name)?;
        self.fields.remove(name).map(|_| ())
    }

    pub fn remove_from_array(&mut self, name: &str, index: usize) -> Result<Option<Value>, FieldError> {
        check_writable(name)?;
        self.fields.remove_at(name, index)
    }

    /// Deduplicate a field's values into `target`, or in place when `target`
    /// is `None` or equal to `name`. Missing fields are left alone.
    pub fn remove_duplicate_values(&mut self, name: &str, target: Option<&str>) -> Result<(), FieldError> {
        check_writable(name)?;
        let target = target.unwrap_or(name);
        check_writable(target)?;
        let Some(slot) = self.fields.slot(name) else {
            return Ok(());
        };
        if target == name {
            return if slot.is_multi() {
                self.fields.dedup(name)
            } else {
                Ok(())
            };
        }
        match slot.clone() {
            Slot::Single(v) => self.fields.put_one(target, v),
            Slot::Multi(vs) => {
                self.fields.put_many(target, vs)?;
                self.fields.dedup(target)
            }
        }
    }

    /// Record a failure description on the record without aborting it.
    pub fn log_error(&mut self, description: impl Into<String>) {
        let description = description.into();
        if let Err(e) = self.fields.add(ERRORS_FIELD, Some(Value::Text(description))) {
            tracing::warn!(record = %self.id, error = %e, "could not append to error list");
        }
    }

    pub fn errors(&self) -> Vec<String> {
        self.get_strings(ERRORS_FIELD)
    }

    /// Attach a child. Child ids are not checked for uniqueness.
    pub fn add_child(&mut self, child: Record) {
        self.children.push(child);
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn children(&self) -> &[Record] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Record> {
        &mut self.children
    }

    /// Detach and return all children.
    pub fn take_children(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.children)
    }

    /// Suppress delivery of this record. Attached children are unaffected.
    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(ID_FIELD.to_string(), serde_json::Value::String(self.id.clone()));
        if let Some(run_id) = &self.run_id {
            map.insert(RUN_ID_FIELD.to_string(), serde_json::Value::String(run_id.clone()));
        }
        for (name, slot) in self.fields.iter() {
            let json = match slot {
                Slot::Single(v) => single_to_json(v),
                Slot::Multi(vs) => serde_json::Value::Array(vs.iter().map(option_to_json).collect()),
            };
            map.insert(name.to_string(), json);
        }
        if !self.children.is_empty() {
            map.insert(
                CHILDREN_FIELD.to_string(),
                serde_json::Value::Array(self.children.iter().map(Record::to_json).collect()),
            );
        }
        serde_json::Value::Object(map)
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, FieldError> {
        Self::from_json_with(json, &|id: &str| id.to_string())
    }

    /// Parse a record, rewriting its id (and its children's ids) with `id_updater`.
    pub fn from_json_with(
        json: &serde_json::Value,
        id_updater: &dyn Fn(&str) -> String,
    ) -> Result<Self, FieldError> {
        let serde_json::Value::Object(map) = json else {
            return Err(FieldError::InvalidRecord("expected a JSON object".into()));
        };
        let id = match map.get(ID_FIELD) {
            Some(serde_json::Value::String(id)) if !id.is_empty() => id_updater(id),
            _ => return Err(FieldError::InvalidRecord("missing string `id`".into())),
        };
        let mut record = Record::new(id);

        for (name, value) in map {
            match name.as_str() {
                ID_FIELD => {}
                RUN_ID_FIELD => match value {
                    serde_json::Value::String(run_id) => record.run_id = Some(run_id.clone()),
                    serde_json::Value::Null => {}
                    _ => {
                        return Err(FieldError::InvalidRecord("`run_id` must be a string".into()))
                    }
                },
                CHILDREN_FIELD => {
                    let serde_json::Value::Array(children) = value else {
                        return Err(FieldError::InvalidRecord("`.children` must be an array".into()));
                    };
                    for child in children {
                        record.children.push(Record::from_json_with(child, id_updater)?);
                    }
                }
                ERRORS_FIELD => {
                    let items = match value {
                        serde_json::Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    for item in items.iter().filter(|v| !v.is_null()) {
                        let text = item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string());
                        record.log_error(text);
                    }
                }
                _ => match value {
                    serde_json::Value::Array(items) => {
                        let values = items.iter().map(Value::from_json).collect();
                        record.fields.put_many(name.as_str(), values)?;
                    }
                    other => record.fields.put_one(name.as_str(), single_from_json(other))?,
                },
            }
        }
        Ok(record)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(s: &str) -> Result<Self, FieldError> {
        let json: serde_json::Value =
            serde_json::from_str(s).map_err(|e| FieldError::InvalidRecord(e.to_string()))?;
        Self::from_json(&json)
    }
}

fn option_to_json(value: &Option<Value>) -> serde_json::Value {
    value
        .as_ref()
        .map(Value::to_json)
        .unwrap_or(serde_json::Value::Null)
}

fn single_to_json(value: &Option<Value>) -> serde_json::Value {
    let json = option_to_json(value);
    if matches!(value, Some(Value::Json(_))) && (json.is_array() || is_json_wrapper(&json)) {
        let mut wrapper = serde_json::Map::new();
        wrapper.insert(JSON_WRAPPER_KEY.to_string(), json);
        return serde_json::Value::Object(wrapper);
    }
    json
}

fn single_from_json(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Object(map) if is_json_wrapper(json) => {
            map.get(JSON_WRAPPER_KEY).map(|inner| Value::Json(inner.clone()))
        }
        other => Value::from_json(other),
    }
}

fn is_json_wrapper(json: &serde_json::Value) -> bool {
    matches!(json, serde_json::Value::Object(map) if map.len() == 1 && map.contains_key(JSON_WRAPPER_KEY))
}

fn check_writable(name: &str) -> Result<(), FieldError> {
    if is_reserved(name) {
        return Err(FieldError::ReservedField(name.to_string()));
    }
    Ok(())
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Record::from_json(&json).map_err(serde::de::Error::custom)
    }
}
