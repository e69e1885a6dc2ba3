//! Typed, order-preserving field storage backing every [`Record`](crate::record::Record).
//!
//! A field is either single-valued or multi-valued, never both. Each field
//! remembers the [`ValueType`] of its non-null values; a multi-valued field
//! only ever holds values of one type (nulls do not count).
//!
//! Fields iterate in insertion order. Renaming keeps a field's position;
//! removing one keeps the relative order of the rest.
//!
//! # Example
//!
//! ```rust
//! use sluice_core::fields::FieldStore;
//! use sluice_core::value::Value;
//!
//! let mut store = FieldStore::new();
//! store.add("tags", Some(Value::from("a"))).unwrap();
//! store.add("tags", Some(Value::from("b"))).unwrap();
//! assert!(store.is_multi_valued("tags"));
//! assert_eq!(store.get_one("tags"), Some(&Value::from("a")));
//! ```

use std::collections::{BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::slice;

use indexmap::IndexMap;

use crate::error::FieldError;
use crate::value::{Value, ValueType};

/// Stored values of one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Single(Option<Value>),
    Multi(Vec<Option<Value>>),
}

impl Slot {
    pub fn values(&self) -> &[Option<Value>] {
        match self {
            Slot::Single(v) => slice::from_ref(v),
            Slot::Multi(vs) => vs,
        }
    }

    pub fn into_values(self) -> Vec<Option<Value>> {
        match self {
            Slot::Single(v) => vec![v],
            Slot::Multi(vs) => vs,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Slot::Multi(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    slot: Slot,
    declared: Option<ValueType>,
}

/// Ordered map of field name to [`Slot`], enforcing the supported-type set
/// and one declared type per field.
#[derive(Debug, Clone)]
pub struct FieldStore {
    entries: IndexMap<String, Entry>,
    supported: BTreeSet<ValueType>,
}

impl FieldStore {
    /// A store accepting every [`ValueType`].
    pub fn new() -> Self {
        Self::with_types(ValueType::ALL)
    }

    /// A store accepting only the given types.
    pub fn with_types(types: impl IntoIterator<Item = ValueType>) -> Self {
        Self {
            entries: IndexMap::new(),
            supported: types.into_iter().collect(),
        }
    }

    pub fn supports(&self, value_type: ValueType) -> bool {
        self.supported.contains(&value_type)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_multi_valued(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|e| e.slot.is_multi())
            .unwrap_or(false)
    }

    /// Declared type of the field, `None` if absent or holding only nulls.
    pub fn value_type(&self, name: &str) -> Option<ValueType> {
        self.entries.get(name).and_then(|e| e.declared)
    }

    /// First value of the field. `None` when the field is absent, null,
    /// or an empty multi-valued field; use [`contains`](Self::contains)
    /// to tell those apart.
    pub fn get_one(&self, name: &str) -> Option<&Value> {
        self.entries
            .get(name)
            .and_then(|e| e.slot.values().first())
            .and_then(|v| v.as_ref())
    }

    /// All values of the field. A single-valued field yields a one-element slice.
    pub fn get_many(&self, name: &str) -> Option<&[Option<Value>]> {
        self.entries.get(name).map(|e| e.slot.values())
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.entries.get(name).map(|e| &e.slot)
    }

    /// Number of values: 1 for single-valued fields.
    pub fn length(&self, name: &str) -> Result<usize, FieldError> {
        self.entries
            .get(name)
            .map(|e| e.slot.values().len())
            .ok_or_else(|| FieldError::NotFound(name.to_string()))
    }

    /// Replace the field with a single value. `None` stores null and clears
    /// the declared type.
    pub fn put_one(&mut self, name: impl Into<String>, value: Option<Value>) -> Result<(), FieldError> {
        let name = name.into();
        let declared = match &value {
            Some(v) => Some(self.check_supported(&name, v)?),
            None => None,
        };
        self.store(name, Slot::Single(value), declared);
        Ok(())
    }

    /// Replace the field with a multi-valued sequence. All non-null values
    /// must share one supported type.
    pub fn put_many(&mut self, name: impl Into<String>, values: Vec<Option<Value>>) -> Result<(), FieldError> {
        let name = name.into();
        let declared = self.common_type(&name, &values)?;
        self.store(name, Slot::Multi(values), declared);
        Ok(())
    }

    /// Append a value. An absent field becomes a one-element multi-valued
    /// field; a single-valued field is converted, its value moving to index 0.
    pub fn add(&mut self, name: impl Into<String>, value: Option<Value>) -> Result<(), FieldError> {
        let name = name.into();
        let value_type = match &value {
            Some(v) => Some(self.check_supported(&name, v)?),
            None => None,
        };

        let Some(entry) = self.entries.get_mut(&name) else {
            self.entries.insert(
                name,
                Entry {
                    slot: Slot::Multi(vec![value]),
                    declared: value_type,
                },
            );
            return Ok(());
        };

        if let Some(found) = value_type {
            match entry.declared {
                Some(declared) if declared != found => {
                    return Err(FieldError::InvalidType {
                        field: name,
                        found,
                        declared: Some(declared),
                    });
                }
                _ => entry.declared = Some(found),
            }
        }

        match &mut entry.slot {
            Slot::Multi(values) => values.push(value),
            Slot::Single(existing) => {
                let first = existing.take();
                entry.slot = Slot::Multi(vec![first, value]);
            }
        }
        Ok(())
    }

    /// [`put_one`](Self::put_one) if the field is absent, otherwise [`add`](Self::add).
    pub fn set_or_add(&mut self, name: impl Into<String>, value: Option<Value>) -> Result<(), FieldError> {
        let name = name.into();
        if self.contains(&name) {
            self.add(name, value)
        } else {
            self.put_one(name, value)
        }
    }

    /// Move a field to a new name, keeping its position, values and type.
    pub fn rename(&mut self, old: &str, new: impl Into<String>) -> Result<(), FieldError> {
        let new = new.into();
        let Some(index) = self.entries.get_index_of(old) else {
            return Err(FieldError::NotFound(old.to_string()));
        };
        if self.entries.contains_key(&new) {
            return Err(FieldError::Conflict(new));
        }
        let Some(entry) = self.entries.shift_remove(old) else {
            return Err(FieldError::NotFound(old.to_string()));
        };
        let (inserted, _) = self.entries.insert_full(new, entry);
        self.entries.move_index(inserted, index);
        Ok(())
    }

    /// Remove a field, returning its values.
    pub fn remove(&mut self, name: &str) -> Result<Vec<Option<Value>>, FieldError> {
        self.entries
            .shift_remove(name)
            .map(|e| e.slot.into_values())
            .ok_or_else(|| FieldError::NotFound(name.to_string()))
    }

    /// Remove one element of a multi-valued field.
    pub fn remove_at(&mut self, name: &str, index: usize) -> Result<Option<Value>, FieldError> {
        let values = self.multi_mut(name)?;
        if index >= values.len() {
            return Err(FieldError::IndexOutOfBounds {
                field: name.to_string(),
                index,
                len: values.len(),
            });
        }
        Ok(values.remove(index))
    }

    /// Drop repeated values of a multi-valued field, keeping first occurrences.
    pub fn dedup(&mut self, name: &str) -> Result<(), FieldError> {
        let values = self.multi_mut(name)?;
        let mut seen = HashSet::with_capacity(values.len());
        let mut kept = Vec::with_capacity(values.len());
        for value in values.drain(..) {
            if seen.insert(value.clone()) {
                kept.push(value);
            }
        }
        *values = kept;
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.slot))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    // An existing key keeps its position.
    fn store(&mut self, name: String, slot: Slot, declared: Option<ValueType>) {
        self.entries.insert(name, Entry { slot, declared });
    }

    fn multi_mut(&mut self, name: &str) -> Result<&mut Vec<Option<Value>>, FieldError> {
        match self.entries.get_mut(name) {
            Some(Entry {
                slot: Slot::Multi(values),
                ..
            }) => Ok(values),
            Some(_) => Err(FieldError::NotMultiValued(name.to_string())),
            None => Err(FieldError::NotFound(name.to_string())),
        }
    }

    fn check_supported(&self, name: &str, value: &Value) -> Result<ValueType, FieldError> {
        let found = value.value_type();
        if !self.supports(found) {
            return Err(FieldError::InvalidType {
                field: name.to_string(),
                found,
                declared: None,
            });
        }
        Ok(found)
    }

    fn common_type(&self, name: &str, values: &[Option<Value>]) -> Result<Option<ValueType>, FieldError> {
        let mut declared: Option<ValueType> = None;
        for value in values.iter().flatten() {
            let found = self.check_supported(name, value)?;
            match declared {
                Some(t) if t != found => {
                    return Err(FieldError::InvalidType {
                        field: name.to_string(),
                        found,
                        declared: Some(t),
                    });
                }
                _ => declared = Some(found),
            }
        }
        Ok(declared)
    }
}

impl Default for FieldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for FieldStore {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for FieldStore {}

impl Hash for FieldStore {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut entries: Vec<(&String, &Entry)> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.len().hash(state);
        for (name, entry) in entries {
            name.hash(state);
            entry.declared.hash(state);
            entry.slot.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn text(s: &str) -> Option<Value> {
        Some(Value::from(s))
    }

    fn hash_of(store: &FieldStore) -> u64 {
        let mut h = DefaultHasher::new();
        store.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_put_one_get_one() {
        let mut store = FieldStore::new();
        for value in [
            Value::from("x"),
            Value::Int(3),
            Value::Long(4),
            Value::Bool(true),
            Value::Float(0.5),
            Value::Bytes(vec![1, 2]),
            Value::Json(serde_json::json!({"a": 1})),
        ] {
            store.put_one("k", Some(value.clone())).unwrap();
            assert_eq!(store.get_one("k"), Some(&value));
            assert!(!store.is_multi_valued("k"));
            assert_eq!(store.value_type("k"), Some(value.value_type()));
        }
    }

    #[test]
    fn test_add_converts_to_multi() {
        let mut store = FieldStore::new();
        store.put_one("k", text("v1")).unwrap();
        store.add("k", text("v2")).unwrap();
        assert!(store.is_multi_valued("k"));
        assert_eq!(store.get_many("k").unwrap(), &[text("v1"), text("v2")][..]);
        assert_eq!(store.length("k").unwrap(), 2);
    }

    #[test]
    fn test_add_to_absent_creates_multi() {
        let mut store = FieldStore::new();
        store.add("k", text("v1")).unwrap();
        assert!(store.is_multi_valued("k"));
        assert_eq!(store.length("k").unwrap(), 1);
    }

    #[test]
    fn test_get_many_single_is_singleton() {
        let mut store = FieldStore::new();
        store.put_one("k", Some(Value::Long(1))).unwrap();
        assert_eq!(store.get_many("k").unwrap(), &[Some(Value::Long(1))][..]);
        assert_eq!(store.length("k").unwrap(), 1);
    }

    #[test]
    fn test_get_one_absent_and_null() {
        let mut store = FieldStore::new();
        assert_eq!(store.get_one("missing"), None);
        store.put_one("null", None).unwrap();
        assert!(store.contains("null"));
        assert_eq!(store.get_one("null"), None);
        assert_eq!(store.value_type("null"), None);
    }

    #[test]
    fn test_unsupported_type_rejected() {
        let mut store = FieldStore::with_types([ValueType::Text, ValueType::Long]);
        let err = store.put_one("k", Some(Value::Bool(true))).unwrap_err();
        assert!(matches!(err, FieldError::InvalidType { .. }));
        let err = store.add("k", Some(Value::Float(1.0))).unwrap_err();
        assert!(matches!(err, FieldError::InvalidType { .. }));
        let err = store
            .put_many("k", vec![Some(Value::Bytes(vec![]))])
            .unwrap_err();
        assert!(matches!(err, FieldError::InvalidType { .. }));
        assert!(!store.contains("k"));
    }

    #[test]
    fn test_add_type_conflict() {
        let mut store = FieldStore::new();
        store.add("k", text("a")).unwrap();
        let err = store.add("k", Some(Value::Long(1))).unwrap_err();
        assert!(matches!(
            err,
            FieldError::InvalidType {
                found: ValueType::Long,
                declared: Some(ValueType::Text),
                ..
            }
        ));
        assert_eq!(store.length("k").unwrap(), 1);
    }

    #[test]
    fn test_nulls_do_not_constrain_type() {
        let mut store = FieldStore::new();
        store.add("k", None).unwrap();
        store.add("k", Some(Value::Long(2))).unwrap();
        store.add("k", None).unwrap();
        assert_eq!(store.value_type("k"), Some(ValueType::Long));
        assert_eq!(store.length("k").unwrap(), 3);
        assert_eq!(store.get_one("k"), None);
    }

    #[test]
    fn test_put_many_mixed_types_rejected() {
        let mut store = FieldStore::new();
        let err = store
            .put_many("k", vec![text("a"), None, Some(Value::Long(1))])
            .unwrap_err();
        assert!(matches!(err, FieldError::InvalidType { .. }));
    }

    #[test]
    fn test_put_many_all_null_clears_type() {
        let mut store = FieldStore::new();
        store.put_one("k", text("a")).unwrap();
        store.put_many("k", vec![None, None]).unwrap();
        assert_eq!(store.value_type("k"), None);
        store.add("k", Some(Value::Bool(false))).unwrap();
        assert_eq!(store.value_type("k"), Some(ValueType::Bool));
    }

    #[test]
    fn test_put_one_null_clears_type() {
        let mut store = FieldStore::new();
        store.put_one("k", Some(Value::Long(1))).unwrap();
        store.put_one("k", None).unwrap();
        assert_eq!(store.value_type("k"), None);
        store.put_one("k", text("now text")).unwrap();
        assert_eq!(store.value_type("k"), Some(ValueType::Text));
    }

    #[test]
    fn test_set_or_add() {
        let mut store = FieldStore::new();
        store.set_or_add("k", text("a")).unwrap();
        assert!(!store.is_multi_valued("k"));
        store.set_or_add("k", text("b")).unwrap();
        assert!(store.is_multi_valued("k"));
        assert_eq!(store.length("k").unwrap(), 2);
    }

    #[test]
    fn test_rename_keeps_position_and_type() {
        let mut store = FieldStore::new();
        store.put_one("a", text("1")).unwrap();
        store.put_one("b", Some(Value::Long(2))).unwrap();
        store.put_one("c", text("3")).unwrap();
        store.rename("b", "z").unwrap();
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["a", "z", "c"]);
        assert_eq!(store.value_type("z"), Some(ValueType::Long));
        assert!(!store.contains("b"));
    }

    #[test]
    fn test_rename_errors() {
        let mut store = FieldStore::new();
        store.put_one("a", text("1")).unwrap();
        store.put_one("b", text("2")).unwrap();
        assert_eq!(
            store.rename("a", "b").unwrap_err(),
            FieldError::Conflict("b".into())
        );
        assert_eq!(
            store.rename("never", "c").unwrap_err(),
            FieldError::NotFound("never".into())
        );
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut store = FieldStore::new();
        for name in ["a", "b", "c"] {
            store.put_one(name, text(name)).unwrap();
        }
        assert_eq!(store.remove("b").unwrap(), vec![text("b")]);
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["a", "c"]);
        assert!(matches!(store.remove("b"), Err(FieldError::NotFound(_))));
    }

    #[test]
    fn test_remove_at() {
        let mut store = FieldStore::new();
        store
            .put_many("k", vec![text("a"), text("b"), text("c")])
            .unwrap();
        assert_eq!(store.remove_at("k", 1).unwrap(), text("b"));
        assert_eq!(store.get_many("k").unwrap(), &[text("a"), text("c")][..]);
        assert!(matches!(
            store.remove_at("k", 5),
            Err(FieldError::IndexOutOfBounds { index: 5, len: 2, .. })
        ));
        store.put_one("s", text("x")).unwrap();
        assert!(matches!(
            store.remove_at("s", 0),
            Err(FieldError::NotMultiValued(_))
        ));
    }

    #[test]
    fn test_dedup_preserves_order() {
        let mut store = FieldStore::new();
        store
            .put_many("k", vec![text("b"), text("a"), text("b"), None, text("a"), None])
            .unwrap();
        store.dedup("k").unwrap();
        assert_eq!(store.get_many("k").unwrap(), &[text("b"), text("a"), None][..]);
        store.put_one("s", text("x")).unwrap();
        assert!(matches!(store.dedup("s"), Err(FieldError::NotMultiValued(_))));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut store = FieldStore::new();
        store.put_many("k", vec![text("a")]).unwrap();
        let mut copy = store.clone();
        assert_eq!(copy, store);
        copy.add("k", text("b")).unwrap();
        assert_ne!(copy, store);
        assert_eq!(store.length("k").unwrap(), 1);
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let mut a = FieldStore::new();
        a.put_one("x", text("1")).unwrap();
        a.put_one("y", Some(Value::Long(2))).unwrap();
        let mut b = FieldStore::new();
        b.put_one("y", Some(Value::Long(2))).unwrap();
        b.put_one("x", text("1")).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_single_and_multi_not_equal() {
        let mut a = FieldStore::new();
        a.put_one("x", text("1")).unwrap();
        let mut b = FieldStore::new();
        b.put_many("x", vec![text("1")]).unwrap();
        assert_ne!(a, b);
    }
}
