//! Field-level change sets.

use crate::value::{Fields, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// Old and new value of one changed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Changed fields of one document, keyed by field name.
///
/// A field that disappeared from the document is recorded with
/// [`Value::Null`] as its new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<String, FieldChange>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. Equal values (see [`Value::same_as`]) are ignored.
    pub fn record(&mut self, field: impl Into<String>, old: Value, new: Value) {
        if !old.same_as(&new) {
            self.0.insert(field.into(), FieldChange { old, new });
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldChange)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// New values of every changed field (the `$set` document).
    pub fn new_values(&self) -> Fields {
        self.0
            .iter()
            .map(|(k, c)| (k.clone(), c.new.clone()))
            .collect()
    }
}
