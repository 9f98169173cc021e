//! Snapshot-based change detection.
//!
//! A snapshot is the document as it was last written to (or read from) the
//! store, in the same shape the flush builds for inserts: plain fields,
//! embedded values and `DbRef`s for references, without `_id`. Diffing the
//! current document against it yields a field-level [`ChangeSet`].

use docmodel_core::{ChangeSet, Fields, ObjectKey, Value};
use std::collections::{BTreeSet, HashMap};

/// Snapshot of an object's persisted state.
#[derive(Debug)]
pub struct ObjectSnapshot {
    fields: Fields,
}

impl ObjectSnapshot {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }
}

/// Tracks the persisted state of managed objects.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    snapshots: HashMap<ObjectKey, ObjectSnapshot>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self {
            snapshots: HashMap::new(),
        }
    }

    /// Record the persisted state of an object.
    #[tracing::instrument(level = "trace", skip(self, fields))]
    pub fn snapshot(&mut self, key: ObjectKey, fields: Fields) {
        tracing::trace!(
            object = %key,
            field_count = fields.len(),
            "Taking object snapshot"
        );
        self.snapshots.insert(key, ObjectSnapshot::new(fields));
    }

    pub fn has_snapshot(&self, key: &ObjectKey) -> bool {
        self.snapshots.contains_key(key)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&ObjectSnapshot> {
        self.snapshots.get(key)
    }

    /// Diff `current` against the snapshot of `key`.
    ///
    /// A field present on only one side is compared against null. Without a
    /// snapshot every non-null field counts as changed.
    #[tracing::instrument(level = "trace", skip(self, current))]
    pub fn compute(&self, key: &ObjectKey, current: &Fields) -> ChangeSet {
        let empty = Fields::new();
        let original = self.snapshots.get(key).map_or(&empty, |s| &s.fields);

        let names: BTreeSet<&str> = original.names().chain(current.names()).collect();
        let mut changes = ChangeSet::new();
        for name in names {
            let old = original.get(name).cloned().unwrap_or(Value::Null);
            let new = current.get(name).cloned().unwrap_or(Value::Null);
            changes.record(name, old, new);
        }

        tracing::trace!(
            object = %key,
            changed_count = changes.len(),
            "Computed change set"
        );
        changes
    }

    /// Check if an object differs from its snapshot.
    pub fn is_dirty(&self, key: &ObjectKey, current: &Fields) -> bool {
        !self.compute(key, current).is_empty()
    }

    /// Forget the snapshot of one object.
    pub fn clear(&mut self, key: &ObjectKey) {
        self.snapshots.remove(key);
    }

    /// Clear all snapshots.
    pub fn clear_all(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmodel_core::{DbRef, doc_ref};

    fn key() -> ObjectKey {
        let handle = std::mem::ManuallyDrop::new(doc_ref(()));
        ObjectKey::of(&handle)
    }

    #[test]
    fn test_clean_after_snapshot() {
        let mut tracker = ChangeTracker::new();
        let k = key();
        let fields = Fields::new().with("name", "Test1").with("numericValue", 1234_i64);
        tracker.snapshot(k, fields.clone());

        assert!(tracker.has_snapshot(&k));
        assert!(!tracker.is_dirty(&k, &fields));
    }

    #[test]
    fn test_nan_field_is_clean_after_snapshot() {
        let mut tracker = ChangeTracker::new();
        let k = key();
        let fields = Fields::new().with("ratio", f64::NAN);
        tracker.snapshot(k, fields.clone());
        assert!(!tracker.is_dirty(&k, &fields));
        assert!(tracker.is_dirty(&k, &Fields::new().with("ratio", 0.25)));
    }

    #[test]
    fn test_scalar_change() {
        let mut tracker = ChangeTracker::new();
        let k = key();
        tracker.snapshot(k, Fields::new().with("name", "Test1").with("numericValue", 1234_i64));

        let current = Fields::new().with("name", "Test2").with("numericValue", 1234_i64);
        let cs = tracker.compute(&k, &current);
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.get("name").unwrap().old, Value::from("Test1"));
        assert_eq!(cs.get("name").unwrap().new, Value::from("Test2"));
    }

    #[test]
    fn test_embedded_mutation_dirties_container() {
        let mut tracker = ChangeTracker::new();
        let k = key();
        let address = |city: &str| Value::Embedded(Fields::new().with("city", city));
        tracker.snapshot(k, Fields::new().with("address", address("Paris")));

        let cs = tracker.compute(&k, &Fields::new().with("address", address("Lyon")));
        assert!(cs.contains("address"));
    }

    #[test]
    fn test_removed_and_added_fields() {
        let mut tracker = ChangeTracker::new();
        let k = key();
        tracker.snapshot(k, Fields::new().with("a", 1_i64).with("b", Value::Null));

        let cs = tracker.compute(&k, &Fields::new().with("c", 3_i64));
        assert_eq!(cs.fields().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(cs.get("a").unwrap().new, Value::Null);
    }

    #[test]
    fn test_reference_compares_by_identity() {
        let mut tracker = ChangeTracker::new();
        let k = key();
        tracker.snapshot(k, Fields::new().with("author", DbRef::new("User", 1_i64)));

        assert!(!tracker.is_dirty(&k, &Fields::new().with("author", DbRef::new("User", 1_i64))));
        assert!(tracker.is_dirty(&k, &Fields::new().with("author", DbRef::new("User", 2_i64))));
    }

    #[test]
    fn test_clear() {
        let mut tracker = ChangeTracker::new();
        let (a, b) = (key(), key());
        tracker.snapshot(a, Fields::new());
        tracker.snapshot(b, Fields::new());
        tracker.clear(&a);
        assert!(!tracker.has_snapshot(&a));
        assert_eq!(tracker.len(), 1);
        tracker.clear_all();
        assert!(tracker.is_empty());
    }
}
