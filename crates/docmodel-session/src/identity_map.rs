//! Identity Map: one managed object per (type, identity) within a session.
//!
//! The map does not own objects; it resolves a stored identity to the
//! [`ObjectKey`] of the handle the unit of work manages. Looking up the same
//! identity twice therefore always leads to the same shared handle.
//!
//! Keys are `(type_name, identity_hash)`. The full identity is kept in the
//! entry and compared on lookup, so a hash collision between two different
//! identities never aliases them.

use docmodel_core::{ObjectKey, Value};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Hash an identity value.
pub(crate) fn hash_identity(value: &Value) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::Hasher;

    let mut hasher = DefaultHasher::new();
    hash_single_value(value, &mut hasher);
    hasher.finish()
}

/// Hash a single Value into the hasher.
fn hash_single_value(v: &Value, hasher: &mut impl std::hash::Hasher) {
    use std::hash::Hash;

    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::String(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::ObjectId(oid) => {
            5u8.hash(hasher);
            oid.bytes().hash(hasher);
        }
        Value::DateTime(ms) => {
            6u8.hash(hasher);
            ms.hash(hasher);
        }
        Value::Binary(b) => {
            7u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Array(arr) => {
            8u8.hash(hasher);
            arr.len().hash(hasher);
            for item in arr {
                hash_single_value(item, hasher);
            }
        }
        Value::Embedded(fields) => {
            9u8.hash(hasher);
            fields.len().hash(hasher);
            for (name, value) in fields.iter() {
                name.hash(hasher);
                hash_single_value(value, hasher);
            }
        }
        Value::Reference(r) => {
            10u8.hash(hasher);
            r.collection.hash(hasher);
            hash_single_value(&r.id, hasher);
        }
    }
}

struct IdentityEntry {
    object: ObjectKey,
    id: Value,
}

/// Identity Map keyed by `(type_name, identity_hash)`.
#[derive(Default)]
pub struct IdentityMap {
    entries: HashMap<(&'static str, u64), IdentityEntry>,
}

impl IdentityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `object` under `(type_name, id)`.
    ///
    /// Returns the key of the object already registered under that identity
    /// when it is a different object; the map is left unchanged in that case.
    pub fn insert(&mut self, type_name: &'static str, id: &Value, object: ObjectKey) -> Result<(), ObjectKey> {
        match self.entries.entry((type_name, hash_identity(id))) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.object == object && existing.id == *id {
                    Ok(())
                } else {
                    Err(existing.object)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(IdentityEntry {
                    object,
                    id: id.clone(),
                });
                Ok(())
            }
        }
    }

    /// Look up the object registered under `(type_name, id)`.
    pub fn get(&self, type_name: &'static str, id: &Value) -> Option<ObjectKey> {
        let entry = self.entries.get(&(type_name, hash_identity(id)))?;
        (entry.id == *id).then_some(entry.object)
    }

    /// Check if an identity is registered.
    pub fn contains(&self, type_name: &'static str, id: &Value) -> bool {
        self.get(type_name, id).is_some()
    }

    /// Remove an identity.
    ///
    /// # Returns
    ///
    /// `true` if the identity was registered for `object`.
    pub fn remove(&mut self, type_name: &'static str, id: &Value, object: ObjectKey) -> bool {
        let key = (type_name, hash_identity(id));
        match self.entries.get(&key) {
            Some(entry) if entry.object == object && entry.id == *id => {
                self.entries.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Clear all entries from the identity map.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get the number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
