//! Read-only policy.
//!
//! A read-only document is written once, by its insert, and never compared
//! against its snapshot again. A read-only embedded value is frozen the same
//! way inside a writable parent: once the parent has been stored with it,
//! later mutations of the embedded value are masked out before diffing, so
//! they never reach an update even when the parent itself changes.
//!
//! Embedded values have no identity, so list elements are matched by
//! position. An element is only frozen when it was mutated in place: a list
//! that lost elements, or an element that now holds (or was replaced by)
//! another stored element, is a structural change and is written as is.

use docmodel_core::{Cardinality, DocumentMapping, Fields, Metadata, Value};

/// Applies the read-only rules of the mapping metadata.
#[derive(Clone, Copy)]
pub(crate) struct ReadOnlyFilter<'a> {
    metadata: &'a Metadata,
}

impl<'a> ReadOnlyFilter<'a> {
    pub(crate) fn new(metadata: &'a Metadata) -> Self {
        Self { metadata }
    }

    /// Whether change detection is skipped for a document of `mapping`.
    pub(crate) fn skips(&self, mapping: &DocumentMapping, snapshotted: bool) -> bool {
        mapping.read_only && snapshotted
    }

    /// Replace read-only embedded values in `current` with their stored form
    /// from `snapshot`.
    ///
    /// Values that were absent (or null) when the parent was last stored are
    /// new and pass through unchanged.
    pub(crate) fn mask(&self, mapping: &DocumentMapping, current: &mut Fields, snapshot: &Fields) {
        for assoc in mapping.embed_associations() {
            let Some(target) = self.metadata.mapping(assoc.target_type) else {
                continue;
            };
            let Some(stored) = snapshot.get(assoc.field).filter(|v| !v.is_null()) else {
                continue;
            };
            let Some(value) = current.get_mut(assoc.field) else {
                continue;
            };
            match assoc.cardinality {
                Cardinality::One => self.mask_value(target, value, stored),
                Cardinality::Many => {
                    let (Value::Array(items), Value::Array(stored_items)) = (value, stored) else {
                        continue;
                    };
                    if items.len() < stored_items.len() {
                        tracing::trace!(
                            field = assoc.field,
                            "Embedded values removed, list written as is"
                        );
                        continue;
                    }
                    for (index, stored_item) in stored_items.iter().enumerate() {
                        if mutated_in_place(items, stored_items, index) {
                            self.mask_value(target, &mut items[index], stored_item);
                        }
                    }
                }
            }
        }
    }

    fn mask_value(&self, target: &DocumentMapping, value: &mut Value, stored: &Value) {
        if value.is_null() || stored.is_null() {
            return;
        }
        if target.read_only {
            tracing::trace!(
                embedded = target.type_name,
                "Masking read-only embedded value"
            );
            *value = stored.clone();
            return;
        }
        if let (Value::Embedded(inner), Value::Embedded(stored_inner)) = (value, stored) {
            self.mask(target, inner, stored_inner);
        }
    }
}

/// Whether the element at `index` is the stored element at `index`, edited.
///
/// `items` must be at least as long as `stored`.
fn mutated_in_place(items: &[Value], stored: &[Value], index: usize) -> bool {
    let (item, stored_item) = (&items[index], &stored[index]);
    item != stored_item && !stored.contains(item) && !items.contains(stored_item)
}
