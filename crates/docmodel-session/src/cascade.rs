//! Cascade resolution over reference associations.
//!
//! Embedded associations never cascade: embedded values have no identity of
//! their own and are written as part of their owner. Reference associations
//! cascade according to their [`Cascade`] flags; the unit of work recurses
//! through the targets returned here with a visited set.
//!
//! At flush time every object reachable through a reference association of a
//! flushed document is classified, cascading or not, so that unmanaged
//! objects are reported before anything is written.

use crate::lifecycle::{DocumentState, Operation};
use docmodel_core::{Association, Cascade, DocumentRef, InvalidArgument, Metadata};

/// Operations that can cascade along an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeAction {
    Persist,
    Remove,
    Detach,
    Merge,
    Refresh,
}

impl CascadeAction {
    pub const fn enabled(self, cascade: &Cascade) -> bool {
        match self {
            CascadeAction::Persist => cascade.persist,
            CascadeAction::Remove => cascade.remove,
            CascadeAction::Detach => cascade.detach,
            CascadeAction::Merge => cascade.merge,
            CascadeAction::Refresh => cascade.refresh,
        }
    }
}

/// An object found through a reference association.
#[derive(Debug, Clone)]
pub(crate) struct Reached {
    pub association: Association,
    pub target: DocumentRef,
}

/// Every object currently held by the reference associations of `doc`.
pub(crate) fn reachable(metadata: &Metadata, doc: &DocumentRef) -> Vec<Reached> {
    let Some(mapping) = metadata.mapping(doc.type_name()) else {
        return Vec::new();
    };
    let source = doc.borrow();
    let mut reached = Vec::new();
    for assoc in mapping.reference_associations() {
        for target in source.references(assoc.field) {
            reached.push(Reached {
                association: *assoc,
                target,
            });
        }
    }
    reached
}

/// Direct targets of `doc` whose association cascades `action`.
pub(crate) fn cascade_targets(
    metadata: &Metadata,
    doc: &DocumentRef,
    action: CascadeAction,
) -> Vec<DocumentRef> {
    reachable(metadata, doc)
        .into_iter()
        .filter(|r| action.enabled(&r.association.cascade))
        .map(|r| r.target)
        .collect()
}

/// What the flush does with an object found through an association.
#[derive(Debug)]
pub(crate) enum Reachability {
    /// Already tracked by the session.
    Managed,
    /// New and reached through a cascade-persist association: persist it.
    Persist,
    /// Scheduled for deletion; left alone.
    Removed,
    /// Not allowed in a managed graph.
    Invalid(InvalidArgument),
}

/// Classify an object reached through `association` during a flush.
pub(crate) fn classify(
    association: &Association,
    target: &DocumentRef,
    state: DocumentState,
) -> Reachability {
    match state {
        DocumentState::Managed => Reachability::Managed,
        DocumentState::Removed => Reachability::Removed,
        DocumentState::New if association.cascade.persist => Reachability::Persist,
        DocumentState::New => {
            Reachability::Invalid(InvalidArgument::NewDocumentFoundThroughRelationship {
                source_type: association.source_type.to_string(),
                field: association.field.to_string(),
                target_type: association.target_type.to_string(),
                document: target.describe(),
                has_display: target.has_display(),
            })
        }
        DocumentState::Detached => {
            Reachability::Invalid(InvalidArgument::DetachedDocumentFoundThroughRelationship {
                source_type: association.source_type.to_string(),
                field: association.field.to_string(),
                target_type: association.target_type.to_string(),
                document: target.describe(),
                operation: Operation::Persist.as_str().to_string(),
            })
        }
    }
}
