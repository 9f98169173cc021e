//! Unit of Work: the registry of managed objects and their pending work.
//!
//! The Unit of Work:
//! - Registers objects as managed and keeps the identity map in sync
//! - Schedules inserts, updates and deletes, enforcing the lifecycle guards
//! - Cascades persist / remove / detach / merge along reference associations
//! - Builds the stored form of a document (fields plus `DbRef`s)
//! - Computes change sets against snapshots, honoring the read-only policy
//!
//! Flush planning and execution live in [`crate::flush`].

use crate::cascade::{self, CascadeAction};
use crate::change_tracker::ChangeTracker;
use crate::identity_map::IdentityMap;
use crate::lifecycle::{self, DocumentState, InsertScheduling, Operation};
use crate::read_only::ReadOnlyFilter;
use docmodel_core::{
    Cardinality, ChangeSet, DbRef, DocumentRef, Error, Fields, Gateway, ID_FIELD, IdStrategy,
    InvalidArgument, Metadata, ObjectId, ObjectKey, Result, Value,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A registered object and what the session knows about it.
pub(crate) struct ManagedObject {
    pub(crate) handle: DocumentRef,
    pub(crate) type_name: &'static str,
    /// `Managed` or `Removed`; unheld objects have derived states.
    pub(crate) state: DocumentState,
    /// Identity registered in the identity map, if any yet.
    pub(crate) identity: Option<Value>,
    /// Registration order.
    pub(crate) seq: u64,
}

/// Summary of pending work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    /// Number of managed (or removed, not yet flushed) objects.
    pub managed: usize,
    /// Number of objects scheduled for insert.
    pub inserts: usize,
    /// Number of objects explicitly scheduled for update.
    pub updates: usize,
    /// Number of objects scheduled for delete.
    pub deletes: usize,
}

impl PendingCounts {
    /// Total number of scheduled operations.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }

    /// Check if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

type CascadeFn =
    fn(&mut UnitOfWork, &DocumentRef, &mut dyn Gateway, &mut HashSet<ObjectKey>) -> Result<()>;

/// Tracks managed objects and the work scheduled for them.
pub struct UnitOfWork {
    pub(crate) metadata: Arc<Metadata>,
    pub(crate) objects: HashMap<ObjectKey, ManagedObject>,
    next_seq: u64,
    pub(crate) identity_map: IdentityMap,
    pub(crate) tracker: ChangeTracker,
    pub(crate) pending_insert: Vec<ObjectKey>,
    pub(crate) pending_update: Vec<ObjectKey>,
    pub(crate) pending_delete: Vec<ObjectKey>,
    /// Objects passed to persist since the last flush.
    pub(crate) explicit: HashSet<ObjectKey>,
}

impl UnitOfWork {
    /// Create an empty Unit of Work over validated metadata.
    pub fn new(metadata: Arc<Metadata>) -> Self {
        Self {
            metadata,
            objects: HashMap::new(),
            next_seq: 0,
            identity_map: IdentityMap::new(),
            tracker: ChangeTracker::new(),
            pending_insert: Vec::new(),
            pending_update: Vec::new(),
            pending_delete: Vec::new(),
            explicit: HashSet::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    /// Check if the object is registered (managed or removed).
    pub fn contains(&self, doc: &DocumentRef) -> bool {
        self.objects.contains_key(&doc.key())
    }

    /// The managed object registered under an identity.
    pub fn lookup(&self, type_name: &'static str, id: &Value) -> Option<DocumentRef> {
        let key = self.identity_map.get(type_name, id)?;
        self.objects.get(&key).map(|o| o.handle.clone())
    }

    /// Lifecycle state of any object.
    ///
    /// Registered objects report their tracked state; the state of other
    /// objects is derived from their identity (see [`DocumentState`]).
    pub fn state_of(&self, doc: &DocumentRef, gateway: &mut dyn Gateway) -> Result<DocumentState> {
        if let Some(obj) = self.objects.get(&doc.key()) {
            return Ok(obj.state);
        }
        let type_name = doc.type_name();
        let strategy = self.metadata.document(type_name)?.id_strategy;
        let identity = doc.borrow().identifier();
        lifecycle::derive_unheld_state(identity.as_ref(), strategy, |id| {
            Ok(gateway.find(type_name, id)?.is_some())
        })
    }

    /// Get pending operation counts.
    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts {
            managed: self.objects.len(),
            inserts: self.pending_insert.len(),
            updates: self.pending_update.len(),
            deletes: self.pending_delete.len(),
        }
    }

    pub fn is_scheduled_for_insert(&self, doc: &DocumentRef) -> bool {
        self.pending_insert.contains(&doc.key())
    }

    pub fn is_scheduled_for_update(&self, doc: &DocumentRef) -> bool {
        self.pending_update.contains(&doc.key())
    }

    pub fn is_scheduled_for_delete(&self, doc: &DocumentRef) -> bool {
        self.pending_delete.contains(&doc.key())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    fn register(&mut self, doc: &DocumentRef, state: DocumentState) -> Result<ObjectKey> {
        let key = doc.key();
        let type_name = self.metadata.document(doc.type_name())?.type_name;
        let identity = doc.borrow().identifier();
        if let Some(id) = &identity {
            if self.identity_map.insert(type_name, id, key).is_err() {
                return Err(Error::duplicate_identity(type_name, id));
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.objects.insert(
            key,
            ManagedObject {
                handle: doc.clone(),
                type_name,
                state,
                identity,
                seq,
            },
        );
        tracing::trace!(object = %key, type_name, ?state, "Registered object");
        Ok(key)
    }

    /// Register an object just hydrated from the store, snapshotting its
    /// stored form.
    pub(crate) fn register_loaded(&mut self, doc: &DocumentRef) -> Result<ObjectKey> {
        let key = self.register(doc, DocumentState::Managed)?;
        let stored = self.build_document(doc)?;
        self.tracker.snapshot(key, stored);
        Ok(key)
    }

    /// Pick up an identity the object acquired after registration.
    pub(crate) fn sync_identity(&mut self, key: ObjectKey) -> Result<Option<Value>> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(None);
        };
        if obj.identity.is_some() {
            return Ok(obj.identity.clone());
        }
        let Some(id) = obj.handle.borrow().identifier() else {
            return Ok(None);
        };
        self.assign_identity(key, id.clone())?;
        Ok(Some(id))
    }

    pub(crate) fn assign_identity(&mut self, key: ObjectKey, id: Value) -> Result<()> {
        let Some(obj) = self.objects.get_mut(&key) else {
            return Ok(());
        };
        if obj.identity.as_ref() == Some(&id) {
            return Ok(());
        }
        if let Some(previous) = obj.identity.take() {
            self.identity_map.remove(obj.type_name, &previous, key);
        }
        if self.identity_map.insert(obj.type_name, &id, key).is_err() {
            return Err(Error::duplicate_identity(obj.type_name, &id));
        }
        obj.identity = Some(id);
        Ok(())
    }

    /// Drop every trace of an object from the unit of work.
    pub(crate) fn forget(&mut self, key: ObjectKey) {
        if let Some(obj) = self.objects.remove(&key) {
            if let Some(id) = &obj.identity {
                self.identity_map.remove(obj.type_name, id, key);
            }
        }
        self.tracker.clear(&key);
        self.pending_insert.retain(|k| *k != key);
        self.pending_update.retain(|k| *k != key);
        self.pending_delete.retain(|k| *k != key);
        self.explicit.remove(&key);
    }

    pub(crate) fn describe(&self, key: ObjectKey) -> String {
        self.objects
            .get(&key)
            .map_or_else(|| format!("<unregistered>@{key}"), |o| o.handle.describe())
    }

    // ========================================================================
    // Lifecycle operations
    // ========================================================================

    /// Make an object managed, cascading along persist associations.
    #[tracing::instrument(level = "debug", skip_all, fields(document = %doc.describe()))]
    pub fn persist(&mut self, doc: &DocumentRef, gateway: &mut dyn Gateway) -> Result<()> {
        let mut visited = HashSet::new();
        self.do_persist(doc, gateway, &mut visited)
    }

    fn do_persist(
        &mut self,
        doc: &DocumentRef,
        gateway: &mut dyn Gateway,
        visited: &mut HashSet<ObjectKey>,
    ) -> Result<()> {
        if !visited.insert(doc.key()) {
            return Ok(());
        }
        let state = self.state_of(doc, gateway)?;
        lifecycle::check_operation(state, Operation::Persist, || doc.describe())?;

        let key = doc.key();
        match state {
            DocumentState::New => {
                self.persist_new(doc)?;
            }
            DocumentState::Managed => {
                self.explicit.insert(key);
            }
            DocumentState::Removed => {
                self.pending_delete.retain(|k| *k != key);
                if let Some(obj) = self.objects.get_mut(&key) {
                    obj.state = DocumentState::Managed;
                }
                self.explicit.insert(key);
                tracing::debug!(object = %key, "Removed object registered again");
            }
            DocumentState::Detached => {}
        }

        self.cascade(doc, CascadeAction::Persist, gateway, visited, Self::do_persist)
    }

    /// Register a New object and schedule its insert.
    fn persist_new(&mut self, doc: &DocumentRef) -> Result<ObjectKey> {
        let strategy = self.metadata.document(doc.type_name())?.id_strategy;
        if strategy == IdStrategy::Auto && doc.borrow().identifier().is_none() {
            let id = Value::ObjectId(ObjectId::new());
            tracing::trace!(%id, "Generated identity");
            doc.borrow_mut().set_identifier(id);
        }
        let key = self.register(doc, DocumentState::Managed)?;
        if let Err(e) = self.schedule_insert_checked(key) {
            self.forget(key);
            return Err(e);
        }
        Ok(key)
    }

    fn schedule_insert_checked(&mut self, key: ObjectKey) -> Result<()> {
        let snapshotted = self.tracker.has_snapshot(&key);
        // A removed document keeps its snapshot; edits made after removal
        // do not make it dirty.
        let removed = self
            .objects
            .get(&key)
            .is_some_and(|obj| obj.state == DocumentState::Removed);
        let dirty = !removed
            && snapshotted
            && self.change_set_for(key).map_or(true, |cs| !cs.is_empty());
        let facts = InsertScheduling {
            pending_update: self.pending_update.contains(&key),
            dirty,
            pending_delete: self.pending_delete.contains(&key),
            pending_insert: self.pending_insert.contains(&key),
            snapshotted,
        };
        facts.check(|| self.describe(key))?;
        self.pending_insert.push(key);
        tracing::debug!(object = %key, "Scheduled for insert");
        Ok(())
    }

    /// Schedule an insert directly, bypassing cascades.
    pub fn schedule_for_insert(&mut self, doc: &DocumentRef, gateway: &mut dyn Gateway) -> Result<()> {
        let key = doc.key();
        if self.objects.contains_key(&key) {
            return self.schedule_insert_checked(key);
        }
        let state = self.state_of(doc, gateway)?;
        lifecycle::check_operation(state, Operation::ScheduleInsert, || doc.describe())?;
        self.persist_new(doc).map(|_| ())
    }

    /// Force a managed object into the next flush's change detection.
    pub fn schedule_for_update(&mut self, doc: &DocumentRef) -> Result<()> {
        let key = doc.key();
        let Some(obj) = self.objects.get(&key) else {
            return Err(InvalidArgument::DocumentNotManaged {
                document: doc.describe(),
            }
            .into());
        };
        lifecycle::check_operation(obj.state, Operation::ScheduleUpdate, || doc.describe())?;
        if doc.borrow().identifier().is_none() {
            return Err(InvalidArgument::DocumentHasNoIdentity {
                document: doc.describe(),
                operation: Operation::ScheduleUpdate.as_str().to_string(),
            }
            .into());
        }
        if !self.pending_update.contains(&key) && !self.pending_insert.contains(&key) {
            self.pending_update.push(key);
            tracing::debug!(object = %key, "Scheduled for update");
        }
        Ok(())
    }

    /// Schedule a managed object for deletion. A pending insert is simply
    /// cancelled.
    pub fn schedule_for_delete(&mut self, doc: &DocumentRef) -> Result<()> {
        let key = doc.key();
        let Some(obj) = self.objects.get(&key) else {
            return Err(InvalidArgument::DocumentNotManaged {
                document: doc.describe(),
            }
            .into());
        };
        if self.pending_insert.contains(&key) {
            tracing::debug!(object = %key, "Pending insert cancelled by delete");
            self.forget(key);
            return Ok(());
        }
        if obj.state == DocumentState::Removed {
            return Ok(());
        }
        if doc.borrow().identifier().is_none() {
            return Err(InvalidArgument::DocumentHasNoIdentity {
                document: doc.describe(),
                operation: Operation::ScheduleDelete.as_str().to_string(),
            }
            .into());
        }

        self.pending_update.retain(|k| *k != key);
        self.explicit.remove(&key);
        self.pending_delete.push(key);
        if let Some(obj) = self.objects.get_mut(&key) {
            obj.state = DocumentState::Removed;
        }
        tracing::debug!(object = %key, "Scheduled for delete");
        Ok(())
    }

    /// Remove an object, cascading along remove associations first.
    #[tracing::instrument(level = "debug", skip_all, fields(document = %doc.describe()))]
    pub fn remove(&mut self, doc: &DocumentRef, gateway: &mut dyn Gateway) -> Result<()> {
        let mut visited = HashSet::new();
        self.do_remove(doc, gateway, &mut visited)
    }

    fn do_remove(
        &mut self,
        doc: &DocumentRef,
        gateway: &mut dyn Gateway,
        visited: &mut HashSet<ObjectKey>,
    ) -> Result<()> {
        if !visited.insert(doc.key()) {
            return Ok(());
        }
        let state = self.state_of(doc, gateway)?;
        lifecycle::check_operation(state, Operation::Remove, || doc.describe())?;
        self.cascade(doc, CascadeAction::Remove, gateway, visited, Self::do_remove)?;
        match state {
            DocumentState::Managed => self.schedule_for_delete(doc),
            _ => Ok(()),
        }
    }

    /// Stop tracking an object, cascading along detach associations.
    #[tracing::instrument(level = "debug", skip_all, fields(document = %doc.describe()))]
    pub fn detach(&mut self, doc: &DocumentRef, gateway: &mut dyn Gateway) -> Result<()> {
        let mut visited = HashSet::new();
        self.do_detach(doc, gateway, &mut visited)
    }

    fn do_detach(
        &mut self,
        doc: &DocumentRef,
        gateway: &mut dyn Gateway,
        visited: &mut HashSet<ObjectKey>,
    ) -> Result<()> {
        let key = doc.key();
        if !visited.insert(key) {
            return Ok(());
        }
        if self.objects.contains_key(&key) {
            self.forget(key);
            tracing::trace!(object = %key, "Detached");
        }
        self.cascade(doc, CascadeAction::Detach, gateway, visited, Self::do_detach)
    }

    /// Merge an object into the session.
    ///
    /// A New object becomes managed and is scheduled for insert; a managed
    /// one is kept. Either way the merge cascades along merge associations.
    #[tracing::instrument(level = "debug", skip_all, fields(document = %doc.describe()))]
    pub fn merge(&mut self, doc: &DocumentRef, gateway: &mut dyn Gateway) -> Result<()> {
        let mut visited = HashSet::new();
        self.do_merge(doc, gateway, &mut visited)
    }

    fn do_merge(
        &mut self,
        doc: &DocumentRef,
        gateway: &mut dyn Gateway,
        visited: &mut HashSet<ObjectKey>,
    ) -> Result<()> {
        if !visited.insert(doc.key()) {
            return Ok(());
        }
        let state = self.state_of(doc, gateway)?;
        lifecycle::check_operation(state, Operation::Merge, || doc.describe())?;
        if state == DocumentState::New {
            self.persist_new(doc)?;
        }
        self.cascade(doc, CascadeAction::Merge, gateway, visited, Self::do_merge)
    }

    fn cascade(
        &mut self,
        doc: &DocumentRef,
        action: CascadeAction,
        gateway: &mut dyn Gateway,
        visited: &mut HashSet<ObjectKey>,
        apply: CascadeFn,
    ) -> Result<()> {
        for target in cascade::cascade_targets(&self.metadata, doc, action) {
            tracing::trace!(
                action = ?action,
                target = %target.describe(),
                "Cascading"
            );
            apply(self, &target, gateway, visited)?;
        }
        Ok(())
    }

    /// Forget all objects and scheduled work.
    pub fn clear(&mut self) {
        let detached = self.objects.len();
        self.objects.clear();
        self.identity_map.clear();
        self.tracker.clear_all();
        self.pending_insert.clear();
        self.pending_update.clear();
        self.pending_delete.clear();
        self.explicit.clear();
        tracing::debug!(detached, "Unit of work cleared");
    }

    // ========================================================================
    // Documents and change sets
    // ========================================================================

    /// Build a database reference to `doc`.
    pub fn db_ref(&self, doc: &DocumentRef) -> Result<DbRef> {
        let id = doc.borrow().identifier();
        let Some(id) = id else {
            return Err(InvalidArgument::CannotCreateDocumentDbRef {
                document: doc.describe(),
            }
            .into());
        };
        Ok(DbRef::new(doc.type_name(), id))
    }

    /// The stored form of `doc`: its fields plus a `DbRef` for every
    /// referenced object, without `_id`.
    pub fn build_document(&self, doc: &DocumentRef) -> Result<Fields> {
        let mapping = self.metadata.document(doc.type_name())?;
        let mut fields = doc.borrow().to_fields();
        fields.remove(ID_FIELD);

        for assoc in mapping.reference_associations() {
            let targets = doc.borrow().references(assoc.field);
            let value = match assoc.cardinality {
                Cardinality::One => match targets.first() {
                    Some(target) => Value::Reference(self.db_ref(target)?),
                    None => Value::Null,
                },
                Cardinality::Many => Value::Array(
                    targets
                        .iter()
                        .map(|t| self.db_ref(t).map(Value::Reference))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            fields.insert(assoc.field, value);
        }
        Ok(fields)
    }

    /// Current stored form with read-only embedded values masked.
    pub(crate) fn current_document(&self, key: ObjectKey) -> Result<Fields> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(Fields::new());
        };
        let mapping = self.metadata.document(obj.type_name)?;
        let mut current = self.build_document(&obj.handle)?;
        if let Some(snapshot) = self.tracker.get(&key) {
            ReadOnlyFilter::new(&self.metadata).mask(mapping, &mut current, snapshot.fields());
        }
        Ok(current)
    }

    pub(crate) fn change_set_for(&self, key: ObjectKey) -> Result<ChangeSet> {
        let current = self.current_document(key)?;
        Ok(self.tracker.compute(&key, &current))
    }

    /// Pending changes of a managed, already stored object.
    ///
    /// `None` for objects without a snapshot (not managed, or not inserted
    /// yet) and for read-only documents.
    pub fn change_set(&self, doc: &DocumentRef) -> Result<Option<ChangeSet>> {
        let key = doc.key();
        let Some(obj) = self.objects.get(&key) else {
            return Ok(None);
        };
        let mapping = self.metadata.document(obj.type_name)?;
        let snapshotted = self.tracker.has_snapshot(&key);
        if !snapshotted || ReadOnlyFilter::new(&self.metadata).skips(mapping, snapshotted) {
            return Ok(None);
        }
        self.change_set_for(key).map(Some)
    }

    /// Re-snapshot an object after its state was reloaded from the store.
    pub(crate) fn refresh_snapshot(&mut self, key: ObjectKey) -> Result<()> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(());
        };
        let stored = self.build_document(&obj.handle)?;
        self.tracker.snapshot(key, stored);
        self.pending_update.retain(|k| *k != key);
        Ok(())
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("managed", &self.objects.len())
            .field("identities", &self.identity_map.len())
            .field("snapshots", &self.tracker.len())
            .field("pending_insert", &self.pending_insert.len())
            .field("pending_update", &self.pending_update.len())
            .field("pending_delete", &self.pending_delete.len())
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
