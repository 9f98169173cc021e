//! Flush planning and execution for the Unit of Work.
//!
//! A flush writes pending work to the gateway in three phases:
//! - INSERT referenced-first (every `DbRef` written points at a stored document)
//! - UPDATE in registration order
//! - DELETE referencing-first
//!
//! Planning performs no writes. It walks the references of every flushed
//! document (persisting new objects reached through cascade-persist
//! associations and rejecting any other unmanaged object), settles
//! identities, orders the inserts and checks that every reference can be
//! written. Only then does execution begin. A gateway failure stops the flush
//! immediately; writes already performed stay performed, and the objects they
//! concern are no longer pending.

use crate::cascade::{self, Reachability};
use crate::lifecycle::{DocumentState, Operation};
use crate::read_only::ReadOnlyFilter;
use crate::unit_of_work::UnitOfWork;
use docmodel_core::{
    ChangeTracking, Gateway, GatewayError, ID_FIELD, IdStrategy, InvalidArgument, ObjectId,
    ObjectKey, Result, Value,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which objects a flush covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushScope {
    /// Every managed object.
    All,
    /// One managed object, plus what it brings along through cascade-persist
    /// associations.
    Document(ObjectKey),
}

/// A pending gateway operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    /// Insert a new document.
    Insert {
        key: ObjectKey,
        type_name: &'static str,
    },
    /// Write the change set of a stored document, if it has one.
    Update {
        key: ObjectKey,
        type_name: &'static str,
    },
    /// Delete a stored document.
    Delete {
        key: ObjectKey,
        type_name: &'static str,
    },
}

impl PendingOp {
    /// Get the document type this operation targets.
    pub fn type_name(&self) -> &'static str {
        match self {
            PendingOp::Insert { type_name, .. }
            | PendingOp::Update { type_name, .. }
            | PendingOp::Delete { type_name, .. } => type_name,
        }
    }

    /// Get the object key.
    pub fn key(&self) -> ObjectKey {
        match self {
            PendingOp::Insert { key, .. } | PendingOp::Update { key, .. } | PendingOp::Delete { key, .. } => {
                *key
            }
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, PendingOp::Insert { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self, PendingOp::Update { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, PendingOp::Delete { .. })
    }
}

/// Orders objects so that referenced objects come before the objects
/// referencing them.
///
/// Nodes are kept in registration order, which also breaks ties. Objects
/// caught in a reference cycle are appended in registration order.
#[derive(Debug, Default)]
pub struct FlushOrderer {
    nodes: Vec<ObjectKey>,
    /// Object -> objects it references.
    dependencies: HashMap<ObjectKey, Vec<ObjectKey>>,
}

/// Result of [`FlushOrderer::order`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Ordering {
    /// Referenced-first order of every node.
    pub keys: Vec<ObjectKey>,
    /// Nodes that could not be ordered because of a cycle.
    pub cycle: Vec<ObjectKey>,
}

impl FlushOrderer {
    /// Create a new flush orderer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and the nodes it references.
    ///
    /// References to unregistered keys and to the node itself are ignored.
    pub fn add(&mut self, key: ObjectKey, depends_on: Vec<ObjectKey>) {
        if !self.dependencies.contains_key(&key) {
            self.nodes.push(key);
        }
        self.dependencies.insert(key, depends_on);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Referenced-first order.
    pub fn order(&self) -> Ordering {
        let mut placed: HashSet<ObjectKey> = HashSet::with_capacity(self.nodes.len());
        let mut keys = Vec::with_capacity(self.nodes.len());

        while keys.len() < self.nodes.len() {
            let mut progressed = false;
            for &key in &self.nodes {
                if placed.contains(&key) {
                    continue;
                }
                let ready = self.dependencies.get(&key).is_none_or(|deps| {
                    deps.iter().all(|d| {
                        *d == key || placed.contains(d) || !self.dependencies.contains_key(d)
                    })
                });
                if ready {
                    placed.insert(key);
                    keys.push(key);
                    progressed = true;
                }
            }
            if !progressed {
                let cycle: Vec<ObjectKey> = self
                    .nodes
                    .iter()
                    .copied()
                    .filter(|k| !placed.contains(k))
                    .collect();
                keys.extend_from_slice(&cycle);
                return Ordering { keys, cycle };
            }
        }

        Ordering {
            keys,
            cycle: Vec::new(),
        }
    }
}

/// A plan for executing flush operations.
#[derive(Debug)]
pub struct FlushPlan {
    pub scope: FlushScope,
    /// Insert operations (ordered referenced-first).
    pub inserts: Vec<PendingOp>,
    /// Update candidates (registration order).
    pub updates: Vec<PendingOp>,
    /// Delete operations (ordered referencing-first).
    pub deletes: Vec<PendingOp>,
}

impl FlushPlan {
    /// Create an empty flush plan.
    pub fn new(scope: FlushScope) -> Self {
        Self {
            scope,
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of operations in the plan.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    fn keys(&self) -> impl Iterator<Item = ObjectKey> + '_ {
        self.inserts
            .iter()
            .chain(&self.updates)
            .chain(&self.deletes)
            .map(PendingOp::key)
    }
}

/// Result of a flush operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// Number of documents inserted.
    pub inserted: usize,
    /// Number of documents updated.
    pub updated: usize,
    /// Number of documents deleted.
    pub deleted: usize,
}

impl FlushResult {
    /// Create a new empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Objects covered by a flush.
struct Members {
    whole: bool,
    keys: Vec<ObjectKey>,
    set: HashSet<ObjectKey>,
}

impl Members {
    fn new(scope: FlushScope) -> Self {
        let mut members = Self {
            whole: scope == FlushScope::All,
            keys: Vec::new(),
            set: HashSet::new(),
        };
        if let FlushScope::Document(key) = scope {
            members.keys.push(key);
            members.set.insert(key);
        }
        members
    }

    fn contains(&self, key: ObjectKey) -> bool {
        self.whole || self.set.contains(&key)
    }

    fn add(&mut self, key: ObjectKey) {
        if !self.whole && self.set.insert(key) {
            self.keys.push(key);
        }
    }
}

impl UnitOfWork {
    /// Plan a flush without writing anything.
    ///
    /// New objects reached through cascade-persist associations are persisted
    /// as part of planning.
    #[tracing::instrument(level = "debug", skip(self, gateway))]
    pub fn plan_flush(&mut self, scope: FlushScope, gateway: &mut dyn Gateway) -> Result<FlushPlan> {
        let mut members = Members::new(scope);

        let mut checked = HashSet::new();
        loop {
            let candidates = match scope {
                FlushScope::All => self.flush_roots(),
                FlushScope::Document(_) => members.keys.clone(),
            };
            let batch: Vec<ObjectKey> = candidates
                .into_iter()
                .filter(|k| !checked.contains(k))
                .collect();
            if batch.is_empty() {
                break;
            }
            for key in batch {
                checked.insert(key);
                self.check_reachable(key, &mut members, gateway)?;
            }
        }

        let inserts: Vec<ObjectKey> = self
            .pending_insert
            .iter()
            .copied()
            .filter(|k| members.contains(*k))
            .collect();
        for &key in &inserts {
            self.ensure_identity(key)?;
        }

        let mut orderer = FlushOrderer::new();
        for &key in &inserts {
            orderer.add(key, self.reference_keys(key));
        }
        let ordering = orderer.order();
        if !ordering.cycle.is_empty() {
            tracing::warn!(
                objects = ordering.cycle.len(),
                "Reference cycle between new documents, inserting them in registration order"
            );
        }

        let mut candidates: Vec<(u64, ObjectKey)> = self
            .objects
            .iter()
            .filter(|(key, obj)| {
                obj.state == DocumentState::Managed
                    && members.contains(**key)
                    && !self.pending_insert.contains(*key)
                    && self.tracker.has_snapshot(*key)
                    && self.is_tracked(**key)
            })
            .map(|(key, obj)| (obj.seq, *key))
            .collect();
        candidates.sort_unstable();
        let updates: Vec<ObjectKey> = candidates.into_iter().map(|(_, key)| key).collect();

        let mut stored = HashSet::new();
        self.check_references_writable(&ordering.keys, &mut stored)?;
        self.check_references_writable(&updates, &mut stored)?;

        let mut delete_orderer = FlushOrderer::new();
        for key in self.pending_delete.iter().copied().filter(|k| members.contains(*k)) {
            delete_orderer.add(key, self.reference_keys(key));
        }
        let mut deletes = delete_orderer.order().keys;
        deletes.reverse();

        let plan = FlushPlan {
            scope,
            inserts: self.ops(&ordering.keys, |key, type_name| PendingOp::Insert { key, type_name }),
            updates: self.ops(&updates, |key, type_name| PendingOp::Update { key, type_name }),
            deletes: self.ops(&deletes, |key, type_name| PendingOp::Delete { key, type_name }),
        };
        tracing::debug!(
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            "Flush planned"
        );
        Ok(plan)
    }

    /// Execute a plan produced by [`plan_flush`](Self::plan_flush).
    #[tracing::instrument(level = "info", skip_all)]
    pub fn execute_flush(
        &mut self,
        plan: &FlushPlan,
        gateway: &mut dyn Gateway,
        log_change_sets: bool,
    ) -> Result<FlushResult> {
        tracing::info!(
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            "Executing flush plan"
        );

        let start = std::time::Instant::now();
        let mut result = FlushResult::new();

        // 1. Inserts, referenced documents first
        for op in &plan.inserts {
            self.execute_insert(op.key(), gateway)?;
            result.inserted += 1;
        }

        // 2. Updates, change sets computed after the inserts
        for op in &plan.updates {
            if self.execute_update(op.key(), gateway, log_change_sets)? {
                result.updated += 1;
            }
        }

        // 3. Deletes, referencing documents first
        for op in &plan.deletes {
            self.execute_delete(op.key(), gateway)?;
            result.deleted += 1;
        }

        match plan.scope {
            FlushScope::All => {
                self.explicit.clear();
                self.pending_update.clear();
            }
            FlushScope::Document(_) => {
                for key in plan.keys() {
                    self.explicit.remove(&key);
                }
            }
        }

        tracing::info!(
            elapsed_ms = start.elapsed().as_millis(),
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            "Flush complete"
        );
        Ok(result)
    }

    /// Managed objects a full flush starts from, in registration order.
    fn flush_roots(&self) -> Vec<ObjectKey> {
        let mut roots: Vec<(u64, ObjectKey)> = self
            .objects
            .iter()
            .filter(|(key, obj)| obj.state == DocumentState::Managed && self.is_tracked(**key))
            .map(|(key, obj)| (obj.seq, *key))
            .collect();
        roots.sort_unstable();
        roots.into_iter().map(|(_, key)| key).collect()
    }

    /// Whether the change-tracking policy lets a flush look at `key`.
    fn is_tracked(&self, key: ObjectKey) -> bool {
        let Some(obj) = self.objects.get(&key) else {
            return false;
        };
        let Ok(mapping) = self.metadata.document(obj.type_name) else {
            return false;
        };
        let snapshotted = self.tracker.has_snapshot(&key);
        if !snapshotted {
            return true;
        }
        if ReadOnlyFilter::new(&self.metadata).skips(mapping, snapshotted) {
            return false;
        }
        match mapping.change_tracking {
            ChangeTracking::DeferredImplicit => true,
            ChangeTracking::DeferredExplicit => {
                self.explicit.contains(&key) || self.pending_update.contains(&key)
            }
        }
    }

    /// Classify every object referenced by `key`.
    fn check_reachable(
        &mut self,
        key: ObjectKey,
        members: &mut Members,
        gateway: &mut dyn Gateway,
    ) -> Result<()> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(());
        };
        if obj.state == DocumentState::Removed {
            return Ok(());
        }
        let source = obj.handle.clone();
        let metadata = Arc::clone(&self.metadata);

        for reached in cascade::reachable(&metadata, &source) {
            let target = reached.target;
            let state = self.state_of(&target, gateway)?;
            match cascade::classify(&reached.association, &target, state) {
                Reachability::Managed => {
                    if reached.association.cascade.persist && self.pending_insert.contains(&target.key()) {
                        members.add(target.key());
                    }
                }
                Reachability::Persist => {
                    tracing::debug!(
                        source = %source.describe(),
                        field = reached.association.field,
                        "Persisting new document found through cascade"
                    );
                    let before = self.pending_insert.len();
                    self.persist(&target, gateway)?;
                    let scheduled: Vec<ObjectKey> =
                        self.pending_insert.iter().skip(before).copied().collect();
                    for k in scheduled {
                        members.add(k);
                    }
                }
                Reachability::Removed => {
                    tracing::warn!(
                        source = %source.describe(),
                        field = reached.association.field,
                        target = %target.describe(),
                        "Reference to a document scheduled for deletion"
                    );
                }
                Reachability::Invalid(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Make sure a pending insert has an identity, generating one when the
    /// engine is responsible for it.
    fn ensure_identity(&mut self, key: ObjectKey) -> Result<()> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(());
        };
        let handle = obj.handle.clone();
        let strategy = self.metadata.document(obj.type_name)?.id_strategy;
        if self.sync_identity(key)?.is_some() {
            return Ok(());
        }
        match strategy {
            IdStrategy::Assigned => Err(InvalidArgument::DocumentHasNoIdentity {
                document: handle.describe(),
                operation: Operation::FlushInsert.as_str().to_string(),
            }
            .into()),
            IdStrategy::Auto => {
                let id = Value::ObjectId(ObjectId::new());
                handle.borrow_mut().set_identifier(id.clone());
                self.assign_identity(key, id)
            }
            IdStrategy::Gateway => Ok(()),
        }
    }

    fn reference_keys(&self, key: ObjectKey) -> Vec<ObjectKey> {
        self.objects.get(&key).map_or_else(Vec::new, |obj| {
            cascade::reachable(&self.metadata, &obj.handle)
                .into_iter()
                .map(|r| r.target.key())
                .collect()
        })
    }

    /// Every reference written for `keys` must resolve to an identity, either
    /// already known or assigned by an insert earlier in the flush.
    fn check_references_writable(
        &self,
        keys: &[ObjectKey],
        stored: &mut HashSet<ObjectKey>,
    ) -> Result<()> {
        for &key in keys {
            let Some(obj) = self.objects.get(&key) else {
                continue;
            };
            for reached in cascade::reachable(&self.metadata, &obj.handle) {
                let has_identity = reached.target.borrow().identifier().is_some();
                if !has_identity && !stored.contains(&reached.target.key()) {
                    return Err(InvalidArgument::CannotCreateDocumentDbRef {
                        document: reached.target.describe(),
                    }
                    .into());
                }
            }
            stored.insert(key);
        }
        Ok(())
    }

    fn ops(
        &self,
        keys: &[ObjectKey],
        make: impl Fn(ObjectKey, &'static str) -> PendingOp,
    ) -> Vec<PendingOp> {
        keys.iter()
            .filter_map(|key| self.objects.get(key).map(|obj| make(*key, obj.type_name)))
            .collect()
    }

    fn execute_insert(&mut self, key: ObjectKey, gateway: &mut dyn Gateway) -> Result<()> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(());
        };
        let (handle, type_name) = (obj.handle.clone(), obj.type_name);

        let stored = self.build_document(&handle)?;
        let identity = handle.borrow().identifier();
        let mut document = stored.clone();
        if let Some(id) = &identity {
            document.insert(ID_FIELD, id.clone());
        }

        let assigned = gateway.insert(type_name, &document).inspect_err(|e| {
            tracing::warn!(type_name, error = %e, "Insert failed");
        })?;
        let id = match (identity, assigned) {
            (Some(id), _) => id,
            (None, Some(id)) => {
                handle.borrow_mut().set_identifier(id.clone());
                id
            }
            (None, None) => {
                return Err(GatewayError::new(format!(
                    "store assigned no identity to inserted {}",
                    handle.describe()
                ))
                .into());
            }
        };

        self.assign_identity(key, id)?;
        self.tracker.snapshot(key, stored);
        self.pending_insert.retain(|k| *k != key);
        self.pending_update.retain(|k| *k != key);
        tracing::debug!(object = %key, type_name, "Inserted");
        Ok(())
    }

    fn execute_update(
        &mut self,
        key: ObjectKey,
        gateway: &mut dyn Gateway,
        log_change_sets: bool,
    ) -> Result<bool> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(false);
        };
        let type_name = obj.type_name;
        let identity = obj
            .identity
            .clone()
            .or_else(|| obj.handle.borrow().identifier());

        let current = self.current_document(key)?;
        let changes = self.tracker.compute(&key, &current);
        if changes.is_empty() {
            self.pending_update.retain(|k| *k != key);
            return Ok(false);
        }
        let Some(id) = identity else {
            return Err(InvalidArgument::DocumentHasNoIdentity {
                document: self.describe(key),
                operation: Operation::ScheduleUpdate.as_str().to_string(),
            }
            .into());
        };

        if log_change_sets {
            tracing::debug!(
                object = %key,
                type_name,
                changes = %serde_json::to_string(&changes).unwrap_or_default(),
                "Change set"
            );
        }
        gateway.update(type_name, &id, &changes).inspect_err(|e| {
            tracing::warn!(type_name, %id, error = %e, "Update failed");
        })?;

        self.tracker.snapshot(key, current);
        self.pending_update.retain(|k| *k != key);
        tracing::debug!(object = %key, type_name, fields = changes.len(), "Updated");
        Ok(true)
    }

    fn execute_delete(&mut self, key: ObjectKey, gateway: &mut dyn Gateway) -> Result<()> {
        let Some(obj) = self.objects.get(&key) else {
            return Ok(());
        };
        let type_name = obj.type_name;
        let identity = obj
            .identity
            .clone()
            .or_else(|| obj.handle.borrow().identifier());
        let Some(id) = identity else {
            return Err(InvalidArgument::DocumentHasNoIdentity {
                document: self.describe(key),
                operation: Operation::ScheduleDelete.as_str().to_string(),
            }
            .into());
        };

        gateway.delete(type_name, &id).inspect_err(|e| {
            tracing::warn!(type_name, %id, error = %e, "Delete failed");
        })?;
        self.forget(key);
        tracing::debug!(object = %key, type_name, "Deleted");
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
