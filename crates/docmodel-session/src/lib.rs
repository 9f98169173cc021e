//! Session and Unit of Work for docmodel.
//!
//! `docmodel-session` is the **unit-of-work layer**. It tracks the objects a
//! caller works with, detects what changed, and writes everything back to the
//! document store in a dependency-safe order at flush time.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: at most one managed instance per `(type, identity)`.
//! - **Change tracking**: snapshots of the stored form, diffed field by field.
//! - **Cascades**: persist / remove / detach / merge / refresh follow reference
//!   associations according to their cascade flags.
//! - **Flush**: inserts referenced-first, then updates, then deletes
//!   referencing-first, all validated before the first gateway call.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: nothing is written until `flush()`.
//! - **Single owner**: a `Session` holds `Rc` handles and is not `Send`.
//! - **Type erasure**: managed objects are stored as `DocumentRef`s, the typed
//!   API hands back `DocRef<T>`.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(MemoryGateway::new(), metadata);
//!
//! let post = doc_ref(Post::new("hello"));
//! session.persist(&post)?;          // scheduled for insert
//! session.flush()?;                 // INSERT
//!
//! post.borrow_mut().title = "changed".into();
//! session.flush()?;                 // UPDATE { title }
//!
//! let again = session.find::<Post>(post.borrow().id.clone())?;
//! ```

pub mod cascade;
pub mod change_tracker;
pub mod flush;
pub mod identity_map;
pub mod lifecycle;
mod read_only;
pub mod unit_of_work;

#[cfg(test)]
mod test_support;

pub use cascade::CascadeAction;
pub use change_tracker::{ChangeTracker, ObjectSnapshot};
pub use flush::{FlushOrderer, FlushPlan, FlushResult, FlushScope, Ordering, PendingOp};
pub use identity_map::IdentityMap;
pub use lifecycle::{DocumentState, Operation};
pub use unit_of_work::{PendingCounts, UnitOfWork};

use docmodel_core::{
    ChangeSet, DbRef, DocRef, Document, DocumentRef, Error, Gateway, InvalidArgument, Loader,
    Mapped, Metadata, Result, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Session Events
// ============================================================================

/// Type alias for session event callbacks.
///
/// Callbacks receive no arguments and return `Result<(), Error>`.
/// Returning `Err` from a before-flush callback aborts the flush.
type SessionEventFn = Box<dyn FnMut() -> Result<(), Error>>;

/// Holds registered session-level event callbacks.
#[derive(Default)]
pub struct SessionEventCallbacks {
    before_flush: Vec<SessionEventFn>,
    after_flush: Vec<SessionEventFn>,
    on_clear: Vec<SessionEventFn>,
}

impl std::fmt::Debug for SessionEventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventCallbacks")
            .field("before_flush", &self.before_flush.len())
            .field("after_flush", &self.after_flush.len())
            .field("on_clear", &self.on_clear.len())
            .finish()
    }
}

impl SessionEventCallbacks {
    fn fire(&mut self, event: SessionEvent) -> Result<(), Error> {
        let callbacks = match event {
            SessionEvent::BeforeFlush => &mut self.before_flush,
            SessionEvent::AfterFlush => &mut self.after_flush,
            SessionEvent::Clear => &mut self.on_clear,
        };
        for cb in callbacks.iter_mut() {
            if let Err(e) = cb() {
                tracing::warn!(event = event.as_str(), error = %e, "Session callback failed");
                return Err(match e {
                    Error::Event { .. } => e,
                    other => Error::event(event.as_str(), other.to_string()),
                });
            }
        }
        Ok(())
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Fired before a flush plans any work.
    BeforeFlush,
    /// Fired after a flush completes successfully.
    AfterFlush,
    /// Fired after the session was cleared.
    Clear,
}

impl SessionEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionEvent::BeforeFlush => "before_flush",
            SessionEvent::AfterFlush => "after_flush",
            SessionEvent::Clear => "clear",
        }
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether `find` treats documents scheduled for deletion as absent.
    pub hide_removed_on_find: bool,
    /// Whether every change set written by a flush is logged at debug level.
    pub log_change_sets: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hide_removed_on_find: true,
            log_change_sets: false,
        }
    }
}

impl SessionConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `hide_removed_on_find` (builder pattern).
    #[must_use]
    pub fn hide_removed_on_find(mut self, value: bool) -> Self {
        self.hide_removed_on_find = value;
        self
    }

    /// Set `log_change_sets` (builder pattern).
    #[must_use]
    pub fn log_change_sets(mut self, value: bool) -> Self {
        self.log_change_sets = value;
        self
    }

    /// Parse a configuration from JSON. Missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config = serde_json::from_str(json)?;
        tracing::debug!(?config, "Loaded session configuration");
        Ok(config)
    }
}

// ============================================================================
// Session
// ============================================================================

/// The unit-of-work session.
///
/// Owns the gateway and tracks every object it was asked to manage until the
/// next `clear()`.
pub struct Session<G: Gateway> {
    gateway: G,
    metadata: Arc<Metadata>,
    uow: UnitOfWork,
    config: SessionConfig,
    /// `(type, identity)` of the documents being hydrated right now.
    loading: Vec<(&'static str, Value)>,
    event_callbacks: SessionEventCallbacks,
}

impl<G: Gateway> Session<G> {
    /// Create a new session over a gateway.
    pub fn new(gateway: G, metadata: Arc<Metadata>) -> Self {
        Self::with_config(gateway, metadata, SessionConfig::default())
    }

    /// Create a new session with custom configuration.
    pub fn with_config(gateway: G, metadata: Arc<Metadata>, config: SessionConfig) -> Self {
        Self {
            gateway,
            uow: UnitOfWork::new(Arc::clone(&metadata)),
            metadata,
            config,
            loading: Vec::new(),
            event_callbacks: SessionEventCallbacks::default(),
        }
    }

    /// Get a reference to the underlying gateway.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// Consume the session, returning the gateway.
    pub fn into_gateway(self) -> G {
        self.gateway
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Access the unit of work directly.
    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    // ========================================================================
    // Session Events
    // ========================================================================

    /// Register a callback to run before flush.
    ///
    /// The callback can abort the flush by returning `Err`.
    pub fn on_before_flush(&mut self, f: impl FnMut() -> Result<(), Error> + 'static) {
        self.event_callbacks.before_flush.push(Box::new(f));
    }

    /// Register a callback to run after a successful flush.
    pub fn on_after_flush(&mut self, f: impl FnMut() -> Result<(), Error> + 'static) {
        self.event_callbacks.after_flush.push(Box::new(f));
    }

    /// Register a callback to run after the session was cleared.
    pub fn on_clear(&mut self, f: impl FnMut() -> Result<(), Error> + 'static) {
        self.event_callbacks.on_clear.push(Box::new(f));
    }

    // ========================================================================
    // Lifecycle Operations
    // ========================================================================

    /// Make an object managed.
    ///
    /// A New object is scheduled for insert; a Removed one is managed again.
    /// Cascades along persist associations.
    pub fn persist<T: Document>(&mut self, doc: &DocRef<T>) -> Result<()> {
        self.uow.persist(&DocumentRef::new(doc), &mut self.gateway)
    }

    /// Schedule a managed object for deletion at the next flush.
    pub fn remove<T: Document>(&mut self, doc: &DocRef<T>) -> Result<()> {
        self.uow.remove(&DocumentRef::new(doc), &mut self.gateway)
    }

    /// Stop tracking an object. Pending work for it is dropped.
    pub fn detach<T: Document>(&mut self, doc: &DocRef<T>) -> Result<()> {
        self.uow.detach(&DocumentRef::new(doc), &mut self.gateway)
    }

    /// Merge an object into the session and return the managed handle.
    pub fn merge<T: Document>(&mut self, doc: &DocRef<T>) -> Result<DocRef<T>> {
        self.uow.merge(&DocumentRef::new(doc), &mut self.gateway)?;
        Ok(DocRef::clone(doc))
    }

    /// Reload a managed object from the store, discarding local changes.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn refresh<T: Document>(&mut self, doc: &DocRef<T>) -> Result<()> {
        let mut visited = HashSet::new();
        self.refresh_cascading(&DocumentRef::new(doc), &mut visited)
    }

    fn refresh_cascading(
        &mut self,
        doc: &DocumentRef,
        visited: &mut HashSet<docmodel_core::ObjectKey>,
    ) -> Result<()> {
        if !visited.insert(doc.key()) {
            return Ok(());
        }
        let state = self.uow.state_of(doc, &mut self.gateway)?;
        lifecycle::check_operation(state, Operation::Refresh, || doc.describe())?;

        let type_name = doc.type_name();
        let identity = doc.borrow().identifier();
        let Some(id) = identity else {
            return Err(InvalidArgument::DocumentHasNoIdentity {
                document: doc.describe(),
                operation: Operation::Refresh.as_str().to_string(),
            }
            .into());
        };
        let fields = self
            .gateway
            .find(type_name, &id)?
            .ok_or_else(|| Error::not_found(type_name, &id))?;

        let metadata = Arc::clone(&self.metadata);
        metadata.reload(doc, &fields, self)?;
        doc.borrow_mut().set_identifier(id);
        self.uow.refresh_snapshot(doc.key())?;
        tracing::debug!(document = %doc.describe(), "Refreshed");

        for target in cascade::cascade_targets(&metadata, doc, CascadeAction::Refresh) {
            self.refresh_cascading(&target, visited)?;
        }
        Ok(())
    }

    /// Find a document by identity.
    ///
    /// Returns the managed instance when the identity map already holds it;
    /// otherwise loads it through the gateway and manages it.
    #[tracing::instrument(level = "debug", skip_all, fields(type_name = T::TYPE_NAME))]
    pub fn find<T: Mapped>(&mut self, id: impl Into<Value>) -> Result<Option<DocRef<T>>> {
        let id = id.into();
        let Some(doc) = self.load(T::TYPE_NAME, &id)? else {
            return Ok(None);
        };
        match doc.downcast::<T>() {
            Some(typed) => Ok(Some(typed)),
            None => Err(InvalidArgument::InvalidObject {
                context: "find".to_string(),
                expected: T::TYPE_NAME.to_string(),
                given: doc.type_name().to_string(),
            }
            .into()),
        }
    }

    // ========================================================================
    // Explicit Scheduling
    // ========================================================================

    /// Schedule an insert without cascading.
    pub fn schedule_for_insert<T: Document>(&mut self, doc: &DocRef<T>) -> Result<()> {
        self.uow.schedule_for_insert(&DocumentRef::new(doc), &mut self.gateway)
    }

    /// Force a managed object into the next flush's change detection.
    pub fn schedule_for_update<T: Document>(&mut self, doc: &DocRef<T>) -> Result<()> {
        self.uow.schedule_for_update(&DocumentRef::new(doc))
    }

    /// Schedule a managed object for deletion without cascading.
    pub fn schedule_for_delete<T: Document>(&mut self, doc: &DocRef<T>) -> Result<()> {
        self.uow.schedule_for_delete(&DocumentRef::new(doc))
    }

    pub fn is_scheduled_for_insert<T: Document>(&self, doc: &DocRef<T>) -> bool {
        self.uow.is_scheduled_for_insert(&DocumentRef::new(doc))
    }

    pub fn is_scheduled_for_update<T: Document>(&self, doc: &DocRef<T>) -> bool {
        self.uow.is_scheduled_for_update(&DocumentRef::new(doc))
    }

    pub fn is_scheduled_for_delete<T: Document>(&self, doc: &DocRef<T>) -> bool {
        self.uow.is_scheduled_for_delete(&DocumentRef::new(doc))
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Write all pending work to the gateway.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn flush(&mut self) -> Result<FlushResult> {
        self.flush_scope(FlushScope::All)
    }

    /// Write the pending work of one managed (or removed) object, plus
    /// whatever its cascades bring along.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn flush_document<T: Document>(&mut self, doc: &DocRef<T>) -> Result<FlushResult> {
        let doc = DocumentRef::new(doc);
        let state = self.uow.state_of(&doc, &mut self.gateway)?;
        lifecycle::check_operation(state, Operation::SingleFlush, || doc.describe())?;
        self.flush_scope(FlushScope::Document(doc.key()))
    }

    fn flush_scope(&mut self, scope: FlushScope) -> Result<FlushResult> {
        self.event_callbacks.fire(SessionEvent::BeforeFlush)?;

        let plan = self.uow.plan_flush(scope, &mut self.gateway)?;
        if plan.is_empty() {
            tracing::debug!("Nothing to flush");
        }
        let result = self
            .uow
            .execute_flush(&plan, &mut self.gateway, self.config.log_change_sets)?;

        self.event_callbacks.fire(SessionEvent::AfterFlush)?;
        Ok(result)
    }

    /// Detach every managed object and drop all pending work.
    pub fn clear(&mut self) -> Result<()> {
        self.uow.clear();
        self.event_callbacks.fire(SessionEvent::Clear)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Check if the object is managed (or removed but not yet flushed).
    pub fn contains<T: Document>(&self, doc: &DocRef<T>) -> bool {
        self.uow.contains(&DocumentRef::new(doc))
    }

    /// Lifecycle state of any object relative to this session.
    pub fn state<T: Document>(&mut self, doc: &DocRef<T>) -> Result<DocumentState> {
        self.uow.state_of(&DocumentRef::new(doc), &mut self.gateway)
    }

    /// Database reference to an object with an identity.
    pub fn db_ref<T: Document>(&self, doc: &DocRef<T>) -> Result<DbRef> {
        self.uow.db_ref(&DocumentRef::new(doc))
    }

    /// Pending field changes of a stored, managed object.
    pub fn change_set<T: Document>(&self, doc: &DocRef<T>) -> Result<Option<ChangeSet>> {
        self.uow.change_set(&DocumentRef::new(doc))
    }

    /// Get pending operation counts.
    pub fn pending_counts(&self) -> PendingCounts {
        self.uow.pending_counts()
    }

    /// Human-readable summary of the tracked state.
    pub fn debug_state(&self) -> String {
        let counts = self.uow.pending_counts();
        format!(
            "managed={} inserts={} updates={} deletes={} loading={}",
            counts.managed,
            counts.inserts,
            counts.updates,
            counts.deletes,
            self.loading.len()
        )
    }
}

impl<G: Gateway> Loader for Session<G> {
    fn load(&mut self, type_name: &str, id: &Value) -> Result<Option<DocumentRef>> {
        let type_name = self.metadata.document(type_name)?.type_name;

        if let Some(handle) = self.uow.lookup(type_name, id) {
            let removed = self.uow.is_scheduled_for_delete(&handle);
            if removed && self.config.hide_removed_on_find {
                tracing::trace!(type_name, %id, "Document scheduled for deletion is hidden");
                return Ok(None);
            }
            return Ok(Some(handle));
        }

        if self.loading.iter().any(|(t, i)| *t == type_name && i == id) {
            return Err(Error::hydration(
                docmodel_core::ID_FIELD,
                format!("reference cycle while loading {type_name} {id}"),
            ));
        }

        let Some(fields) = self.gateway.find(type_name, id)? else {
            tracing::debug!(type_name, %id, "Document not found");
            return Ok(None);
        };

        self.loading.push((type_name, id.clone()));
        let metadata = Arc::clone(&self.metadata);
        let hydrated = metadata.hydrate(type_name, &fields, self);
        self.loading.pop();
        let doc = hydrated?;

        doc.borrow_mut().set_identifier(id.clone());
        self.uow.register_loaded(&doc)?;
        tracing::debug!(type_name, %id, "Loaded document");
        Ok(Some(doc))
    }
}

impl<G: Gateway> std::fmt::Debug for Session<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("uow", &self.uow)
            .field("config", &self.config)
            .field("event_callbacks", &self.event_callbacks)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
