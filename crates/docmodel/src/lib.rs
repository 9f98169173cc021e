//! docmodel - object-document mapping for MongoDB with unit-of-work change
//! tracking.
//!
//! docmodel keeps track of the documents an application loads and creates,
//! works out what changed, and writes everything back in one flush:
//!
//! - Identity map: one managed instance per stored document
//! - Field-level change sets computed from snapshots
//! - Cascading persist / remove / detach / merge / refresh along references
//! - Dependency-ordered inserts and deletes, validated before any write
//! - Read-only documents and embedded values
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! struct User {
//!     id: Option<Value>,
//!     name: String,
//! }
//!
//! impl Document for User {
//!     fn type_name(&self) -> &'static str { "User" }
//!     fn identifier(&self) -> Option<Value> { self.id.clone() }
//!     fn set_identifier(&mut self, id: Value) { self.id = Some(id); }
//!     fn to_fields(&self) -> Fields { Fields::new().with("name", self.name.as_str()) }
//! }
//!
//! impl Mapped for User {
//!     const TYPE_NAME: &'static str = "User";
//!     fn mapping() -> DocumentMapping {
//!         DocumentMapping::document("User").identifier("id").field("name")
//!     }
//!     fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
//!         Ok(User { id: fields.get(ID_FIELD).cloned(), name: fields.get_as("name")? })
//!     }
//! }
//!
//! let metadata = Arc::new(Metadata::builder().document::<User>().build()?);
//! let mut session = Session::new(MemoryGateway::new(), metadata);
//!
//! let user = doc_ref(User { id: None, name: "jwage".into() });
//! session.persist(&user)?;
//! session.flush()?;
//! ```
//!
//! # Crates
//!
//! - `docmodel-core`: values, mapping metadata, the `Document` traits, errors
//!   and the `Gateway` contract
//! - `docmodel-session`: the `Session` and its unit of work
//! - `docmodel-memory`: an in-memory `Gateway`

pub use docmodel_core::{
    Association, AssociationKind, Cardinality, Cascade, ChangeSet, ChangeTracking, DbRef, DocRef,
    Document, DocumentMapping, DocumentRef, Embedded, Error, FieldChange, Fields, FromValue,
    Gateway, GatewayError, ID_FIELD, IdStrategy, InvalidArgument, Loader, Mapped, MappingKind,
    Metadata, MetadataBuilder, ObjectId, ObjectKey, Result, Value, doc_ref,
};
pub use docmodel_memory::{GatewayOp, MemoryGateway};
pub use docmodel_session::{
    CascadeAction, DocumentState, FlushResult, FlushScope, Operation, PendingCounts, Session,
    SessionConfig, SessionEvent, SessionEventCallbacks,
};

/// Re-exported building blocks for callers that drive the engine directly.
pub mod session {
    pub use docmodel_session::*;
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use docmodel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Association,
        Cascade,
        DbRef,
        DocRef,
        Document,
        DocumentMapping,
        DocumentState,
        Embedded,
        Error,
        Fields,
        FlushResult,
        Gateway,
        ID_FIELD,
        IdStrategy,
        InvalidArgument,
        Loader,
        Mapped,
        MemoryGateway,
        Metadata,
        ObjectId,
        Result,
        Session,
        SessionConfig,
        Value,
        doc_ref,
    };
    pub use std::sync::Arc;
}

