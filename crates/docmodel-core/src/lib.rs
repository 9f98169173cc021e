//! Core types and traits for docmodel.
//!
//! This crate provides the foundational abstractions the unit-of-work engine
//! consumes:
//!
//! - `Value` / `Fields` / `DbRef` for dynamically typed document data
//! - `Document`, `Mapped` and `Embedded` accessor traits for mapped types
//! - `DocumentMapping` and `Metadata` for validated mapping metadata
//! - `Gateway` trait for the backing document store
//! - `Error` with the closed `InvalidArgument` lifecycle taxonomy

pub mod changeset;
pub mod document;
pub mod error;
pub mod gateway;
pub mod mapping;
pub mod value;

pub use bson::oid::ObjectId;
pub use changeset::{ChangeSet, FieldChange};
pub use document::{DocRef, Document, DocumentRef, Embedded, Loader, Mapped, ObjectKey, doc_ref};
pub use error::{Error, GatewayError, InvalidArgument, Result};
pub use gateway::Gateway;
pub use mapping::{
    Association, AssociationKind, Cardinality, Cascade, ChangeTracking, DocumentMapping,
    IdStrategy, MappingKind, Metadata, MetadataBuilder,
};
pub use value::{DbRef, Fields, FromValue, ID_FIELD, Value};
