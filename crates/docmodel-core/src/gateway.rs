//! Persistence gateway contract.
//!
//! The engine hands fully prepared documents to a [`Gateway`]; wire protocol,
//! connection handling and query execution live behind it.

use crate::changeset::ChangeSet;
use crate::error::GatewayError;
use crate::value::{Fields, Value};

/// Low-level document store used by the flush orchestrator.
///
/// All calls are synchronous from the engine's point of view. An
/// implementation that performs asynchronous I/O must complete it before
/// returning.
pub trait Gateway {
    /// Insert a document of `type_name`.
    ///
    /// `document` contains the `_id` key when the identity is already known.
    /// Returns the identity assigned by the store, if it generated one.
    fn insert(&mut self, type_name: &str, document: &Fields) -> Result<Option<Value>, GatewayError>;

    /// Apply `changes` to the stored document with `id`.
    fn update(&mut self, type_name: &str, id: &Value, changes: &ChangeSet) -> Result<(), GatewayError>;

    /// Delete the stored document with `id`.
    fn delete(&mut self, type_name: &str, id: &Value) -> Result<(), GatewayError>;

    /// Look up a stored document by identity. The result includes `_id`.
    fn find(&mut self, type_name: &str, id: &Value) -> Result<Option<Fields>, GatewayError>;
}

impl<G: Gateway + ?Sized> Gateway for &mut G {
    fn insert(&mut self, type_name: &str, document: &Fields) -> Result<Option<Value>, GatewayError> {
        (**self).insert(type_name, document)
    }

    fn update(&mut self, type_name: &str, id: &Value, changes: &ChangeSet) -> Result<(), GatewayError> {
        (**self).update(type_name, id, changes)
    }

    fn delete(&mut self, type_name: &str, id: &Value) -> Result<(), GatewayError> {
        (**self).delete(type_name, id)
    }

    fn find(&mut self, type_name: &str, id: &Value) -> Result<Option<Fields>, GatewayError> {
        (**self).find(type_name, id)
    }
}
