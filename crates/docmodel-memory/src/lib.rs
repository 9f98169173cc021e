//! In-memory persistence gateway for docmodel.
//!
//! `MemoryGateway` implements `docmodel_core::Gateway` over plain maps, one
//! per collection. Documents are stored serialized with `serde_json`, so what
//! comes back from `find` is an independent copy built from the stored bytes,
//! never an alias of the caller's data.
//!
//! Every call is recorded in an operation log, which makes the gateway useful
//! for asserting flush ordering in tests. `fail_after` injects a failure
//! after a given number of successful writes.

use bson::oid::ObjectId;
use docmodel_core::{ChangeSet, Fields, Gateway, GatewayError, ID_FIELD, Value};
use std::collections::{BTreeMap, HashMap};

/// A call received by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOp {
    Insert { collection: String, id: Value },
    Update {
        collection: String,
        id: Value,
        /// Names of the fields written, in order.
        fields: Vec<String>,
    },
    Delete { collection: String, id: Value },
    Find { collection: String, id: Value },
}

impl GatewayOp {
    pub fn collection(&self) -> &str {
        match self {
            GatewayOp::Insert { collection, .. }
            | GatewayOp::Update { collection, .. }
            | GatewayOp::Delete { collection, .. }
            | GatewayOp::Find { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &Value {
        match self {
            GatewayOp::Insert { id, .. }
            | GatewayOp::Update { id, .. }
            | GatewayOp::Delete { id, .. }
            | GatewayOp::Find { id, .. } => id,
        }
    }

    /// Check if this operation modifies stored data.
    pub fn is_write(&self) -> bool {
        !matches!(self, GatewayOp::Find { .. })
    }
}

/// Stored documents of one collection, keyed by the JSON form of their id.
type Collection = BTreeMap<String, Vec<u8>>;

/// Document store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    collections: HashMap<String, Collection>,
    ops: Vec<GatewayOp>,
    writes: usize,
    fail_after: Option<usize>,
}

impl MemoryGateway {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write after `writes` more successful ones.
    #[must_use]
    pub fn fail_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(self.writes + writes);
        self
    }

    /// Stop injecting failures.
    pub fn heal(&mut self) {
        self.fail_after = None;
    }

    /// Every call received so far.
    pub fn ops(&self) -> &[GatewayOp] {
        &self.ops
    }

    /// Only the calls that modified stored data.
    pub fn writes(&self) -> Vec<&GatewayOp> {
        self.ops.iter().filter(|op| op.is_write()).collect()
    }

    pub fn clear_log(&mut self) {
        self.ops.clear();
    }

    /// Decoded copy of a stored document, without recording a `Find`.
    pub fn stored(&self, collection: &str, id: &Value) -> Option<Fields> {
        let bytes = self.collections.get(collection)?.get(&id_key(id).ok()?)?;
        serde_json::from_slice(bytes).ok()
    }

    /// Number of documents stored in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, BTreeMap::len)
    }

    /// Total number of stored documents.
    pub fn len(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_write(&mut self, operation: &str) -> Result<(), GatewayError> {
        if self.fail_after.is_some_and(|limit| self.writes >= limit) {
            tracing::warn!(operation, writes = self.writes, "Injected gateway failure");
            return Err(GatewayError::new(format!("injected failure on {operation}")));
        }
        self.writes += 1;
        Ok(())
    }
}

fn id_key(id: &Value) -> Result<String, GatewayError> {
    serde_json::to_string(id).map_err(|e| GatewayError::with_source("cannot encode identity", e))
}

/// JSON has no NaN or infinity; `serde_json` would store them as null.
fn encode(document: &Fields) -> Result<Vec<u8>, GatewayError> {
    if !document.is_finite() {
        return Err(GatewayError::new(
            "cannot encode document: non-finite double",
        ));
    }
    serde_json::to_vec(document).map_err(|e| GatewayError::with_source("cannot encode document", e))
}

fn decode(bytes: &[u8]) -> Result<Fields, GatewayError> {
    serde_json::from_slice(bytes).map_err(|e| GatewayError::with_source("cannot decode document", e))
}

impl Gateway for MemoryGateway {
    #[tracing::instrument(level = "trace", skip(self, document))]
    fn insert(&mut self, type_name: &str, document: &Fields) -> Result<Option<Value>, GatewayError> {
        let (id, generated) = match document.get(ID_FIELD) {
            Some(id) if !id.is_null() => (id.clone(), false),
            _ => (Value::ObjectId(ObjectId::new()), true),
        };
        let key = id_key(&id)?;
        if self
            .collections
            .get(type_name)
            .is_some_and(|c| c.contains_key(&key))
        {
            return Err(GatewayError::new(format!(
                "duplicate key: {type_name} {id} already exists"
            )));
        }
        let mut stored = document.clone();
        stored.insert(ID_FIELD, id.clone());
        let bytes = encode(&stored)?;
        self.check_write("insert")?;

        self.collections
            .entry(type_name.to_string())
            .or_default()
            .insert(key, bytes);
        self.ops.push(GatewayOp::Insert {
            collection: type_name.to_string(),
            id: id.clone(),
        });
        tracing::trace!(type_name, %id, generated, "Stored document");

        Ok(generated.then_some(id))
    }

    #[tracing::instrument(level = "trace", skip(self, changes))]
    fn update(&mut self, type_name: &str, id: &Value, changes: &ChangeSet) -> Result<(), GatewayError> {
        let key = id_key(id)?;
        let Some(bytes) = self.collections.get(type_name).and_then(|c| c.get(&key)) else {
            return Err(GatewayError::new(format!("no document {type_name} {id} to update")));
        };
        let mut document = decode(bytes)?;
        for (name, change) in changes.iter() {
            if change.new.is_null() {
                document.remove(name);
            } else {
                document.insert(name, change.new.clone());
            }
        }
        let bytes = encode(&document)?;
        self.check_write("update")?;

        self.collections
            .entry(type_name.to_string())
            .or_default()
            .insert(key, bytes);
        self.ops.push(GatewayOp::Update {
            collection: type_name.to_string(),
            id: id.clone(),
            fields: changes.fields().map(str::to_string).collect(),
        });
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn delete(&mut self, type_name: &str, id: &Value) -> Result<(), GatewayError> {
        let key = id_key(id)?;
        self.check_write("delete")?;
        let removed = self
            .collections
            .get_mut(type_name)
            .and_then(|c| c.remove(&key))
            .is_some();
        if !removed {
            tracing::debug!(type_name, %id, "Delete matched no document");
        }
        self.ops.push(GatewayOp::Delete {
            collection: type_name.to_string(),
            id: id.clone(),
        });
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn find(&mut self, type_name: &str, id: &Value) -> Result<Option<Fields>, GatewayError> {
        let key = id_key(id)?;
        self.ops.push(GatewayOp::Find {
            collection: type_name.to_string(),
            id: id.clone(),
        });
        self.collections
            .get(type_name)
            .and_then(|c| c.get(&key))
            .map(|bytes| decode(bytes))
            .transpose()
    }
}
