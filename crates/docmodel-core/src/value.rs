//! Dynamic document values.

use crate::document::Embedded;
use crate::error::{Error, Result};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the stored identifier key.
pub const ID_FIELD: &str = "_id";

/// A dynamically-typed document value.
///
/// This enum represents every value a mapped field can hold and is used both
/// for snapshots (change detection) and for the documents handed to a
/// [`Gateway`](crate::Gateway).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing or null value
    Null,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point
    Double(f64),

    /// UTF-8 string
    String(String),

    /// MongoDB ObjectId
    ObjectId(ObjectId),

    /// UTC datetime (milliseconds since epoch)
    DateTime(i64),

    /// Binary data
    Binary(Vec<u8>),

    /// Array of values
    Array(Vec<Value>),

    /// Embedded sub-document
    Embedded(Fields),

    /// Reference to another stored document
    Reference(DbRef),
}

impl Value {
    /// Check if this value is null.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Equality used by change detection: doubles compare by bit pattern,
    /// so a NaN equals itself.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y))
            }
            (Value::Embedded(a), Value::Embedded(b)) => a.same_as(b),
            (Value::Reference(a), Value::Reference(b)) => {
                a.collection == b.collection && a.id.same_as(&b.id)
            }
            _ => self == other,
        }
    }

    /// Whether every double in this value, nested ones included, is finite.
    pub fn is_finite(&self) -> bool {
        match self {
            Value::Double(f) => f.is_finite(),
            Value::Array(items) => items.iter().all(Value::is_finite),
            Value::Embedded(fields) => fields.is_finite(),
            Value::Reference(r) => r.id.is_finite(),
            _ => true,
        }
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::ObjectId(_) => "objectId",
            Value::DateTime(_) => "date",
            Value::Binary(_) => "binData",
            Value::Array(_) => "array",
            Value::Embedded(_) => "object",
            Value::Reference(_) => "dbPointer",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_embedded(&self) -> Option<&Fields> {
        match self {
            Value::Embedded(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&DbRef> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Convert an embedded document into a value.
    pub fn embed<E: Embedded>(embedded: &E) -> Self {
        Value::Embedded(embedded.to_fields())
    }

    /// Convert an optional embedded document into a value (`None` → null).
    pub fn embed_opt<E: Embedded>(embedded: Option<&E>) -> Self {
        embedded.map_or(Value::Null, Value::embed)
    }

    /// Convert a collection of embedded documents into an array value.
    pub fn embed_many<'a, E, I>(items: I) -> Self
    where
        E: Embedded + 'a,
        I: IntoIterator<Item = &'a E>,
    {
        Value::Array(items.into_iter().map(Value::embed).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::ObjectId(oid) => write!(f, "ObjectId(\"{}\")", oid.to_hex()),
            Value::DateTime(ms) => write!(f, "Date({ms})"),
            Value::Binary(b) => write!(f, "BinData({} bytes)", b.len()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Embedded(fields) => write!(f, "{fields}"),
            Value::Reference(r) => write!(f, "{r}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<Fields> for Value {
    fn from(v: Fields) -> Self {
        Value::Embedded(v)
    }
}

impl From<DbRef> for Value {
    fn from(v: DbRef) -> Self {
        Value::Reference(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a stored [`Value`] back into a Rust type.
pub trait FromValue: Sized {
    /// Human-readable name of the accepted value type (for errors).
    const EXPECTED: &'static str;

    /// Convert, returning `None` when the value has the wrong shape.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "int (32-bit)";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|i| i32::try_from(i).ok())
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "double";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for ObjectId {
    const EXPECTED: &'static str = "objectId";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_object_id()
    }
}

impl FromValue for DbRef {
    const EXPECTED: &'static str = "dbPointer";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_reference().cloned()
    }
}

impl FromValue for Fields {
    const EXPECTED: &'static str = "object";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_embedded().cloned()
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        if value.is_null() {
            Some(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    const EXPECTED: &'static str = "array";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Vec::new()),
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            _ => None,
        }
    }
}

/// An ordered map of field name → value.
///
/// Field order is lexicographic, which keeps snapshots, diffs and log output
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    /// Create an empty field map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Insert a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.0.get_mut(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Field-by-field [`Value::same_as`].
    pub fn same_as(&self, other: &Fields) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
    }

    /// Whether every double in the map is finite.
    pub fn is_finite(&self) -> bool {
        self.0.values().all(Value::is_finite)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Read a field as a concrete type. Missing fields read as null.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.0.get(name).unwrap_or(&Value::Null);
        T::from_value(value).ok_or_else(|| {
            Error::hydration(
                name,
                format!("expected {}, found {}", T::EXPECTED, value.type_name()),
            )
        })
    }

    /// Read an embed-one field.
    pub fn embedded<E: Embedded>(&self, name: &str) -> Result<Option<E>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Embedded(inner)) => E::from_fields(inner).map(Some),
            Some(other) => Err(Error::hydration(
                name,
                format!("expected embedded {}, found {}", E::TYPE_NAME, other.type_name()),
            )),
        }
    }

    /// Read an embed-many field.
    pub fn embedded_many<E: Embedded>(&self, name: &str) -> Result<Vec<E>> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::Embedded(inner) => E::from_fields(inner),
                    other => Err(Error::hydration(
                        name,
                        format!(
                            "expected embedded {} element, found {}",
                            E::TYPE_NAME,
                            other.type_name()
                        ),
                    )),
                })
                .collect(),
            Some(other) => Err(Error::hydration(
                name,
                format!("expected array of {}, found {}", E::TYPE_NAME, other.type_name()),
            )),
        }
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, " {name}: {value}")?;
        }
        f.write_str(" }")
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A database reference: the stored form of a reference association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbRef {
    /// Mapped type name of the referenced document.
    #[serde(rename = "$ref")]
    pub collection: String,
    /// Identity of the referenced document.
    #[serde(rename = "$id")]
    pub id: Box<Value>,
}

impl DbRef {
    pub fn new(collection: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            collection: collection.into(),
            id: Box::new(id.into()),
        }
    }
}

impl fmt::Display for DbRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DBRef(\"{}\", {})", self.collection, self.id)
    }
}
