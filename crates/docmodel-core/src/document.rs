//! Accessor traits and shared handles for mapped objects.
//!
//! Mapped types implement [`Document`] (object-safe, used by the engine) and
//! [`Mapped`] (static mapping and hydration). Embedded value objects implement
//! [`Embedded`]. The engine never inspects fields reflectively; it only calls
//! these accessors.

use crate::error::{InvalidArgument, Result};
use crate::mapping::DocumentMapping;
use crate::value::{Fields, Value};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Shared handle to a mapped object.
pub type DocRef<T> = Rc<RefCell<T>>;

/// Wrap a value in a [`DocRef`].
pub fn doc_ref<T>(value: T) -> DocRef<T> {
    Rc::new(RefCell::new(value))
}

/// Unique identity of a handle: the address of its allocation.
///
/// Two clones of the same [`DocRef`] share an `ObjectKey`; two distinct
/// objects never do while both are alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(usize);

impl ObjectKey {
    pub fn of<T: ?Sized>(handle: &Rc<RefCell<T>>) -> Self {
        Self(Rc::as_ptr(handle).cast::<()>() as usize)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Object-safe view of a mapped document.
pub trait Document: Any {
    /// Mapped type name. Must match the type's [`Mapped::TYPE_NAME`].
    fn type_name(&self) -> &'static str;

    /// Current identity, if one is known.
    fn identifier(&self) -> Option<Value>;

    /// Assign the identity (called after insert or id generation).
    fn set_identifier(&mut self, id: Value);

    /// Current persistent field values, excluding the identifier and
    /// reference associations. Embedded associations are included as
    /// [`Value::Embedded`] / arrays of them.
    fn to_fields(&self) -> Fields;

    /// Objects currently held by a reference association field.
    fn references(&self, _field: &str) -> Vec<DocumentRef> {
        Vec::new()
    }

    /// Custom string form used in diagnostics.
    fn display_string(&self) -> Option<String> {
        None
    }
}

/// A document type that can be registered with [`Metadata`](crate::Metadata).
pub trait Mapped: Document + Sized {
    const TYPE_NAME: &'static str;

    fn mapping() -> DocumentMapping;

    /// Rebuild an object from its stored fields. Reference fields arrive as
    /// [`DbRef`](crate::DbRef) values and are resolved through `loader`.
    fn from_fields(fields: &Fields, loader: &mut dyn Loader) -> Result<Self>;
}

/// A value object stored inside its parent document.
pub trait Embedded: Sized {
    const TYPE_NAME: &'static str;

    fn mapping() -> DocumentMapping;

    fn to_fields(&self) -> Fields;

    fn from_fields(fields: &Fields) -> Result<Self>;
}

/// Type-erased handle to a managed document.
///
/// Both fields point at the same allocation; `any` is kept so the handle can
/// be turned back into a typed [`DocRef<T>`].
#[derive(Clone)]
pub struct DocumentRef {
    doc: Rc<RefCell<dyn Document>>,
    any: Rc<dyn Any>,
}

impl DocumentRef {
    pub fn new<T: Document>(handle: &DocRef<T>) -> Self {
        let doc: Rc<RefCell<dyn Document>> = handle.clone();
        let any: Rc<dyn Any> = handle.clone();
        Self { doc, any }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::of(&self.doc)
    }

    pub fn borrow(&self) -> Ref<'_, dyn Document> {
        self.doc.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, dyn Document> {
        self.doc.borrow_mut()
    }

    pub fn type_name(&self) -> &'static str {
        self.doc.borrow().type_name()
    }

    pub fn is<T: Document>(&self) -> bool {
        self.any.is::<RefCell<T>>()
    }

    /// Recover the typed handle.
    pub fn downcast<T: Document>(&self) -> Option<DocRef<T>> {
        Rc::clone(&self.any).downcast::<RefCell<T>>().ok()
    }

    pub fn ptr_eq(&self, other: &DocumentRef) -> bool {
        self.key() == other.key()
    }

    /// String form for diagnostics: the custom display string when the type
    /// provides one, otherwise `Type@<object key>`.
    pub fn describe(&self) -> String {
        match self.doc.try_borrow() {
            Ok(doc) => doc
                .display_string()
                .unwrap_or_else(|| format!("{}@{}", doc.type_name(), self.key())),
            Err(_) => format!("<borrowed>@{}", self.key()),
        }
    }

    /// Whether the type provides a custom display string.
    pub fn has_display(&self) -> bool {
        self.doc
            .try_borrow()
            .is_ok_and(|doc| doc.display_string().is_some())
    }
}

impl<T: Document> From<&DocRef<T>> for DocumentRef {
    fn from(handle: &DocRef<T>) -> Self {
        DocumentRef::new(handle)
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentRef").field(&self.describe()).finish()
    }
}

/// Resolves references while hydrating a stored document.
pub trait Loader {
    /// Load (or return the already managed) object of `type_name` with `id`.
    fn load(&mut self, type_name: &str, id: &Value) -> Result<Option<DocumentRef>>;
}

impl dyn Loader + '_ {
    /// Resolve a reference-one field.
    pub fn reference<U: Mapped>(&mut self, fields: &Fields, field: &str) -> Result<Option<DocRef<U>>> {
        match fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Reference(r)) => self.resolve::<U>(field, &r.collection, &r.id),
            Some(other) => Err(crate::Error::hydration(
                field,
                format!("expected reference to {}, found {}", U::TYPE_NAME, other.type_name()),
            )),
        }
    }

    /// Resolve a reference-many field. Dangling references are skipped.
    pub fn references<U: Mapped>(&mut self, fields: &Fields, field: &str) -> Result<Vec<DocRef<U>>> {
        let items = match fields.get(field) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(crate::Error::hydration(
                    field,
                    format!("expected array of references, found {}", other.type_name()),
                ));
            }
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let Value::Reference(r) = item else {
                return Err(crate::Error::hydration(
                    field,
                    format!("expected reference element, found {}", item.type_name()),
                ));
            };
            if let Some(handle) = self.resolve::<U>(field, &r.collection, &r.id)? {
                out.push(handle);
            }
        }
        Ok(out)
    }

    fn resolve<U: Mapped>(&mut self, field: &str, collection: &str, id: &Value) -> Result<Option<DocRef<U>>> {
        let Some(loaded) = self.load(collection, id)? else {
            tracing::warn!(field, collection, %id, "dangling reference");
            return Ok(None);
        };
        loaded.downcast::<U>().map(Some).ok_or_else(|| {
            InvalidArgument::InvalidObject {
                context: format!("reference field '{field}'"),
                expected: U::TYPE_NAME.to_string(),
                given: loaded.type_name().to_string(),
            }
            .into()
        })
    }
}
