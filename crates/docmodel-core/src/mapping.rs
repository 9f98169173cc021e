//! Mapping metadata for document and embedded types.
//!
//! Each type describes itself once through a [`DocumentMapping`]: identifier
//! field, id generation strategy, associations with their cascade rules, the
//! read-only flag and the change-tracking policy. [`Metadata`] collects the
//! mappings of every registered type and validates them together, so the
//! engine can rely on association targets existing with the right kind.

use crate::document::{DocRef, DocumentRef, Embedded, Loader, Mapped, doc_ref};
use crate::error::{Error, InvalidArgument, Result};
use crate::value::Fields;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ops::BitOr;
use std::sync::OnceLock;

/// Cascade behavior of an association.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cascade {
    pub persist: bool,
    pub remove: bool,
    pub detach: bool,
    pub merge: bool,
    pub refresh: bool,
}

impl Cascade {
    pub const NONE: Cascade = Cascade {
        persist: false,
        remove: false,
        detach: false,
        merge: false,
        refresh: false,
    };
    pub const ALL: Cascade = Cascade {
        persist: true,
        remove: true,
        detach: true,
        merge: true,
        refresh: true,
    };
    pub const PERSIST: Cascade = Cascade {
        persist: true,
        ..Cascade::NONE
    };
    pub const REMOVE: Cascade = Cascade {
        remove: true,
        ..Cascade::NONE
    };
    pub const DETACH: Cascade = Cascade {
        detach: true,
        ..Cascade::NONE
    };
    pub const MERGE: Cascade = Cascade {
        merge: true,
        ..Cascade::NONE
    };
    pub const REFRESH: Cascade = Cascade {
        refresh: true,
        ..Cascade::NONE
    };

    #[must_use]
    pub const fn union(self, other: Cascade) -> Cascade {
        Cascade {
            persist: self.persist || other.persist,
            remove: self.remove || other.remove,
            detach: self.detach || other.detach,
            merge: self.merge || other.merge,
            refresh: self.refresh || other.refresh,
        }
    }
}

impl BitOr for Cascade {
    type Output = Cascade;

    fn bitor(self, rhs: Cascade) -> Cascade {
        self.union(rhs)
    }
}

/// Whether an association stores its target inline or by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    /// Target is stored inside the owning document.
    Embed,
    /// Target is a separate document, stored as a [`DbRef`](crate::DbRef).
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Metadata about one association field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    /// Owning type. Filled in when the association is added to a mapping.
    pub source_type: &'static str,
    /// Name of the association field on the owning type.
    pub field: &'static str,
    /// Mapped type name of the target.
    pub target_type: &'static str,
    pub kind: AssociationKind,
    pub cardinality: Cardinality,
    pub cascade: Cascade,
}

impl Association {
    #[must_use]
    pub const fn new(
        field: &'static str,
        target_type: &'static str,
        kind: AssociationKind,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            source_type: "",
            field,
            target_type,
            kind,
            cardinality,
            cascade: Cascade::NONE,
        }
    }

    #[must_use]
    pub const fn embed_one(field: &'static str, target_type: &'static str) -> Self {
        Self::new(field, target_type, AssociationKind::Embed, Cardinality::One)
    }

    #[must_use]
    pub const fn embed_many(field: &'static str, target_type: &'static str) -> Self {
        Self::new(field, target_type, AssociationKind::Embed, Cardinality::Many)
    }

    #[must_use]
    pub const fn reference_one(field: &'static str, target_type: &'static str) -> Self {
        Self::new(field, target_type, AssociationKind::Reference, Cardinality::One)
    }

    #[must_use]
    pub const fn reference_many(field: &'static str, target_type: &'static str) -> Self {
        Self::new(field, target_type, AssociationKind::Reference, Cardinality::Many)
    }

    /// Set the cascade rules.
    #[must_use]
    pub const fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub const fn is_embed(&self) -> bool {
        matches!(self.kind, AssociationKind::Embed)
    }

    pub const fn is_reference(&self) -> bool {
        matches!(self.kind, AssociationKind::Reference)
    }
}

/// How identities are obtained for new documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdStrategy {
    /// A fresh `ObjectId` is generated when the document is persisted.
    #[default]
    Auto,
    /// The gateway assigns the identity on insert.
    Gateway,
    /// The caller supplies the identity before flushing.
    Assigned,
}

/// Which managed documents are diffed at flush time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeTracking {
    /// Every managed document is compared against its snapshot.
    #[default]
    DeferredImplicit,
    /// Only documents passed to `persist` since the last flush are compared.
    DeferredExplicit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MappingKind {
    #[default]
    Document,
    Embedded,
}

/// Mapping of one document or embedded type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMapping {
    pub type_name: &'static str,
    pub kind: MappingKind,
    /// Name of the identifier property. Stored under `_id`.
    pub identifier: Option<&'static str>,
    pub id_strategy: IdStrategy,
    /// Plain persistent fields (excluding the identifier and associations).
    pub fields: Vec<&'static str>,
    pub associations: Vec<Association>,
    pub read_only: bool,
    pub change_tracking: ChangeTracking,
}

impl DocumentMapping {
    /// Start a document mapping.
    pub fn document(type_name: &'static str) -> Self {
        Self {
            type_name,
            kind: MappingKind::Document,
            identifier: None,
            id_strategy: IdStrategy::default(),
            fields: Vec::new(),
            associations: Vec::new(),
            read_only: false,
            change_tracking: ChangeTracking::default(),
        }
    }

    /// Start an embedded mapping.
    pub fn embedded(type_name: &'static str) -> Self {
        Self {
            kind: MappingKind::Embedded,
            ..Self::document(type_name)
        }
    }

    #[must_use]
    pub fn identifier(mut self, name: &'static str) -> Self {
        self.identifier = Some(name);
        self
    }

    #[must_use]
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    #[must_use]
    pub fn field(mut self, name: &'static str) -> Self {
        self.fields.push(name);
        self
    }

    #[must_use]
    pub fn fields(mut self, names: &[&'static str]) -> Self {
        self.fields.extend_from_slice(names);
        self
    }

    #[must_use]
    pub fn association(mut self, mut association: Association) -> Self {
        association.source_type = self.type_name;
        self.associations.push(association);
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn change_tracking(mut self, policy: ChangeTracking) -> Self {
        self.change_tracking = policy;
        self
    }

    pub fn is_embedded(&self) -> bool {
        self.kind == MappingKind::Embedded
    }

    pub fn association_for(&self, field: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.field == field)
    }

    pub fn reference_associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.iter().filter(|a| a.is_reference())
    }

    pub fn embed_associations(&self) -> impl Iterator<Item = &Association> {
        self.associations.iter().filter(|a| a.is_embed())
    }
}

type Factory = fn(&Fields, &mut dyn Loader) -> Result<DocumentRef>;
type Reloader = fn(&DocumentRef, &Fields, &mut dyn Loader) -> Result<()>;

fn hydrate<T: Mapped>(fields: &Fields, loader: &mut dyn Loader) -> Result<DocumentRef> {
    let handle: DocRef<T> = doc_ref(T::from_fields(fields, loader)?);
    Ok(DocumentRef::new(&handle))
}

fn reload<T: Mapped>(target: &DocumentRef, fields: &Fields, loader: &mut dyn Loader) -> Result<()> {
    let handle = target.downcast::<T>().ok_or_else(|| InvalidArgument::InvalidObject {
        context: "refresh".to_string(),
        expected: T::TYPE_NAME.to_string(),
        given: target.type_name().to_string(),
    })?;
    let fresh = T::from_fields(fields, loader)?;
    *handle.borrow_mut() = fresh;
    Ok(())
}

/// Type-erased constructors of a registered document type.
#[derive(Clone, Copy)]
struct DocumentFns {
    hydrate: Factory,
    reload: Reloader,
}

impl DocumentFns {
    fn of<T: Mapped>() -> Self {
        Self {
            hydrate: hydrate::<T>,
            reload: reload::<T>,
        }
    }
}

struct TypeEntry {
    mapping: DocumentMapping,
    factory: Option<DocumentFns>,
}

/// Validated mapping metadata for every registered type.
pub struct Metadata {
    types: HashMap<&'static str, TypeEntry>,
}

impl Metadata {
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn mapping(&self, type_name: &str) -> Option<&DocumentMapping> {
        self.types.get(type_name).map(|e| &e.mapping)
    }

    /// Mapping of a document type, or a mapping error when unknown.
    pub fn document(&self, type_name: &str) -> Result<&DocumentMapping> {
        match self.types.get(type_name) {
            Some(entry) if !entry.mapping.is_embedded() => Ok(&entry.mapping),
            Some(_) => Err(Error::mapping(type_name, "is an embedded type, not a document")),
            None => Err(Error::mapping(type_name, "type is not registered")),
        }
    }

    pub fn is_read_only(&self, type_name: &str) -> bool {
        self.mapping(type_name).is_some_and(|m| m.read_only)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }

    /// Rebuild a document of `type_name` from stored fields.
    pub fn hydrate(&self, type_name: &str, fields: &Fields, loader: &mut dyn Loader) -> Result<DocumentRef> {
        (self.fns(type_name)?.hydrate)(fields, loader)
    }

    /// Overwrite the object behind `target` with a fresh instance rebuilt
    /// from stored fields. The handle (and so its identity) is kept.
    pub fn reload(&self, target: &DocumentRef, fields: &Fields, loader: &mut dyn Loader) -> Result<()> {
        (self.fns(target.type_name())?.reload)(target, fields, loader)
    }

    fn fns(&self, type_name: &str) -> Result<DocumentFns> {
        self.types
            .get(type_name)
            .and_then(|e| e.factory)
            .ok_or_else(|| Error::mapping(type_name, "no document factory registered"))
    }
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.types.keys().collect();
        names.sort();
        f.debug_struct("Metadata").field("types", &names).finish()
    }
}

/// Collects type registrations and validates them in [`build`](Self::build).
#[derive(Default)]
pub struct MetadataBuilder {
    entries: Vec<(&'static str, TypeEntry)>,
}

impl MetadataBuilder {
    /// Register a document type.
    #[must_use]
    pub fn document<T: Mapped>(mut self) -> Self {
        self.entries.push((
            T::TYPE_NAME,
            TypeEntry {
                mapping: T::mapping(),
                factory: Some(DocumentFns::of::<T>()),
            },
        ));
        self
    }

    /// Register an embedded type.
    #[must_use]
    pub fn embedded<E: Embedded>(mut self) -> Self {
        self.entries.push((
            E::TYPE_NAME,
            TypeEntry {
                mapping: E::mapping(),
                factory: None,
            },
        ));
        self
    }

    /// Validate all registrations.
    #[tracing::instrument(level = "debug", skip(self), fields(types = self.entries.len()))]
    pub fn build(self) -> Result<Metadata> {
        let mut types = HashMap::with_capacity(self.entries.len());
        for (declared, entry) in self.entries {
            validate_own(declared, &entry)?;
            if types.insert(declared, entry).is_some() {
                return Err(Error::mapping(declared, "type registered twice"));
            }
        }

        for entry in types.values() {
            for assoc in &entry.mapping.associations {
                validate_target(&entry.mapping, assoc, &types)?;
            }
        }

        tracing::debug!(types = types.len(), "Mapping metadata validated");
        Ok(Metadata { types })
    }
}

fn field_name_regex() -> Result<&'static Regex> {
    static FIELD_NAME: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    FIELD_NAME
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"))
        .as_ref()
        .map_err(|e| Error::custom(format!("field name pattern: {e}")))
}

fn validate_own(declared: &'static str, entry: &TypeEntry) -> Result<()> {
    let mapping = &entry.mapping;
    if mapping.type_name != declared {
        return Err(Error::mapping(
            declared,
            format!("mapping declares type name '{}'", mapping.type_name),
        ));
    }
    match (entry.factory.is_some(), mapping.kind) {
        (true, MappingKind::Embedded) => {
            return Err(Error::mapping(declared, "embedded mapping registered as a document"));
        }
        (false, MappingKind::Document) => {
            return Err(Error::mapping(declared, "document mapping registered as embedded"));
        }
        _ => {}
    }
    if mapping.kind == MappingKind::Document && mapping.identifier.is_none() {
        return Err(InvalidArgument::NoIdentifier {
            type_name: declared.to_string(),
        }
        .into());
    }

    let pattern = field_name_regex()?;
    let mut seen = HashSet::new();
    let names = mapping
        .identifier
        .into_iter()
        .chain(mapping.fields.iter().copied())
        .chain(mapping.associations.iter().map(|a| a.field));
    for name in names {
        if !pattern.is_match(name) {
            return Err(Error::mapping(declared, format!("invalid field name '{name}'")));
        }
        if !seen.insert(name) {
            return Err(Error::mapping(declared, format!("duplicate field '{name}'")));
        }
    }
    Ok(())
}

fn validate_target(
    source: &DocumentMapping,
    assoc: &Association,
    types: &HashMap<&'static str, TypeEntry>,
) -> Result<()> {
    let Some(target) = types.get(assoc.target_type) else {
        return Err(Error::mapping(
            source.type_name,
            format!(
                "association '{}' targets unregistered type '{}'",
                assoc.field, assoc.target_type
            ),
        ));
    };
    match assoc.kind {
        AssociationKind::Embed if !target.mapping.is_embedded() => Err(Error::mapping(
            source.type_name,
            format!("embedded association '{}' targets a document type", assoc.field),
        )),
        AssociationKind::Reference if target.mapping.is_embedded() => Err(Error::mapping(
            source.type_name,
            format!("reference association '{}' targets an embedded type", assoc.field),
        )),
        AssociationKind::Reference if source.is_embedded() => Err(Error::mapping(
            source.type_name,
            format!("embedded types cannot hold references ('{}')", assoc.field),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::value::Value;

    struct Post;
    struct Address;

    impl Document for Post {
        fn type_name(&self) -> &'static str {
            "Post"
        }
        fn identifier(&self) -> Option<Value> {
            None
        }
        fn set_identifier(&mut self, _id: Value) {}
        fn to_fields(&self) -> Fields {
            Fields::new()
        }
    }

    impl Mapped for Post {
        const TYPE_NAME: &'static str = "Post";

        fn mapping() -> DocumentMapping {
            DocumentMapping::document("Post")
                .identifier("id")
                .fields(&["title", "body"])
                .association(Association::embed_one("address", "Address"))
        }

        fn from_fields(_fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
            Ok(Post)
        }
    }

    impl Embedded for Address {
        const TYPE_NAME: &'static str = "Address";

        fn mapping() -> DocumentMapping {
            DocumentMapping::embedded("Address").field("city")
        }

        fn to_fields(&self) -> Fields {
            Fields::new()
        }

        fn from_fields(_fields: &Fields) -> Result<Self> {
            Ok(Address)
        }
    }

    fn check(mapping: DocumentMapping, is_document: bool) -> Result<()> {
        let declared = mapping.type_name;
        let entry = TypeEntry {
            mapping,
            factory: is_document.then(DocumentFns::of::<Post>),
        };
        validate_own(declared, &entry)
    }

    #[test]
    fn test_cascade_union() {
        let c = Cascade::PERSIST | Cascade::REMOVE;
        assert!(c.persist && c.remove);
        assert!(!c.detach && !c.merge && !c.refresh);
        assert_eq!(Cascade::NONE | Cascade::ALL, Cascade::ALL);
    }

    #[test]
    fn test_association_source_filled_in() {
        let m = DocumentMapping::document("Post")
            .association(Association::reference_one("author", "User").cascade(Cascade::PERSIST));
        let a = m.association_for("author").unwrap();
        assert_eq!(a.source_type, "Post");
        assert!(a.is_reference());
        assert!(a.cascade.persist);
        assert_eq!(m.reference_associations().count(), 1);
        assert_eq!(m.embed_associations().count(), 0);
    }

    #[test]
    fn test_build_accepts_valid_metadata() {
        let metadata = Metadata::builder()
            .document::<Post>()
            .embedded::<Address>()
            .build()
            .unwrap();
        assert!(metadata.contains("Post"));
        assert!(metadata.document("Post").is_ok());
        assert!(metadata.document("Address").is_err());
        assert!(metadata.document("Nope").is_err());
        assert!(!metadata.is_read_only("Post"));
    }

    #[test]
    fn test_missing_embedded_target_rejected() {
        let err = Metadata::builder().document::<Post>().build().unwrap_err();
        assert!(err.is_mapping());
        assert!(err.to_string().contains("unregistered type 'Address'"));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let err = Metadata::builder()
            .document::<Post>()
            .document::<Post>()
            .embedded::<Address>()
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn test_document_without_identifier() {
        let err = check(DocumentMapping::document("Post"), true).unwrap_err();
        assert!(matches!(
            err.as_invalid_argument(),
            Some(InvalidArgument::NoIdentifier { type_name }) if type_name == "Post"
        ));
    }

    #[test]
    fn test_invalid_and_duplicate_field_names() {
        let bad = DocumentMapping::document("Post").identifier("id").field("a.b");
        assert!(check(bad, true).unwrap_err().to_string().contains("invalid field name 'a.b'"));

        let bad = DocumentMapping::document("Post").identifier("id").field("$set");
        assert!(check(bad, true).is_err());

        let dup = DocumentMapping::document("Post")
            .identifier("id")
            .field("title")
            .association(Association::reference_one("title", "User"));
        assert!(check(dup, true).unwrap_err().to_string().contains("duplicate field 'title'"));
    }

    #[test]
    fn test_type_name_mismatch_rejected() {
        let entry = TypeEntry {
            mapping: DocumentMapping::document("Article").identifier("id"),
            factory: Some(DocumentFns::of::<Post>()),
        };
        assert!(validate_own("Post", &entry).is_err());
    }

    #[test]
    fn test_embedded_cannot_reference() {
        let mut types = HashMap::new();
        types.insert(
            "User",
            TypeEntry {
                mapping: DocumentMapping::document("User").identifier("id"),
                factory: Some(DocumentFns::of::<Post>()),
            },
        );
        let source = DocumentMapping::embedded("Address")
            .association(Association::reference_one("owner", "User"));
        let assoc = source.associations[0];
        let err = validate_target(&source, &assoc, &types).unwrap_err();
        assert!(err.to_string().contains("cannot hold references"));
    }
}
