//! Mapped types shared by the integration tests.

#![allow(dead_code)]

use docmodel::prelude::*;
use docmodel::{ChangeTracking, DocumentRef};

// ============================================================================
// Read-only documents and embedded values
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOnlyDocument {
    pub id: Option<Value>,
    pub name: String,
    pub numeric_value: i64,
}

impl ReadOnlyDocument {
    pub fn new(name: &str, numeric_value: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            numeric_value,
        }
    }
}

impl Document for ReadOnlyDocument {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("name", self.name.as_str())
            .with("numericValue", self.numeric_value)
    }
}

impl Mapped for ReadOnlyDocument {
    const TYPE_NAME: &'static str = "ReadOnlyDocument";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .fields(&["name", "numericValue"])
            .read_only(true)
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            name: fields.get_as("name")?,
            numeric_value: fields.get_as("numericValue")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadOnlyEmbedded {
    pub name: String,
    pub numeric_value: i64,
}

impl ReadOnlyEmbedded {
    pub fn new(name: &str, numeric_value: i64) -> Self {
        Self {
            name: name.to_string(),
            numeric_value,
        }
    }
}

impl Embedded for ReadOnlyEmbedded {
    const TYPE_NAME: &'static str = "ReadOnlyEmbedded";
    fn mapping() -> DocumentMapping {
        DocumentMapping::embedded(Self::TYPE_NAME)
            .fields(&["name", "numericValue"])
            .read_only(true)
    }
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("name", self.name.as_str())
            .with("numericValue", self.numeric_value)
    }
    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            name: fields.get_as("name")?,
            numeric_value: fields.get_as("numericValue")?,
        })
    }
}

/// Writable document embedding read-only values.
#[derive(Debug)]
pub struct Container {
    pub id: Option<Value>,
    pub label: String,
    pub embed_one: Option<ReadOnlyEmbedded>,
    pub embed_many: Vec<ReadOnlyEmbedded>,
}

impl Container {
    pub fn new(label: &str) -> Self {
        Self {
            id: None,
            label: label.to_string(),
            embed_one: None,
            embed_many: Vec::new(),
        }
    }
}

impl Document for Container {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new()
            .with("label", self.label.as_str())
            .with("embedOne", Value::embed_opt(self.embed_one.as_ref()))
            .with("embedMany", Value::embed_many(&self.embed_many))
    }
}

impl Mapped for Container {
    const TYPE_NAME: &'static str = "Container";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .field("label")
            .association(Association::embed_one("embedOne", ReadOnlyEmbedded::TYPE_NAME))
            .association(Association::embed_many("embedMany", ReadOnlyEmbedded::TYPE_NAME))
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            label: fields.get_as("label")?,
            embed_one: fields.embedded("embedOne")?,
            embed_many: fields.embedded_many("embedMany")?,
        })
    }
}

// ============================================================================
// Blog: references with cascades
// ============================================================================

#[derive(Debug)]
pub struct User {
    pub id: Option<Value>,
    pub username: String,
}

impl User {
    pub fn new(username: &str) -> Self {
        Self {
            id: None,
            username: username.to_string(),
        }
    }
}

impl Document for User {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new().with("username", self.username.as_str())
    }
    fn display_string(&self) -> Option<String> {
        Some(format!("user {}", self.username))
    }
}

impl Mapped for User {
    const TYPE_NAME: &'static str = "User";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .field("username")
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            username: fields.get_as("username")?,
        })
    }
}

#[derive(Debug)]
pub struct Comment {
    pub id: Option<Value>,
    pub body: String,
}

impl Comment {
    pub fn new(body: &str) -> Self {
        Self {
            id: None,
            body: body.to_string(),
        }
    }
}

impl Document for Comment {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new().with("body", self.body.as_str())
    }
}

impl Mapped for Comment {
    const TYPE_NAME: &'static str = "Comment";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .field("body")
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            body: fields.get_as("body")?,
        })
    }
}

#[derive(Debug)]
pub struct Tag {
    pub id: Option<Value>,
    pub name: String,
}

impl Tag {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

impl Document for Tag {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new().with("name", self.name.as_str())
    }
}

impl Mapped for Tag {
    const TYPE_NAME: &'static str = "Tag";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .field("name")
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            name: fields.get_as("name")?,
        })
    }
}

/// `author` cascades persist, `comments` cascade everything, `tags` nothing.
#[derive(Debug)]
pub struct BlogPost {
    pub id: Option<Value>,
    pub title: String,
    pub author: Option<DocRef<User>>,
    pub comments: Vec<DocRef<Comment>>,
    pub tags: Vec<DocRef<Tag>>,
}

impl BlogPost {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            author: None,
            comments: Vec::new(),
            tags: Vec::new(),
        }
    }
}

impl Document for BlogPost {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new().with("title", self.title.as_str())
    }
    fn references(&self, field: &str) -> Vec<DocumentRef> {
        match field {
            "author" => self.author.iter().map(DocumentRef::new).collect(),
            "comments" => self.comments.iter().map(DocumentRef::new).collect(),
            "tags" => self.tags.iter().map(DocumentRef::new).collect(),
            _ => Vec::new(),
        }
    }
}

impl Mapped for BlogPost {
    const TYPE_NAME: &'static str = "BlogPost";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .field("title")
            .association(Association::reference_one("author", User::TYPE_NAME).cascade(Cascade::PERSIST))
            .association(Association::reference_many("comments", Comment::TYPE_NAME).cascade(Cascade::ALL))
            .association(Association::reference_many("tags", Tag::TYPE_NAME))
    }
    fn from_fields(fields: &Fields, loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            title: fields.get_as("title")?,
            author: loader.reference::<User>(fields, "author")?,
            comments: loader.references::<Comment>(fields, "comments")?,
            tags: loader.references::<Tag>(fields, "tags")?,
        })
    }
}

// ============================================================================
// Identity strategies and tracking policies
// ============================================================================

/// Caller-assigned identity.
#[derive(Debug)]
pub struct Account {
    pub id: Option<Value>,
    pub owner: String,
}

impl Account {
    pub fn new(owner: &str) -> Self {
        Self {
            id: None,
            owner: owner.to_string(),
        }
    }

    pub fn with_id(id: &str, owner: &str) -> Self {
        Self {
            id: Some(Value::from(id)),
            owner: owner.to_string(),
        }
    }
}

impl Document for Account {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new().with("owner", self.owner.as_str())
    }
}

impl Mapped for Account {
    const TYPE_NAME: &'static str = "Account";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .id_strategy(IdStrategy::Assigned)
            .field("owner")
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            owner: fields.get_as("owner")?,
        })
    }
}

/// Linked node whose identity is assigned by the store.
#[derive(Debug)]
pub struct Node {
    pub id: Option<Value>,
    pub name: String,
    pub next: Option<DocRef<Node>>,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            next: None,
        }
    }
}

impl Document for Node {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new().with("name", self.name.as_str())
    }
    fn references(&self, field: &str) -> Vec<DocumentRef> {
        match field {
            "next" => self.next.iter().map(DocumentRef::new).collect(),
            _ => Vec::new(),
        }
    }
}

impl Mapped for Node {
    const TYPE_NAME: &'static str = "Node";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .id_strategy(IdStrategy::Gateway)
            .field("name")
            .association(
                Association::reference_one("next", Self::TYPE_NAME)
                    .cascade(Cascade::PERSIST | Cascade::REMOVE),
            )
    }
    fn from_fields(fields: &Fields, loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            name: fields.get_as("name")?,
            next: loader.reference::<Node>(fields, "next")?,
        })
    }
}

/// Only written when explicitly persisted again.
#[derive(Debug)]
pub struct Setting {
    pub id: Option<Value>,
    pub value: String,
}

impl Setting {
    pub fn new(value: &str) -> Self {
        Self {
            id: None,
            value: value.to_string(),
        }
    }
}

impl Document for Setting {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
    fn identifier(&self) -> Option<Value> {
        self.id.clone()
    }
    fn set_identifier(&mut self, id: Value) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Fields {
        Fields::new().with("value", self.value.as_str())
    }
}

impl Mapped for Setting {
    const TYPE_NAME: &'static str = "Setting";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document(Self::TYPE_NAME)
            .identifier("id")
            .field("value")
            .change_tracking(ChangeTracking::DeferredExplicit)
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            value: fields.get_as("value")?,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn metadata() -> Arc<Metadata> {
    Arc::new(
        Metadata::builder()
            .document::<ReadOnlyDocument>()
            .embedded::<ReadOnlyEmbedded>()
            .document::<Container>()
            .document::<User>()
            .document::<Comment>()
            .document::<Tag>()
            .document::<BlogPost>()
            .document::<Account>()
            .document::<Node>()
            .document::<Setting>()
            .build()
            .expect("test metadata is valid"),
    )
}

pub fn session() -> Session<MemoryGateway> {
    Session::new(MemoryGateway::new(), metadata())
}

pub fn id_of<T: Document>(doc: &DocRef<T>) -> Value {
    doc.borrow().identifier().expect("document has an identity")
}
