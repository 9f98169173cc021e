//! Fixtures shared by the unit tests of this crate.

use docmodel_core::{
    Association, Cascade, ChangeSet, DocRef, Document, DocumentMapping, DocumentRef, Fields,
    Gateway, GatewayError, ID_FIELD, Loader, Mapped, Metadata, Result, Value,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
pub struct Author {
    pub id: Option<Value>,
    pub name: String,
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }
}

impl Document for Author {
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

impl Mapped for Author {
    const TYPE_NAME: &'static str = "Author";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document("Author").identifier("id").field("name")
    }
    fn from_fields(fields: &Fields, _loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            name: fields.get_as("name")?,
        })
    }
}

#[derive(Debug)]
pub struct Post {
    pub id: Option<Value>,
    pub title: String,
    pub author: Option<DocRef<Author>>,
}

impl Post {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            author: None,
        }
    }
}

impl Document for Post {
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
            _ => Vec::new(),
        }
    }
}

impl Mapped for Post {
    const TYPE_NAME: &'static str = "Post";
    fn mapping() -> DocumentMapping {
        DocumentMapping::document("Post")
            .identifier("id")
            .field("title")
            .association(Association::reference_one("author", "Author").cascade(Cascade::PERSIST))
    }
    fn from_fields(fields: &Fields, loader: &mut dyn Loader) -> Result<Self> {
        Ok(Self {
            id: fields.get(ID_FIELD).cloned(),
            title: fields.get_as("title")?,
            author: loader.reference::<Author>(fields, "author")?,
        })
    }
}

pub fn metadata() -> Arc<Metadata> {
    Arc::new(
        Metadata::builder()
            .document::<Author>()
            .document::<Post>()
            .build()
            .unwrap(),
    )
}

/// Minimal store that records the operations it receives.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    pub docs: HashMap<(String, String), Fields>,
    pub log: Vec<String>,
}

impl Gateway for RecordingGateway {
    fn insert(&mut self, type_name: &str, document: &Fields) -> Result<Option<Value>, GatewayError> {
        let id = document
            .get(ID_FIELD)
            .cloned()
            .ok_or_else(|| GatewayError::new("missing _id"))?;
        self.log.push(format!("insert {type_name} {id}"));
        self.docs
            .insert((type_name.to_string(), id.to_string()), document.clone());
        Ok(None)
    }

    fn update(&mut self, type_name: &str, id: &Value, changes: &ChangeSet) -> Result<(), GatewayError> {
        self.log.push(format!("update {type_name} {id}"));
        let doc = self
            .docs
            .get_mut(&(type_name.to_string(), id.to_string()))
            .ok_or_else(|| GatewayError::new("no such document"))?;
        for (name, change) in changes.iter() {
            doc.insert(name, change.new.clone());
        }
        Ok(())
    }

    fn delete(&mut self, type_name: &str, id: &Value) -> Result<(), GatewayError> {
        self.log.push(format!("delete {type_name} {id}"));
        self.docs.remove(&(type_name.to_string(), id.to_string()));
        Ok(())
    }

    fn find(&mut self, type_name: &str, id: &Value) -> Result<Option<Fields>, GatewayError> {
        Ok(self.docs.get(&(type_name.to_string(), id.to_string())).cloned())
    }
}
