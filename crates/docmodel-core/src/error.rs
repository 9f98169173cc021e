//! Error types for docmodel operations.

use thiserror::Error;

/// Result type for docmodel operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The primary error type for all docmodel operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A lifecycle contract was violated by the caller. Never retryable.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    /// The persistence gateway failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Mapping metadata is inconsistent.
    #[error("mapping error for {type_name}: {message}")]
    Mapping { type_name: String, message: String },

    /// A stored document could not be converted back into an object.
    #[error("hydration error on field '{field}': {message}")]
    Hydration { field: String, message: String },

    /// A second object claims an identity already managed in the session.
    #[error("{type_name} with identity {id} is already managed by another object")]
    DuplicateIdentity { type_name: String, id: String },

    /// A managed document no longer exists in the store.
    #[error("{type_name} with identity {id} does not exist in the store")]
    NotFound { type_name: String, id: String },

    /// A session callback aborted the operation.
    #[error("{event} callback failed: {message}")]
    Event { event: &'static str, message: String },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Create a mapping error.
    pub fn mapping(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Create a hydration error.
    pub fn hydration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hydration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate identity error.
    pub fn duplicate_identity(type_name: impl Into<String>, id: &crate::Value) -> Self {
        Self::DuplicateIdentity {
            type_name: type_name.into(),
            id: id.to_string(),
        }
    }

    /// Create a not found error.
    pub fn not_found(type_name: impl Into<String>, id: &crate::Value) -> Self {
        Self::NotFound {
            type_name: type_name.into(),
            id: id.to_string(),
        }
    }

    /// Create an event error.
    pub fn event(event: &'static str, message: impl Into<String>) -> Self {
        Self::Event {
            event,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a custom error.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Check if this is a lifecycle contract violation.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Check if this is a gateway failure.
    pub fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }

    /// Check if this is a mapping error.
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping { .. })
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The invalid-argument detail, if this is one.
    pub fn as_invalid_argument(&self) -> Option<&InvalidArgument> {
        match self {
            Self::InvalidArgument(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

fn display_hint(has_display: &bool, target_type: &str) -> String {
    if *has_display {
        String::new()
    } else {
        format!(
            " If you cannot find out which document causes the problem implement \
             '{target_type}::display_string()' to get a clue."
        )
    }
}

/// Lifecycle contract violations.
///
/// Every variant carries the offending object's string form: its
/// `display_string()` when the type provides one, otherwise `Type@<hash>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidArgument {
    #[error("A managed+dirty document {document} can not be scheduled for insertion.")]
    ScheduleInsertForManagedDirty { document: String },

    #[error("Removed document {document} can not be scheduled for insertion.")]
    ScheduleInsertForRemoved { document: String },

    #[error("Document {document} can not be scheduled for insertion twice.")]
    ScheduleInsertTwice { document: String },

    #[error("Dirty document {document} cannot be scheduled for insertion.")]
    DirtyDocumentScheduledForInsert { document: String },

    #[error(
        "A new document was found through the relationship '{source_type}#{field}' that was not \
         configured to cascade persist operations for document: {document}. To solve this issue: \
         Either explicitly call Session::persist() on this unknown document or configure cascade \
         persist on this association in the mapping, for example \
         Association::reference_one(..).cascade(Cascade::PERSIST).{}",
        display_hint(.has_display, .target_type)
    )]
    NewDocumentFoundThroughRelationship {
        source_type: String,
        field: String,
        target_type: String,
        document: String,
        has_display: bool,
    },

    #[error(
        "A detached document of type {target_type} ({document}) was found through the \
         relationship '{source_type}#{field}' during cascading a {operation} operation."
    )]
    DetachedDocumentFoundThroughRelationship {
        source_type: String,
        field: String,
        target_type: String,
        document: String,
        operation: String,
    },

    #[error(
        "Document {document} is not managed. A document is managed if it is fetched from the \
         database or registered as new through Session::persist()"
    )]
    DocumentNotManaged { document: String },

    #[error("Document has no identity, therefore {operation} cannot be performed. {document}")]
    DocumentHasNoIdentity { document: String, operation: String },

    #[error("Document is removed, therefore {operation} cannot be performed. {document}")]
    DocumentIsRemoved { document: String, operation: String },

    #[error("A detached document was found during {operation} {document}")]
    DetachedDocumentCannot { document: String, operation: String },

    #[error("{context} expects a {expected} document, {given} given.")]
    InvalidObject {
        context: String,
        expected: String,
        given: String,
    },

    #[error(
        "Document has to be managed or scheduled for removal for single computation {document}"
    )]
    InvalidSingleDocumentFlush { document: String },

    #[error("Type \"{type_name}\" does not have an identifier.")]
    NoIdentifier { type_name: String },

    #[error(
        "Cannot create a DBRef without an identifier. No identifier is known for {document}"
    )]
    CannotCreateDocumentDbRef { document: String },
}

impl InvalidArgument {
    /// Short stable name of the violation, suitable for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScheduleInsertForManagedDirty { .. } => "schedule_insert_for_managed_dirty",
            Self::ScheduleInsertForRemoved { .. } => "schedule_insert_for_removed",
            Self::ScheduleInsertTwice { .. } => "schedule_insert_twice",
            Self::DirtyDocumentScheduledForInsert { .. } => "dirty_document_scheduled_for_insert",
            Self::NewDocumentFoundThroughRelationship { .. } => {
                "new_document_found_through_relationship"
            }
            Self::DetachedDocumentFoundThroughRelationship { .. } => {
                "detached_document_found_through_relationship"
            }
            Self::DocumentNotManaged { .. } => "document_not_managed",
            Self::DocumentHasNoIdentity { .. } => "document_has_no_identity",
            Self::DocumentIsRemoved { .. } => "document_is_removed",
            Self::DetachedDocumentCannot { .. } => "detached_document_cannot",
            Self::InvalidObject { .. } => "invalid_object",
            Self::InvalidSingleDocumentFlush { .. } => "invalid_single_document_flush",
            Self::NoIdentifier { .. } => "no_identifier",
            Self::CannotCreateDocumentDbRef { .. } => "cannot_create_document_dbref",
        }
    }
}

/// An opaque failure reported by the persistence gateway.
#[derive(Error, Debug)]
#[error("gateway error: {message}")]
pub struct GatewayError {
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GatewayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
