//! Error types for the checklist core library.

use thiserror::Error;

/// All errors that can occur within the checklist core library.
#[derive(Debug, Error)]
pub enum ChecklistError {
    /// A loaded checklist has no `lastSave` token and cannot be trusted.
    #[error("Checklist has no lastSave timestamp: {0}")]
    MissingTimestamp(String),

    /// A positional path no longer points at an item.
    #[error("Path does not resolve: {0}")]
    PathNotFound(String),

    /// The remote copy changed since this session loaded it.
    #[error("Save conflict: local baseline {local:?}, remote {remote:?}")]
    SaveConflict {
        local: Option<String>,
        remote: Option<String>,
    },

    /// A request to the blob store failed or returned a non-success status.
    #[error("Network error: {0}")]
    Network(String),

    /// The blob store has no document at the requested path.
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// A field definition is malformed.
    #[error("Invalid field definition: {0}")]
    FieldDefinitionInvalid(String),

    /// An external option source could not be imported.
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// A value does not fit the field it was written to.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A layout name was requested that the checklist does not have.
    #[error("Layout not found: {0}")]
    LayoutNotFound(String),

    /// An operation needs a loaded checklist but the session has none.
    #[error("No checklist is loaded")]
    NoChecklistLoaded,

    /// A user id was requested that does not exist in the users config.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// A user with the same username already exists.
    #[error("Duplicate user: {0}")]
    DuplicateUser(String),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be (de)serialized as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias that pins the error type to [`ChecklistError`].
pub type Result<T> = std::result::Result<T, ChecklistError>;

impl ChecklistError {
    /// Returns a short, human-readable message suitable for a notification toast.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingTimestamp(_) => {
                "This checklist is missing its save timestamp and cannot be opened".to_string()
            }
            Self::PathNotFound(_) => "The selected item no longer exists".to_string(),
            Self::SaveConflict { .. } => {
                "Someone else saved this checklist since you opened it".to_string()
            }
            Self::Network(e) => format!("Network error: {e}"),
            Self::BlobNotFound(path) => format!("File not found: {path}"),
            Self::FieldDefinitionInvalid(msg) => format!("Field definition error: {msg}"),
            Self::InvalidSource(msg) => format!("Could not import source: {msg}"),
            Self::ValidationFailed(msg) => msg.clone(),
            Self::LayoutNotFound(name) => format!("Layout '{name}' does not exist"),
            Self::NoChecklistLoaded => "Open or create a checklist first".to_string(),
            Self::UserNotFound(id) => format!("Unknown user: {id}"),
            Self::DuplicateUser(name) => format!("User '{name}' already exists"),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
        }
    }
}
