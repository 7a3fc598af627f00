//! Error types and result types for document mapping and persistence.
//!
//! Declaration-time problems surface as [`DocumentStoreError::Configuration`] and are never
//! retried. Value problems are collected into a recursive [`ValidationError`] before any
//! write happens. Everything else is recoverable by the caller.

use std::{collections::BTreeMap, fmt};

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised while declaring, validating, loading or persisting documents.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// A class declaration is invalid (bad storage key, illegal inheritance, wrong target kind).
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// One or more field values violate their descriptors.
    #[error("{0}")]
    Validation(#[from] ValidationError),
    /// A discriminator path or class name is not present in the registry.
    #[error("Class not registered: {0}")]
    NotRegistered(String),
    /// A referenced or requested document no longer exists.
    /// The first argument is the class name, the second is the identity.
    #[error("{0} matching {1} does not exist")]
    DoesNotExist(String, String),
    /// A lookup expected one document and matched several.
    #[error("{0}")]
    MultipleObjectsReturned(String),
    /// An operation is not allowed in the current state (abstract class, deleted document, shard key change).
    #[error("Operation error: {0}")]
    Operation(String),
    /// A uniqueness constraint was violated by the storage layer.
    #[error("Tried to save duplicate unique keys: {0}")]
    NotUnique(String),
    /// A value was given for a field the class does not declare.
    #[error("The field '{field}' does not exist on the document '{class}'")]
    UnknownField {
        /// The class that was being populated.
        class: String,
        /// The offending field name.
        field: String,
    },
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A stored document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for document operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

/// A recursive validation failure.
///
/// Leaf errors carry only a message. Aggregate errors carry child errors keyed by field
/// name, list index or map key, mirroring the shape of the document that failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct ValidationError {
    message: String,
    errors: BTreeMap<String, ValidationError>,
}

impl ValidationError {
    /// Creates a leaf error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: BTreeMap::new(),
        }
    }

    /// Creates an aggregate error from child errors.
    pub fn with_errors(message: impl Into<String>, errors: BTreeMap<String, ValidationError>) -> Self {
        Self {
            message: message.into(),
            errors,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Child errors keyed by field name, index or map key.
    pub fn errors(&self) -> &BTreeMap<String, ValidationError> {
        &self.errors
    }

    /// Returns the child error stored under `key`.
    pub fn get(&self, key: &str) -> Option<&ValidationError> {
        self.errors.get(key)
    }

    /// Walks a dotted path of child keys, e.g. `"comments.1.content"`.
    pub fn at(&self, path: &str) -> Option<&ValidationError> {
        path.split('.')
            .try_fold(self, |error, key| error.errors.get(key))
    }

    pub fn is_leaf(&self) -> bool {
        self.errors.is_empty()
    }

    /// Renders the error tree as nested JSON: leaves become their message, inner nodes objects.
    pub fn to_dict(&self) -> serde_json::Value {
        if self.errors.is_empty() {
            return serde_json::Value::String(self.message.clone());
        }

        serde_json::Value::Object(
            self.errors
                .iter()
                .map(|(key, error)| (key.clone(), error.to_dict()))
                .collect()
        )
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "{}", self.message);
        }

        let keys = self.errors
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");

        write!(f, "{} ({})", self.message, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_errors_render_as_tree() {
        let content = ValidationError::with_errors(
            "Invalid embedded document",
            BTreeMap::from([("content".to_string(), ValidationError::new("Field is required"))]),
        );
        let comments = ValidationError::with_errors(
            "Invalid list",
            BTreeMap::from([("1".to_string(), content)]),
        );
        let error = ValidationError::with_errors(
            "ValidationError (Post)",
            BTreeMap::from([("comments".to_string(), comments)]),
        );

        assert_eq!(
            error.at("comments.1.content").map(ValidationError::message),
            Some("Field is required"),
        );
        assert_eq!(
            error.to_dict(),
            serde_json::json!({ "comments": { "1": { "content": "Field is required" } } }),
        );
        assert!(error.to_string().contains("comments"));
    }
}
