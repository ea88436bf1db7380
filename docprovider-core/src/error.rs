//! Error types and result types for provider operations.
//!
//! Every provider operation completes with a single [`ProviderResult<T>`]: either the value or
//! a [`ProviderError`], never both. Driver failures are carried in [`ProviderError::Backend`]
//! with the driver's message unchanged; "nothing matched" outcomes of singular or must-match
//! operations are synthesized by the provider and embed the serialized request.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when working with a provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider was configured with an invalid collection name or index specification.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Error during connection or provider setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A strict-mode collection lookup found no collection with this name.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document, condition or update has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// Serialization/deserialization error when converting between BSON, JSON and typed values.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error reported by the underlying connection or driver.
    #[error("Backend error: {0}")]
    Backend(String),
    /// A singular read matched no document. Carries the serialized conditions.
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    /// An insert reported no inserted document. Carries the serialized payload.
    #[error("documents not created: {0}")]
    DocumentsNotCreated(String),
    /// A multi-document update matched nothing. Carries the serialized conditions.
    #[error("documents not updated: {0}")]
    DocumentsNotUpdated(String),
    /// A single-document update matched nothing. Carries the serialized conditions.
    #[error("document not updated: {0}")]
    DocumentNotUpdated(String),
    /// A find-and-update matched nothing. Carries the serialized conditions.
    #[error("document not found/updated: {0}")]
    DocumentNotFoundOrUpdated(String),
    /// A multi-document removal matched nothing. Carries the serialized conditions.
    #[error("documents not removed: {0}")]
    DocumentsNotRemoved(String),
    /// A find-and-remove matched nothing. Carries the serialized conditions.
    #[error("document not found/removed: {0}")]
    DocumentNotFoundOrRemoved(String),
}

impl ProviderError {
    /// Returns `true` for the errors synthesized when an operation matched or affected nothing.
    ///
    /// Driver, configuration and serialization failures return `false`.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::DocumentNotFound(_)
                | ProviderError::DocumentsNotCreated(_)
                | ProviderError::DocumentsNotUpdated(_)
                | ProviderError::DocumentNotUpdated(_)
                | ProviderError::DocumentNotFoundOrUpdated(_)
                | ProviderError::DocumentsNotRemoved(_)
                | ProviderError::DocumentNotFoundOrRemoved(_)
        )
    }
}

/// A specialized `Result` type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

impl From<BsonError> for ProviderError {
    fn from(err: BsonError) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for ProviderError {
    fn from(err: SerdeJsonError) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_messages_embed_the_request() {
        let err = ProviderError::DocumentsNotUpdated(r#"{"name":"a"}"#.to_string());

        assert_eq!(err.to_string(), r#"documents not updated: {"name":"a"}"#);
        assert!(err.is_not_found());
    }

    #[test]
    fn driver_errors_are_not_classified_as_not_found() {
        assert!(!ProviderError::Backend("connection reset".into()).is_not_found());
        assert!(!ProviderError::CollectionNotFound("users".into()).is_not_found());
    }
}
