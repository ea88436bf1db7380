//! Conversions between typed values and BSON documents, and diagnostic rendering.
//!
//! Providers work with raw [`bson::Document`] values. Concrete providers that map collections
//! onto typed models use [`to_document`] and [`from_document`] at their boundary.

use bson::{
    Bson, Document,
    de::deserialize_from_bson,
    ser::serialize_to_bson,
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ProviderError, ProviderResult};

/// Serializes `value` into a BSON document.
///
/// # Errors
///
/// Returns [`ProviderError::Serialization`] if serialization fails and
/// [`ProviderError::InvalidDocument`] if `value` does not serialize to a document
/// (e.g. a plain string or number).
pub fn to_document<T: Serialize>(value: &T) -> ProviderResult<Document> {
    match serialize_to_bson(value)? {
        Bson::Document(document) => Ok(document),
        other => Err(ProviderError::InvalidDocument(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
    }
}

/// Deserializes a BSON document into `T`.
pub fn from_document<T: DeserializeOwned>(document: Document) -> ProviderResult<T> {
    Ok(deserialize_from_bson(Bson::Document(document))?)
}

/// Renders a document as compact JSON for error messages, e.g. `{"name":"a"}`.
pub fn describe(document: &Document) -> String {
    serde_json::to_string(document).unwrap_or_else(|_| document.to_string())
}

/// Renders a sequence of documents as a compact JSON array.
pub fn describe_all(documents: &[Document]) -> String {
    serde_json::to_string(documents).unwrap_or_else(|_| {
        format!(
            "[{}]",
            documents
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        name: String,
        balance: i64,
    }

    #[test]
    fn typed_values_map_to_documents() {
        let account = Account { name: "a".into(), balance: 10 };

        let document = to_document(&account).unwrap();
        assert_eq!(document, doc! { "name": "a", "balance": 10_i64 });
        assert_eq!(from_document::<Account>(document).unwrap(), account);
    }

    #[test]
    fn scalars_are_not_documents() {
        assert!(matches!(to_document(&5_i32), Err(ProviderError::InvalidDocument(_))));
    }

    #[test]
    fn describe_renders_compact_json() {
        assert_eq!(describe(&doc! { "name": "a" }), r#"{"name":"a"}"#);
        assert_eq!(
            describe_all(&[doc! { "n": 1 }, doc! { "n": 2 }]),
            r#"[{"n":1},{"n":2}]"#
        );
    }
}
