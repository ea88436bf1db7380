//! Index declarations for provider collections.
//!
//! A provider declares its indexes once, as an ordered list of [`IndexSpec`] values. The
//! provider ensures them in declaration order when it is built.

use std::time::Duration;

use bson::{Bson, Document};

/// Options applied when creating an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Explicit index name. When `None` the name is derived from the key pattern.
    pub name: Option<String>,
    /// Whether the index enforces uniqueness of the indexed key.
    pub unique: bool,
    /// Whether documents lacking the indexed fields are left out of the index.
    pub sparse: bool,
    /// Whether the index is built in the background.
    pub background: bool,
    /// Time-to-live for documents indexed on a date field.
    pub expire_after: Option<Duration>,
}

/// A single `(key pattern, options)` pair declared by a provider.
///
/// # Example
///
/// ```ignore
/// use bson::doc;
/// use docprovider_core::index::IndexSpec;
///
/// let by_email = IndexSpec::new(doc! { "email": 1 }).unique();
/// assert_eq!(by_email.resolved_name(), "email_1");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// The key pattern, e.g. `{ "name": 1, "created": -1 }`.
    pub keys: Document,
    /// Creation options.
    pub options: IndexOptions,
}

impl IndexSpec {
    /// Creates an index specification with default options.
    pub fn new(keys: Document) -> Self {
        Self { keys, options: IndexOptions::default() }
    }

    /// Creates an index specification with explicit options.
    pub fn with_options(keys: Document, options: IndexOptions) -> Self {
        Self { keys, options }
    }

    /// Marks the index as unique.
    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    /// Marks the index as sparse.
    pub fn sparse(mut self) -> Self {
        self.options.sparse = true;
        self
    }

    /// Sets an explicit index name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Sets a time-to-live for documents covered by the index.
    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.options.expire_after = Some(ttl);
        self
    }

    /// Returns the explicit name, or the name MongoDB would generate for the key pattern.
    pub fn resolved_name(&self) -> String {
        self.options
            .name
            .clone()
            .unwrap_or_else(|| default_index_name(&self.keys))
    }
}

/// Builds the default name for a key pattern: each `field_direction` pair joined by `_`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Bson::Int32(value) => value.to_string(),
                Bson::Int64(value) => value.to_string(),
                Bson::Double(value) => (*value as i64).to_string(),
                Bson::String(value) => value.clone(),
                other => other.to_string(),
            };
            format!("{field}_{direction}")
        })
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn default_names_follow_key_order() {
        assert_eq!(default_index_name(&doc! { "name": 1, "created": -1 }), "name_1_created_-1");
        assert_eq!(default_index_name(&doc! { "body": "text" }), "body_text");
    }

    #[test]
    fn explicit_name_wins() {
        let spec = IndexSpec::new(doc! { "email": 1 }).unique().name("by_email");

        assert_eq!(spec.resolved_name(), "by_email");
        assert!(spec.options.unique);
        assert!(!spec.options.sparse);
    }
}
