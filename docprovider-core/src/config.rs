//! Per-provider configuration.
//!
//! Every provider targets exactly one collection and may declare indexes for it. The
//! configuration is fixed when the provider is defined and validated when it is built.

use crate::{
    error::{ProviderError, ProviderResult},
    index::IndexSpec,
};

/// Static declaration of a concrete provider's collection and indexes.
///
/// # Example
///
/// ```ignore
/// use bson::doc;
/// use docprovider_core::{config::ProviderDefinition, index::IndexSpec};
///
/// struct Users;
///
/// impl ProviderDefinition for Users {
///     const COLLECTION: &'static str = "users";
///
///     fn indexes() -> Vec<IndexSpec> {
///         vec![IndexSpec::new(doc! { "email": 1 }).unique()]
///     }
/// }
/// ```
pub trait ProviderDefinition {
    /// Name of the target collection.
    const COLLECTION: &'static str;

    /// Indexes to ensure, in creation order. Defaults to none.
    fn indexes() -> Vec<IndexSpec> {
        Vec::new()
    }
}

/// Collection name and index declarations for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    collection: String,
    indexes: Vec<IndexSpec>,
}

impl ProviderConfig {
    /// Creates a configuration for `collection` with no indexes.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            indexes: Vec::new(),
        }
    }

    /// Reads the configuration declared by `D`.
    pub fn of<D: ProviderDefinition>() -> Self {
        Self {
            collection: D::COLLECTION.to_string(),
            indexes: D::indexes(),
        }
    }

    /// Appends an index declaration.
    pub fn index(mut self, spec: IndexSpec) -> Self {
        self.indexes.push(spec);
        self
    }

    /// Appends several index declarations, keeping their order.
    pub fn indexes(mut self, specs: impl IntoIterator<Item = IndexSpec>) -> Self {
        self.indexes.extend(specs);
        self
    }

    /// The target collection name.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// The declared indexes, in creation order.
    pub fn index_specs(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Checks the collection name and index declarations.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] when the collection name is blank or contains
    /// `$` or a NUL byte, or when an index has an empty key pattern.
    pub fn validate(&self) -> ProviderResult<()> {
        if self.collection.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "collection name must be set".to_string(),
            ));
        }

        if self.collection.contains('$') || self.collection.contains('\0') {
            return Err(ProviderError::Configuration(format!(
                "invalid collection name {:?}",
                self.collection
            )));
        }

        if let Some(position) = self.indexes.iter().position(|spec| spec.keys.is_empty()) {
            return Err(ProviderError::Configuration(format!(
                "index #{position} on {} has an empty key pattern",
                self.collection
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    struct Sessions;

    impl ProviderDefinition for Sessions {
        const COLLECTION: &'static str = "sessions";

        fn indexes() -> Vec<IndexSpec> {
            vec![
                IndexSpec::new(doc! { "token": 1 }).unique(),
                IndexSpec::new(doc! { "user": 1, "created": -1 }),
            ]
        }
    }

    #[test]
    fn definition_supplies_name_and_ordered_indexes() {
        let config = ProviderConfig::of::<Sessions>();

        assert_eq!(config.collection_name(), "sessions");
        assert_eq!(
            config
                .index_specs()
                .iter()
                .map(IndexSpec::resolved_name)
                .collect::<Vec<_>>(),
            vec!["token_1", "user_1_created_-1"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_collection_name_fails_fast() {
        assert!(matches!(
            ProviderConfig::new("  ").validate(),
            Err(ProviderError::Configuration(_))
        ));
        assert!(matches!(
            ProviderConfig::new("bad$name").validate(),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[test]
    fn empty_key_pattern_is_rejected() {
        let config = ProviderConfig::new("things")
            .index(IndexSpec::new(doc! { "a": 1 }))
            .index(IndexSpec::new(doc! {}));

        assert!(matches!(config.validate(), Err(ProviderError::Configuration(_))));
    }
}
