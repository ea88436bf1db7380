//! In-memory connection and collection handles.
//!
//! Collections keep documents in insertion order inside an async-aware read-write lock.
//! Every collection carries the implicit `_id_` unique index; further indexes are only used
//! to enforce uniqueness, as queries always scan.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;

use docprovider_core::{
    connection::{
        AggregateOptions, CollectionHandle, CollectionOptions, Connection, ConnectionBuilder,
        UpdateOptions, UpdateOutcome,
    },
    document::describe,
    error::{ProviderError, ProviderResult},
    index::{IndexOptions, default_index_name},
};

use crate::{matcher, path, pipeline, update, value};

type StoreMap = HashMap<String, StoredCollection>;

/// Description of an index held by an in-memory collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexInfo {
    fn primary() -> Self {
        Self {
            name: "_id_".to_string(),
            keys: bson::doc! { "_id": 1 },
            unique: true,
            sparse: false,
        }
    }

    /// The indexed values of `document`, or `None` when a sparse index skips it.
    fn key_of(&self, document: &Document) -> Option<Vec<Bson>> {
        let values = self
            .keys
            .keys()
            .map(|field| path::get(document, field).cloned())
            .collect::<Vec<_>>();

        if self.sparse && values.iter().all(Option::is_none) {
            return None;
        }

        Some(values.into_iter().map(|value| value.unwrap_or(Bson::Null)).collect())
    }
}

#[derive(Debug)]
struct StoredCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

impl Default for StoredCollection {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexInfo::primary()],
        }
    }
}

impl StoredCollection {
    /// Positions of matching documents, stopping at the first one when `first_only` is set.
    fn positions(&self, conditions: &Document, first_only: bool) -> ProviderResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (position, document) in self.documents.iter().enumerate() {
            if matcher::matches(document, conditions)? {
                positions.push(position);
                if first_only {
                    break;
                }
            }
        }

        Ok(positions)
    }

    /// Fails when `candidate` collides with a stored document (other than the one at `skip`)
    /// on any unique index.
    fn check_unique(
        &self,
        collection: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> ProviderResult<()> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            self.check_index(collection, index, candidate, skip)?;
        }

        Ok(())
    }

    /// Updates the documents at `positions` one after another, so each result is checked
    /// against the ones before it. On failure every document is restored. Returns how many
    /// documents changed.
    fn apply_each(
        &mut self,
        collection: &str,
        positions: &[usize],
        update: &Document,
    ) -> ProviderResult<u64> {
        let mut originals = Vec::new();

        for &position in positions {
            match self.apply_at(collection, position, update) {
                Ok(Some(original)) => originals.push((position, original)),
                Ok(None) => {}
                Err(err) => {
                    for (position, original) in originals {
                        self.documents[position] = original;
                    }
                    return Err(err);
                }
            }
        }

        Ok(originals.len() as u64)
    }

    /// Replaces the document at `position` with its updated form, returning the original
    /// when anything changed.
    fn apply_at(
        &mut self,
        collection: &str,
        position: usize,
        update: &Document,
    ) -> ProviderResult<Option<Document>> {
        let mut updated = self.documents[position].clone();
        update::apply(&mut updated, update)?;

        if updated == self.documents[position] {
            return Ok(None);
        }

        self.check_unique(collection, &updated, Some(position))?;
        Ok(Some(std::mem::replace(&mut self.documents[position], updated)))
    }

    fn check_index(
        &self,
        collection: &str,
        index: &IndexInfo,
        candidate: &Document,
        skip: Option<usize>,
    ) -> ProviderResult<()> {
        let Some(key) = index.key_of(candidate) else {
            return Ok(());
        };

        let duplicate = self
            .documents
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .filter_map(|(_, document)| index.key_of(document))
            .any(|other| {
                other
                    .iter()
                    .zip(&key)
                    .all(|(left, right)| value::equals(left, right))
            });

        if duplicate {
            let mut dup_key = Document::new();
            for (field, value) in index.keys.keys().zip(key) {
                dup_key.insert(field.clone(), value);
            }

            return Err(ProviderError::Backend(format!(
                "E11000 duplicate key error collection: {collection} index: {} dup key: {}",
                index.name,
                describe(&dup_key)
            )));
        }

        Ok(())
    }
}

/// Gives a document a fresh `ObjectId` as its first field when it has no `_id`.
fn with_id(document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }

    let mut identified = Document::new();
    identified.insert("_id", ObjectId::new());
    for (key, value) in document {
        identified.insert(key, value);
    }
    identified
}

/// Thread-safe in-memory connection.
///
/// Clones share the same collections, so one connection can back any number of providers.
/// Collections must exist before a provider touches them in strict mode: create them with
/// [`create_collection`](Self::create_collection), through the builder, or by acquiring a
/// lenient handle.
///
/// # Example
///
/// ```ignore
/// use docprovider_memory::InMemoryConnection;
///
/// let connection = InMemoryConnection::new();
/// connection.create_collection("users").await?;
/// assert_eq!(connection.list_collections().await?, vec!["users"]);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryConnection {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryConnection {
    /// Creates a connection with no collections.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder that can pre-create collections.
    pub fn builder() -> InMemoryConnectionBuilder {
        InMemoryConnectionBuilder::default()
    }

    /// Creates the collection if it does not exist yet.
    pub async fn create_collection(&self, name: &str) -> ProviderResult<()> {
        let mut store = self.store.write().await;

        if !store.contains_key(name) {
            store.insert(name.to_string(), StoredCollection::default());
            tracing::debug!(collection = name, "collection created");
        }

        Ok(())
    }

    /// Drops a collection with its documents and indexes.
    pub async fn drop_collection(&self, name: &str) -> ProviderResult<()> {
        if self.store.write().await.remove(name).is_none() {
            return Err(ProviderError::CollectionNotFound(name.to_string()));
        }

        tracing::debug!(collection = name, "collection dropped");
        Ok(())
    }

    /// Lists collection names in lexical order.
    pub async fn list_collections(&self) -> ProviderResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();

        names.sort();
        Ok(names)
    }

    /// Lists the indexes of a collection in creation order, starting with `_id_`.
    pub async fn list_indexes(&self, name: &str) -> ProviderResult<Vec<IndexInfo>> {
        self.store
            .read()
            .await
            .get(name)
            .map(|collection| collection.indexes.clone())
            .ok_or_else(|| ProviderError::CollectionNotFound(name.to_string()))
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    type Collection = InMemoryCollection;

    async fn collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> ProviderResult<InMemoryCollection> {
        if !options.strict {
            self.create_collection(name).await?;
        } else if !self.store.read().await.contains_key(name) {
            return Err(ProviderError::CollectionNotFound(name.to_string()));
        }

        Ok(InMemoryCollection {
            name: name.to_string(),
            store: Arc::clone(&self.store),
        })
    }
}

/// Handle on one in-memory collection.
///
/// Operations fail with [`ProviderError::CollectionNotFound`] if the collection was dropped
/// after the handle was acquired.
#[derive(Clone, Debug)]
pub struct InMemoryCollection {
    name: String,
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn missing(&self) -> ProviderError {
        ProviderError::CollectionNotFound(self.name.clone())
    }
}

#[async_trait]
impl CollectionHandle for InMemoryCollection {
    async fn find(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Vec<Document>> {
        let store = self.store.read().await;
        let collection = store.get(&self.name).ok_or_else(|| self.missing())?;

        collection
            .positions(&conditions, false)?
            .into_iter()
            .map(|position| {
                let document = &collection.documents[position];
                match &projection {
                    Some(projection) => pipeline::project(document, projection),
                    None => Ok(document.clone()),
                }
            })
            .collect()
    }

    async fn find_one(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Option<Document>> {
        let store = self.store.read().await;
        let collection = store.get(&self.name).ok_or_else(|| self.missing())?;

        let Some(position) = collection.positions(&conditions, true)?.first().copied() else {
            return Ok(None);
        };
        let document = &collection.documents[position];

        match projection {
            Some(projection) => pipeline::project(document, &projection).map(Some),
            None => Ok(Some(document.clone())),
        }
    }

    async fn insert(&self, documents: Vec<Document>) -> ProviderResult<Vec<Document>> {
        let mut store = self.store.write().await;
        let collection = store.get_mut(&self.name).ok_or_else(|| self.missing())?;
        let start = collection.documents.len();

        for document in documents {
            let document = with_id(document);

            if let Err(err) = collection.check_unique(&self.name, &document, None) {
                collection.documents.truncate(start);
                return Err(err);
            }
            collection.documents.push(document);
        }

        Ok(collection.documents[start..].to_vec())
    }

    async fn update(
        &self,
        conditions: Document,
        update: Document,
        multi: bool,
        options: &UpdateOptions,
    ) -> ProviderResult<UpdateOutcome> {
        if options.array_filters.is_some() {
            return Err(ProviderError::Backend(
                "array filters are not supported by the in-memory connection".to_string(),
            ));
        }

        let mut store = self.store.write().await;
        let collection = store.get_mut(&self.name).ok_or_else(|| self.missing())?;
        let positions = collection.positions(&conditions, !multi)?;

        if positions.is_empty() {
            if !options.upsert {
                return Ok(UpdateOutcome::default());
            }

            let mut document = update::seed(&conditions)?;
            update::apply(&mut document, &update)?;
            let document = with_id(document);

            collection.check_unique(&self.name, &document, None)?;
            collection.documents.push(document);

            return Ok(UpdateOutcome {
                matched: 0,
                modified: 0,
                upserted: true,
            });
        }

        let modified = collection.apply_each(&self.name, &positions, &update)?;

        Ok(UpdateOutcome {
            matched: positions.len() as u64,
            modified,
            upserted: false,
        })
    }

    async fn remove(&self, conditions: Document) -> ProviderResult<u64> {
        let mut store = self.store.write().await;
        let collection = store.get_mut(&self.name).ok_or_else(|| self.missing())?;
        let positions = collection.positions(&conditions, false)?;

        for &position in positions.iter().rev() {
            collection.documents.remove(position);
        }

        Ok(positions.len() as u64)
    }

    async fn find_and_modify(
        &self,
        conditions: Document,
        update: Document,
    ) -> ProviderResult<Option<Document>> {
        let mut store = self.store.write().await;
        let collection = store.get_mut(&self.name).ok_or_else(|| self.missing())?;

        let Some(position) = collection.positions(&conditions, true)?.first().copied() else {
            return Ok(None);
        };

        let mut updated = collection.documents[position].clone();
        update::apply(&mut updated, &update)?;
        collection.check_unique(&self.name, &updated, Some(position))?;
        collection.documents[position] = updated.clone();

        Ok(Some(updated))
    }

    async fn find_and_remove(&self, conditions: Document) -> ProviderResult<Option<Document>> {
        let mut store = self.store.write().await;
        let collection = store.get_mut(&self.name).ok_or_else(|| self.missing())?;

        Ok(collection
            .positions(&conditions, true)?
            .first()
            .map(|&position| collection.documents.remove(position)))
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        _options: &AggregateOptions,
    ) -> ProviderResult<Vec<Document>> {
        let documents = {
            let store = self.store.read().await;
            store
                .get(&self.name)
                .ok_or_else(|| self.missing())?
                .documents
                .clone()
        };

        pipeline::run(documents, &pipeline)
    }

    async fn count(&self, conditions: Document) -> ProviderResult<u64> {
        let store = self.store.read().await;
        let collection = store.get(&self.name).ok_or_else(|| self.missing())?;

        Ok(collection.positions(&conditions, false)?.len() as u64)
    }

    async fn ensure_index(&self, keys: Document, options: &IndexOptions) -> ProviderResult<String> {
        let mut store = self.store.write().await;
        let collection = store.get_mut(&self.name).ok_or_else(|| self.missing())?;
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| default_index_name(&keys));

        if let Some(existing) = collection.indexes.iter().find(|index| index.name == name) {
            if existing.keys == keys
                && existing.unique == options.unique
                && existing.sparse == options.sparse
            {
                return Ok(name);
            }

            return Err(ProviderError::Backend(format!(
                "An existing index has the same name as the requested index but different options: {name}"
            )));
        }

        if let Some(existing) = collection.indexes.iter().find(|index| index.keys == keys) {
            return Err(ProviderError::Backend(format!(
                "Index already exists with a different name: {}",
                existing.name
            )));
        }

        let index = IndexInfo {
            name: name.clone(),
            keys,
            unique: options.unique,
            sparse: options.sparse,
        };

        if index.unique {
            for (position, document) in collection.documents.iter().enumerate() {
                collection.check_index(&self.name, &index, document, Some(position))?;
            }
        }

        collection.indexes.push(index);
        tracing::debug!(collection = %self.name, index = %name, "index created");

        Ok(name)
    }
}

/// Builder for [`InMemoryConnection`].
///
/// # Example
///
/// ```ignore
/// use docprovider_core::connection::ConnectionBuilder;
/// use docprovider_memory::InMemoryConnection;
///
/// let connection = InMemoryConnection::builder()
///     .collection("users")
///     .collection("sessions")
///     .build()
///     .await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryConnectionBuilder {
    collections: Vec<String>,
}

impl InMemoryConnectionBuilder {
    /// Creates `name` when the connection is built.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collections.push(name.into());
        self
    }
}

#[async_trait]
impl ConnectionBuilder for InMemoryConnectionBuilder {
    type Connection = InMemoryConnection;

    async fn build(self) -> ProviderResult<Self::Connection> {
        let connection = InMemoryConnection::new();

        for name in &self.collections {
            connection.create_collection(name).await?;
        }

        Ok(connection)
    }
}
