//! The database connection seam used by providers.
//!
//! Providers never talk to a driver directly. They ask a [`Connection`] for a collection handle
//! (fresh for every operation) and issue one call on that [`CollectionHandle`]. Implementations
//! wrap a concrete driver (see `docprovider-mongodb`) or keep documents in memory (see
//! `docprovider-memory`).
//!
//! # Contract
//!
//! - Conditions, projections, updates and pipelines are forwarded unmodified; a connection may
//!   interpret them but never rewrites them.
//! - "Nothing matched" is not an error at this level. Handles report empty results, `None` or
//!   zero counts, and the provider decides whether that is a failure.
//! - Driver failures are returned as [`ProviderError::Backend`](crate::error::ProviderError::Backend)
//!   carrying the driver's own message.
//!
//! # Example
//!
//! ```ignore
//! use docprovider_core::connection::{Connection, CollectionOptions};
//! use bson::doc;
//!
//! let users = connection.collection("users", &CollectionOptions::strict()).await?;
//! let count = users.count(doc! { "active": true }).await?;
//! ```

use async_trait::async_trait;
use bson::Document;
use std::{fmt::Debug, sync::Arc};

use crate::{error::ProviderResult, index::IndexOptions};

/// Options used when acquiring a collection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionOptions {
    /// Fail with [`CollectionNotFound`](crate::error::ProviderError::CollectionNotFound)
    /// instead of creating a missing collection.
    pub strict: bool,
    /// Require acknowledgement of every write issued through the handle.
    pub acknowledged: bool,
}

impl CollectionOptions {
    /// Strict existence validation with acknowledged writes. Used by every provider operation.
    pub fn strict() -> Self {
        Self { strict: true, acknowledged: true }
    }

    /// Lenient lookup that creates missing collections, with acknowledged writes.
    pub fn lenient() -> Self {
        Self { strict: false, acknowledged: true }
    }
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self::strict()
    }
}

/// Options for single and multi-document updates.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOptions {
    /// Insert a document built from the conditions and the update when nothing matches.
    pub upsert: bool,
    /// Filters selecting which array elements positional `$[name]` operators touch.
    pub array_filters: Option<Vec<Document>>,
    /// Require write acknowledgement. Unacknowledged writes report zero affected documents.
    pub acknowledged: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            upsert: false,
            array_filters: None,
            acknowledged: true,
        }
    }
}

/// Options forwarded with an aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    /// Allow pipeline stages to spill to disk.
    pub allow_disk_use: Option<bool>,
    /// Cursor batch size.
    pub batch_size: Option<u32>,
}

/// Outcome of an update as reported by the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents matched by the conditions.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
    /// Whether an upsert inserted a new document.
    pub upserted: bool,
}

impl UpdateOutcome {
    /// Matched documents plus an upserted one, if any.
    pub fn affected(&self) -> u64 {
        self.matched + u64::from(self.upserted)
    }
}

/// A handle on a single collection, acquired per operation.
///
/// # Thread Safety
///
/// Handles are `Send + Sync` and may be moved across tasks, but providers never share or
/// cache them between operations.
#[async_trait]
pub trait CollectionHandle: Send + Sync + Debug {
    /// Returns all documents matching `conditions`, in the order the store yields them.
    ///
    /// # Arguments
    ///
    /// * `conditions` - The query predicate
    /// * `projection` - Optional field selection; `None` returns whole documents
    async fn find(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Vec<Document>>;

    /// Returns the first document matching `conditions`, or `None`.
    async fn find_one(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Option<Document>>;

    /// Inserts `documents` and returns them as stored, each carrying its `_id`.
    ///
    /// Documents without an `_id` receive a generated one.
    async fn insert(&self, documents: Vec<Document>) -> ProviderResult<Vec<Document>>;

    /// Applies `update` to the first matching document, or to all of them when `multi` is set.
    async fn update(
        &self,
        conditions: Document,
        update: Document,
        multi: bool,
        options: &UpdateOptions,
    ) -> ProviderResult<UpdateOutcome>;

    /// Deletes every matching document and returns how many were removed.
    async fn remove(&self, conditions: Document) -> ProviderResult<u64>;

    /// Atomically applies `update` to one matching document and returns it after the update.
    async fn find_and_modify(
        &self,
        conditions: Document,
        update: Document,
    ) -> ProviderResult<Option<Document>>;

    /// Atomically deletes one matching document and returns it.
    async fn find_and_remove(&self, conditions: Document) -> ProviderResult<Option<Document>>;

    /// Runs an aggregation pipeline and returns its output unmodified.
    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> ProviderResult<Vec<Document>>;

    /// Counts documents matching `conditions`.
    async fn count(&self, conditions: Document) -> ProviderResult<u64>;

    /// Creates the index if it does not exist yet and returns its name.
    ///
    /// Creating an index that already exists with the same key pattern and options succeeds.
    async fn ensure_index(&self, keys: Document, options: &IndexOptions) -> ProviderResult<String>;
}

/// A shared database connection able to hand out collection handles.
///
/// A connection outlives the providers built on it and is shared between them and between
/// all of their concurrent operations. Acquiring a handle must not mutate shared state other
/// than what the underlying driver needs.
#[async_trait]
pub trait Connection: Send + Sync + Debug {
    /// The handle type returned for a collection.
    type Collection: CollectionHandle;

    /// Acquires a handle on the collection called `name`.
    ///
    /// With [`CollectionOptions::strict`] a missing collection is an error rather than being
    /// created on first use.
    async fn collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> ProviderResult<Self::Collection>;
}

#[async_trait]
impl<C> Connection for &C
where
    C: Connection,
{
    type Collection = C::Collection;

    async fn collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> ProviderResult<Self::Collection> {
        (*self).collection(name, options).await
    }
}

#[async_trait]
impl<C> Connection for Arc<C>
where
    C: Connection,
{
    type Collection = C::Collection;

    async fn collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> ProviderResult<Self::Collection> {
        (**self).collection(name, options).await
    }
}

/// Factory trait for creating connections.
#[async_trait]
pub trait ConnectionBuilder {
    type Connection: Connection;

    async fn build(self) -> ProviderResult<Self::Connection>;
}
