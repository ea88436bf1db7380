//! The base provider: uniform CRUD access to one collection.
//!
//! A [`Provider`] owns a shared [`Connection`] and a validated [`ProviderConfig`]. Each operation
//! acquires a fresh collection handle in strict mode, issues exactly one call on it, and
//! normalizes the outcome:
//!
//! - driver failures are returned unchanged,
//! - singular and must-match operations turn "nothing matched" into a not-found error that
//!   embeds the serialized conditions (or payload, for creates),
//! - plural reads and tolerant variants treat "nothing matched" as an empty result.
//!
//! Concrete providers compose a `Provider` and implement [`CrudProvider`] to expose the whole
//! contract alongside their own domain methods.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use docprovider_core::{config::ProviderConfig, index::IndexSpec, provider::Provider};
//!
//! let users = Provider::new(
//!     connection,
//!     ProviderConfig::new("users").index(IndexSpec::new(doc! { "email": 1 }).unique()),
//! )?;
//!
//! let alice = users.create_one(doc! { "email": "alice@example.com" }).await?;
//! let found = users.find_one(doc! { "_id": alice.get("_id") }, None).await?;
//! ```

use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use bson::Document;
use serde::{Serialize, de::DeserializeOwned};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    config::ProviderConfig,
    connection::{
        AggregateOptions, CollectionHandle, CollectionOptions, Connection, UpdateOptions,
    },
    deferred::{Deferred, FaultScheduler},
    document::{describe, describe_all, from_document, to_document},
    error::{ProviderError, ProviderResult},
    index::IndexOptions,
};

/// Base CRUD implementation over a single collection.
///
/// Cloning a provider is cheap and yields a handle on the same connection and configuration.
/// A provider holds no per-call state, so concurrent operations on one instance are safe and
/// may complete in any order.
#[derive(Debug)]
pub struct Provider<C: Connection> {
    connection: Arc<C>,
    config: Arc<ProviderConfig>,
    deferred: Deferred,
}

impl<C: Connection> Clone for Provider<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            config: Arc::clone(&self.config),
            deferred: self.deferred.clone(),
        }
    }
}

impl<C: Connection + 'static> Provider<C> {
    /// Builds a provider and starts ensuring its indexes in the background.
    ///
    /// Shorthand for `Provider::builder(connection, config).build()`.
    pub fn new(connection: impl Into<Arc<C>>, config: ProviderConfig) -> ProviderResult<Self> {
        Self::builder(connection, config).build()
    }

    /// Starts building a provider on `connection`.
    pub fn builder(connection: impl Into<Arc<C>>, config: ProviderConfig) -> ProviderBuilder<C> {
        ProviderBuilder {
            connection: connection.into(),
            config,
            deferred: Deferred::default(),
            ensure_on_build: true,
        }
    }

    /// Runs `operation` on the async runtime and delivers its result to `callback`.
    ///
    /// The callback is invoked exactly once, through the deferred-rethrow wrapper: a panic in
    /// the callback never unwinds into the task running the operation and resurfaces later
    /// through the provider's [`FaultScheduler`]. The returned task therefore always
    /// completes cleanly.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// provider.dispatch(
    ///     |users| async move { users.count(doc! {}).await },
    ///     |result| println!("{result:?}"),
    /// );
    /// ```
    pub fn dispatch<T, Op, Fut, F>(&self, operation: Op, callback: F) -> JoinHandle<()>
    where
        T: Send + 'static,
        Op: FnOnce(Provider<C>) -> Fut + Send + 'static,
        Fut: Future<Output = ProviderResult<T>> + Send + 'static,
        F: FnOnce(ProviderResult<T>) + Send + 'static,
    {
        let provider = self.clone();
        let callback = self.deferred.wrap(callback);

        tokio::spawn(async move {
            let result = operation(provider).await;
            callback(result);
        })
    }

    /// Ensures the declared indexes and reports the outcome to `callback`.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn ensure_indexes_with<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(ProviderResult<()>) + Send + 'static,
    {
        self.dispatch(
            |provider| async move { provider.ensure_indexes().await },
            callback,
        )
    }
}

impl<C: Connection> Provider<C> {
    /// The target collection name.
    pub fn collection_name(&self) -> &str {
        self.config.collection_name()
    }

    /// The provider's configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The shared connection.
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    async fn collection(&self) -> ProviderResult<C::Collection> {
        self.connection
            .collection(self.config.collection_name(), &CollectionOptions::strict())
            .await
    }

    fn missing(&self, outcome: fn(String) -> ProviderError, request: String) -> ProviderError {
        let err = outcome(request);
        tracing::debug!(collection = self.collection_name(), error = %err, "no document matched");
        err
    }

    /// Creates every declared index, one at a time, in declaration order.
    ///
    /// Index builds are requested in the background with acknowledged writes. The next index
    /// is only requested after the previous one completed; the first failure stops the
    /// sequence and is returned. With no declared indexes this yields once and succeeds
    /// without touching the connection.
    pub async fn ensure_indexes(&self) -> ProviderResult<()> {
        let specs = self.config.index_specs();

        if specs.is_empty() {
            tokio::task::yield_now().await;
            return Ok(());
        }

        let collection = self.collection().await?;

        for spec in specs {
            let options = IndexOptions {
                background: true,
                ..spec.options.clone()
            };
            let name = collection
                .ensure_index(spec.keys.clone(), &options)
                .await?;

            tracing::debug!(collection = self.collection_name(), index = %name, "index ensured");
        }

        Ok(())
    }

    /// Returns every document matching `conditions`. No match yields an empty vector.
    pub async fn find(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Vec<Document>> {
        self.collection()
            .await?
            .find(conditions, projection)
            .await
    }

    /// Returns the first document matching `conditions`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DocumentNotFound`] when nothing matches.
    pub async fn find_one(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Document> {
        let request = conditions.clone();

        self.collection()
            .await?
            .find_one(conditions, projection)
            .await?
            .ok_or_else(|| self.missing(ProviderError::DocumentNotFound, describe(&request)))
    }

    /// Like [`find_one`](Self::find_one), but an absent document is `Ok(None)`.
    pub async fn find_only(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Option<Document>> {
        self.collection()
            .await?
            .find_one(conditions, projection)
            .await
    }

    /// Runs an aggregation pipeline and returns whatever it produces.
    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> ProviderResult<Vec<Document>> {
        self.collection()
            .await?
            .aggregate(pipeline, &options.unwrap_or_default())
            .await
    }

    /// Counts documents matching `conditions`. Zero is a valid result.
    pub async fn count(&self, conditions: Document) -> ProviderResult<u64> {
        self.collection()
            .await?
            .count(conditions)
            .await
    }

    /// Inserts `documents` and returns them as stored, with their `_id`s.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DocumentsNotCreated`] when the connection reports no
    /// inserted document, including for an empty input.
    pub async fn create(&self, documents: Vec<Document>) -> ProviderResult<Vec<Document>> {
        let request = documents.clone();
        let inserted = self
            .collection()
            .await?
            .insert(documents)
            .await?;

        if inserted.is_empty() {
            return Err(self.missing(ProviderError::DocumentsNotCreated, describe_all(&request)));
        }

        Ok(inserted)
    }

    /// Inserts a single document and returns it as stored, with its `_id`.
    pub async fn create_one(&self, document: Document) -> ProviderResult<Document> {
        let request = document.clone();

        self.collection()
            .await?
            .insert(vec![document])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.missing(ProviderError::DocumentsNotCreated, describe(&request)))
    }

    /// Applies `update` to every matching document and returns how many matched.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DocumentsNotUpdated`] when nothing matches. Use
    /// [`update_only`](Self::update_only) when that is an expected outcome.
    pub async fn update(&self, conditions: Document, update: Document) -> ProviderResult<u64> {
        let request = conditions.clone();
        let outcome = self
            .collection()
            .await?
            .update(conditions, update, true, &UpdateOptions::default())
            .await?;

        match outcome.affected() {
            0 => Err(self.missing(ProviderError::DocumentsNotUpdated, describe(&request))),
            affected => Ok(affected),
        }
    }

    /// Applies `update` to every matching document. Matching nothing returns `Ok(0)`.
    pub async fn update_only(&self, conditions: Document, update: Document) -> ProviderResult<u64> {
        Ok(self
            .collection()
            .await?
            .update(conditions, update, true, &UpdateOptions::default())
            .await?
            .affected())
    }

    /// Applies `update` to the first matching document.
    ///
    /// `options` default to an acknowledged, non-upserting update. An upsert that inserts
    /// counts as one affected document. Unacknowledged updates cannot report what they
    /// matched and always return `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DocumentNotUpdated`] when an acknowledged update affects
    /// nothing.
    pub async fn update_one(
        &self,
        conditions: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> ProviderResult<u64> {
        let options = options.unwrap_or_default();
        let request = conditions.clone();
        let outcome = self
            .collection()
            .await?
            .update(conditions, update, false, &options)
            .await?;

        if !options.acknowledged {
            return Ok(0);
        }

        match outcome.affected() {
            0 => Err(self.missing(ProviderError::DocumentNotUpdated, describe(&request))),
            affected => Ok(affected),
        }
    }

    /// Atomically updates one matching document and returns it as it is after the update.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DocumentNotFoundOrUpdated`] when nothing matches.
    pub async fn find_and_update(
        &self,
        conditions: Document,
        update: Document,
    ) -> ProviderResult<Document> {
        let request = conditions.clone();

        self.collection()
            .await?
            .find_and_modify(conditions, update)
            .await?
            .ok_or_else(|| {
                self.missing(ProviderError::DocumentNotFoundOrUpdated, describe(&request))
            })
    }

    /// Deletes every matching document.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DocumentsNotRemoved`] when nothing matches. Use
    /// [`remove_only`](Self::remove_only) when that is an expected outcome.
    pub async fn remove(&self, conditions: Document) -> ProviderResult<()> {
        let request = conditions.clone();
        let removed = self
            .collection()
            .await?
            .remove(conditions)
            .await?;

        if removed == 0 {
            return Err(self.missing(ProviderError::DocumentsNotRemoved, describe(&request)));
        }

        Ok(())
    }

    /// Deletes every matching document and returns how many were removed, possibly zero.
    pub async fn remove_only(&self, conditions: Document) -> ProviderResult<u64> {
        self.collection()
            .await?
            .remove(conditions)
            .await
    }

    /// Atomically deletes one matching document and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DocumentNotFoundOrRemoved`] when nothing matches.
    pub async fn find_and_remove(&self, conditions: Document) -> ProviderResult<Document> {
        let request = conditions.clone();

        self.collection()
            .await?
            .find_and_remove(conditions)
            .await?
            .ok_or_else(|| {
                self.missing(ProviderError::DocumentNotFoundOrRemoved, describe(&request))
            })
    }
}

/// Builder for [`Provider`].
#[derive(Debug)]
pub struct ProviderBuilder<C: Connection> {
    connection: Arc<C>,
    config: ProviderConfig,
    deferred: Deferred,
    ensure_on_build: bool,
}

impl<C: Connection + 'static> ProviderBuilder<C> {
    /// Routes panics raised by completion callbacks to `scheduler`.
    pub fn fault_scheduler(mut self, scheduler: Arc<dyn FaultScheduler>) -> Self {
        self.deferred = Deferred::new(scheduler);
        self
    }

    /// Whether [`build`](Self::build) starts ensuring indexes. Enabled by default.
    pub fn ensure_on_build(mut self, enabled: bool) -> Self {
        self.ensure_on_build = enabled;
        self
    }

    /// Validates the configuration and builds the provider.
    ///
    /// When index ensuring is enabled, it is started fire-and-forget on the current tokio
    /// runtime and failures are logged.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Configuration`] for an invalid configuration and
    /// [`ProviderError::Initialization`] when indexes must be ensured but no tokio runtime
    /// is running.
    pub fn build(self) -> ProviderResult<Provider<C>> {
        let ensure = self.ensure_on_build;
        self.finish(ensure, None::<fn(ProviderResult<()>)>)
    }

    /// Builds the provider and reports the initial index ensuring to `callback`.
    ///
    /// Index ensuring always runs here, regardless of
    /// [`ensure_on_build`](Self::ensure_on_build).
    pub fn build_with<F>(self, callback: F) -> ProviderResult<Provider<C>>
    where
        F: FnOnce(ProviderResult<()>) + Send + 'static,
    {
        self.finish(true, Some(callback))
    }

    fn finish<F>(self, ensure: bool, callback: Option<F>) -> ProviderResult<Provider<C>>
    where
        F: FnOnce(ProviderResult<()>) + Send + 'static,
    {
        self.config.validate()?;

        let provider = Provider {
            connection: self.connection,
            config: Arc::new(self.config),
            deferred: self.deferred,
        };

        if ensure {
            let runtime = Handle::try_current().map_err(|_| {
                ProviderError::Initialization(format!(
                    "ensuring indexes on {} requires a running tokio runtime",
                    provider.collection_name()
                ))
            })?;
            let background = provider.clone();
            let callback = provider.deferred.wrap_optional(callback);

            runtime.spawn(async move {
                let result = background.ensure_indexes().await;

                if let Err(err) = &result {
                    tracing::warn!(
                        collection = background.collection_name(),
                        error = %err,
                        "failed to ensure indexes"
                    );
                }
                if let Some(callback) = callback {
                    callback(result);
                }
            });
        }

        Ok(provider)
    }
}

/// The CRUD contract shared by every provider.
///
/// Implementors only supply [`provider`](Self::provider); every operation delegates to the
/// base [`Provider`]. A concrete provider wraps a `Provider` and adds domain methods:
///
/// ```ignore
/// struct UserProvider {
///     base: Provider<InMemoryConnection>,
/// }
///
/// impl CrudProvider for UserProvider {
///     type Connection = InMemoryConnection;
///
///     fn provider(&self) -> &Provider<InMemoryConnection> {
///         &self.base
///     }
/// }
///
/// impl UserProvider {
///     async fn by_email(&self, email: &str) -> ProviderResult<Option<User>> {
///         self.find_only_as(doc! { "email": email }, None).await
///     }
/// }
/// ```
#[async_trait]
pub trait CrudProvider: Send + Sync {
    type Connection: Connection;

    /// The base provider all operations delegate to.
    fn provider(&self) -> &Provider<Self::Connection>;

    fn collection_name(&self) -> &str {
        self.provider().collection_name()
    }

    async fn ensure_indexes(&self) -> ProviderResult<()> {
        self.provider().ensure_indexes().await
    }

    async fn find(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Vec<Document>> {
        self.provider().find(conditions, projection).await
    }

    async fn find_one(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Document> {
        self.provider().find_one(conditions, projection).await
    }

    async fn find_only(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Option<Document>> {
        self.provider().find_only(conditions, projection).await
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> ProviderResult<Vec<Document>> {
        self.provider().aggregate(pipeline, options).await
    }

    async fn count(&self, conditions: Document) -> ProviderResult<u64> {
        self.provider().count(conditions).await
    }

    async fn create(&self, documents: Vec<Document>) -> ProviderResult<Vec<Document>> {
        self.provider().create(documents).await
    }

    async fn create_one(&self, document: Document) -> ProviderResult<Document> {
        self.provider().create_one(document).await
    }

    async fn update(&self, conditions: Document, update: Document) -> ProviderResult<u64> {
        self.provider().update(conditions, update).await
    }

    async fn update_only(&self, conditions: Document, update: Document) -> ProviderResult<u64> {
        self.provider().update_only(conditions, update).await
    }

    async fn update_one(
        &self,
        conditions: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> ProviderResult<u64> {
        self.provider().update_one(conditions, update, options).await
    }

    async fn find_and_update(
        &self,
        conditions: Document,
        update: Document,
    ) -> ProviderResult<Document> {
        self.provider().find_and_update(conditions, update).await
    }

    async fn remove(&self, conditions: Document) -> ProviderResult<()> {
        self.provider().remove(conditions).await
    }

    async fn remove_only(&self, conditions: Document) -> ProviderResult<u64> {
        self.provider().remove_only(conditions).await
    }

    async fn find_and_remove(&self, conditions: Document) -> ProviderResult<Document> {
        self.provider().find_and_remove(conditions).await
    }

    /// [`find`](Self::find) deserializing every document into `T`.
    async fn find_as<T>(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.find(conditions, projection)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// [`find_one`](Self::find_one) deserializing the document into `T`.
    async fn find_one_as<T>(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<T>
    where
        T: DeserializeOwned + Send,
    {
        from_document(self.find_one(conditions, projection).await?)
    }

    /// [`find_only`](Self::find_only) deserializing the document into `T`.
    async fn find_only_as<T>(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.find_only(conditions, projection)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Serializes `value` and inserts it with [`create_one`](Self::create_one).
    async fn create_one_from<T>(&self, value: &T) -> ProviderResult<Document>
    where
        T: Serialize + Sync,
    {
        let document = to_document(value)?;
        self.create_one(document).await
    }
}

impl<C: Connection> CrudProvider for Provider<C> {
    type Connection = C;

    fn provider(&self) -> &Provider<C> {
        self
    }
}
