use async_trait::async_trait;
use bson::{Document, doc, oid::ObjectId};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as DriverCollection, IndexModel,
    options::{
        Acknowledgment, AggregateOptions as DriverAggregateOptions, ClientOptions,
        CollectionOptions as DriverCollectionOptions, FindOneAndReplaceOptions,
        FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions as DriverIndexOptions,
        ReplaceOptions, ReturnDocument, UpdateOptions as DriverUpdateOptions, WriteConcern,
    },
};

use docprovider_core::{
    connection::{
        AggregateOptions, CollectionHandle, CollectionOptions, Connection, ConnectionBuilder,
        UpdateOptions, UpdateOutcome,
    },
    error::{ProviderError, ProviderResult},
    index::{IndexOptions, default_index_name},
};

fn write_concern(acknowledged: bool) -> WriteConcern {
    let mut concern = WriteConcern::default();
    concern.w = Some(Acknowledgment::Nodes(u32::from(acknowledged)));
    concern
}

fn is_replacement(update: &Document) -> bool {
    update
        .keys()
        .next()
        .is_some_and(|key| !key.starts_with('$'))
}

/// Connection to one MongoDB database.
///
/// Every collection handle it returns writes with an explicit write concern, acknowledged by
/// default.
#[derive(Debug, Clone)]
pub struct MongoConnection {
    client: Client,
    database: String,
}

impl MongoConnection {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            database: database.into(),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoConnectionBuilder {
        MongoConnectionBuilder::new(dsn, database)
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Name of the database collections are looked up in.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn shutdown(self) -> ProviderResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl Connection for MongoConnection {
    type Collection = MongoCollection;

    async fn collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> ProviderResult<MongoCollection> {
        let database = self.client.database(&self.database);

        if options.strict {
            let existing = database
                .list_collection_names()
                .filter(doc! { "name": name })
                .await
                .map_err(|e| ProviderError::Backend(e.to_string()))?;

            if existing.is_empty() {
                return Err(ProviderError::CollectionNotFound(name.to_string()));
            }
        }

        let mut collection_options = DriverCollectionOptions::default();
        collection_options.write_concern = Some(write_concern(options.acknowledged));

        Ok(MongoCollection {
            inner: database.collection_with_options(name, collection_options),
        })
    }
}

/// Handle on a MongoDB collection of raw documents.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: DriverCollection<Document>,
}

impl MongoCollection {
    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl CollectionHandle for MongoCollection {
    async fn find(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.projection = projection;

        self.inner
            .find(conditions)
            .with_options(options)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }

    async fn find_one(
        &self,
        conditions: Document,
        projection: Option<Document>,
    ) -> ProviderResult<Option<Document>> {
        let mut options = FindOneOptions::default();
        options.projection = projection;

        self.inner
            .find_one(conditions)
            .with_options(options)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }

    async fn insert(&self, documents: Vec<Document>) -> ProviderResult<Vec<Document>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let documents = documents
            .into_iter()
            .map(|document| {
                if document.contains_key("_id") {
                    return document;
                }

                let mut identified = doc! { "_id": ObjectId::new() };
                for (key, value) in document {
                    identified.insert(key, value);
                }
                identified
            })
            .collect::<Vec<_>>();

        let result = self
            .inner
            .insert_many(&documents)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        Ok(documents
            .into_iter()
            .enumerate()
            .filter(|(position, _)| result.inserted_ids.contains_key(position))
            .map(|(_, document)| document)
            .collect())
    }

    async fn update(
        &self,
        conditions: Document,
        update: Document,
        multi: bool,
        options: &UpdateOptions,
    ) -> ProviderResult<UpdateOutcome> {
        let result = if !multi && is_replacement(&update) {
            let mut replace_options = ReplaceOptions::default();
            replace_options.upsert = Some(options.upsert);
            replace_options.write_concern = Some(write_concern(options.acknowledged));

            self.inner
                .replace_one(conditions, update)
                .with_options(replace_options)
                .await
        } else {
            let mut update_options = DriverUpdateOptions::default();
            update_options.upsert = Some(options.upsert);
            update_options.array_filters = options.array_filters.clone();
            update_options.write_concern = Some(write_concern(options.acknowledged));

            if multi {
                self.inner
                    .update_many(conditions, update)
                    .with_options(update_options)
                    .await
            } else {
                self.inner
                    .update_one(conditions, update)
                    .with_options(update_options)
                    .await
            }
        };
        let result = result.map_err(|e| ProviderError::Backend(e.to_string()))?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    async fn remove(&self, conditions: Document) -> ProviderResult<u64> {
        Ok(self
            .inner
            .delete_many(conditions)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?
            .deleted_count)
    }

    async fn find_and_modify(
        &self,
        conditions: Document,
        update: Document,
    ) -> ProviderResult<Option<Document>> {
        if is_replacement(&update) {
            let mut options = FindOneAndReplaceOptions::default();
            options.return_document = Some(ReturnDocument::After);

            return self
                .inner
                .find_one_and_replace(conditions, update)
                .with_options(options)
                .await
                .map_err(|e| ProviderError::Backend(e.to_string()));
        }

        let mut options = FindOneAndUpdateOptions::default();
        options.return_document = Some(ReturnDocument::After);

        self.inner
            .find_one_and_update(conditions, update)
            .with_options(options)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }

    async fn find_and_remove(&self, conditions: Document) -> ProviderResult<Option<Document>> {
        self.inner
            .find_one_and_delete(conditions)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: &AggregateOptions,
    ) -> ProviderResult<Vec<Document>> {
        let mut aggregate_options = DriverAggregateOptions::default();
        aggregate_options.allow_disk_use = options.allow_disk_use;
        aggregate_options.batch_size = options.batch_size;

        self.inner
            .aggregate(pipeline)
            .with_options(aggregate_options)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }

    async fn count(&self, conditions: Document) -> ProviderResult<u64> {
        self.inner
            .count_documents(conditions)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))
    }

    async fn ensure_index(&self, keys: Document, options: &IndexOptions) -> ProviderResult<String> {
        let mut index_options = DriverIndexOptions::default();
        index_options.name = Some(
            options
                .name
                .clone()
                .unwrap_or_else(|| default_index_name(&keys)),
        );
        index_options.unique = options.unique.then_some(true);
        index_options.sparse = options.sparse.then_some(true);
        index_options.background = Some(options.background);
        index_options.expire_after = options.expire_after;

        let name = self
            .inner
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(index_options)
                    .build(),
            )
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?
            .index_name;

        tracing::debug!(collection = self.name(), index = %name, "index ensured");

        Ok(name)
    }
}

/// Builder for [`MongoConnection`] from a connection string and a database name.
#[derive(Debug)]
pub struct MongoConnectionBuilder {
    dsn: String,
    database: String,
}

impl MongoConnectionBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl ConnectionBuilder for MongoConnectionBuilder {
    type Connection = MongoConnection;

    async fn build(self) -> ProviderResult<Self::Connection> {
        if self.database.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "database name must be set".to_string(),
            ));
        }

        Ok(MongoConnection::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| ProviderError::Initialization(e.to_string()))?,
            )
            .map_err(|e| ProviderError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn dsn() -> String {
        std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
    }

    async fn fresh(name: &str) -> (MongoConnection, MongoCollection) {
        let connection = MongoConnection::builder(&dsn(), "docprovider_test")
            .build()
            .await
            .unwrap();
        let database = connection.client().database(connection.database());

        database.collection::<Document>(name).drop().await.unwrap();
        database.create_collection(name).await.unwrap();

        let collection = connection
            .collection(name, &CollectionOptions::strict())
            .await
            .unwrap();
        (connection, collection)
    }

    #[test]
    fn write_concern_reflects_acknowledgement() {
        assert_eq!(write_concern(true).w, Some(Acknowledgment::Nodes(1)));
        assert_eq!(write_concern(false).w, Some(Acknowledgment::Nodes(0)));
    }

    #[test]
    fn replacement_detection() {
        assert!(is_replacement(&doc! { "name": "a" }));
        assert!(!is_replacement(&doc! { "$set": { "name": "a" } }));
        assert!(!is_replacement(&doc! {}));
    }

    #[tokio::test]
    async fn builder_rejects_a_blank_database() {
        let result = MongoConnection::builder("mongodb://localhost:27017", " ")
            .build()
            .await;

        assert!(matches!(result, Err(ProviderError::Configuration(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB server"]
    #[serial]
    async fn strict_lookup_rejects_missing_collections() {
        let (connection, _) = fresh("people").await;

        let result = connection
            .collection("no_such_collection", &CollectionOptions::strict())
            .await;

        assert!(matches!(result, Err(ProviderError::CollectionNotFound(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB server"]
    #[serial]
    async fn crud_round_trip() {
        let (_, people) = fresh("people").await;

        let inserted = people
            .insert(vec![doc! { "name": "a", "age": 20 }, doc! { "name": "b", "age": 30 }])
            .await
            .unwrap();
        assert_eq!(inserted.len(), 2);
        assert!(inserted.iter().all(|document| document.get_object_id("_id").is_ok()));
        assert!(people.insert(vec![]).await.unwrap().is_empty());

        let outcome = people
            .update(doc! { "name": "a" }, doc! { "$inc": { "age": 1 } }, true, &UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.matched, 1);

        let upsert = UpdateOptions { upsert: true, ..UpdateOptions::default() };
        let outcome = people
            .update(doc! { "name": "z" }, doc! { "$set": { "age": 1 } }, false, &upsert)
            .await
            .unwrap();
        assert_eq!(outcome.affected(), 1);

        let updated = people
            .find_and_modify(doc! { "name": "b" }, doc! { "$set": { "age": 31 } })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get_i32("age").unwrap(), 31);

        let names = people
            .find(doc! {}, Some(doc! { "_id": 0, "name": 1 }))
            .await
            .unwrap();
        assert_eq!(names, vec![doc! { "name": "a" }, doc! { "name": "b" }, doc! { "name": "z" }]);

        assert!(people.find_and_remove(doc! { "name": "z" }).await.unwrap().is_some());
        assert_eq!(people.remove(doc! { "age": { "$gt": 0 } }).await.unwrap(), 2);
        assert_eq!(people.count(doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB server"]
    #[serial]
    async fn indexes_and_aggregation() {
        let (_, people) = fresh("people").await;
        let options = IndexOptions { unique: true, background: true, ..IndexOptions::default() };

        assert_eq!(people.ensure_index(doc! { "name": 1 }, &options).await.unwrap(), "name_1");
        assert_eq!(people.ensure_index(doc! { "name": 1 }, &options).await.unwrap(), "name_1");

        people
            .insert(vec![doc! { "name": "a", "age": 30 }, doc! { "name": "b", "age": 30 }])
            .await
            .unwrap();
        assert!(people.insert(vec![doc! { "name": "a" }]).await.is_err());

        let counted = people
            .aggregate(
                vec![doc! { "$match": { "age": 30 } }, doc! { "$count": "total" }],
                &AggregateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(counted, vec![doc! { "total": 2 }]);
    }
}
