use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions, IndexOptions, ReturnDocument},
};
use tracing::debug;

use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    document::{DISCRIMINATOR_KEY, ID_KEY},
    error::{DocumentStoreError, DocumentStoreResult},
    metadata::IndexSpec,
    query::{Expr, Query, SortDirection},
    update::UpdateSpec,
};

use crate::query::MongoQueryTranslator;

/// Collection holding sequence counters unless configured otherwise.
pub const DEFAULT_COUNTERS_COLLECTION: &str = "docmodel.counters";

const DUPLICATE_KEY: i32 = 11000;

/// Maps driver errors, surfacing duplicate-key failures as [`DocumentStoreError::NotUnique`].
fn map_error(err: MongoError) -> DocumentStoreError {
    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        _ => false,
    };

    if duplicate {
        DocumentStoreError::NotUnique(err.to_string())
    } else {
        DocumentStoreError::Backend(err.to_string())
    }
}

fn counter_value(doc: &Document) -> Option<i64> {
    match doc.get("next") {
        Some(Bson::Int64(value)) => Some(*value),
        Some(Bson::Int32(value)) => Some(*value as i64),
        Some(Bson::Double(value)) => Some(*value as i64),
        _ => None,
    }
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
    counters: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self {
            client,
            database,
            counters: DEFAULT_COUNTERS_COLLECTION.to_string(),
        }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(collection_name)
    }

    fn counters(&self) -> MongoCollection<Document> {
        self.get_collection(&self.counters)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        let result = self
            .get_collection(collection)
            .insert_one(document)
            .await
            .map_err(map_error)?;

        debug!(collection = %collection, id = %result.inserted_id, "inserted document");
        Ok(result.inserted_id)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        upsert: bool,
    ) -> DocumentStoreResult<u64> {
        let result = self
            .get_collection(collection)
            .update_many(MongoQueryTranslator::translate(Some(filter))?, update.to_document())
            .upsert(upsert)
            .await
            .map_err(map_error)?;

        debug!(collection = %collection, matched = result.matched_count, "updated documents");
        Ok(result.matched_count + u64::from(result.upserted_id.is_some()))
    }

    async fn find(&self, collection: &str, query: &Query) -> DocumentStoreResult<Vec<Document>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        if !query.sort.is_empty() {
            options.sort = Some(
                query
                    .sort
                    .iter()
                    .map(|sort| {
                        let direction = match sort.direction {
                            SortDirection::Asc => 1,
                            SortDirection::Desc => -1,
                        };
                        (sort.field.clone(), Bson::Int32(direction))
                    })
                    .collect(),
            );
        }
        if let Some(fields) = &query.projection {
            let mut projection = doc! { ID_KEY: 1, DISCRIMINATOR_KEY: 1 };
            for field in fields {
                projection.insert(field.clone(), 1);
            }
            options.projection = Some(projection);
        }

        self.get_collection(collection)
            .find(MongoQueryTranslator::translate(query.filter.as_ref())?)
            .with_options(options)
            .await
            .map_err(map_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(map_error)
    }

    async fn delete(&self, collection: &str, filter: &Expr) -> DocumentStoreResult<u64> {
        let result = self
            .get_collection(collection)
            .delete_many(MongoQueryTranslator::translate(Some(filter))?)
            .await
            .map_err(map_error)?;

        debug!(collection = %collection, removed = result.deleted_count, "deleted documents");
        Ok(result.deleted_count)
    }

    async fn count(&self, collection: &str, filter: Option<&Expr>) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::translate(filter)?)
            .await
            .map_err(map_error)
    }

    async fn allocate_next(&self, counter: &str) -> DocumentStoreResult<i64> {
        let updated = self
            .counters()
            .find_one_and_update(doc! { ID_KEY: counter }, doc! { "$inc": { "next": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_error)?;

        let next = updated.as_ref().and_then(counter_value).ok_or_else(|| {
            DocumentStoreError::InvalidDocument(format!("counter '{}' has no numeric 'next' value", counter))
        })?;
        debug!(counter = %counter, value = next, "allocated counter value");
        Ok(next)
    }

    async fn set_counter(&self, counter: &str, value: i64) -> DocumentStoreResult<()> {
        self.counters()
            .update_one(doc! { ID_KEY: counter }, doc! { "$set": { "next": value } })
            .upsert(true)
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn current_counter(&self, counter: &str) -> DocumentStoreResult<Option<i64>> {
        Ok(self
            .counters()
            .find_one(doc! { ID_KEY: counter })
            .await
            .map_err(map_error)?
            .as_ref()
            .and_then(counter_value))
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(self
            .client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(map_error)?
            .into_iter()
            .filter(|name| name != &self.counters)
            .collect())
    }

    async fn add_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        let mut keys = Document::new();
        keys.insert(index.field.clone(), 1);

        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(
                        IndexOptions::builder()
                            .unique(index.unique)
                            .sparse(index.sparse)
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(map_error)?;

        Ok(())
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.shutdown().await
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    counters: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            counters: DEFAULT_COUNTERS_COLLECTION.to_string(),
        }
    }

    /// Collection holding sequence counters.
    pub fn counters_collection(mut self, name: &str) -> Self {
        self.counters = name.to_string();
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let client = Client::with_options(
            ClientOptions::parse(&self.dsn)
                .await
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
        )
        .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        let mut store = MongoDbStore::new(client, self.database);
        store.counters = self.counters;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_values_accept_any_integer_width() {
        assert_eq!(counter_value(&doc! { "next": 3_i32 }), Some(3));
        assert_eq!(counter_value(&doc! { "next": 4_i64 }), Some(4));
        assert_eq!(counter_value(&doc! { "_id": "c" }), None);
    }

    #[test]
    fn builder_defaults_counters_collection() {
        let builder = MongoDbStore::builder("mongodb://localhost:27017", "app");
        assert_eq!(builder.counters, DEFAULT_COUNTERS_COLLECTION);
        assert_eq!(builder.counters_collection("seq").counters, "seq");
    }
}
