//! In-memory storage implementation for document stores.
//!
//! Documents are kept per collection in insertion order behind async-safe read-write locks.
//! Counters live under their own lock so allocation never waits on a collection scan.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::debug;

use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    document::{DISCRIMINATOR_KEY, ID_KEY},
    error::{DocumentStoreError, DocumentStoreResult},
    metadata::IndexSpec,
    query::{Expr, Query, SortDirection},
    update::{UpdateSpec, get_path, set_path},
};

use crate::evaluator::{DocumentEvaluator, sort_order};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    /// Checks `candidate` against `_id` and every unique index, ignoring the document at `skip`.
    fn check_unique(&self, name: &str, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(position, _)| Some(*position) != skip)
                .map(|(_, doc)| doc)
        };

        if let Some(id) = candidate.get(ID_KEY) {
            if others().any(|doc| doc.get(ID_KEY) == Some(id)) {
                return Err(duplicate(name, ID_KEY, id));
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let value = match get_path(candidate, &index.field) {
                Some(value) => value,
                None if index.sparse => continue,
                None => &Bson::Null,
            };
            let clash = others().any(|doc| match get_path(doc, &index.field) {
                Some(existing) => existing == value,
                None => !index.sparse && matches!(value, Bson::Null),
            });
            if clash {
                return Err(duplicate(name, &index.field, value));
            }
        }
        Ok(())
    }
}

fn duplicate(collection: &str, key: &str, value: &Bson) -> DocumentStoreError {
    DocumentStoreError::NotUnique(format!(
        "duplicate key error collection: {} index: {} dup key: {}",
        collection, key, value
    ))
}

/// Thread-safe in-memory document storage backend.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection; indexes only enforce uniqueness.
///
/// # Example
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let id = store.insert("users", doc! { "name": "Alice" }).await?;
/// assert_eq!(store.allocate_next("users.number").await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents in insertion order
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    /// counter name -> last allocated value
    counters: Arc<RwLock<HashMap<String, i64>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

fn project(doc: &Document, fields: &[String]) -> Document {
    let mut projected = Document::new();
    for key in [ID_KEY, DISCRIMINATOR_KEY] {
        if let Some(value) = doc.get(key) {
            projected.insert(key, value.clone());
        }
    }
    for path in fields {
        if let Some(value) = get_path(doc, path) {
            set_path(&mut projected, path, value.clone());
        }
    }
    projected
}

/// A document seeded from a filter's equality constraints, for upserts.
fn seed(filter: &Expr) -> Document {
    let mut doc = Document::new();
    for (path, value) in filter.equalities() {
        if !path.starts_with('$') {
            set_path(&mut doc, path, value.clone());
        }
    }
    doc
}

fn with_id_first(doc: Document) -> (Bson, Document) {
    if let Some(id) = doc.get(ID_KEY) {
        return (id.clone(), doc);
    }
    let id = Bson::ObjectId(ObjectId::new());
    let mut ordered = Document::new();
    ordered.insert(ID_KEY, id.clone());
    for (key, value) in doc {
        ordered.insert(key, value);
    }
    (id, ordered)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        let (id, document) = with_id_first(document);

        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        entry.check_unique(collection, &document, None)?;
        entry.documents.push(document);

        debug!(collection = %collection, id = %id, "inserted document");
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        upsert: bool,
    ) -> DocumentStoreResult<u64> {
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();

        let mut matched = Vec::new();
        for (position, doc) in entry.documents.iter().enumerate() {
            if DocumentEvaluator::matches(doc, Some(filter))? {
                matched.push(position);
            }
        }

        if matched.is_empty() {
            if !upsert {
                return Ok(0);
            }
            let mut doc = seed(filter);
            update.apply(&mut doc);
            let (id, doc) = with_id_first(doc);
            entry.check_unique(collection, &doc, None)?;
            entry.documents.push(doc);
            debug!(collection = %collection, id = %id, "upserted document");
            return Ok(1);
        }

        let mut updated = Vec::with_capacity(matched.len());
        for &position in &matched {
            let mut doc = entry.documents[position].clone();
            let id = doc.get(ID_KEY).cloned();
            update.apply(&mut doc);
            if let Some(id) = id {
                doc.insert(ID_KEY, id);
            }
            entry.check_unique(collection, &doc, Some(position))?;
            updated.push((position, doc));
        }
        for (position, doc) in updated {
            entry.documents[position] = doc;
        }

        debug!(collection = %collection, matched = matched.len(), "updated documents");
        Ok(matched.len() as u64)
    }

    async fn find(&self, collection: &str, query: &Query) -> DocumentStoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(entry) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for doc in &entry.documents {
            if DocumentEvaluator::matches(doc, query.filter.as_ref())? {
                found.push(doc);
            }
        }

        if !query.sort.is_empty() {
            found.sort_by(|a, b| {
                query
                    .sort
                    .iter()
                    .map(|sort| {
                        let ordering = sort_order(get_path(a, &sort.field), get_path(b, &sort.field));
                        match sort.direction {
                            SortDirection::Asc => ordering,
                            SortDirection::Desc => ordering.reverse(),
                        }
                    })
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        Ok(found
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|doc| match &query.projection {
                Some(fields) => project(doc, fields),
                None => doc.clone(),
            })
            .collect())
    }

    async fn delete(&self, collection: &str, filter: &Expr) -> DocumentStoreResult<u64> {
        let mut collections = self.collections.write().await;
        let Some(entry) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut doomed = Vec::with_capacity(entry.documents.len());
        for doc in &entry.documents {
            doomed.push(DocumentEvaluator::matches(doc, Some(filter))?);
        }
        let removed = doomed.iter().filter(|&&matched| matched).count() as u64;
        let mut doomed = doomed.into_iter();
        entry.documents.retain(|_| !doomed.next().unwrap_or(false));

        debug!(collection = %collection, removed, "deleted documents");
        Ok(removed)
    }

    async fn count(&self, collection: &str, filter: Option<&Expr>) -> DocumentStoreResult<u64> {
        let collections = self.collections.read().await;
        let Some(entry) = collections.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for doc in &entry.documents {
            if DocumentEvaluator::matches(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn allocate_next(&self, counter: &str) -> DocumentStoreResult<i64> {
        let mut counters = self.counters.write().await;
        let next = counters.entry(counter.to_string()).or_insert(0);
        *next += 1;

        debug!(counter = %counter, value = *next, "allocated counter value");
        Ok(*next)
    }

    async fn set_counter(&self, counter: &str, value: i64) -> DocumentStoreResult<()> {
        self.counters.write().await.insert(counter.to_string(), value);
        Ok(())
    }

    async fn current_counter(&self, counter: &str) -> DocumentStoreResult<Option<i64>> {
        Ok(self.counters.read().await.get(counter).copied())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.collections.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    async fn add_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.indexes.iter().any(|existing| existing.field == index.field) {
            return Ok(());
        }

        entry.indexes.push(index.clone());
        let violation = entry
            .documents
            .iter()
            .enumerate()
            .find_map(|(position, doc)| entry.check_unique(collection, doc, Some(position)).err());
        if let Some(err) = violation {
            entry.indexes.pop();
            return Err(err);
        }
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docmodel_memory::InMemoryStore;
/// use docmodel::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use docmodel_core::query::Filter;

    use super::*;

    #[tokio::test]
    async fn insert_assigns_id_first() {
        let store = InMemoryStore::builder().build().await.unwrap();
        let id = store.insert("users", doc! { "name": "Alice" }).await.unwrap();

        let found = store.find("users", &Query::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].keys().next().map(String::as_str), Some("_id"));
        assert_eq!(found[0].get("_id"), Some(&id));
    }

    #[tokio::test]
    async fn duplicate_ids_and_unique_indexes_are_rejected() {
        let store = InMemoryStore::new();
        store.insert("users", doc! { "_id": 1, "email": "a@x.io" }).await.unwrap();

        let err = store.insert("users", doc! { "_id": 1 }).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::NotUnique(_)));

        store.add_index("users", &IndexSpec::new("email").unique()).await.unwrap();
        store.insert("users", doc! { "_id": 2, "email": "b@x.io" }).await.unwrap();

        let mut update = UpdateSpec::new();
        update.set("email", Bson::String("a@x.io".into()));
        let err = store.update("users", &Filter::id(2), &update, false).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::NotUnique(_)));
    }

    #[tokio::test]
    async fn sparse_unique_indexes_ignore_missing_values() {
        let store = InMemoryStore::new();
        store.add_index("users", &IndexSpec::new("nick").unique().sparse()).await.unwrap();
        store.insert("users", doc! { "name": "a" }).await.unwrap();
        store.insert("users", doc! { "name": "b" }).await.unwrap();
        assert_eq!(store.count("users", None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn updates_apply_dotted_paths_and_upsert_from_filter() {
        let store = InMemoryStore::new();
        store
            .insert("posts", doc! { "_id": 1, "author": { "_id": 7, "name": "old" } })
            .await
            .unwrap();

        let mut update = UpdateSpec::new();
        update.set("author.name", Bson::String("new".into()));
        let matched = store.update("posts", &Filter::eq("author._id", 7), &update, false).await.unwrap();
        assert_eq!(matched, 1);

        let found = store.find("posts", &Query::new()).await.unwrap();
        assert_eq!(found[0], doc! { "_id": 1, "author": { "_id": 7, "name": "new" } });

        let mut update = UpdateSpec::new();
        update.set("title", Bson::String("t".into()));
        store.update("posts", &Filter::id(2).and(Filter::eq("shard", "eu")), &update, true).await.unwrap();
        let upserted = store.find("posts", &Query::filtered(Some(Filter::id(2)))).await.unwrap();
        assert_eq!(upserted, vec![doc! { "_id": 2, "shard": "eu", "title": "t" }]);
    }

    #[tokio::test]
    async fn find_sorts_paginates_and_projects() {
        let store = InMemoryStore::new();
        for (id, age) in [(1, 30), (2, 20), (3, 40), (4, 20)] {
            store.insert("people", doc! { "_id": id, "age": age, "name": format!("p{}", id) }).await.unwrap();
        }

        let query = Query::builder()
            .sort("age", SortDirection::Asc)
            .sort("_id", SortDirection::Desc)
            .offset(1)
            .limit(2)
            .project(["age"])
            .build();
        let found = store.find("people", &query).await.unwrap();

        assert_eq!(found, vec![doc! { "_id": 2, "age": 20 }, doc! { "_id": 1, "age": 30 }]);
    }

    #[tokio::test]
    async fn counters_allocate_from_one() {
        let store = InMemoryStore::new();
        assert_eq!(store.current_counter("c").await.unwrap(), None);
        assert_eq!(store.allocate_next("c").await.unwrap(), 1);
        assert_eq!(store.allocate_next("c").await.unwrap(), 2);

        store.set_counter("c", 100).await.unwrap();
        assert_eq!(store.allocate_next("c").await.unwrap(), 101);
    }

    async fn insert_and_delete<B: StoreBackend>(backend: B) -> u64 {
        backend.insert("items", doc! { "n": 1 }).await.unwrap();
        backend.delete("items", &Filter::eq("n", 1)).await.unwrap()
    }

    #[tokio::test]
    async fn borrowed_backend_delegates() {
        let store = InMemoryStore::new();
        assert_eq!(insert_and_delete(&store).await, 1);
        assert_eq!(store.list_collections().await.unwrap(), vec!["items".to_string()]);
        assert_eq!(store.count("items", None).await.unwrap(), 0);
    }
}
