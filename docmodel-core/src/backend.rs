//! Storage backend abstraction for the document store.
//!
//! The [`StoreBackend`] trait is the persistence collaborator the store delegates to: it works
//! on raw BSON documents addressed by collection name and knows nothing about classes,
//! fields or change tracking. Implementations must be thread-safe (`Send + Sync`); the
//! counter and multi-document update operations must be atomic at the storage layer.
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::StoreBackend;
//! use docmodel::query::{Filter, Query};
//! use bson::doc;
//!
//! let id = backend.insert("users", doc! { "name": "Alice" }).await?;
//! let found = backend.find("users", &Query::filtered(Some(Filter::id(id)))).await?;
//! let next = backend.allocate_next("users.number").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{
    error::DocumentStoreResult,
    metadata::IndexSpec,
    query::{Expr, Query},
    update::UpdateSpec,
};

/// Abstract interface for document storage backends.
///
/// # Error Handling
///
/// Uniqueness violations (duplicate `_id`, unique index) must surface as
/// [`DocumentStoreError::NotUnique`](crate::error::DocumentStoreError::NotUnique); other
/// storage failures map to
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts a document, creating the collection if needed, and returns its `_id`.
    ///
    /// A document without `_id` is given a fresh ObjectId.
    async fn insert(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson>;

    /// Applies `update` to every document matching `filter` and returns the number matched.
    ///
    /// With `upsert`, a filter that matches nothing inserts a document seeded from the
    /// filter's equality constraints with the update applied; the result is then 1.
    async fn update(
        &self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        upsert: bool,
    ) -> DocumentStoreResult<u64>;

    /// Returns the documents matching `query`, sorted, paginated and projected.
    async fn find(&self, collection: &str, query: &Query) -> DocumentStoreResult<Vec<Document>>;

    /// Deletes every document matching `filter` and returns the number removed.
    async fn delete(&self, collection: &str, filter: &Expr) -> DocumentStoreResult<u64>;

    /// Counts the documents matching `filter`.
    async fn count(&self, collection: &str, filter: Option<&Expr>) -> DocumentStoreResult<u64> {
        let query = Query::filtered(filter.cloned());
        Ok(self.find(collection, &query).await?.len() as u64)
    }

    /// Atomically increments the named counter and returns the new value. A missing counter
    /// starts at zero, so the first allocation returns 1.
    async fn allocate_next(&self, counter: &str) -> DocumentStoreResult<i64>;

    /// Sets the named counter so the next allocation returns `value + 1`.
    async fn set_counter(&self, counter: &str, value: i64) -> DocumentStoreResult<()>;

    /// The last allocated value, if the counter exists.
    async fn current_counter(&self, counter: &str) -> DocumentStoreResult<Option<i64>>;

    /// Drops a collection and all its documents. Dropping a missing collection is a no-op.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Creates an index. Existing documents violating a unique index yield
    /// [`DocumentStoreError::NotUnique`](crate::error::DocumentStoreError::NotUnique).
    async fn add_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert(&self, collection: &str, document: Document) -> DocumentStoreResult<Bson> {
        (*self).insert(collection, document).await
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Expr,
        update: &UpdateSpec,
        upsert: bool,
    ) -> DocumentStoreResult<u64> {
        (*self)
            .update(collection, filter, update, upsert)
            .await
    }

    async fn find(&self, collection: &str, query: &Query) -> DocumentStoreResult<Vec<Document>> {
        (*self).find(collection, query).await
    }

    async fn delete(&self, collection: &str, filter: &Expr) -> DocumentStoreResult<u64> {
        (*self).delete(collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Option<&Expr>) -> DocumentStoreResult<u64> {
        (*self).count(collection, filter).await
    }

    async fn allocate_next(&self, counter: &str) -> DocumentStoreResult<i64> {
        (*self).allocate_next(counter).await
    }

    async fn set_counter(&self, counter: &str, value: i64) -> DocumentStoreResult<()> {
        (*self).set_counter(counter, value).await
    }

    async fn current_counter(&self, counter: &str) -> DocumentStoreResult<Option<i64>> {
        (*self).current_counter(counter).await
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        (*self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        (*self).list_collections().await
    }

    async fn add_index(&self, collection: &str, index: &IndexSpec) -> DocumentStoreResult<()> {
        (*self).add_index(collection, index).await
    }
}

/// Factory for backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
