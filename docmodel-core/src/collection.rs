//! Class-scoped query access.
//!
//! A [`ClassCollection`] reads the collection of one class. For classes with inheritance
//! enabled every query is restricted to the class and its concrete subclasses through the
//! stored `_cls` discriminator, and each result is decoded as the most specific class its
//! discriminator names.
//!
//! # Example
//!
//! ```ignore
//! let mammals = store.objects("Mammal")?;
//! let dogs = mammals.find(Query::filtered(Some(Filter::eq("name", "Rex")))).await?;
//! let first = mammals.first(None).await?;
//! ```

use std::sync::Arc;

use bson::Bson;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    document::{DISCRIMINATOR_KEY, DocumentInstance},
    error::{DocumentStoreError, DocumentStoreResult},
    metadata::DocumentMeta,
    query::{Expr, Filter, Query},
    registry::Registry,
    value::Value,
};

/// The documents of one class within its collection.
#[derive(Debug)]
pub struct ClassCollection<'a, B: StoreBackend> {
    meta: Arc<DocumentMeta>,
    name: String,
    backend: &'a B,
    registry: &'a Registry,
}

impl<'a, B: StoreBackend> ClassCollection<'a, B> {
    pub(crate) fn new(meta: Arc<DocumentMeta>, backend: &'a B, registry: &'a Registry) -> DocumentStoreResult<Self> {
        let name = meta.require_collection()?.to_string();
        Ok(Self {
            meta,
            name,
            backend,
            registry,
        })
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &Arc<DocumentMeta> {
        &self.meta
    }

    /// The `_cls` restriction for inheritance-enabled classes.
    fn class_scope(&self) -> Option<Expr> {
        if !self.meta.allow_inheritance() {
            return None;
        }
        let paths = self.registry.subclasses_of(self.meta.name());
        Some(Filter::any_of(DISCRIMINATOR_KEY, paths))
    }

    fn scoped(&self, query: Query) -> Query {
        match self.class_scope() {
            Some(scope) => query.restrict(scope),
            None => query,
        }
    }

    fn scoped_filter(&self, filter: Option<Expr>) -> Option<Expr> {
        match (self.class_scope(), filter) {
            (Some(scope), Some(filter)) => Some(scope.and(filter)),
            (scope, filter) => scope.or(filter),
        }
    }

    /// Finds the documents matching `query`, in backend order unless the query sorts.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotRegistered`] if a stored discriminator names an
    /// unknown class.
    pub async fn find(&self, query: Query) -> DocumentStoreResult<Vec<DocumentInstance>> {
        let query = self.scoped(query);
        let raw = self.backend.find(&self.name, &query).await?;
        debug!(class = %self.meta.name(), collection = %self.name, found = raw.len(), "queried documents");

        raw.into_iter()
            .map(|doc| DocumentInstance::from_storage_form(&self.meta, doc, self.registry))
            .collect()
    }

    pub async fn all(&self) -> DocumentStoreResult<Vec<DocumentInstance>> {
        self.find(Query::new()).await
    }

    pub async fn first(&self, filter: Option<Expr>) -> DocumentStoreResult<Option<DocumentInstance>> {
        let query = Query {
            filter,
            limit: Some(1),
            ..Query::default()
        };
        Ok(self.find(query).await?.into_iter().next())
    }

    /// Loads the document with identity `id`, given in native form.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DoesNotExist`] if there is no such document.
    pub async fn get(&self, id: impl Into<Value>) -> DocumentStoreResult<DocumentInstance> {
        let id = id.into();
        let stored = match self.meta.id_field() {
            Some(field) => field.to_storage(&id)?,
            None => {
                return Err(DocumentStoreError::Operation(format!(
                    "class {} has no identity field",
                    self.meta.name()
                )));
            }
        };
        self.get_by_stored_id(stored).await
    }

    /// Loads the document whose stored `_id` is `id`.
    pub async fn get_by_stored_id(&self, id: Bson) -> DocumentStoreResult<DocumentInstance> {
        self.first(Some(Filter::id(id.clone())))
            .await?
            .ok_or_else(|| DocumentStoreError::DoesNotExist(self.meta.name().to_string(), id.to_string()))
    }

    pub async fn count(&self, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        let filter = self.scoped_filter(filter);
        self.backend.count(&self.name, filter.as_ref()).await
    }

    /// Deletes every document of this class matching `filter` and returns the number removed.
    pub async fn delete_matching(&self, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        let filter = self.scoped_filter(filter).unwrap_or_else(|| Expr::And(Vec::new()));
        let removed = self.backend.delete(&self.name, &filter).await?;
        debug!(class = %self.meta.name(), collection = %self.name, removed, "deleted matching documents");
        Ok(removed)
    }
}
