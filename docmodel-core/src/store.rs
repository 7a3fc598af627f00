//! The document store: persistence of document instances through a backend.
//!
//! [`DocumentStore`] binds a [`StoreBackend`] to a shared [`Registry`]. It turns instances
//! into inserts or minimal partial updates, resolves references, allocates sequence values
//! and keeps cached references in sync.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let store = DocumentStore::new(backend, registry.clone());
//! let mut user = registry.create("User", values! { "name" => "Alice" })?;
//! store.save(&mut user).await?;
//!
//! user.set("name", "Alicia")?;
//! store.save(&mut user).await?; // {"$set": {"name": "Alicia"}}
//!
//! let users = store.objects("User")?.all().await?;
//! ```

use std::sync::Arc;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    backend::StoreBackend,
    collection::ClassCollection,
    document::{DocumentInstance, ID_KEY},
    error::{DocumentStoreError, DocumentStoreResult},
    field::{Field, FieldKind, SequenceRules},
    metadata::DocumentMeta,
    query::{Expr, Filter, Query},
    reference::{DocumentRef, Reference, cached_snapshot},
    registry::{CachedSyncHook, Registry},
    tracking::ChangedPaths,
    update::{UpdateSpec, get_path},
    value::Value,
};

/// What saving a deleted instance does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResavePolicy {
    /// Fail with [`DocumentStoreError::Operation`].
    #[default]
    Reject,
    /// Insert the instance again as a new document.
    Reinsert,
}

/// Store-wide behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    resave_deleted: ResavePolicy,
    auto_dereference: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            resave_deleted: ResavePolicy::Reject,
            auto_dereference: true,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resave_deleted(mut self, policy: ResavePolicy) -> Self {
        self.resave_deleted = policy;
        self
    }

    /// When disabled, no reference is ever resolved implicitly.
    pub fn with_auto_dereference(mut self, enabled: bool) -> Self {
        self.auto_dereference = enabled;
        self
    }

    pub fn resave_deleted(&self) -> ResavePolicy {
        self.resave_deleted
    }

    pub fn auto_dereference(&self) -> bool {
        self.auto_dereference
    }
}

/// The result of reading a reference field.
#[derive(Debug, Clone, Copy)]
pub enum Dereferenced<'a> {
    /// The field is unset.
    Null,
    /// Auto-dereferencing is disabled; only the stored identity is available.
    Raw(&'a DocumentRef),
    Document(&'a DocumentInstance),
}

impl<'a> Dereferenced<'a> {
    pub fn document(&self) -> Option<&'a DocumentInstance> {
        match self {
            Dereferenced::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Dereferenced::Null)
    }
}

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    registry: Arc<Registry>,
    options: StoreOptions,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend and default options.
    pub fn new(backend: B, registry: Arc<Registry>) -> Self {
        Self::with_options(backend, registry, StoreOptions::default())
    }

    pub fn with_options(backend: B, registry: Arc<Registry>, options: StoreOptions) -> Self {
        Self {
            backend,
            registry,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Query access to the documents of a class and its subclasses.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotRegistered`] for unknown classes and
    /// [`DocumentStoreError::Operation`] for classes without a collection.
    pub fn objects(&self, class: &str) -> DocumentStoreResult<ClassCollection<'_, B>> {
        ClassCollection::new(self.registry.get(class)?, &self.backend, &self.registry)
    }

    /// Finds the instances of `class` matching `query`.
    pub async fn find(&self, class: &str, query: Query) -> DocumentStoreResult<Vec<DocumentInstance>> {
        self.objects(class)?.find(query).await
    }

    pub async fn find_one(&self, class: &str, filter: Expr) -> DocumentStoreResult<Option<DocumentInstance>> {
        self.objects(class)?.first(Some(filter)).await
    }

    /// Loads the instance of `class` with identity `id`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DoesNotExist`] if there is no such document.
    pub async fn get(&self, class: &str, id: impl Into<Value>) -> DocumentStoreResult<DocumentInstance> {
        self.objects(class)?.get(id).await
    }

    pub async fn count(&self, class: &str, filter: Option<Expr>) -> DocumentStoreResult<u64> {
        self.objects(class)?.count(filter).await
    }

    /// Validates and persists an instance.
    ///
    /// A new instance is inserted in full. A persisted instance is written as a partial update
    /// of its changed paths, filtered by identity and shard key; nothing is written when
    /// nothing changed. Afterwards the instance is [`Lifecycle::Persisted`](crate::document::Lifecycle)
    /// with no recorded changes.
    ///
    /// Sequence fields are allocated just before the write. If the write fails they are unset
    /// again, and a retry allocates fresh values.
    ///
    /// # Errors
    ///
    /// - [`DocumentStoreError::Validation`] if any field is invalid; nothing is written.
    /// - [`DocumentStoreError::Operation`] for embedded classes, classes without a collection,
    ///   shard key changes, and deleted instances under [`ResavePolicy::Reject`].
    /// - [`DocumentStoreError::NotUnique`] if the backend rejects a duplicate.
    pub async fn save(&self, doc: &mut DocumentInstance) -> DocumentStoreResult<()> {
        let meta = doc.meta().clone();
        if meta.is_embedded() {
            return Err(DocumentStoreError::Operation(format!(
                "embedded document {} cannot be saved on its own",
                meta.name()
            )));
        }
        let collection = meta.require_collection()?.to_string();

        if doc.is_deleted() {
            match self.options.resave_deleted {
                ResavePolicy::Reject => {
                    return Err(DocumentStoreError::Operation(format!(
                        "cannot save deleted document {}",
                        meta.name()
                    )));
                }
                ResavePolicy::Reinsert => doc.mark_new(),
            }
        }

        doc.validate()?;

        let was_new = doc.is_new();
        let changed = doc.changed_paths();
        if !was_new {
            check_shard_key(&meta, &changed)?;
        }

        let allocated = self.allocate_sequences(&meta, doc).await?;
        if let Err(err) = self.write(&meta, &collection, doc, was_new).await {
            doc.discard_values(&allocated);
            return Err(err);
        }

        let stored = doc.to_storage_form(None)?;
        doc.mark_saved(stored);

        if !was_new {
            self.run_cached_sync_hooks(&meta, doc, &changed).await?;
        }
        Ok(())
    }

    async fn write(
        &self,
        meta: &DocumentMeta,
        collection: &str,
        doc: &mut DocumentInstance,
        was_new: bool,
    ) -> DocumentStoreResult<()> {
        if was_new {
            let stored = doc.to_storage_form(None)?;
            let id = self.backend.insert(collection, stored).await?;
            doc.assign_storage_id(id, &self.registry)?;
            debug!(class = %meta.name(), collection = %collection, "inserted document");
            return Ok(());
        }

        let delta = doc.delta()?;
        if !delta.is_empty() {
            let filter = self.identity_filter(meta, doc)?;
            self.backend.update(collection, &filter, &delta, true).await?;
            debug!(
                class = %meta.name(),
                collection = %collection,
                paths = delta.sets().len() + delta.unsets().len(),
                "updated document"
            );
        }
        Ok(())
    }

    /// Deletes a persisted instance; it becomes [`Lifecycle::Deleted`](crate::document::Lifecycle).
    pub async fn delete(&self, doc: &mut DocumentInstance) -> DocumentStoreResult<()> {
        let meta = doc.meta().clone();
        let collection = meta.require_collection()?.to_string();
        let filter = self.identity_filter(&meta, doc)?;

        let removed = self.backend.delete(&collection, &filter).await?;
        debug!(class = %meta.name(), collection = %collection, removed, "deleted document");

        doc.mark_deleted();
        Ok(())
    }

    /// Discards in-memory changes and reloads the instance from storage.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DoesNotExist`] if the document is no longer stored.
    pub async fn reload(&self, doc: &mut DocumentInstance) -> DocumentStoreResult<()> {
        let meta = doc.meta().clone();
        let collection = meta.require_collection()?.to_string();
        let id = require_id(doc)?;

        let query = Query::builder().filter(Filter::id(id.clone())).limit(1).build();
        let raw = self
            .backend
            .find(&collection, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::DoesNotExist(meta.name().to_string(), id.to_string()))?;

        *doc = DocumentInstance::from_storage_form(&meta, raw, &self.registry)?;
        debug!(class = %meta.name(), collection = %collection, "reloaded document");
        Ok(())
    }

    /// Reads a reference field, fetching the target on first access.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::DoesNotExist`] if the target is gone and
    /// [`DocumentStoreError::NotRegistered`] if its stored class is unknown.
    pub async fn dereference<'a>(
        &self,
        doc: &'a mut DocumentInstance,
        name: &str,
    ) -> DocumentStoreResult<Dereferenced<'a>> {
        let auto = self.resolves(doc, name)?;

        match (auto, doc.value_mut_untracked(name)) {
            (_, None) => Ok(Dereferenced::Null),
            (true, Some(Value::Reference(reference))) => {
                self.resolve_reference(reference).await?;
                let reference: &'a Reference = reference;
                Ok(reference
                    .document()
                    .map_or(Dereferenced::Null, Dereferenced::Document))
            }
            (false, Some(Value::Reference(reference))) => Ok(Dereferenced::Raw(reference.pointer())),
            (_, Some(other)) => Err(DocumentStoreError::Operation(format!(
                "field '{}' holds a {}, not a reference",
                name,
                other.type_name()
            ))),
        }
    }

    /// Reads a list of references, fetching every unresolved target.
    pub async fn dereference_list<'a>(
        &self,
        doc: &'a mut DocumentInstance,
        name: &str,
    ) -> DocumentStoreResult<Vec<Dereferenced<'a>>> {
        let auto = self.resolves(doc, name)?;

        let items = match doc.value_mut_untracked(name) {
            None => return Ok(Vec::new()),
            Some(Value::List(items)) => items,
            Some(other) => {
                return Err(DocumentStoreError::Operation(format!(
                    "field '{}' holds a {}, not a list",
                    name,
                    other.type_name()
                )));
            }
        };

        if auto {
            for item in items.iter_mut() {
                if let Value::Reference(reference) = item {
                    self.resolve_reference(reference).await?;
                }
            }
        }

        let items: &'a [Value] = items;
        Ok(items
            .iter()
            .map(|item| match item {
                Value::Reference(reference) if auto => reference
                    .document()
                    .map_or(Dereferenced::Null, Dereferenced::Document),
                Value::Reference(reference) => Dereferenced::Raw(reference.pointer()),
                _ => Dereferenced::Null,
            })
            .collect())
    }

    fn resolves(&self, doc: &DocumentInstance, name: &str) -> DocumentStoreResult<bool> {
        let field = doc.field(name).ok_or_else(|| DocumentStoreError::UnknownField {
            class: doc.class_name().to_string(),
            field: name.to_string(),
        })?;
        Ok(self.options.auto_dereference && field.dereferences())
    }

    /// Fetches the target of an unresolved reference. The stored `_cls` of the target selects
    /// its concrete class.
    pub async fn resolve_reference(&self, reference: &mut Reference) -> DocumentStoreResult<()> {
        if reference.is_resolved() {
            return Ok(());
        }

        let pointer = reference.pointer();
        let meta = self.registry.lookup(pointer.class())?;
        let collection = match pointer.collection() {
            Some(collection) => collection.to_string(),
            None => meta.require_collection()?.to_string(),
        };

        let query = Query::builder().filter(Filter::id(pointer.id().clone())).limit(1).build();
        let raw = self
            .backend
            .find(&collection, &query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DocumentStoreError::DoesNotExist(meta.name().to_string(), pointer.id().to_string()))?;

        let target = DocumentInstance::from_storage_form(&meta, raw, &self.registry)?;
        reference.resolve(target);
        Ok(())
    }

    /// Rewrites the snapshot of every `owner.field` cached reference from its current target,
    /// one multi-document update per target. Returns the number of owner documents matched.
    pub async fn sync_cached_references(&self, owner: &str, field: &str) -> DocumentStoreResult<u64> {
        let owner_meta = self.registry.get(owner)?;
        let (storage_key, target_class, fields) = cached_reference_field(&owner_meta, field)?;
        let collection = owner_meta.require_collection()?.to_string();

        let id_path = format!("{}.{}", storage_key, ID_KEY);
        let query = Query::builder().filter(Filter::exists(id_path.clone())).project([id_path.clone()]).build();
        let mut ids: Vec<Bson> = Vec::new();
        for raw in self.backend.find(&collection, &query).await? {
            if let Some(id) = get_path(&raw, &id_path) {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
        }

        let targets = self.objects(&target_class)?;
        let mut matched = 0;
        for id in &ids {
            let target = match targets.get_by_stored_id(id.clone()).await {
                Ok(target) => target,
                Err(DocumentStoreError::DoesNotExist(..)) => continue,
                Err(err) => return Err(err),
            };
            let snapshot = cached_snapshot(&target, &fields)?;
            matched += self.write_snapshot(&collection, &storage_key, id, snapshot).await?;
        }

        if matched == 0 && !ids.is_empty() {
            warn!(class = %owner, field = %field, targets = ids.len(), "cached reference resync matched no documents");
        }
        debug!(class = %owner, field = %field, matched, "synced cached references");
        Ok(matched)
    }

    async fn write_snapshot(
        &self,
        collection: &str,
        storage_key: &str,
        id: &Bson,
        snapshot: Document,
    ) -> DocumentStoreResult<u64> {
        let filter = Filter::eq(format!("{}.{}", storage_key, ID_KEY), id.clone());
        let mut update = UpdateSpec::new();
        update.set(storage_key, Bson::Document(snapshot));
        self.backend.update(collection, &filter, &update, false).await
    }

    /// Pushes a saved target's snapshot to owners whose `auto_sync` cached references point at
    /// it, when the save touched any snapshot field.
    async fn run_cached_sync_hooks(
        &self,
        meta: &DocumentMeta,
        target: &DocumentInstance,
        changed: &ChangedPaths,
    ) -> DocumentStoreResult<()> {
        let hooks = self.registry.cached_sync_hooks(meta);
        if hooks.is_empty() {
            return Ok(());
        }
        let Some(id) = target.id_bson()? else {
            return Ok(());
        };

        for CachedSyncHook { owner, field, .. } in hooks {
            let owner_meta = self.registry.get(&owner)?;
            let (storage_key, _, fields) = cached_reference_field(&owner_meta, &field)?;

            let touched = fields.iter().any(|name| {
                let key = meta.field(name).map_or(name.as_str(), Field::storage_key);
                changed.iter().any(|path| path == key || path.starts_with(&format!("{}.", key)))
            });
            if !touched {
                continue;
            }

            let collection = owner_meta.require_collection()?;
            let snapshot = cached_snapshot(target, &fields)?;
            let matched = self.write_snapshot(collection, &storage_key, &id, snapshot).await?;
            debug!(class = %owner, field = %field, matched, "resynced cached reference after save");
        }
        Ok(())
    }

    /// Drops the collection of a class.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Operation`] for abstract classes and classes without a collection.
    pub async fn drop_collection(&self, class: &str) -> DocumentStoreResult<()> {
        let meta = self.registry.get(class)?;
        let collection = meta.require_collection()?;
        self.backend.drop_collection(collection).await?;
        debug!(class = %class, collection = %collection, "dropped collection");
        Ok(())
    }

    /// Creates the declared and unique-field indexes of a class.
    pub async fn ensure_indexes(&self, class: &str) -> DocumentStoreResult<()> {
        let meta = self.registry.get(class)?;
        let collection = meta.require_collection()?;
        for index in meta.indexes() {
            self.backend.add_index(collection, &index).await?;
        }
        Ok(())
    }

    /// Allocates the next value of a sequence field.
    pub async fn next_sequence_value(&self, class: &str, field: &str) -> DocumentStoreResult<Value> {
        let meta = self.registry.get(class)?;
        let (counter, sequence) = sequence_counter(&meta, field)?;
        let next = self.backend.allocate_next(&counter).await?;
        debug!(counter = %counter, value = next, "allocated sequence value");
        Ok(decorate(sequence, next))
    }

    /// The value the next allocation will return, without allocating it.
    pub async fn peek_sequence_value(&self, class: &str, field: &str) -> DocumentStoreResult<Value> {
        let meta = self.registry.get(class)?;
        let (counter, sequence) = sequence_counter(&meta, field)?;
        let current = self.backend.current_counter(&counter).await?.unwrap_or(0);
        Ok(decorate(sequence, current + 1))
    }

    /// Sets the counter of a sequence field so the next allocation returns `value + 1`.
    pub async fn set_sequence_value(&self, class: &str, field: &str, value: i64) -> DocumentStoreResult<()> {
        let meta = self.registry.get(class)?;
        let (counter, _) = sequence_counter(&meta, field)?;
        self.backend.set_counter(&counter, value).await
    }

    /// Fills unset sequence fields and returns their names. On failure the values assigned so
    /// far are discarded again; counters are never given back.
    async fn allocate_sequences(&self, meta: &DocumentMeta, doc: &mut DocumentInstance) -> DocumentStoreResult<Vec<String>> {
        let mut allocated = Vec::new();

        for field in meta.fields() {
            if !matches!(field.kind(), FieldKind::Sequence(_)) || doc.contains(field.name()) {
                continue;
            }
            let result = match sequence_counter(meta, field.name()) {
                Ok((counter, sequence)) => self.backend.allocate_next(&counter).await.map(|next| {
                    debug!(counter = %counter, value = next, "allocated sequence value");
                    decorate(sequence, next)
                }),
                Err(err) => Err(err),
            };
            match result.and_then(|value| doc.set(field.name(), value)) {
                Ok(()) => allocated.push(field.name().to_string()),
                Err(err) => {
                    doc.discard_values(&allocated);
                    return Err(err);
                }
            }
        }
        Ok(allocated)
    }

    /// Filter selecting a persisted instance: its identity and stored shard key values.
    fn identity_filter(&self, meta: &DocumentMeta, doc: &DocumentInstance) -> DocumentStoreResult<Expr> {
        let mut filter = Filter::id(require_id(doc)?);

        let stored = match doc.shadow() {
            Some(shadow) => shadow.clone(),
            None => doc.to_storage_form(None)?,
        };
        for name in meta.shard_key() {
            let key = meta.field(name).map_or(name.as_str(), Field::storage_key);
            if key == ID_KEY {
                continue;
            }
            if let Some(value) = get_path(&stored, key) {
                filter = filter.and(Filter::eq(key, value.clone()));
            }
        }
        Ok(filter)
    }

    /// Shuts down the store and its backend.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }
}

fn require_id(doc: &DocumentInstance) -> DocumentStoreResult<Bson> {
    doc.id_bson()?.ok_or_else(|| {
        DocumentStoreError::Operation(format!("document {} has not been saved", doc.class_name()))
    })
}

fn check_shard_key(meta: &DocumentMeta, changed: &ChangedPaths) -> DocumentStoreResult<()> {
    for name in meta.shard_key() {
        let key = meta.field(name).map_or(name.as_str(), Field::storage_key);
        if changed.iter().any(|path| path == key || path.starts_with(&format!("{}.", key))) {
            return Err(DocumentStoreError::Operation(format!(
                "Shard Keys are immutable. Tried to update {}",
                name
            )));
        }
    }
    Ok(())
}

fn cached_reference_field(meta: &DocumentMeta, name: &str) -> DocumentStoreResult<(String, String, Vec<String>)> {
    let field = meta.field(name).ok_or_else(|| DocumentStoreError::UnknownField {
        class: meta.name().to_string(),
        field: name.to_string(),
    })?;
    match field.kind() {
        FieldKind::CachedReference { class, fields, .. } => {
            Ok((field.storage_key().to_string(), class.clone(), fields.clone()))
        }
        _ => Err(DocumentStoreError::Operation(format!(
            "field '{}' of {} is not a cached reference",
            name,
            meta.name()
        ))),
    }
}

/// Counter id of a sequence field: `<sequence_name or collection>.<field>`.
fn sequence_counter<'m>(
    meta: &'m DocumentMeta,
    name: &str,
) -> DocumentStoreResult<(String, &'m SequenceRules)> {
    let field = meta.field(name).ok_or_else(|| DocumentStoreError::UnknownField {
        class: meta.name().to_string(),
        field: name.to_string(),
    })?;
    let FieldKind::Sequence(rules) = field.kind() else {
        return Err(DocumentStoreError::Operation(format!(
            "field '{}' of {} is not a sequence field",
            name,
            meta.name()
        )));
    };

    let base = match &rules.sequence_name {
        Some(sequence) => sequence.as_str(),
        None => meta.require_collection()?,
    };
    Ok((format!("{}.{}", base, field.name()), rules))
}

fn decorate(rules: &SequenceRules, value: i64) -> Value {
    match &rules.value_decorator {
        Some(decorator) => decorator(value),
        None => Value::Int(value),
    }
}
