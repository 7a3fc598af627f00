//! The class registry.
//!
//! Maps class names and hierarchy paths to resolved [`DocumentMeta`]. Loading a stored
//! document resolves its `_cls` discriminator here, so a registry is shared (behind an
//! `Arc`) by every store and every instance decoded from storage.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    document::DocumentInstance,
    error::{DocumentStoreError, DocumentStoreResult},
    field::FieldKind,
    metadata::{self, ClassDef, DocumentMeta},
    value::Value,
};

/// A cached reference field that resyncs when its target class is saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSyncHook {
    /// Class declaring the cached reference.
    pub owner: String,
    /// Name of the cached reference field.
    pub field: String,
    /// Class the field points to.
    pub target: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    classes: HashMap<String, Arc<DocumentMeta>>,
    paths: HashMap<String, String>,
    order: Vec<String>,
}

/// Thread-safe registry of document classes.
#[derive(Debug, Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves and registers a class declaration.
    ///
    /// Bases must already be registered. Registering a name again replaces the previous
    /// definition.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Configuration`] if the declaration is invalid.
    pub fn register(&self, def: ClassDef) -> DocumentStoreResult<Arc<DocumentMeta>> {
        let meta = {
            let state = self.state.read();
            metadata::resolve(def, |name| state.classes.get(name).cloned())?
        };
        let meta = Arc::new(meta);

        let mut state = self.state.write();
        let name = meta.name().to_string();
        if state.classes.insert(name.clone(), meta.clone()).is_none() {
            state.order.push(name.clone());
        }
        state.paths.retain(|_, class| class != &name);
        state.paths.insert(meta.hierarchy_path().to_string(), name.clone());

        debug!(class = %name, path = %meta.hierarchy_path(), collection = ?meta.collection(), "registered class");
        Ok(meta)
    }

    /// Looks up a class by name.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::NotRegistered`] if no class has that name.
    pub fn get(&self, name: &str) -> DocumentStoreResult<Arc<DocumentMeta>> {
        self.state
            .read()
            .classes
            .get(name)
            .cloned()
            .ok_or_else(|| DocumentStoreError::NotRegistered(name.to_string()))
    }

    /// Looks up a class by hierarchy path, falling back to the bare class name.
    pub fn lookup(&self, name_or_path: &str) -> DocumentStoreResult<Arc<DocumentMeta>> {
        let state = self.state.read();
        state
            .paths
            .get(name_or_path)
            .and_then(|name| state.classes.get(name))
            .or_else(|| state.classes.get(name_or_path))
            .cloned()
            .ok_or_else(|| DocumentStoreError::NotRegistered(name_or_path.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().classes.contains_key(name)
    }

    /// Removes a class. Documents whose discriminator names it can no longer be loaded.
    pub fn unregister(&self, name: &str) -> Option<Arc<DocumentMeta>> {
        let mut state = self.state.write();
        let meta = state.classes.remove(name)?;
        state.paths.retain(|_, class| class != name);
        state.order.retain(|class| class != name);

        debug!(class = %name, "unregistered class");
        Some(meta)
    }

    /// Registered class names in registration order.
    pub fn class_names(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// Hierarchy paths matched by a query on `name`: the class itself (when concrete) and
    /// every concrete descendant, in registration order.
    pub fn subclasses_of(&self, name: &str) -> Vec<String> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|class| state.classes.get(class))
            .filter(|meta| meta.is_a(name) && !meta.is_abstract())
            .map(|meta| meta.hierarchy_path().to_string())
            .collect()
    }

    /// Constructs a new instance of a registered class.
    pub fn create<I, K, V>(&self, name: &str, values: I) -> DocumentStoreResult<DocumentInstance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        DocumentInstance::new(self.get(name)?, values)
    }

    /// Cached reference fields, across all classes, whose target `meta` is or inherits from.
    pub fn cached_references_to(&self, meta: &DocumentMeta) -> Vec<CachedSyncHook> {
        self.cached_hooks(meta, false)
    }

    /// Cached reference fields with `auto_sync` enabled whose target `meta` is or inherits from.
    pub fn cached_sync_hooks(&self, meta: &DocumentMeta) -> Vec<CachedSyncHook> {
        self.cached_hooks(meta, true)
    }

    fn cached_hooks(&self, meta: &DocumentMeta, auto_sync_only: bool) -> Vec<CachedSyncHook> {
        let state = self.state.read();
        let mut hooks = Vec::new();
        for owner in state.order.iter().filter_map(|class| state.classes.get(class)) {
            for field in owner.fields() {
                if let FieldKind::CachedReference { class, auto_sync, .. } = field.kind() {
                    if meta.is_a(class) && (*auto_sync || !auto_sync_only) {
                        hooks.push(CachedSyncHook {
                            owner: owner.name().to_string(),
                            field: field.name().to_string(),
                            target: class.clone(),
                        });
                    }
                }
            }
        }
        hooks
    }
}
