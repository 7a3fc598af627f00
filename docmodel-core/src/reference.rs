//! References between documents.
//!
//! A [`Reference`] stores the target's identity, and for generic references its class path.
//! It starts [`RefState::Unresolved`] when decoded from storage and becomes
//! [`RefState::Resolved`] once the store fetches the target, so each reference is fetched at
//! most once. A reference built from an instance at assignment time is resolved from the
//! start and holds a copy of that instance: later changes to the original are not seen
//! through the reference, and changes made through the reference never mark the owner.

use std::fmt;

use bson::{Bson, Document};

use crate::{
    document::{DISCRIMINATOR_KEY, DocumentInstance, ID_KEY},
    error::DocumentStoreResult,
};

/// The stored identity of a referenced document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef {
    class: String,
    id: Bson,
    collection: Option<String>,
}

impl DocumentRef {
    /// `class` is a class name or hierarchy path.
    pub fn new(class: impl Into<String>, id: impl Into<Bson>) -> Self {
        Self {
            class: class.into(),
            id: id.into(),
            collection: None,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn id(&self) -> &Bson {
        &self.id
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.class, self.id)
    }
}

#[derive(Debug, Clone)]
pub enum RefState {
    Unresolved,
    Resolved(Box<DocumentInstance>),
}

/// A reference field value.
#[derive(Debug, Clone)]
pub struct Reference {
    pointer: DocumentRef,
    snapshot: Option<Document>,
    state: RefState,
}

impl Reference {
    pub fn unresolved(pointer: DocumentRef) -> Self {
        Self {
            pointer,
            snapshot: None,
            state: RefState::Unresolved,
        }
    }

    /// A reference to `target`. An unsaved target yields a null identity, which fails validation.
    pub fn resolved(target: DocumentInstance) -> Self {
        let meta = target.meta();
        let id = target.id_bson().ok().flatten().unwrap_or(Bson::Null);
        let mut pointer = DocumentRef::new(meta.name(), id);
        if let Some(collection) = meta.collection() {
            pointer = pointer.with_collection(collection);
        }

        Self {
            pointer,
            snapshot: None,
            state: RefState::Resolved(Box::new(target)),
        }
    }

    /// An unresolved cached reference holding its stored snapshot.
    pub fn cached(pointer: DocumentRef, snapshot: Document) -> Self {
        Self {
            pointer,
            snapshot: Some(snapshot),
            state: RefState::Unresolved,
        }
    }

    pub fn pointer(&self) -> &DocumentRef {
        &self.pointer
    }

    pub fn id(&self) -> &Bson {
        &self.pointer.id
    }

    pub fn state(&self) -> &RefState {
        &self.state
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, RefState::Resolved(_))
    }

    /// The target, if it has been resolved.
    pub fn document(&self) -> Option<&DocumentInstance> {
        match &self.state {
            RefState::Resolved(doc) => Some(doc),
            RefState::Unresolved => None,
        }
    }

    pub fn document_mut(&mut self) -> Option<&mut DocumentInstance> {
        match &mut self.state {
            RefState::Resolved(doc) => Some(doc),
            RefState::Unresolved => None,
        }
    }

    /// The denormalized fields stored with a cached reference.
    pub fn snapshot(&self) -> Option<&Document> {
        self.snapshot.as_ref()
    }

    pub(crate) fn resolve(&mut self, target: DocumentInstance) {
        self.state = RefState::Resolved(Box::new(target));
    }
}

/// References are equal when they point at the same identity, resolved or not.
impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.pointer.id == other.pointer.id
    }
}

/// The snapshot a cached reference stores for `target`: `_id` first, then the listed fields.
pub fn cached_snapshot(target: &DocumentInstance, fields: &[String]) -> DocumentStoreResult<Document> {
    let names = fields.iter().map(String::as_str).collect::<Vec<_>>();
    let partial = target.to_storage_form(Some(&names))?;

    let mut snapshot = Document::new();
    snapshot.insert(ID_KEY, target.id_bson()?.unwrap_or(Bson::Null));
    for (key, value) in partial {
        if key != ID_KEY && key != DISCRIMINATOR_KEY {
            snapshot.insert(key, value);
        }
    }
    Ok(snapshot)
}
