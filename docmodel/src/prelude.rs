//! Convenient re-exports of commonly used types from docmodel.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```

pub use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    collection::ClassCollection,
    document::{DocumentInstance, Lifecycle},
    error::{DocumentStoreError, DocumentStoreResult, ValidationError},
    field::Field,
    metadata::{ClassDef, DocumentMeta, IndexSpec},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, Sort, SortDirection},
    reference::{DocumentRef, Reference},
    registry::Registry,
    store::{Dereferenced, DocumentStore, ResavePolicy, StoreOptions},
    tracking::{EmbeddedList, TrackedDict, TrackedList},
    update::UpdateSpec,
    value::{Value, ValueMap},
    values,
};
