//! An object-document mapper for BSON document stores.
//!
//! Document classes are declared at runtime with [`ClassDef`](metadata::ClassDef) and
//! registered in a shared [`Registry`](registry::Registry). Instances track their own
//! changes, so saving a persisted instance writes only what changed. Storage is pluggable
//! through the [`StoreBackend`](backend::StoreBackend) trait.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let registry = Arc::new(Registry::new());
//!     registry.register(
//!         ClassDef::document("BlogPost")
//!             .field(Field::string("title").required().max_length(120))
//!             .field(Field::list("tags", Field::string("tag"))),
//!     )?;
//!
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?, registry.clone());
//!
//!     let mut post = registry.create("BlogPost", values! { "title" => "Hello" })?;
//!     store.save(&mut post).await?;
//!
//!     // Only the changed list is written back.
//!     post.list_mut("tags")?.push("intro");
//!     store.save(&mut post).await?;
//!
//!     let found = store.find_one("BlogPost", Filter::eq("tags", "intro")).await?;
//!     assert!(found.is_some());
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Inheritance
//!
//! Classes declared with `allow_inheritance(true)` share their collection with every
//! subclass. Stored documents carry a `_cls` hierarchy path, queries against a class
//! return instances of it and its subclasses, and loading picks the stored concrete class.
//!
//! ```ignore
//! registry.register(ClassDef::document("Animal").allow_inheritance(true).field(Field::string("name")))?;
//! registry.register(ClassDef::document("Dog").extends("Animal"))?;
//!
//! let mut rex = registry.create("Dog", values! { "name" => "Rex" })?;
//! store.save(&mut rex).await?;
//!
//! let animals = store.objects("Animal")?.all().await?;
//! assert_eq!(animals[0].class_name(), "Dog");
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-process storage for development and testing
//! - [`mongodb`] - MongoDB storage (requires the `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{
    backend, collection, document, error, field, metadata, query, reference, registry, store, tracking, update,
    value, values,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{DEFAULT_COUNTERS_COLLECTION, MongoDbStore, MongoDbStoreBuilder};
}
