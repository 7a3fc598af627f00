//! In-memory document storage backend for docmodel.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Atomic counters** - Sequence allocation under a single write lock
//! - **Dotted-path queries and updates** - Paths reach into subdocuments and arrays
//! - **Unique indexes** - Duplicate `_id` values and unique-index clashes raise `NotUnique`
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use docmodel::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(Registry::new());
//!     registry.register(ClassDef::document("User").field(Field::string("name")))?;
//!
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend, registry.clone());
//!
//!     let mut user = registry.create("User", values! { "name" => "Alice" })?;
//!     store.save(&mut user).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
