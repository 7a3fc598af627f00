//! MongoDB backend for docmodel.
//!
//! This crate implements the `StoreBackend` trait on top of the official MongoDB driver.
//! Filters are translated into native query documents, partial updates are sent as
//! `$set`/`$unset` operations and sequence counters live in a dedicated collection.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .counters_collection("app.counters")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_mongodb;

pub mod query;
pub mod store;

pub use store::{DEFAULT_COUNTERS_COLLECTION, MongoDbStore, MongoDbStoreBuilder};
