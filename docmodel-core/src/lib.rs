//! An object-document mapper over pluggable BSON document stores.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Values** ([`value`]) - The native value model held by document instances
//! - **Field descriptors** ([`field`]) - Conversion, validation and display per field kind
//! - **Class metadata** ([`metadata`], [`registry`]) - Declarations resolved into flat field tables
//! - **Document instances** ([`document`]) - Field access, change tracking and storage forms
//! - **Tracked containers** ([`tracking`]) - List and dict views that record their mutations
//! - **References** ([`reference`]) - Lazily resolved and cached references between documents
//! - **Query and update ASTs** ([`query`], [`update`]) - Backend-neutral filters and partial updates
//! - **Store backend abstraction** ([`backend`]) - The trait storage implementations provide
//! - **Document store** ([`store`], [`collection`]) - Saving, loading and querying instances
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let registry = Arc::new(Registry::new());
//! registry.register(
//!     ClassDef::document("User")
//!         .field(Field::string("name").required().max_length(50))
//!         .field(Field::email("email").unique()),
//! )?;
//!
//! let mut user = registry.create("User", values! { "name" => "Alice" })?;
//! user.validate()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmodel_core;

pub mod backend;
pub mod collection;
pub mod document;
pub mod error;
pub mod field;
pub mod metadata;
pub mod query;
pub mod reference;
pub mod registry;
pub mod store;
pub mod tracking;
pub mod update;
pub mod value;
