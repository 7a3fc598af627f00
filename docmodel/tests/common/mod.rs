#![allow(dead_code)]

use std::sync::Arc;

use docmodel::{
    backend::StoreBackendBuilder,
    bson::Document,
    memory::InMemoryStore,
    prelude::*,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn memory_store(registry: &Arc<Registry>) -> DocumentStore<InMemoryStore> {
    memory_store_with(registry, StoreOptions::default()).await
}

pub async fn memory_store_with(registry: &Arc<Registry>, options: StoreOptions) -> DocumentStore<InMemoryStore> {
    init_tracing();
    let backend = InMemoryStore::builder().build().await.unwrap();
    DocumentStore::with_options(backend, registry.clone(), options)
}

/// Every raw stored document of a collection, in insertion order.
pub async fn raw_documents(store: &DocumentStore<InMemoryStore>, collection: &str) -> Vec<Document> {
    store.backend().find(collection, &Query::new()).await.unwrap()
}
