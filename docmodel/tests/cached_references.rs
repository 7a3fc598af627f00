mod common;

use std::sync::Arc;

use docmodel::{bson::doc, prelude::*};

use common::{memory_store, raw_documents};

fn registry(auto_sync: bool) -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            ClassDef::document("Person")
                .field(Field::string("name"))
                .field(Field::int("age")),
        )
        .unwrap();
    registry
        .register(
            ClassDef::document("Post")
                .field(Field::string("title"))
                .field(Field::cached_reference("author", "Person", ["name"]).auto_sync(auto_sync)),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn cached_references_store_a_snapshot() {
    let registry = registry(false);
    let store = memory_store(&registry).await;

    let mut ada = registry.create("Person", values! { "name" => "Ada", "age" => 36 }).unwrap();
    store.save(&mut ada).await.unwrap();
    let mut post = registry
        .create("Post", values! { "title" => "Engines", "author" => ada.clone() })
        .unwrap();
    store.save(&mut post).await.unwrap();

    let raw = raw_documents(&store, "post").await;
    let id = ada.id_bson().unwrap().unwrap();
    assert_eq!(raw[0].get_document("author").unwrap(), &doc! { "_id": id, "name": "Ada" });

    let loaded = store.get("Post", post.id().cloned().unwrap()).await.unwrap();
    let reference = loaded.get("author").and_then(Value::as_reference).unwrap();
    assert_eq!(reference.snapshot().unwrap().get_str("name").unwrap(), "Ada");
    assert!(!reference.is_resolved());
}

#[tokio::test]
async fn snapshots_resync_on_request() {
    let registry = registry(false);
    let store = memory_store(&registry).await;

    let mut ada = registry.create("Person", values! { "name" => "Ada" }).unwrap();
    store.save(&mut ada).await.unwrap();
    for title in ["One", "Two"] {
        let mut post = registry
            .create("Post", values! { "title" => title, "author" => ada.clone() })
            .unwrap();
        store.save(&mut post).await.unwrap();
    }
    let mut untouched = registry.create("Post", values! { "title" => "Anonymous" }).unwrap();
    store.save(&mut untouched).await.unwrap();

    ada.set("name", "Ada Lovelace").unwrap();
    store.save(&mut ada).await.unwrap();

    let stale = raw_documents(&store, "post").await;
    assert_eq!(stale[0].get_document("author").unwrap().get_str("name").unwrap(), "Ada");

    assert_eq!(store.sync_cached_references("Post", "author").await.unwrap(), 2);

    let synced = raw_documents(&store, "post").await;
    for raw in &synced[..2] {
        assert_eq!(raw.get_document("author").unwrap().get_str("name").unwrap(), "Ada Lovelace");
    }
    assert!(!synced[2].contains_key("author"));
}

#[tokio::test]
async fn auto_sync_follows_saves_of_the_target() {
    let registry = registry(true);
    let store = memory_store(&registry).await;

    let mut ada = registry.create("Person", values! { "name" => "Ada", "age" => 36 }).unwrap();
    store.save(&mut ada).await.unwrap();
    let mut post = registry
        .create("Post", values! { "title" => "Engines", "author" => ada.clone() })
        .unwrap();
    store.save(&mut post).await.unwrap();

    ada.set("name", "Countess").unwrap();
    store.save(&mut ada).await.unwrap();

    let raw = raw_documents(&store, "post").await;
    assert_eq!(raw[0].get_document("author").unwrap().get_str("name").unwrap(), "Countess");

    // Fields outside the snapshot leave it alone.
    ada.set("age", 37).unwrap();
    store.save(&mut ada).await.unwrap();
    let raw = raw_documents(&store, "post").await;
    assert!(!raw[0].get_document("author").unwrap().contains_key("age"));
}

#[tokio::test]
async fn resync_requires_a_cached_reference_field() {
    let registry = registry(false);
    let store = memory_store(&registry).await;

    assert!(matches!(
        store.sync_cached_references("Post", "title").await,
        Err(DocumentStoreError::Operation(_))
    ));
    assert!(matches!(
        store.sync_cached_references("Post", "missing").await,
        Err(DocumentStoreError::UnknownField { .. })
    ));
}
