mod common;

use std::sync::Arc;

use docmodel::{bson::oid::ObjectId, prelude::*};

use common::{memory_store, memory_store_with, raw_documents};

fn blog_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            ClassDef::document("BlogPost")
                .field(Field::string("title").required().max_length(120))
                .field(Field::list("tags", Field::string("tag")))
                .field(Field::int("views").default(0))
                .field(Field::email("contact").unique().sparse()),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn save_inserts_new_documents_and_assigns_identity() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;

    let mut post = registry.create("BlogPost", values! { "title" => "Hello" }).unwrap();
    assert_eq!(post.lifecycle(), Lifecycle::New);

    store.save(&mut post).await.unwrap();

    assert_eq!(post.lifecycle(), Lifecycle::Persisted);
    assert!(matches!(post.id(), Some(Value::ObjectId(_))));
    assert!(!post.is_dirty());

    let raw = raw_documents(&store, "blog_post").await;
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].keys().next().map(String::as_str), Some("_id"));
    assert_eq!(raw[0].get_str("title").unwrap(), "Hello");
    assert_eq!(raw[0].get_i32("views").unwrap(), 0);
}

#[tokio::test]
async fn saving_a_loaded_document_writes_only_its_changes() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;

    let mut post = registry.create("BlogPost", values! { "title" => "Draft" }).unwrap();
    store.save(&mut post).await.unwrap();
    let id = post.id().cloned().unwrap();

    let mut first = store.get("BlogPost", id.clone()).await.unwrap();
    let mut second = store.get("BlogPost", id.clone()).await.unwrap();

    first.set("title", "Published").unwrap();
    assert_eq!(first.lifecycle(), Lifecycle::Dirty);
    assert_eq!(first.changed_paths().to_vec(), vec!["title".to_string()]);
    store.save(&mut first).await.unwrap();

    second.list_mut("tags").unwrap().push("rust");
    store.save(&mut second).await.unwrap();

    let reloaded = store.get("BlogPost", id).await.unwrap();
    assert_eq!(reloaded.get("title"), Some(&Value::from("Published")));
    assert_eq!(reloaded.get("tags"), Some(&Value::from(vec!["rust"])));
}

#[tokio::test]
async fn unset_fields_are_removed_from_storage() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;

    let mut post = registry
        .create("BlogPost", values! { "title" => "Hi", "contact" => "me@example.com" })
        .unwrap();
    store.save(&mut post).await.unwrap();

    post.unset("contact").unwrap();
    store.save(&mut post).await.unwrap();

    let raw = raw_documents(&store, "blog_post").await;
    assert!(!raw[0].contains_key("contact"));
}

#[tokio::test]
async fn invalid_documents_are_not_written() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;

    let mut post = registry.create("BlogPost", values! { "views" => 3 }).unwrap();
    let err = store.save(&mut post).await.unwrap_err();

    let DocumentStoreError::Validation(err) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert_eq!(err.get("title").map(ValidationError::message), Some("Field is required"));
    assert!(post.is_new());
    assert_eq!(store.count("BlogPost", None).await.unwrap(), 0);
}

#[tokio::test]
async fn reload_discards_local_changes() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;

    let mut post = registry.create("BlogPost", values! { "title" => "Stored" }).unwrap();
    store.save(&mut post).await.unwrap();

    post.set("title", "Local").unwrap();
    store.reload(&mut post).await.unwrap();

    assert_eq!(post.get("title"), Some(&Value::from("Stored")));
    assert!(!post.is_dirty());

    store.objects("BlogPost").unwrap().delete_matching(None).await.unwrap();
    let err = store.reload(&mut post).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DoesNotExist(..)));
}

#[tokio::test]
async fn deleted_documents_cannot_be_saved_by_default() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;

    let mut post = registry.create("BlogPost", values! { "title" => "Gone" }).unwrap();
    store.save(&mut post).await.unwrap();
    store.delete(&mut post).await.unwrap();

    assert!(post.is_deleted());
    assert_eq!(store.count("BlogPost", None).await.unwrap(), 0);
    assert!(matches!(
        store.save(&mut post).await,
        Err(DocumentStoreError::Operation(_))
    ));
}

#[tokio::test]
async fn deleted_documents_can_be_reinserted_when_configured() {
    let registry = blog_registry();
    let store = memory_store_with(
        &registry,
        StoreOptions::new().with_resave_deleted(ResavePolicy::Reinsert),
    )
    .await;

    let mut post = registry.create("BlogPost", values! { "title" => "Back" }).unwrap();
    store.save(&mut post).await.unwrap();
    let id = post.id().cloned();
    store.delete(&mut post).await.unwrap();
    store.save(&mut post).await.unwrap();

    assert_eq!(post.lifecycle(), Lifecycle::Persisted);
    assert_eq!(post.id().cloned(), id);
    assert_eq!(store.count("BlogPost", None).await.unwrap(), 1);
}

#[tokio::test]
async fn unique_fields_reject_duplicates_once_indexed() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;
    store.ensure_indexes("BlogPost").await.unwrap();

    let values = || values! { "title" => "Dup", "contact" => "a@example.com" };
    let mut first = registry.create("BlogPost", values()).unwrap();
    let mut second = registry.create("BlogPost", values()).unwrap();
    store.save(&mut first).await.unwrap();

    assert!(matches!(
        store.save(&mut second).await,
        Err(DocumentStoreError::NotUnique(_))
    ));

    // Sparse: documents without a contact never collide.
    for _ in 0..2 {
        let mut plain = registry.create("BlogPost", values! { "title" => "Plain" }).unwrap();
        store.save(&mut plain).await.unwrap();
    }
    assert_eq!(store.count("BlogPost", None).await.unwrap(), 3);
}

#[tokio::test]
async fn shard_keys_are_immutable_and_filter_updates() {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            ClassDef::document("Account")
                .field(Field::string("region").required())
                .field(Field::int("balance").default(0))
                .shard_key(["region"]),
        )
        .unwrap();
    let store = memory_store(&registry).await;

    let mut account = registry.create("Account", values! { "region" => "eu" }).unwrap();
    store.save(&mut account).await.unwrap();

    account.set("balance", 10).unwrap();
    store.save(&mut account).await.unwrap();
    assert_eq!(
        store.count("Account", Some(Filter::eq("balance", 10))).await.unwrap(),
        1
    );

    account.set("region", "us").unwrap();
    let err = store.save(&mut account).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Operation error: Shard Keys are immutable. Tried to update region"
    );
}

#[tokio::test]
async fn queries_sort_limit_and_project() {
    let registry = blog_registry();
    let store = memory_store(&registry).await;

    for (title, views) in [("b", 2), ("a", 5), ("c", 1)] {
        let mut post = registry
            .create("BlogPost", values! { "title" => title, "views" => views, "tags" => vec!["x"] })
            .unwrap();
        store.save(&mut post).await.unwrap();
    }

    let query = Query::builder()
        .filter(Filter::gte("views", 2))
        .sort("views", SortDirection::Desc)
        .build();
    let titles = store
        .find("BlogPost", query)
        .await
        .unwrap()
        .iter()
        .map(|post| post.get("title").cloned())
        .collect::<Vec<_>>();
    assert_eq!(titles, vec![Some(Value::from("a")), Some(Value::from("b"))]);

    let query = Query::builder()
        .sort("title", SortDirection::Asc)
        .offset(1)
        .limit(1)
        .project(["title"])
        .build();
    let page = store.find("BlogPost", query).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].get("title"), Some(&Value::from("b")));
    assert!(page[0].id().is_some());

    let first = store.find_one("BlogPost", Filter::eq("title", "c")).await.unwrap();
    assert_eq!(first.and_then(|post| post.get("views").cloned()), Some(Value::Int(1)));

    let missing = store.get("BlogPost", ObjectId::new()).await.unwrap_err();
    assert!(matches!(missing, DocumentStoreError::DoesNotExist(..)));
}
