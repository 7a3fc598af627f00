mod common;

use std::sync::Arc;

use docmodel::prelude::*;

use common::{memory_store, raw_documents};

fn library_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .register(ClassDef::document("Author").field(Field::string("name").required()))
        .unwrap();
    registry
        .register(
            ClassDef::document("Book")
                .field(Field::string("title"))
                .field(Field::reference("author", "Author"))
                .field(Field::reference("editor", "Author").auto_dereference(false))
                .field(Field::list("reviewers", Field::reference("reviewer", "Author")))
                .field(Field::reference("sequel", "self")),
        )
        .unwrap();
    registry
}

async fn saved_author(
    registry: &Registry,
    store: &DocumentStore<docmodel::memory::InMemoryStore>,
    name: &str,
) -> DocumentInstance {
    let mut author = registry.create("Author", values! { "name" => name }).unwrap();
    store.save(&mut author).await.unwrap();
    author
}

#[tokio::test]
async fn references_store_the_target_identity() {
    let registry = library_registry();
    let store = memory_store(&registry).await;

    let author = saved_author(&registry, &store, "Ursula").await;
    let mut book = registry
        .create("Book", values! { "title" => "Earthsea", "author" => author.clone() })
        .unwrap();
    store.save(&mut book).await.unwrap();

    let raw = raw_documents(&store, "book").await;
    assert_eq!(raw[0].get("author"), author.id_bson().unwrap().as_ref());
}

#[tokio::test]
async fn dereference_fetches_the_target_on_first_access() {
    let registry = library_registry();
    let store = memory_store(&registry).await;

    let author = saved_author(&registry, &store, "Ursula").await;
    let mut book = registry
        .create("Book", values! { "title" => "Earthsea", "author" => author.clone() })
        .unwrap();
    store.save(&mut book).await.unwrap();

    let mut loaded = store.get("Book", book.id().cloned().unwrap()).await.unwrap();
    assert!(!loaded.get("author").and_then(Value::as_reference).unwrap().is_resolved());

    let target = store.dereference(&mut loaded, "author").await.unwrap();
    let target = target.document().unwrap();
    assert_eq!(target.get("name"), Some(&Value::from("Ursula")));

    // Resolution is cached in the instance and does not count as a change.
    assert!(loaded.get("author").and_then(Value::as_reference).unwrap().is_resolved());
    assert!(!loaded.is_dirty());

    assert!(store.dereference(&mut loaded, "sequel").await.unwrap().is_null());
}

#[tokio::test]
async fn disabled_dereferencing_yields_the_raw_pointer() {
    let registry = library_registry();
    let store = memory_store(&registry).await;

    let author = saved_author(&registry, &store, "Ursula").await;
    let id = author.id_bson().unwrap().unwrap();
    let mut book = registry
        .create("Book", values! { "author" => author.clone(), "editor" => author })
        .unwrap();
    store.save(&mut book).await.unwrap();

    let mut loaded = store.get("Book", book.id().cloned().unwrap()).await.unwrap();
    match store.dereference(&mut loaded, "editor").await.unwrap() {
        Dereferenced::Raw(pointer) => {
            assert_eq!(pointer.class(), "Author");
            assert_eq!(pointer.id(), &id);
        }
        other => panic!("expected a raw pointer, got {other:?}"),
    }

    // Clones of the in-memory backend share their data.
    let raw_store = DocumentStore::with_options(
        store.backend().clone(),
        registry.clone(),
        StoreOptions::new().with_auto_dereference(false),
    );
    let mut copy = raw_store.get("Book", book.id().cloned().unwrap()).await.unwrap();
    match raw_store.dereference(&mut copy, "author").await.unwrap() {
        Dereferenced::Raw(pointer) => assert_eq!(pointer.id(), &id),
        other => panic!("expected a raw pointer, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_targets_raise_does_not_exist() {
    let registry = library_registry();
    let store = memory_store(&registry).await;

    let mut author = saved_author(&registry, &store, "Gone").await;
    let mut book = registry
        .create("Book", values! { "author" => author.clone() })
        .unwrap();
    store.save(&mut book).await.unwrap();
    store.delete(&mut author).await.unwrap();

    let mut loaded = store.get("Book", book.id().cloned().unwrap()).await.unwrap();
    let err = store.dereference(&mut loaded, "author").await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DoesNotExist(..)));
}

#[tokio::test]
async fn unsaved_targets_fail_validation() {
    let registry = library_registry();
    let store = memory_store(&registry).await;

    let author = registry.create("Author", values! { "name" => "Draft" }).unwrap();
    let mut book = registry.create("Book", values! { "author" => author }).unwrap();

    let Err(DocumentStoreError::Validation(err)) = store.save(&mut book).await else {
        panic!("expected a validation error");
    };
    assert_eq!(
        err.get("author").map(ValidationError::message),
        Some("You can only reference documents once they have been saved to the database")
    );
}

#[tokio::test]
async fn reference_lists_resolve_every_item() {
    let registry = library_registry();
    let store = memory_store(&registry).await;

    let first = saved_author(&registry, &store, "Ann").await;
    let second = saved_author(&registry, &store, "Bob").await;
    let mut book = registry
        .create("Book", values! { "reviewers" => vec![first, second] })
        .unwrap();
    store.save(&mut book).await.unwrap();

    let mut loaded = store.get("Book", book.id().cloned().unwrap()).await.unwrap();
    let names = store
        .dereference_list(&mut loaded, "reviewers")
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.document().and_then(|doc| doc.get("name")).cloned())
        .collect::<Vec<_>>();
    assert_eq!(names, vec![Some(Value::from("Ann")), Some(Value::from("Bob"))]);
}

#[tokio::test]
async fn references_resolve_to_the_stored_subclass() {
    let registry = Arc::new(Registry::new());
    registry
        .register(ClassDef::document("Animal").allow_inheritance(true).field(Field::string("name")))
        .unwrap();
    registry.register(ClassDef::document("Dog").extends("Animal")).unwrap();
    registry
        .register(
            ClassDef::document("Owner")
                .field(Field::reference("pet", "Animal"))
                .field(Field::generic_reference("favorite")),
        )
        .unwrap();
    let store = memory_store(&registry).await;

    let mut rex = registry.create("Dog", values! { "name" => "Rex" }).unwrap();
    store.save(&mut rex).await.unwrap();
    let mut owner = registry
        .create("Owner", values! { "pet" => rex.clone(), "favorite" => rex.clone() })
        .unwrap();
    store.save(&mut owner).await.unwrap();

    let raw = raw_documents(&store, "owner").await;
    let favorite = raw[0].get_document("favorite").unwrap();
    assert_eq!(favorite.get_str("_cls").unwrap(), "Animal.Dog");
    assert_eq!(favorite.get_document("_ref").unwrap().get_str("$ref").unwrap(), "animal");

    let mut loaded = store.get("Owner", owner.id().cloned().unwrap()).await.unwrap();
    let pet = store.dereference(&mut loaded, "pet").await.unwrap();
    assert_eq!(pet.document().map(DocumentInstance::class_name), Some("Dog"));
    let favorite = store.dereference(&mut loaded, "favorite").await.unwrap();
    assert_eq!(
        favorite.document().and_then(|doc| doc.id_bson().unwrap()),
        rex.id_bson().unwrap()
    );
}
