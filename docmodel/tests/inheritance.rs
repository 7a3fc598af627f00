mod common;

use std::sync::Arc;

use docmodel::prelude::*;

use common::{memory_store, raw_documents};

fn zoo_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            ClassDef::document("Animal")
                .allow_inheritance(true)
                .field(Field::string("name")),
        )
        .unwrap();
    registry
        .register(ClassDef::document("Fish").extends("Animal").field(Field::boolean("freshwater")))
        .unwrap();
    registry.register(ClassDef::document("Mammal").extends("Animal")).unwrap();
    registry.register(ClassDef::document("Dog").extends("Mammal")).unwrap();
    registry.register(ClassDef::document("Human").extends("Mammal")).unwrap();
    registry
}

fn class_names(docs: &[DocumentInstance]) -> Vec<&str> {
    docs.iter().map(DocumentInstance::class_name).collect()
}

#[tokio::test]
async fn subclasses_share_the_base_collection() {
    let registry = zoo_registry();
    let store = memory_store(&registry).await;

    for class in ["Animal", "Fish", "Mammal", "Dog", "Human"] {
        let mut doc = registry.create(class, values! { "name" => class }).unwrap();
        store.save(&mut doc).await.unwrap();
    }

    let raw = raw_documents(&store, "animal").await;
    let paths = raw
        .iter()
        .map(|doc| doc.get_str("_cls").unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        paths,
        vec!["Animal", "Animal.Fish", "Animal.Mammal", "Animal.Mammal.Dog", "Animal.Mammal.Human"]
    );
    assert_eq!(raw[3].keys().take(2).map(String::as_str).collect::<Vec<_>>(), vec!["_id", "_cls"]);
    assert_eq!(store.backend().list_collections().await.unwrap(), vec!["animal".to_string()]);
}

#[tokio::test]
async fn queries_return_the_class_and_its_subclasses() {
    let registry = zoo_registry();
    let store = memory_store(&registry).await;

    for class in ["Animal", "Fish", "Mammal", "Dog", "Human"] {
        let mut doc = registry.create(class, values! { "name" => class }).unwrap();
        store.save(&mut doc).await.unwrap();
    }

    let animals = store.objects("Animal").unwrap().all().await.unwrap();
    assert_eq!(class_names(&animals), vec!["Animal", "Fish", "Mammal", "Dog", "Human"]);

    let mammals = store.objects("Mammal").unwrap().all().await.unwrap();
    assert_eq!(class_names(&mammals), vec!["Mammal", "Dog", "Human"]);

    let dogs = store.objects("Dog").unwrap().all().await.unwrap();
    assert_eq!(class_names(&dogs), vec!["Dog"]);

    assert_eq!(store.count("Mammal", None).await.unwrap(), 3);
    assert_eq!(
        store.count("Animal", Some(Filter::starts_with("name", "H"))).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn loading_through_a_base_class_yields_the_stored_subclass() {
    let registry = zoo_registry();
    let store = memory_store(&registry).await;

    let mut nemo = registry
        .create("Fish", values! { "name" => "Nemo", "freshwater" => false })
        .unwrap();
    store.save(&mut nemo).await.unwrap();

    let loaded = store.get("Animal", nemo.id().cloned().unwrap()).await.unwrap();
    assert_eq!(loaded.class_name(), "Fish");
    assert!(loaded.meta().is_a("Animal"));
    assert_eq!(loaded.get("freshwater"), Some(&Value::Bool(false)));

    let err = store.get("Mammal", nemo.id().cloned().unwrap()).await.unwrap_err();
    assert!(matches!(err, DocumentStoreError::DoesNotExist(..)));
}

#[tokio::test]
async fn abstract_bases_contribute_fields_without_a_collection() {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            ClassDef::document("Timestamped")
                .abstract_class()
                .field(Field::datetime("created")),
        )
        .unwrap();
    registry
        .register(ClassDef::document("AuditEntry").extends("Timestamped").field(Field::string("action")))
        .unwrap();
    let store = memory_store(&registry).await;

    let meta = registry.get("AuditEntry").unwrap();
    assert_eq!(meta.collection(), Some("audit_entry"));
    assert!(meta.field("created").is_some());
    assert!(!meta.emits_discriminator());

    assert!(matches!(
        registry.create("Timestamped", values! {}),
        Err(DocumentStoreError::Operation(_))
    ));
    assert!(matches!(
        store.drop_collection("Timestamped").await,
        Err(DocumentStoreError::Operation(_))
    ));

    let mut entry = registry.create("AuditEntry", values! { "action" => "login" }).unwrap();
    store.save(&mut entry).await.unwrap();
    let raw = raw_documents(&store, "audit_entry").await;
    assert!(!raw[0].contains_key("_cls"));
}

#[tokio::test]
async fn classes_without_inheritance_cannot_be_extended() {
    let registry = Arc::new(Registry::new());
    registry.register(ClassDef::document("Sealed")).unwrap();

    let err = registry
        .register(ClassDef::document("Child").extends("Sealed"))
        .unwrap_err();
    assert!(matches!(err, DocumentStoreError::Configuration(_)));
    assert!(err.to_string().contains("may not be subclassed"));
}
