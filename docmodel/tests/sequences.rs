mod common;

use std::sync::Arc;

use futures::future::join_all;

use docmodel::prelude::*;

use common::memory_store;

fn ticket_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            ClassDef::document("Ticket")
                .field(Field::sequence("number"))
                .field(Field::sequence("code").value_decorator(|n| Value::from(format!("T-{:04}", n))))
                .field(Field::string("subject")),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn sequence_fields_are_allocated_on_first_save() {
    let registry = ticket_registry();
    let store = memory_store(&registry).await;

    let mut first = registry.create("Ticket", values! { "subject" => "a" }).unwrap();
    let mut second = registry.create("Ticket", values! { "subject" => "b" }).unwrap();
    store.save(&mut first).await.unwrap();
    store.save(&mut second).await.unwrap();

    assert_eq!(first.get("number"), Some(&Value::Int(1)));
    assert_eq!(second.get("number"), Some(&Value::Int(2)));
    assert_eq!(second.get("code"), Some(&Value::from("T-0002")));

    // Saving again keeps the allocated values.
    second.set("subject", "b2").unwrap();
    store.save(&mut second).await.unwrap();
    assert_eq!(second.get("number"), Some(&Value::Int(2)));
    assert_eq!(store.peek_sequence_value("Ticket", "number").await.unwrap(), Value::Int(3));
}

#[tokio::test]
async fn counters_can_be_peeked_and_reset() {
    let registry = ticket_registry();
    let store = memory_store(&registry).await;

    assert_eq!(store.peek_sequence_value("Ticket", "number").await.unwrap(), Value::Int(1));
    assert_eq!(store.next_sequence_value("Ticket", "number").await.unwrap(), Value::Int(1));

    store.set_sequence_value("Ticket", "number", 100).await.unwrap();
    assert_eq!(store.peek_sequence_value("Ticket", "number").await.unwrap(), Value::Int(101));

    let mut ticket = registry.create("Ticket", values! {}).unwrap();
    store.save(&mut ticket).await.unwrap();
    assert_eq!(ticket.get("number"), Some(&Value::Int(101)));

    // Counters are keyed by collection and field.
    assert_eq!(store.backend().current_counter("ticket.number").await.unwrap(), Some(101));
    assert!(matches!(
        store.next_sequence_value("Ticket", "subject").await,
        Err(DocumentStoreError::Operation(_))
    ));
}

#[tokio::test]
async fn named_sequences_are_shared_between_classes() {
    let registry = Arc::new(Registry::new());
    for class in ["Invoice", "CreditNote"] {
        registry
            .register(ClassDef::document(class).field(Field::sequence("number").sequence_name("ledger")))
            .unwrap();
    }
    let store = memory_store(&registry).await;

    let mut invoice = registry.create("Invoice", values! {}).unwrap();
    let mut note = registry.create("CreditNote", values! {}).unwrap();
    store.save(&mut invoice).await.unwrap();
    store.save(&mut note).await.unwrap();

    assert_eq!(invoice.get("number"), Some(&Value::Int(1)));
    assert_eq!(note.get("number"), Some(&Value::Int(2)));
    assert_eq!(store.backend().current_counter("ledger.number").await.unwrap(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_never_repeat() {
    let registry = ticket_registry();
    let store = Arc::new(memory_store(&registry).await);

    let tasks = (0..10).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.next_sequence_value("Ticket", "number").await })
    });

    let mut values = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().as_i64().unwrap())
        .collect::<Vec<_>>();
    values.sort_unstable();

    assert_eq!(values, (1..=10).collect::<Vec<_>>());
}

#[tokio::test]
async fn failed_inserts_give_back_the_assigned_value() {
    let registry = Arc::new(Registry::new());
    registry
        .register(
            ClassDef::document("Badge")
                .field(Field::sequence("number"))
                .field(Field::string("holder").unique()),
        )
        .unwrap();
    let store = memory_store(&registry).await;
    store.ensure_indexes("Badge").await.unwrap();

    let mut first = registry.create("Badge", values! { "holder" => "ada" }).unwrap();
    store.save(&mut first).await.unwrap();

    let mut duplicate = registry.create("Badge", values! { "holder" => "ada" }).unwrap();
    assert!(matches!(
        store.save(&mut duplicate).await,
        Err(DocumentStoreError::NotUnique(_))
    ));
    assert_eq!(duplicate.get("number"), None);
    assert!(duplicate.is_new());

    // The counter is not rewound, so the retry takes the next value.
    duplicate.set("holder", "grace").unwrap();
    store.save(&mut duplicate).await.unwrap();
    assert_eq!(duplicate.get("number"), Some(&Value::Int(3)));
}
