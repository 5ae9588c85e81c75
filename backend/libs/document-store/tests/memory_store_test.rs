//! Integration tests for the in-memory document store
//!
//! These tests verify:
//! 1. Filtered scans and ordered keyed lookups
//! 2. Atomic batch application (a failing op discards the whole batch)
//! 3. Injected commit failures and the commit log

use document_store::{
    DocumentStore, FieldPath, FieldUpdate, Filter, MemoryDocumentStore, StoreError,
};
use serde_json::json;

async fn seeded_store() -> MemoryDocumentStore {
    let store = MemoryDocumentStore::new();
    store
        .insert("Questions", "q2", json!({"theme": "Histoire", "timesAnswered": 3}))
        .await;
    store
        .insert("Questions", "q1", json!({"theme": "Géographie", "timesAnswered": 1}))
        .await;
    store
        .insert("Questions", "q3", json!({"theme": "Géographie", "timesAnswered": 0}))
        .await;
    store
}

#[tokio::test]
async fn test_scan_is_ordered_by_key() {
    let store = seeded_store().await;

    let docs = store.scan("Questions", &[]).await.unwrap();
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();

    assert_eq!(ids, vec!["q1", "q2", "q3"]);
}

#[tokio::test]
async fn test_scan_with_equality_filter() {
    let store = seeded_store().await;

    let docs = store
        .scan(
            "Questions",
            &[Filter::Equals(FieldPath::field("theme"), json!("Géographie"))],
        )
        .await
        .unwrap();

    assert_eq!(docs.len(), 2);
    assert!(docs.iter().all(|d| d.get("theme") == Some(&json!("Géographie"))));
}

#[tokio::test]
async fn test_scan_of_unknown_collection_is_empty() {
    let store = MemoryDocumentStore::new();
    assert!(store.scan("Nope", &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_many_preserves_request_order() {
    let store = seeded_store().await;

    let ids = vec!["q3".to_string(), "missing".to_string(), "q1".to_string()];
    let lookups = store.get_many("Questions", &ids).await.unwrap();

    assert_eq!(lookups.len(), 3);
    assert_eq!(lookups[0].id, "q3");
    assert!(lookups[0].exists);
    assert_eq!(lookups[1].id, "missing");
    assert!(!lookups[1].exists);
    assert!(lookups[1].fields.is_empty());
    assert!(lookups[2].exists);
}

#[tokio::test]
async fn test_batch_with_missing_document_is_not_applied() {
    let store = seeded_store().await;

    let mut batch = store.new_batch();
    batch
        .update(
            "Questions",
            "q1",
            vec![(FieldPath::field("timesAnswered"), FieldUpdate::Increment(10))],
        )
        .unwrap();
    batch
        .update(
            "Questions",
            "ghost",
            vec![(FieldPath::field("timesAnswered"), FieldUpdate::Increment(1))],
        )
        .unwrap();

    let err = store.commit(batch).await.unwrap_err();
    assert!(matches!(err, StoreError::DocumentNotFound { .. }));

    let q1 = store.get("Questions", "q1").await.unwrap();
    assert_eq!(q1["timesAnswered"], json!(1));
    assert!(store.committed_batch_sizes().await.is_empty());
}

#[tokio::test]
async fn test_delete_and_update_in_one_batch() {
    let store = seeded_store().await;

    let mut batch = store.new_batch();
    batch.delete("Questions", "q2").unwrap();
    batch
        .update(
            "Questions",
            "q3",
            vec![(FieldPath::field("difficulty"), FieldUpdate::Set(json!(7)))],
        )
        .unwrap();
    store.commit(batch).await.unwrap();

    assert_eq!(store.count("Questions").await, 2);
    assert!(store.get("Questions", "q2").await.is_none());
    assert_eq!(store.get("Questions", "q3").await.unwrap()["difficulty"], json!(7));
    assert_eq!(store.committed_batch_sizes().await, vec![2]);
}

#[tokio::test]
async fn test_injected_failure_only_hits_selected_attempt() {
    let store = seeded_store().await;
    store.fail_commit(1).await;

    let mut first = store.new_batch();
    first.delete("Questions", "q1").unwrap();
    let err = store.commit(first).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.count("Questions").await, 3);

    let mut second = store.new_batch();
    second.delete("Questions", "q1").unwrap();
    store.commit(second).await.unwrap();

    assert_eq!(store.count("Questions").await, 2);
    assert_eq!(store.commit_attempts().await, 2);
}

#[tokio::test]
async fn test_new_batch_uses_store_limit() {
    let store = MemoryDocumentStore::with_max_batch_ops(3);
    let mut batch = store.new_batch();
    for i in 0..3 {
        batch.delete("AnswerLogs", format!("l{i}")).unwrap();
    }
    assert!(batch.delete("AnswerLogs", "l3").is_err());
    assert_eq!(batch.limit(), 3);
}
