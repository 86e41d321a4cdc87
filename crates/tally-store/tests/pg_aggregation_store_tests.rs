//! Integration tests for `PgAggregationStore`.

use std::sync::Arc;

use sqlx::PgPool;
use tally_core::aggregation::{AggregationKey, AggregationStore, UpsertOutcome};
use tally_core::event::{EventDetail, EventInfo, ResolvedEvent, TrackingEvent};
use tally_store::pg_aggregation_store::PgAggregationStore;

/// Helper to build a resolved event for store1/client1 with sensible defaults.
fn make_resolved(event_id: &str, status: &str) -> ResolvedEvent {
    TrackingEvent {
        store_id: "store1".to_owned(),
        client_id: "client1".to_owned(),
        bucket_date: 1_700_000_000,
        event_type: "event_type1".to_owned(),
        count: 1,
        event: EventInfo {
            event_id: event_id.to_owned(),
            timestamp: 1_700_000_001,
            status: "provisional".to_owned(),
        },
    }
    .resolve(status)
}

fn key() -> AggregationKey {
    AggregationKey {
        store_id: "store1".to_owned(),
        client_id: "client1".to_owned(),
        bucket_date: 1_700_000_000,
    }
}

async fn row_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM aggregation_documents")
        .fetch_one(pool)
        .await
        .unwrap()
}

// --- insert ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_find_returns_none_for_unknown_key(pool: PgPool) {
    let store = PgAggregationStore::new(pool);

    assert!(store.find(&key()).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_first_upsert_creates_exact_document(pool: PgPool) {
    let store = PgAggregationStore::new(pool.clone());

    let outcome = store.upsert(&make_resolved("evt1", "success")).await.unwrap();

    assert_eq!(outcome, UpsertOutcome::Inserted);
    assert_eq!(row_count(&pool).await, 1);

    let doc = store.find(&key()).await.unwrap().unwrap();
    assert_eq!(doc.store_id, "store1");
    assert_eq!(doc.client_id, "client1");
    assert_eq!(doc.bucket_date, 1_700_000_000);
    assert_eq!(doc.count, 1);
    assert_eq!(
        doc.list_success,
        vec![EventDetail {
            event_id: "evt1".to_owned(),
            timestamp: 1_700_000_001,
            event_type: "event_type1".to_owned(),
        }]
    );
    assert!(doc.list_failure.is_empty());
}

// --- accumulation ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_success_and_failure_land_in_separate_lists(pool: PgPool) {
    let store = PgAggregationStore::new(pool.clone());

    store.upsert(&make_resolved("evt1", "success")).await.unwrap();
    let second = store.upsert(&make_resolved("evt2", "failure")).await.unwrap();

    assert_eq!(second, UpsertOutcome::Updated);
    assert_eq!(row_count(&pool).await, 1);

    let doc = store.find(&key()).await.unwrap().unwrap();
    assert_eq!(doc.count, 2);
    assert_eq!(doc.list_success.len(), 1);
    assert_eq!(doc.list_failure.len(), 1);
    assert_eq!(doc.list_failure[0].event_id, "evt2");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_unknown_status_counts_as_failure(pool: PgPool) {
    let store = PgAggregationStore::new(pool);

    store.upsert(&make_resolved("evt1", "updated")).await.unwrap();

    let doc = store.find(&key()).await.unwrap().unwrap();
    assert!(doc.list_success.is_empty());
    assert_eq!(doc.list_failure.len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_lists_preserve_arrival_order(pool: PgPool) {
    let store = PgAggregationStore::new(pool);

    for id in ["evt3", "evt1", "evt2"] {
        store.upsert(&make_resolved(id, "success")).await.unwrap();
    }

    let doc = store.find(&key()).await.unwrap().unwrap();
    let ids: Vec<&str> = doc.list_success.iter().map(|d| d.event_id.as_str()).collect();
    assert_eq!(ids, vec!["evt3", "evt1", "evt2"]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_distinct_buckets_get_distinct_documents(pool: PgPool) {
    let store = PgAggregationStore::new(pool.clone());
    let mut other = make_resolved("evt1", "success").tracking().clone();
    other.bucket_date += 86_400;

    store.upsert(&make_resolved("evt1", "success")).await.unwrap();
    let outcome = store.upsert(&other.resolve("success")).await.unwrap();

    assert_eq!(outcome, UpsertOutcome::Inserted);
    assert_eq!(row_count(&pool).await, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_delivery_appends_duplicate_detail(pool: PgPool) {
    let store = PgAggregationStore::new(pool);
    let event = make_resolved("evt1", "success");

    store.upsert(&event).await.unwrap();
    store.upsert(&event).await.unwrap();

    let doc = store.find(&key()).await.unwrap().unwrap();
    assert_eq!(doc.count, 2);
    assert_eq!(doc.list_success.len(), 2);
    assert_eq!(doc.list_success[0], doc.list_success[1]);
}

// --- concurrency ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_concurrent_upserts_lose_no_updates(pool: PgPool) {
    let store = Arc::new(PgAggregationStore::new(pool));
    let k = 40;

    let mut handles = Vec::new();
    for i in 0..k {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let status = if i % 3 == 0 { "failure" } else { "success" };
            store
                .upsert(&make_resolved(&format!("evt{i}"), status))
                .await
                .unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() == UpsertOutcome::Inserted {
            inserted += 1;
        }
    }

    let doc = store.find(&key()).await.unwrap().unwrap();
    assert_eq!(inserted, 1);
    assert_eq!(doc.count, k);
    assert_eq!(doc.list_success.len() + doc.list_failure.len(), 40);
    assert_eq!(doc.list_failure.len(), 14);
}
