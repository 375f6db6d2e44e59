// tests/ingest_gateway.rs
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{FlakyStore, RacyStore};
use globe_news_ingest::ingest::error::StoreError;
use globe_news_ingest::ingest::gateway::{GatewayConfig, PersistenceGateway, StoreOutcome};
use globe_news_ingest::ingest::types::{Article, CandidateLocator, RejectReason, RejectedItem, Stage};
use globe_news_ingest::store::{ARTICLES, REJECTED};

fn article(fp: &str) -> Article {
    Article {
        fingerprint: fp.to_string(),
        source_id: "wire".into(),
        canonical_url: format!("https://wire.test/{fp}"),
        title: "Harbour reopens".into(),
        body: "The harbour reopened on Monday.".into(),
        published_at: None,
        language: Some("en".into()),
        fetched_at: Utc::now(),
        stored_at: None,
    }
}

fn cfg(retries: u32) -> GatewayConfig {
    GatewayConfig {
        store_timeout: Duration::from_millis(100),
        store_retries: retries,
        retry_base_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn persisting_twice_leaves_one_record() {
    let store = Arc::new(FlakyStore::new());
    let gw = PersistenceGateway::new(store.clone(), cfg(0));

    assert_eq!(gw.persist(article("aa01")).await.unwrap(), StoreOutcome::Inserted);
    assert_eq!(gw.persist(article("aa01")).await.unwrap(), StoreOutcome::AlreadyStored);
    assert_eq!(store.inner.len(ARTICLES), 1);

    let saved: Article = serde_json::from_value(store.inner.get(ARTICLES, "aa01").unwrap()).unwrap();
    assert!(saved.stored_at.is_some());
}

#[tokio::test]
async fn rejections_are_always_inserted() {
    let store = Arc::new(FlakyStore::new());
    let gw = PersistenceGateway::new(store.clone(), cfg(0));
    let loc = CandidateLocator::new("wire", "https://wire.test/x");
    let item = RejectedItem::new(&loc, Stage::Validate, RejectReason::TooShort);

    gw.persist_rejection(&item).await.unwrap();
    gw.persist_rejection(&item).await.unwrap();
    assert_eq!(store.inner.len(REJECTED), 2);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let store = Arc::new(FlakyStore::new());
    store.fail_transient(2);
    let gw = PersistenceGateway::new(store.clone(), cfg(3));

    assert_eq!(gw.persist(article("bb02")).await.unwrap(), StoreOutcome::Inserted);
    assert_eq!(store.calls(), 3);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let store = Arc::new(FlakyStore::new());
    store.fail_transient(10);
    let gw = PersistenceGateway::new(store.clone(), cfg(2));

    let err = gw.persist(article("cc03")).await.unwrap_err();
    assert_eq!(err.attempts, 3);
    assert!(err.last.is_transient());
    assert_eq!(store.calls(), 3);
    assert_eq!(store.inner.len(ARTICLES), 0);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let store = Arc::new(FlakyStore::new());
    store.fail_permanently(true);
    let gw = PersistenceGateway::new(store.clone(), cfg(5));

    let err = gw.persist(article("dd04")).await.unwrap_err();
    assert_eq!(err.attempts, 1);
    assert!(matches!(err.last, StoreError::Permanent(_)));
    assert_eq!(store.calls(), 1);
}

#[tokio::test]
async fn slow_store_calls_time_out_as_transient() {
    let store = Arc::new(FlakyStore::new());
    store.set_delay(Some(Duration::from_millis(300)));
    let gw = PersistenceGateway::new(store.clone(), cfg(1));

    let err = gw.persist(article("ee05")).await.unwrap_err();
    assert_eq!(err.attempts, 2);
    assert!(err.last.is_transient());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_atomic_store_is_serialized_per_key() {
    let store = Arc::new(RacyStore::default());
    let gw = Arc::new(PersistenceGateway::new(store.clone(), cfg(0)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gw = Arc::clone(&gw);
        handles.push(tokio::spawn(async move { gw.persist(article("ff06")).await }));
    }
    let mut inserted = 0;
    for h in handles {
        if h.await.unwrap().unwrap() == StoreOutcome::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
}
