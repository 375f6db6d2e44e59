// tests/ingest_pool.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{article_body, settings, MockSource, Page};
use globe_news_ingest::ingest::builder::ArticleBuilder;
use globe_news_ingest::ingest::error::FetchError;
use globe_news_ingest::ingest::gateway::PersistenceGateway;
use globe_news_ingest::ingest::pool::{fetch_with_retry, FetchOutcome, PoolEvent, WorkerPool};
use globe_news_ingest::ingest::task::{CommitGate, FetchTask, TaskContext, TaskOutcome};
use globe_news_ingest::ingest::types::{CandidateLocator, Source};
use globe_news_ingest::store::MemoryStore;
use tokio::time::Instant;

fn context(deadline: Instant) -> Arc<TaskContext> {
    let s = settings();
    Arc::new(TaskContext {
        builder: Arc::new(ArticleBuilder::new(s.builder.clone())),
        gateway: Arc::new(PersistenceGateway::new(
            Arc::new(MemoryStore::new()),
            s.gateway.clone(),
        )),
        gate: Arc::new(CommitGate::new()),
        deadline,
        snapshot_chars: 0,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_ceiling_is_never_exceeded() {
    let mut src = MockSource::new();
    for i in 0..12 {
        src = src.with_page(
            &format!("https://a.test/{i}"),
            Page::Slow {
                delay: Duration::from_millis(30),
                body: article_body(&format!("item {i}")),
            },
        );
    }
    let mock = Arc::new(src);
    let source = Arc::new(Source::new("a", mock.clone()));

    let mut cfg = settings().pool;
    cfg.max_concurrency = 3;
    let mut pool = WorkerPool::new(cfg);
    let ctx = context(Instant::now() + Duration::from_secs(30));

    for i in 0..12 {
        pool.submit(
            FetchTask {
                locator: CandidateLocator::new("a", format!("https://a.test/{i}")),
                source: Arc::clone(&source),
            },
            Arc::clone(&ctx),
        );
    }

    let mut stored = 0;
    while let Some(ev) = pool.next_completed().await {
        match ev {
            PoolEvent::Finished(r) => {
                assert!(matches!(r.outcome, TaskOutcome::Stored { inserted: true, .. }), "{r:?}");
                stored += 1;
            }
            PoolEvent::Lost { locator, .. } => panic!("lost {locator:?}"),
        }
    }

    assert_eq!(stored, 12);
    assert!(mock.max_in_flight() <= 3, "saw {}", mock.max_in_flight());
    assert!(mock.max_in_flight() >= 2);
    let p = pool.progress();
    assert_eq!((p.submitted, p.completed, p.running), (12, 12, 0));
    assert_eq!(pool.in_flight(), 0);
}

#[tokio::test]
async fn per_attempt_timeout_counts_as_retryable_failure() {
    let mock = Arc::new(MockSource::new().with_page(
        "https://a.test/slow",
        Page::Slow {
            delay: Duration::from_millis(500),
            body: article_body("slow"),
        },
    ));
    let source = Source::new("a", mock.clone());
    let mut cfg = settings().pool;
    cfg.fetch_timeout = Duration::from_millis(30);
    cfg.retry.max_retries = 1;

    let deadline = Instant::now() + Duration::from_secs(30);
    match fetch_with_retry(&source, "https://a.test/slow", &cfg, deadline).await {
        FetchOutcome::FetchFailed { last_error, attempts } => {
            assert_eq!(attempts, 2);
            assert!(matches!(last_error, FetchError::Timeout(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(mock.attempts("https://a.test/slow"), 2);
}

#[tokio::test]
async fn zero_retries_means_one_attempt() {
    let mock = Arc::new(
        MockSource::new().with_page("https://a.test/x", Page::Fail(FetchError::Status(502))),
    );
    let source = Source::new("a", mock.clone());
    let mut cfg = settings().pool;
    cfg.retry.max_retries = 0;

    let deadline = Instant::now() + Duration::from_secs(30);
    let out = fetch_with_retry(&source, "https://a.test/x", &cfg, deadline).await;
    assert!(matches!(out, FetchOutcome::FetchFailed { attempts: 1, .. }));
    assert_eq!(mock.attempts("https://a.test/x"), 1);
}

#[tokio::test]
async fn no_retry_is_started_past_the_deadline() {
    let mock = Arc::new(
        MockSource::new().with_page("https://a.test/x", Page::Fail(FetchError::Status(503))),
    );
    let source = Source::new("a", mock.clone());
    let mut cfg = settings().pool;
    cfg.retry.max_retries = 5;
    cfg.retry.base_delay = Duration::from_millis(200);
    cfg.retry.max_delay = Duration::from_secs(1);

    let t0 = Instant::now();
    let out = fetch_with_retry(&source, "https://a.test/x", &cfg, t0 + Duration::from_millis(300)).await;

    // 200 ms after the first failure fits, the 400 ms backoff after the second does not.
    match out {
        FetchOutcome::FetchFailed { last_error, attempts } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_error, FetchError::Status(503));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(mock.attempts("https://a.test/x"), 2);
    assert!(t0.elapsed() < Duration::from_millis(300));
}

#[tokio::test]
async fn tasks_past_the_deadline_do_not_fetch() {
    let mock = Arc::new(MockSource::new().body("https://a.test/1", article_body("late")));
    let source = Arc::new(Source::new("a", mock.clone()));
    let mut pool = WorkerPool::new(settings().pool);
    let ctx = context(Instant::now());

    pool.submit(
        FetchTask {
            locator: CandidateLocator::new("a", "https://a.test/1"),
            source,
        },
        ctx,
    );

    match pool.next_completed().await {
        Some(PoolEvent::Finished(r)) => {
            assert!(matches!(r.outcome, TaskOutcome::Cancelled));
            assert_eq!(r.fetch_attempts, 0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(mock.total_attempts(), 0);
}

#[tokio::test]
async fn aborted_tasks_come_back_as_lost() {
    let mock = Arc::new(MockSource::new().with_page(
        "https://a.test/hang",
        Page::Slow {
            delay: Duration::from_secs(30),
            body: article_body("hang"),
        },
    ));
    let source = Arc::new(Source::new("a", mock));
    let mut pool = WorkerPool::new(settings().pool);
    pool.submit(
        FetchTask {
            locator: CandidateLocator::new("a", "https://a.test/hang"),
            source,
        },
        context(Instant::now() + Duration::from_secs(60)),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    pool.abort_all();

    match pool.next_completed().await {
        Some(PoolEvent::Lost {
            locator,
            panicked,
            fetch_attempts,
            ..
        }) => {
            assert_eq!(locator.locator, "https://a.test/hang");
            assert!(!panicked);
            assert_eq!(fetch_attempts, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(pool.next_completed().await.is_none());
}
