// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use globe_news_ingest::ingest::error::{DiscoveryError, FetchError, StoreError};
use globe_news_ingest::ingest::{BuilderConfig, GatewayConfig, PipelineSettings, PoolConfig, RetryPolicy};
use globe_news_ingest::ingest::types::{NewsSource, RawContent};
use globe_news_ingest::store::{DocumentStore, MemoryStore, UpsertOutcome};
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum Page {
    Body(String),
    /// Fails with a 503 `fails` times, then serves `body`.
    Flaky { fails: u32, body: String },
    Fail(FetchError),
    Slow { delay: Duration, body: String },
    Panic,
}

/// Scriptable source. Discovery returns locators in insertion order.
#[derive(Default)]
pub struct MockSource {
    order: Vec<String>,
    pages: HashMap<String, Page>,
    discovery_error: Option<DiscoveryError>,
    discovery_delay: Option<Duration>,
    attempts: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, locator: &str, page: Page) -> Self {
        if !self.pages.contains_key(locator) {
            self.order.push(locator.to_string());
        }
        self.pages.insert(locator.to_string(), page);
        self
    }

    pub fn body(self, locator: &str, body: impl Into<String>) -> Self {
        self.with_page(locator, Page::Body(body.into()))
    }

    /// Discovery lists `locator` but fetch has nothing for it (404).
    pub fn missing(mut self, locator: &str) -> Self {
        self.order.push(locator.to_string());
        self
    }

    pub fn failing_discovery(mut self, err: DiscoveryError) -> Self {
        self.discovery_error = Some(err);
        self
    }

    pub fn slow_discovery(mut self, delay: Duration) -> Self {
        self.discovery_delay = Some(delay);
        self
    }

    pub fn attempts(&self, locator: &str) -> u32 {
        self.attempts.lock().get(locator).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.lock().values().sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NewsSource for MockSource {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        if let Some(d) = self.discovery_delay {
            tokio::time::sleep(d).await;
        }
        match &self.discovery_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.order.clone()),
        }
    }

    async fn fetch(&self, locator: &str) -> Result<RawContent, FetchError> {
        let attempt = {
            let mut a = self.attempts.lock();
            let n = a.entry(locator.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        match self.pages.get(locator).cloned() {
            None => Err(FetchError::Status(404)),
            Some(Page::Body(b)) => Ok(RawContent::new(locator, b)),
            Some(Page::Flaky { fails, body }) => {
                if attempt <= fails {
                    Err(FetchError::Status(503))
                } else {
                    Ok(RawContent::new(locator, body))
                }
            }
            Some(Page::Fail(e)) => Err(e),
            Some(Page::Slow { delay, body }) => {
                tokio::time::sleep(delay).await;
                Ok(RawContent::new(locator, body))
            }
            Some(Page::Panic) => panic!("parser blew up on {locator}"),
        }
    }
}

/// Store wrapper that injects failures.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    transient_failures: AtomicU32,
    permanent_failures: AtomicU32,
    permanent: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls fail with a transient error.
    pub fn fail_transient(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls fail with a permanent error.
    pub fn fail_permanent_times(&self, n: u32) {
        self.permanent_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_permanently(&self, on: bool) {
        self.permanent.store(on, Ordering::SeqCst);
    }

    pub fn set_delay(&self, d: Option<Duration>) {
        *self.delay.lock() = d;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.permanent.load(Ordering::SeqCst) {
            return Err(StoreError::Permanent("disk full".into()));
        }
        let left = self.permanent_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.permanent_failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Permanent("document rejected".into()));
        }
        let left = self.transient_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.transient_failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Transient("connection reset".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn upsert_by_key(
        &self,
        collection: &str,
        key: &str,
        document: Value,
    ) -> Result<UpsertOutcome, StoreError> {
        self.gate().await?;
        self.inner.upsert_by_key(collection, key, document).await
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.insert(collection, document).await
    }

    async fn count(&self, collection: &str) -> Result<usize, StoreError> {
        self.inner.count(collection).await
    }
}

/// Check-then-insert with a yield in between; only safe behind the gateway's
/// key locks.
#[derive(Default)]
pub struct RacyStore {
    docs: Mutex<HashMap<String, Value>>,
    pub inserts: AtomicU32,
}

#[async_trait]
impl DocumentStore for RacyStore {
    fn atomic_upsert(&self) -> bool {
        false
    }

    async fn upsert_by_key(
        &self,
        _collection: &str,
        key: &str,
        document: Value,
    ) -> Result<UpsertOutcome, StoreError> {
        let present = self.docs.lock().contains_key(key);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if present {
            return Ok(UpsertOutcome::AlreadyPresent);
        }
        self.docs.lock().insert(key.to_string(), document);
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(UpsertOutcome::Inserted)
    }

    async fn insert(&self, _collection: &str, _document: Value) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count(&self, _collection: &str) -> Result<usize, StoreError> {
        Ok(self.docs.lock().len())
    }
}

/// English filler long enough to pass the test length floor, unique per `topic`.
pub fn article_body(topic: &str) -> String {
    format!(
        "Officials said on Monday that the {topic} plan is on track. \
         The minister told reporters that the work will be finished by the end of the year \
         and that it has the support of the council."
    )
}

/// Fast settings for tests: short timeouts, tiny backoff, low length floor.
pub fn settings() -> PipelineSettings {
    PipelineSettings {
        pool: PoolConfig {
            max_concurrency: 4,
            fetch_timeout: Duration::from_millis(500),
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        },
        builder: BuilderConfig {
            min_body_chars: 60,
            max_body_chars: 10_000,
            require_language: false,
        },
        gateway: GatewayConfig {
            store_timeout: Duration::from_millis(200),
            store_retries: 2,
            retry_base_delay: Duration::from_millis(2),
        },
        run_budget: Duration::from_secs(10),
        grace_period: Duration::from_millis(100),
        discovery_timeout: Duration::from_secs(2),
        max_storage_failures: 3,
        snapshot_chars: 64,
    }
}

pub fn shared<T>(v: T) -> Arc<T> {
    Arc::new(v)
}

/// Canned response of [`serve_http`].
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    pub fn new(status: u16, content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
        }
    }
}

/// Local HTTP/1.1 server answering every request with `respond(request_head)`.
pub struct TestServer {
    pub url: String,
    /// Request heads (request line plus headers) in arrival order.
    pub requests: Arc<Mutex<Vec<String>>>,
}

pub async fn serve_http<F>(respond: F) -> TestServer
where
    F: Fn(&str) -> Reply + Send + Sync + 'static,
{
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let seen = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let seen = seen.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf).to_string();
                seen.lock().push(head.clone());
                let reply = respond(&head);
                let out = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    reply.status,
                    reply.content_type,
                    reply.body.len(),
                    reply.body
                );
                let _ = sock.write_all(out.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });

    TestServer { url, requests }
}

/// Value of header `name` in a request head, matched case-insensitively.
pub fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|l| {
        let (k, v) = l.split_once(':')?;
        k.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}
