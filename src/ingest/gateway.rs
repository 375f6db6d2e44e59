// src/ingest/gateway.rs
//! Dedup/persistence gateway.
//!
//! Articles are upserted keyed by fingerprint, so storing the same article twice
//! (in one run or across runs) leaves exactly one record. Rejections are always
//! inserted. Transient store errors are retried with backoff; permanent ones
//! fail the write immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::Mutex;

use crate::ingest::error::{StorageError, StoreError};
use crate::ingest::types::{Article, RejectedItem};
use crate::store::{DocumentStore, UpsertOutcome, ARTICLES, REJECTED};

/// Lock stripes used when the store cannot upsert atomically.
const KEY_BUCKETS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Bound on a single store call.
    pub store_timeout: Duration,
    /// Extra attempts after a transient failure.
    pub store_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            store_retries: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    AlreadyStored,
}

pub struct PersistenceGateway {
    store: Arc<dyn DocumentStore>,
    cfg: GatewayConfig,
    buckets: Option<Vec<Mutex<()>>>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn DocumentStore>, cfg: GatewayConfig) -> Self {
        let buckets = if store.atomic_upsert() {
            None
        } else {
            Some((0..KEY_BUCKETS).map(|_| Mutex::new(())).collect())
        };
        Self {
            store,
            cfg,
            buckets,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.cfg
    }

    /// Store `article` unless its fingerprint is already present.
    pub async fn persist(&self, mut article: Article) -> Result<StoreOutcome, StorageError> {
        article.stored_at = Some(Utc::now());
        let doc = serde_json::to_value(&article).map_err(|e| StorageError {
            attempts: 0,
            last: StoreError::Permanent(e.to_string()),
        })?;
        let key = article.fingerprint.as_str();

        let _stripe = match &self.buckets {
            Some(b) => Some(b[bucket_of(key, b.len())].lock().await),
            None => None,
        };

        let outcome = self
            .with_retry("persist", || {
                self.store.upsert_by_key(ARTICLES, key, doc.clone())
            })
            .await?;

        match outcome {
            UpsertOutcome::Inserted => {
                counter!("ingest_stored_total").increment(1);
                Ok(StoreOutcome::Inserted)
            }
            UpsertOutcome::AlreadyPresent => {
                counter!("ingest_already_stored_total").increment(1);
                Ok(StoreOutcome::AlreadyStored)
            }
        }
    }

    /// Record a rejection. Never deduplicated.
    pub async fn persist_rejection(&self, item: &RejectedItem) -> Result<(), StorageError> {
        let doc = serde_json::to_value(item).map_err(|e| StorageError {
            attempts: 0,
            last: StoreError::Permanent(e.to_string()),
        })?;
        self.with_retry("persist_rejection", || self.store.insert(REJECTED, doc.clone()))
            .await?;
        counter!("ingest_rejected_total", "reason" => item.reason.as_str()).increment(1);
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.cfg.store_retries.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.cfg.store_timeout, call()).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(e)) => e,
                Err(_) => StoreError::Transient(format!(
                    "store call exceeded {:?}",
                    self.cfg.store_timeout
                )),
            };

            if !err.is_transient() || attempt >= max_attempts {
                tracing::warn!(target: "ingest", op, attempt, error = %err, "store write failed");
                return Err(StorageError {
                    attempts: attempt,
                    last: err,
                });
            }

            counter!("ingest_storage_retries_total").increment(1);
            let delay = self
                .cfg
                .retry_base_delay
                .saturating_mul(1u32 << (attempt - 1).min(16));
            tracing::debug!(target: "ingest", op, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying store write");
            tokio::time::sleep(delay).await;
        }
    }
}

fn bucket_of(key: &str, buckets: usize) -> usize {
    // Fingerprints are hex digests; the leading bytes are already uniform.
    let h = key
        .bytes()
        .take(8)
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    h % buckets.max(1)
}
