// src/ingest/pool.rs
//! Fetch worker pool.
//!
//! Every submitted locator becomes one tokio task. A semaphore caps how many
//! of them hold a permit (and therefore fetch) at once. Tasks always come back
//! as a [`PoolEvent`]; panics surface as `Lost`, never across the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;

use crate::ingest::error::FetchError;
use crate::ingest::task::{run_task, FetchTask, TaskContext, TaskReport};
use crate::ingest::types::{CandidateLocator, RawContent, Source};

/// Exponential backoff: `base * 2^(n-1)` after the n-th failure, capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exp = failed_attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_concurrency: usize,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            fetch_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched { raw: RawContent, attempts: u32 },
    FetchFailed { last_error: FetchError, attempts: u32 },
}

/// Fetch one locator, retrying timeouts and retryable failures with backoff.
/// Never consumes more than `retry.max_retries + 1` attempts, and never
/// starts a retry whose backoff would end past `deadline`.
pub async fn fetch_with_retry(
    source: &Source,
    locator: &str,
    cfg: &PoolConfig,
    deadline: Instant,
) -> FetchOutcome {
    fetch_counted(source, locator, cfg, deadline, &AtomicU32::new(0)).await
}

/// [`fetch_with_retry`] that publishes its attempt count in `attempts` as it
/// goes, so an aborted task still accounts for what it spent.
pub(crate) async fn fetch_counted(
    source: &Source,
    locator: &str,
    cfg: &PoolConfig,
    deadline: Instant,
    attempts: &AtomicU32,
) -> FetchOutcome {
    loop {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("ingest_fetch_attempts_total", "source" => source.id.clone()).increment(1);
        let t0 = Instant::now();
        let result = tokio::time::timeout(cfg.fetch_timeout, source.capability.fetch(locator)).await;
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let err = match result {
            Ok(Ok(raw)) => return FetchOutcome::Fetched { raw, attempts: attempt },
            Ok(Err(e)) => e,
            Err(_) => FetchError::Timeout(cfg.fetch_timeout),
        };

        if attempt >= cfg.retry.max_attempts() || !err.is_retryable() {
            tracing::debug!(
                target: "ingest",
                source = %source.id, %locator, attempt, error = %err,
                "fetch failed, giving up"
            );
            return FetchOutcome::FetchFailed {
                last_error: err,
                attempts: attempt,
            };
        }

        let delay = cfg.retry.delay_for(attempt);
        if Instant::now() + delay >= deadline {
            tracing::debug!(
                target: "ingest",
                source = %source.id, %locator, attempt, error = %err,
                "fetch failed, no run budget left for a retry"
            );
            return FetchOutcome::FetchFailed {
                last_error: err,
                attempts: attempt,
            };
        }
        tracing::debug!(
            target: "ingest",
            source = %source.id, %locator, attempt, error = %err, delay_ms = delay.as_millis() as u64,
            "fetch failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Live counters; the only shared state besides the semaphore.
#[derive(Debug, Default)]
pub struct Progress {
    submitted: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub submitted: usize,
    pub running: usize,
    pub completed: usize,
}

impl Progress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub enum PoolEvent {
    Finished(TaskReport),
    /// Task was aborted or panicked before producing a report.
    Lost {
        locator: CandidateLocator,
        panicked: bool,
        detail: String,
        /// Fetch attempts started before the task died.
        fetch_attempts: u32,
    },
}

pub struct WorkerPool {
    cfg: Arc<PoolConfig>,
    permits: Arc<Semaphore>,
    progress: Arc<Progress>,
    tasks: JoinSet<TaskReport>,
    pending: HashMap<task::Id, Pending>,
}

struct Pending {
    locator: CandidateLocator,
    attempts: Arc<AtomicU32>,
}

impl WorkerPool {
    pub fn new(cfg: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.max_concurrency.max(1)));
        Self {
            cfg: Arc::new(cfg),
            permits,
            progress: Arc::new(Progress::default()),
            tasks: JoinSet::new(),
            pending: HashMap::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    pub fn submit(&mut self, task: FetchTask, ctx: Arc<TaskContext>) {
        let permits = Arc::clone(&self.permits);
        let cfg = Arc::clone(&self.cfg);
        let progress = Arc::clone(&self.progress);
        let locator = task.locator.clone();
        let attempts = Arc::new(AtomicU32::new(0));
        let tally = Arc::clone(&attempts);
        progress.submitted.fetch_add(1, Ordering::Relaxed);

        let handle = self.tasks.spawn(async move {
            let report = match permits.acquire_owned().await {
                Ok(_permit) => {
                    progress.running.fetch_add(1, Ordering::Relaxed);
                    gauge!("ingest_in_flight").increment(1.0);
                    let report = run_task(task, &ctx, &cfg, &tally).await;
                    gauge!("ingest_in_flight").decrement(1.0);
                    progress.running.fetch_sub(1, Ordering::Relaxed);
                    report
                }
                // Closed semaphore: the run is shutting down.
                Err(_) => TaskReport::cancelled(task.locator),
            };
            progress.completed.fetch_add(1, Ordering::Relaxed);
            report
        });
        self.pending.insert(handle.id(), Pending { locator, attempts });
    }

    /// Next finished task, in completion order. `None` once nothing is pending.
    pub async fn next_completed(&mut self) -> Option<PoolEvent> {
        loop {
            let joined = self.tasks.join_next_with_id().await?;
            if let Some(ev) = self.resolve(joined) {
                return Some(ev);
            }
        }
    }

    /// Non-blocking variant of [`next_completed`](Self::next_completed).
    pub fn try_next_completed(&mut self) -> Option<PoolEvent> {
        loop {
            let joined = self.tasks.try_join_next_with_id()?;
            if let Some(ev) = self.resolve(joined) {
                return Some(ev);
            }
        }
    }

    /// Stop handing out permits and abort every unfinished task.
    pub fn abort_all(&mut self) {
        self.permits.close();
        self.tasks.abort_all();
    }

    /// Tasks submitted but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    fn resolve(&mut self, joined: Result<(task::Id, TaskReport), JoinError>) -> Option<PoolEvent> {
        match joined {
            Ok((id, report)) => {
                self.pending.remove(&id);
                Some(PoolEvent::Finished(report))
            }
            Err(err) => {
                let Some(Pending { locator, attempts }) = self.pending.remove(&err.id()) else {
                    tracing::error!(target: "ingest", error = %err, "join error for unknown task");
                    return None;
                };
                Some(PoolEvent::Lost {
                    locator,
                    panicked: err.is_panic(),
                    detail: err.to_string(),
                    fetch_attempts: attempts.load(Ordering::Relaxed),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(350));
        assert_eq!(p.delay_for(40), Duration::from_millis(350));
        assert_eq!(p.max_attempts(), 6);
    }
}
