// src/ingest/task.rs
//! One unit of pool work: fetch -> build -> persist for a single locator.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio::time::Instant;

use crate::ingest::builder::{ArticleBuilder, BuildOutcome};
use crate::ingest::error::TaskError;
use crate::ingest::gateway::{PersistenceGateway, StoreOutcome};
use crate::ingest::pool::{fetch_counted, FetchOutcome, PoolConfig};
use crate::ingest::state::{LocatorState, LocatorTrack};
use crate::ingest::types::{Article, CandidateLocator, RejectReason, RejectedItem, Source, Stage};

#[derive(Debug, Clone)]
pub struct FetchTask {
    pub locator: CandidateLocator,
    pub source: Arc<Source>,
}

/// Writers hold the read side while committing; closing takes the write side,
/// so it waits for in-progress commits and blocks all later ones.
#[derive(Debug, Default)]
pub struct CommitGate {
    closed: RwLock<bool>,
}

impl CommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` once the gate is closed.
    pub async fn enter(&self) -> Option<RwLockReadGuard<'_, bool>> {
        let guard = self.closed.read().await;
        if *guard {
            None
        } else {
            Some(guard)
        }
    }

    pub async fn close(&self) {
        *self.closed.write().await = true;
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

/// Shared, read-only context for every task of one run.
pub struct TaskContext {
    pub builder: Arc<ArticleBuilder>,
    pub gateway: Arc<PersistenceGateway>,
    pub gate: Arc<CommitGate>,
    pub deadline: Instant,
    /// Raw payload chars kept on validation rejections; 0 disables.
    pub snapshot_chars: usize,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Stored {
        fingerprint: String,
        inserted: bool,
    },
    Rejected {
        reason: RejectReason,
        stage: Stage,
    },
    /// Deadline passed or the run closed before anything was committed.
    Cancelled,
    Failed(TaskError),
}

#[derive(Debug)]
pub struct TaskReport {
    pub locator: CandidateLocator,
    pub outcome: TaskOutcome,
    pub fetch_attempts: u32,
    pub history: Vec<LocatorState>,
}

impl TaskReport {
    pub fn cancelled(locator: CandidateLocator) -> Self {
        Self {
            locator,
            outcome: TaskOutcome::Cancelled,
            fetch_attempts: 0,
            history: vec![LocatorState::Discovered],
        }
    }

    pub fn final_state(&self) -> LocatorState {
        self.history
            .last()
            .copied()
            .unwrap_or(LocatorState::Discovered)
    }
}

/// `attempts` is shared with the pool so the count survives an abort.
pub async fn run_task(
    task: FetchTask,
    ctx: &TaskContext,
    cfg: &PoolConfig,
    attempts: &AtomicU32,
) -> TaskReport {
    let mut track = LocatorTrack::new();
    let outcome = match drive(&task, ctx, cfg, &mut track, attempts).await {
        Ok(o) => o,
        Err(e) => {
            tracing::warn!(
                target: "ingest",
                error = %e, source = %task.locator.source_id, locator = %task.locator.locator,
                "task failed"
            );
            TaskOutcome::Failed(e)
        }
    };
    TaskReport {
        locator: task.locator,
        outcome,
        fetch_attempts: attempts.load(Ordering::Relaxed),
        history: track.history().to_vec(),
    }
}

async fn drive(
    task: &FetchTask,
    ctx: &TaskContext,
    cfg: &PoolConfig,
    track: &mut LocatorTrack,
    attempts: &AtomicU32,
) -> Result<TaskOutcome, TaskError> {
    if Instant::now() >= ctx.deadline || ctx.gate.is_closed().await {
        return Ok(TaskOutcome::Cancelled);
    }

    track.advance(LocatorState::Fetching)?;
    let fetched = fetch_counted(&task.source, &task.locator.locator, cfg, ctx.deadline, attempts).await;
    match fetched {
        FetchOutcome::FetchFailed { last_error, .. } => {
            track.advance(LocatorState::FetchFailed)?;
            let item = RejectedItem::new(&task.locator, Stage::Fetch, RejectReason::FetchFailed)
                .with_detail(last_error.to_string());
            commit_rejection(ctx, track, item).await
        }
        FetchOutcome::Fetched { raw, .. } => {
            track.advance(LocatorState::Fetched)?;
            track.advance(LocatorState::Validating)?;
            let built = ctx.builder.build(&raw, &task.source, &task.locator);
            let verdict = match &built {
                BuildOutcome::Valid(_) => "valid",
                BuildOutcome::Rejected(_) => "rejected",
            };
            counter!("ingest_builds_total", "host" => provider_host(&raw.locator, &task.locator), "outcome" => verdict)
                .increment(1);
            match built {
                BuildOutcome::Valid(article) => {
                    track.advance(LocatorState::Valid)?;
                    drop(raw);
                    commit_article(ctx, track, article).await
                }
                BuildOutcome::Rejected(reason) => {
                    track.advance(LocatorState::Invalid)?;
                    let item = RejectedItem::new(&task.locator, Stage::Validate, reason)
                        .with_snapshot(&raw.payload, ctx.snapshot_chars);
                    drop(raw);
                    commit_rejection(ctx, track, item).await
                }
            }
        }
    }
}

/// Host the content was served from, falling back to the discovered locator.
fn provider_host(served: &str, locator: &CandidateLocator) -> String {
    [served, locator.locator.as_str()]
        .into_iter()
        .find_map(|u| url::Url::parse(u).ok()?.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn commit_article(
    ctx: &TaskContext,
    track: &mut LocatorTrack,
    article: Article,
) -> Result<TaskOutcome, TaskError> {
    let fingerprint = article.fingerprint.clone();
    let Some(_open) = ctx.gate.enter().await else {
        ctx.builder.release(&fingerprint);
        return Ok(TaskOutcome::Cancelled);
    };
    let stored = match ctx.gateway.persist(article).await {
        Ok(stored) => stored,
        Err(e) => {
            ctx.builder.release(&fingerprint);
            return Err(e.into());
        }
    };
    track.advance(LocatorState::Stored)?;
    Ok(TaskOutcome::Stored {
        fingerprint,
        inserted: stored == StoreOutcome::Inserted,
    })
}

async fn commit_rejection(
    ctx: &TaskContext,
    track: &mut LocatorTrack,
    item: RejectedItem,
) -> Result<TaskOutcome, TaskError> {
    let Some(_open) = ctx.gate.enter().await else {
        return Ok(TaskOutcome::Cancelled);
    };
    ctx.gateway.persist_rejection(&item).await?;
    track.advance(LocatorState::Rejected)?;
    Ok(TaskOutcome::Rejected {
        reason: item.reason,
        stage: item.stage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_host_prefers_served_address() {
        let loc = CandidateLocator::new("wire", "https://feeds.example/item/1");
        assert_eq!(provider_host("https://WWW.News.example/a", &loc), "www.news.example");
        assert_eq!(provider_host("", &loc), "feeds.example");
        let opaque = CandidateLocator::new("wire", "item-1");
        assert_eq!(provider_host("", &opaque), "unknown");
    }

    #[tokio::test]
    async fn closed_gate_refuses_entry() {
        let gate = CommitGate::new();
        assert!(gate.enter().await.is_some());
        gate.close().await;
        assert!(gate.enter().await.is_none());
        assert!(gate.is_closed().await);
    }

    #[tokio::test]
    async fn close_waits_for_open_commits() {
        let gate = Arc::new(CommitGate::new());
        let held = gate.enter().await.unwrap();
        let g2 = Arc::clone(&gate);
        let closer = tokio::spawn(async move { g2.close().await });
        tokio::task::yield_now().await;
        assert!(!closer.is_finished());
        drop(held);
        closer.await.unwrap();
        assert!(gate.enter().await.is_none());
    }
}
