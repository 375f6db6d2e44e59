// src/ingest/pipeline.rs
//! Pipeline orchestrator.
//!
//! One `run_once` call: discover every enabled source in registration order,
//! hand each locator to the worker pool, fold finished tasks into the report
//! as they arrive, then decide the run status. The run budget is enforced with
//! explicit deadline checks plus a drain-then-force shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::time::{timeout, timeout_at, Instant};

use crate::ingest::builder::{ArticleBuilder, BuilderConfig};
use crate::ingest::ensure_metrics_described;
use crate::ingest::error::{DiscoveryError, StorageError, TaskError};
use crate::ingest::gateway::{GatewayConfig, PersistenceGateway};
use crate::ingest::pool::{PoolConfig, PoolEvent, WorkerPool};
use crate::ingest::registry::SourceRegistry;
use crate::ingest::report::{
    LocatorRecord, RunReport, RunStatus, SourceEvent, SourceEventKind, SourceStats,
    TerminalOutcome,
};
use crate::ingest::state::LocatorState;
use crate::ingest::task::{CommitGate, FetchTask, TaskContext, TaskOutcome, TaskReport};
use crate::ingest::types::{CandidateLocator, RejectReason, RejectedItem, Source, Stage};
use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub pool: PoolConfig,
    pub builder: BuilderConfig,
    pub gateway: GatewayConfig,
    pub run_budget: Duration,
    /// Extra time in-flight tasks get once the budget is spent.
    pub grace_period: Duration,
    pub discovery_timeout: Duration,
    /// Storage failures tolerated before the run aborts.
    pub max_storage_failures: u32,
    pub snapshot_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            builder: BuilderConfig::default(),
            gateway: GatewayConfig::default(),
            run_budget: Duration::from_secs(600),
            grace_period: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(30),
            max_storage_failures: 3,
            snapshot_chars: 512,
        }
    }
}

pub struct Pipeline {
    registry: SourceRegistry,
    gateway: Arc<PersistenceGateway>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        registry: SourceRegistry,
        store: Arc<dyn DocumentStore>,
        settings: PipelineSettings,
    ) -> Self {
        let gateway = Arc::new(PersistenceGateway::new(store, settings.gateway.clone()));
        Self {
            registry,
            gateway,
            settings,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Sources may be toggled between runs.
    pub fn registry_mut(&mut self) -> &mut SourceRegistry {
        &mut self.registry
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.gateway
    }

    pub async fn run_once(&self) -> RunReport {
        ensure_metrics_described();
        let started_at = Utc::now();
        let deadline = Instant::now() + self.settings.run_budget;

        tracing::info!(
            target: "ingest",
            sources = self.registry.enabled_sources().len(),
            budget_secs = self.settings.run_budget.as_secs(),
            max_concurrency = self.settings.pool.max_concurrency,
            "ingest run starting"
        );

        let mut run = Run::new(self, deadline);
        run.discover_and_dispatch(&self.registry).await;
        run.collect().await;
        run.finish(started_at)
    }
}

/// Mutable state of one run. Only the orchestrator loop touches it.
struct Run<'p> {
    settings: &'p PipelineSettings,
    gateway: Arc<PersistenceGateway>,
    gate: Arc<CommitGate>,
    ctx: Arc<TaskContext>,
    pool: WorkerPool,
    deadline: Instant,
    stats: Vec<SourceStats>,
    index: HashMap<String, usize>,
    events: Vec<SourceEvent>,
    records: Vec<LocatorRecord>,
    storage_failures: u32,
    timed_out: bool,
    aborted: bool,
}

impl<'p> Run<'p> {
    fn new(pipeline: &'p Pipeline, deadline: Instant) -> Self {
        let settings = &pipeline.settings;
        let gate = Arc::new(CommitGate::new());
        let ctx = Arc::new(TaskContext {
            builder: Arc::new(ArticleBuilder::new(settings.builder.clone())),
            gateway: Arc::clone(&pipeline.gateway),
            gate: Arc::clone(&gate),
            deadline,
            snapshot_chars: settings.snapshot_chars,
        });
        Self {
            settings,
            gateway: Arc::clone(&pipeline.gateway),
            gate,
            ctx,
            pool: WorkerPool::new(settings.pool.clone()),
            deadline,
            stats: Vec::new(),
            index: HashMap::new(),
            events: Vec::new(),
            records: Vec::new(),
            storage_failures: 0,
            timed_out: false,
            aborted: false,
        }
    }

    fn stats(&mut self, source_id: &str) -> &mut SourceStats {
        let i = match self.index.get(source_id) {
            Some(i) => *i,
            None => {
                self.stats.push(SourceStats::new(source_id));
                self.index.insert(source_id.to_string(), self.stats.len() - 1);
                self.stats.len() - 1
            }
        };
        &mut self.stats[i]
    }

    fn event(&mut self, source_id: &str, kind: SourceEventKind) {
        self.events.push(SourceEvent {
            source_id: source_id.to_string(),
            kind,
            at: Utc::now(),
        });
    }

    async fn discover_and_dispatch(&mut self, registry: &SourceRegistry) {
        for source in registry.enabled_sources() {
            self.stats(&source.id);

            if self.aborted {
                self.stats(&source.id).skipped += 1;
                self.event(&source.id, SourceEventKind::Skipped { reason: "run aborted".into() });
                continue;
            }
            let now = Instant::now();
            if now >= self.deadline {
                self.timed_out = true;
                self.stats(&source.id).skipped += 1;
                self.event(&source.id, SourceEventKind::Skipped { reason: "run budget exhausted".into() });
                tracing::warn!(target: "ingest", source = %source.id, "skipping source, run budget exhausted");
                continue;
            }

            let budget = source
                .discovery_timeout
                .unwrap_or(self.settings.discovery_timeout)
                .min(self.deadline - now);
            let discovered = match timeout(budget, source.capability.discover()).await {
                Ok(Ok(locators)) => locators,
                Ok(Err(e)) => {
                    self.discovery_failed(&source, e);
                    continue;
                }
                Err(_) => {
                    self.discovery_failed(&source, DiscoveryError::Timeout(budget));
                    continue;
                }
            };

            tracing::info!(target: "ingest", source = %source.id, discovered = discovered.len(), "discovery done");
            counter!("ingest_discovered_total", "source" => source.id.clone())
                .increment(discovered.len() as u64);

            for locator in discovered {
                self.stats(&source.id).discovered += 1;
                let candidate = CandidateLocator::new(source.id.clone(), locator);
                self.dispatch(candidate, &source).await;
            }

            while let Some(ev) = self.pool.try_next_completed() {
                self.absorb(ev).await;
            }
        }
    }

    async fn dispatch(&mut self, candidate: CandidateLocator, source: &Arc<Source>) {
        if self.aborted {
            self.abandon(candidate, vec![LocatorState::Discovered], 0);
        } else if Instant::now() >= self.deadline {
            self.timed_out = true;
            self.reject_here(
                candidate,
                Stage::Dispatch,
                RejectReason::RunTimeout,
                None,
                vec![LocatorState::Discovered],
                0,
            )
            .await;
        } else {
            let task = FetchTask {
                locator: candidate,
                source: Arc::clone(source),
            };
            self.pool.submit(task, Arc::clone(&self.ctx));
        }
    }

    fn discovery_failed(&mut self, source: &Source, error: DiscoveryError) {
        tracing::warn!(target: "ingest", error = %error, source = %source.id, "discovery failed");
        counter!("ingest_discovery_errors_total", "source" => source.id.clone()).increment(1);
        self.stats(&source.id).discovery_failed += 1;
        self.event(
            &source.id,
            SourceEventKind::DiscoveryFailed {
                error: error.to_string(),
            },
        );
    }

    async fn collect(&mut self) {
        while !self.aborted && self.pool.in_flight() > 0 {
            match timeout_at(self.deadline, self.pool.next_completed()).await {
                Ok(Some(ev)) => self.absorb(ev).await,
                Ok(None) => break,
                Err(_) => {
                    self.timed_out = true;
                    break;
                }
            }
        }

        if !self.aborted && self.pool.in_flight() > 0 {
            tracing::warn!(
                target: "ingest",
                in_flight = self.pool.in_flight(),
                grace_ms = self.settings.grace_period.as_millis() as u64,
                "run budget exhausted, draining"
            );
            let until = Instant::now() + self.settings.grace_period;
            while !self.aborted && self.pool.in_flight() > 0 {
                match timeout_at(until, self.pool.next_completed()).await {
                    Ok(Some(ev)) => self.absorb(ev).await,
                    Ok(None) | Err(_) => break,
                }
            }
            if !self.aborted && self.pool.in_flight() > 0 {
                self.shut_down().await;
            }
        }

        // Whatever is left was aborted; its reports still need a terminal record.
        while let Some(ev) = self.pool.next_completed().await {
            self.absorb(ev).await;
        }
    }

    /// Close the gate (waiting for commits in progress) and abort the rest.
    async fn shut_down(&mut self) {
        self.gate.close().await;
        self.pool.abort_all();
    }

    async fn absorb(&mut self, ev: PoolEvent) {
        match ev {
            PoolEvent::Finished(report) => self.absorb_report(report).await,
            PoolEvent::Lost {
                locator,
                panicked: true,
                detail,
                fetch_attempts,
            } => {
                self.stats(&locator.source_id).fetch_attempts += u64::from(fetch_attempts);
                tracing::error!(target: "ingest", source = %locator.source_id, locator = %locator.locator, %detail, "worker task panicked");
                self.reject_here(
                    locator,
                    Stage::Worker,
                    RejectReason::InternalError,
                    Some(detail),
                    vec![LocatorState::Discovered],
                    fetch_attempts,
                )
                .await;
            }
            PoolEvent::Lost {
                locator,
                fetch_attempts,
                ..
            } => {
                self.stats(&locator.source_id).fetch_attempts += u64::from(fetch_attempts);
                self.cancelled(locator, vec![LocatorState::Discovered], fetch_attempts)
                    .await;
            }
        }
    }

    async fn absorb_report(&mut self, report: TaskReport) {
        let TaskReport {
            locator,
            outcome,
            fetch_attempts,
            history,
        } = report;
        self.stats(&locator.source_id).fetch_attempts += u64::from(fetch_attempts);
        let state = history.last().copied().unwrap_or(LocatorState::Discovered);

        match outcome {
            TaskOutcome::Stored {
                fingerprint,
                inserted,
            } => {
                let s = self.stats(&locator.source_id);
                s.stored += 1;
                if !inserted {
                    s.already_stored += 1;
                }
                tracing::debug!(target: "ingest", source = %locator.source_id, locator = %locator.locator, %fingerprint, inserted, "stored");
                self.records.push(LocatorRecord {
                    source_id: locator.source_id,
                    locator: locator.locator,
                    outcome: TerminalOutcome::Stored {
                        fingerprint,
                        already_stored: !inserted,
                    },
                    state,
                    fetch_attempts,
                });
            }
            TaskOutcome::Rejected { reason, stage } => {
                let s = self.stats(&locator.source_id);
                s.rejected += 1;
                if reason == RejectReason::FetchFailed {
                    s.fetch_failed += 1;
                }
                tracing::debug!(target: "ingest", source = %locator.source_id, locator = %locator.locator, %reason, "rejected");
                self.records.push(LocatorRecord {
                    source_id: locator.source_id,
                    locator: locator.locator,
                    outcome: TerminalOutcome::Rejected { reason, stage },
                    state,
                    fetch_attempts,
                });
            }
            TaskOutcome::Cancelled => self.cancelled(locator, history, fetch_attempts).await,
            TaskOutcome::Failed(TaskError::Storage(e)) => {
                self.storage_failed(locator, e, state, fetch_attempts).await
            }
            TaskOutcome::Failed(TaskError::Transition(e)) => {
                self.reject_here(
                    locator,
                    Stage::Worker,
                    RejectReason::InternalError,
                    Some(e.to_string()),
                    history,
                    fetch_attempts,
                )
                .await;
            }
        }
    }

    async fn cancelled(&mut self, locator: CandidateLocator, history: Vec<LocatorState>, attempts: u32) {
        if self.aborted {
            self.abandon(locator, history, attempts);
            return;
        }
        self.timed_out = true;
        self.reject_here(
            locator,
            Stage::Drain,
            RejectReason::RunTimeout,
            None,
            history,
            attempts,
        )
        .await;
    }

    /// Terminal rejection decided by the orchestrator rather than a worker.
    async fn reject_here(
        &mut self,
        locator: CandidateLocator,
        stage: Stage,
        reason: RejectReason,
        detail: Option<String>,
        history: Vec<LocatorState>,
        attempts: u32,
    ) {
        let mut item = RejectedItem::new(&locator, stage, reason);
        if let Some(d) = detail {
            item = item.with_detail(d);
        }
        let prior = history.last().copied().unwrap_or(LocatorState::Discovered);
        if let Err(e) = self.gateway.persist_rejection(&item).await {
            self.storage_failed(locator, e, prior, attempts).await;
            return;
        }

        let s = self.stats(&locator.source_id);
        s.rejected += 1;
        if reason == RejectReason::RunTimeout {
            s.timed_out += 1;
        }
        self.records.push(LocatorRecord {
            source_id: locator.source_id,
            locator: locator.locator,
            outcome: TerminalOutcome::Rejected { reason, stage },
            state: LocatorState::Rejected,
            fetch_attempts: attempts,
        });
    }

    fn abandon(&mut self, locator: CandidateLocator, history: Vec<LocatorState>, attempts: u32) {
        self.stats(&locator.source_id).abandoned += 1;
        self.records.push(LocatorRecord {
            source_id: locator.source_id,
            locator: locator.locator,
            outcome: TerminalOutcome::Abandoned,
            state: history.last().copied().unwrap_or(LocatorState::Discovered),
            fetch_attempts: attempts,
        });
    }

    async fn storage_failed(
        &mut self,
        locator: CandidateLocator,
        error: StorageError,
        state: LocatorState,
        attempts: u32,
    ) {
        tracing::error!(target: "ingest", error = %error, source = %locator.source_id, locator = %locator.locator, "storage failed");
        self.stats(&locator.source_id).storage_failed += 1;
        self.records.push(LocatorRecord {
            source_id: locator.source_id,
            locator: locator.locator,
            outcome: TerminalOutcome::StorageFailed {
                error: error.to_string(),
            },
            state,
            fetch_attempts: attempts,
        });

        self.storage_failures += 1;
        if !self.aborted && self.storage_failures >= self.settings.max_storage_failures.max(1) {
            tracing::error!(
                target: "ingest",
                failures = self.storage_failures,
                "storage keeps failing, aborting run"
            );
            self.aborted = true;
            self.shut_down().await;
        }
    }

    fn finish(self, started_at: chrono::DateTime<Utc>) -> RunReport {
        let status = if self.aborted {
            RunStatus::Aborted
        } else if self.timed_out {
            RunStatus::TimedOut
        } else {
            RunStatus::Completed
        };
        let finished_at = Utc::now();
        gauge!("ingest_pipeline_last_run_ts").set(finished_at.timestamp().max(0) as f64);
        counter!("ingest_runs_total").increment(1);

        let report = RunReport {
            started_at,
            finished_at,
            status,
            sources: self.stats,
            events: self.events,
            locators: self.records,
        };
        let t = report.totals();
        tracing::info!(
            target: "ingest",
            status = ?report.status,
            discovered = t.discovered,
            stored = t.stored,
            already_stored = t.already_stored,
            rejected = t.rejected,
            storage_failed = t.storage_failed,
            abandoned = t.abandoned,
            duration_ms = report.duration_ms(),
            "ingest run finished"
        );
        report
    }
}
