// src/ingest/report.rs
//! Run report: per-source counters, source-level events and one terminal
//! record per discovered locator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ingest::state::LocatorState;
use crate::ingest::types::{RejectReason, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    TimedOut,
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub source_id: String,
    pub discovered: u64,
    /// Terminal `Stored`, including `already_stored`.
    pub stored: u64,
    pub already_stored: u64,
    /// Terminal `Rejected`, including `fetch_failed` and `timed_out`.
    pub rejected: u64,
    pub fetch_failed: u64,
    pub timed_out: u64,
    pub storage_failed: u64,
    pub abandoned: u64,
    pub fetch_attempts: u64,
    /// Discovery failures or timeouts; at most one per source and run.
    pub discovery_failed: u64,
    /// Not visited at all; at most one per source and run.
    pub skipped: u64,
}

impl SourceStats {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    /// Every discovered locator accounted for exactly once.
    pub fn is_balanced(&self) -> bool {
        self.stored + self.rejected + self.storage_failed + self.abandoned == self.discovered
    }

    fn add(&mut self, o: &SourceStats) {
        self.discovered += o.discovered;
        self.stored += o.stored;
        self.already_stored += o.already_stored;
        self.rejected += o.rejected;
        self.fetch_failed += o.fetch_failed;
        self.timed_out += o.timed_out;
        self.storage_failed += o.storage_failed;
        self.abandoned += o.abandoned;
        self.fetch_attempts += o.fetch_attempts;
        self.discovery_failed += o.discovery_failed;
        self.skipped += o.skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceEventKind {
    DiscoveryFailed { error: String },
    /// Not visited: budget exhausted or run aborting.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEvent {
    pub source_id: String,
    #[serde(flatten)]
    pub kind: SourceEventKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Stored {
        fingerprint: String,
        already_stored: bool,
    },
    Rejected {
        reason: RejectReason,
        stage: Stage,
    },
    StorageFailed {
        error: String,
    },
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatorRecord {
    pub source_id: String,
    pub locator: String,
    #[serde(flatten)]
    pub outcome: TerminalOutcome,
    pub state: LocatorState,
    pub fetch_attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub sources: Vec<SourceStats>,
    pub events: Vec<SourceEvent>,
    pub locators: Vec<LocatorRecord>,
}

impl RunReport {
    pub fn source(&self, id: &str) -> Option<&SourceStats> {
        self.sources.iter().find(|s| s.source_id == id)
    }

    pub fn totals(&self) -> SourceStats {
        let mut t = SourceStats::new("*");
        for s in &self.sources {
            t.add(s);
        }
        t
    }

    pub fn is_balanced(&self) -> bool {
        self.sources.iter().all(SourceStats::is_balanced)
    }

    pub fn records_for<'a>(&'a self, source_id: &'a str) -> impl Iterator<Item = &'a LocatorRecord> + 'a {
        self.locators.iter().filter(move |r| r.source_id == source_id)
    }

    pub fn rejections_with(&self, reason: RejectReason) -> usize {
        self.locators
            .iter()
            .filter(|r| matches!(&r.outcome, TerminalOutcome::Rejected { reason: got, .. } if *got == reason))
            .count()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
