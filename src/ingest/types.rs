// src/ingest/types.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::error::{DiscoveryError, FetchError};

/// Capability pair every news source provides.
///
/// `fetch` is called concurrently for different locators of the same source.
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    /// Candidate locators currently offered by the source (finite).
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError>;

    /// Raw page content for one locator.
    async fn fetch(&self, locator: &str) -> Result<RawContent, FetchError>;
}

/// A registered source: metadata plus its capability.
#[derive(Clone)]
pub struct Source {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    /// Overrides the run-wide discovery timeout for slow sources.
    pub discovery_timeout: Option<Duration>,
    pub capability: Arc<dyn NewsSource>,
}

impl Source {
    pub fn new(id: impl Into<String>, capability: Arc<dyn NewsSource>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            enabled: true,
            discovery_timeout: None,
            capability,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("enabled", &self.enabled)
            .field("discovery_timeout", &self.discovery_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateLocator {
    pub source_id: String,
    pub locator: String,
    pub discovered_at: DateTime<Utc>,
}

impl CandidateLocator {
    pub fn new(source_id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            locator: locator.into(),
            discovered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    /// Final address the content was served from (may differ after redirects).
    pub locator: String,
    pub payload: String,
    pub fetched_at: DateTime<Utc>,
    pub content_type: Option<String>,
}

impl RawContent {
    pub fn new(locator: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            payload: payload.into(),
            fetched_at: Utc::now(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Canonical persisted article. `fingerprint` is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub fingerprint: String,
    pub source_id: String,
    pub canonical_url: String,
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub stored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmptyBody,
    UnsafeContent,
    TooShort,
    TooLong,
    DuplicateInRun,
    UndeterminedLanguage,
    FetchFailed,
    RunTimeout,
    InternalError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyBody => "empty_body",
            RejectReason::UnsafeContent => "unsafe_content",
            RejectReason::TooShort => "too_short",
            RejectReason::TooLong => "too_long",
            RejectReason::DuplicateInRun => "duplicate_in_run",
            RejectReason::UndeterminedLanguage => "undetermined_language",
            RejectReason::FetchFailed => "fetch_failed",
            RejectReason::RunTimeout => "run_timeout",
            RejectReason::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in the pipeline a locator was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Validate,
    /// Never handed to a worker (deadline passed first).
    Dispatch,
    /// In flight when the grace period ran out.
    Drain,
    /// Worker task died.
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    pub locator: String,
    pub source_id: String,
    pub stage: Stage,
    pub reason: RejectReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub rejected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

impl RejectedItem {
    pub fn new(locator: &CandidateLocator, stage: Stage, reason: RejectReason) -> Self {
        Self {
            locator: locator.locator.clone(),
            source_id: locator.source_id.clone(),
            stage,
            reason,
            detail: None,
            rejected_at: Utc::now(),
            snapshot: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Keep the first `max_chars` characters of the raw payload for diagnosis.
    pub fn with_snapshot(mut self, payload: &str, max_chars: usize) -> Self {
        if max_chars > 0 {
            self.snapshot = Some(payload.chars().take(max_chars).collect());
        }
        self
    }
}
