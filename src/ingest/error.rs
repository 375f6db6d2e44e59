// src/ingest/error.rs
//! Typed failure taxonomy for the ingest pipeline.
//!
//! Each error is scoped: discovery errors belong to one source, fetch errors to
//! one locator, store/storage errors to one write. Only [`StorageError`] can end
//! a run early.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("source `{0}` is already registered")]
pub struct DuplicateSourceError(pub String);

/// Discovery failed for one source. Never fatal to the run.
#[derive(Debug, Clone, Error)]
pub enum DiscoveryError {
    #[error("discovery transport error: {0}")]
    Transport(String),
    #[error("discovery parse error: {0}")]
    Parse(String),
    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),
}

/// Fetch failed for one locator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

impl FetchError {
    /// Timeouts, transport failures, 5xx, 408 and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Transport(_) => true,
            FetchError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
        }
    }
}

/// A single document-store call failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store temporarily unavailable: {0}")]
    Transient(String),
    #[error("store rejected the write: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// The gateway gave up on a write after its retry budget.
#[derive(Debug, Clone, Error)]
#[error("storage failed after {attempts} attempt(s): {last}")]
pub struct StorageError {
    pub attempts: u32,
    pub last: StoreError,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal locator transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: super::state::LocatorState,
    pub to: super::state::LocatorState,
}

/// Why a worker task could not record a terminal outcome.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_not_retried() {
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Status(403).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
    }
}
