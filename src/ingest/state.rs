// src/ingest/state.rs
//! Per-locator state machine.
//!
//! ```text
//! Discovered -> Fetching -> Fetched -> Validating -> Valid -> Stored
//!                                                 \-> Invalid -> Rejected
//!                        \-> FetchFailed -> Rejected
//! ```
//! Any non-terminal state may also jump straight to `Rejected` when the run
//! is cancelled. `Stored` and `Rejected` are terminal.

use serde::{Deserialize, Serialize};

use crate::ingest::error::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorState {
    Discovered,
    Fetching,
    Fetched,
    FetchFailed,
    Validating,
    Valid,
    Invalid,
    Stored,
    Rejected,
}

impl LocatorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LocatorState::Stored | LocatorState::Rejected)
    }

    pub fn can_advance_to(self, next: LocatorState) -> bool {
        use LocatorState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Discovered, Fetching)
                | (Fetching, Fetched)
                | (Fetching, FetchFailed)
                | (Fetched, Validating)
                | (Validating, Valid)
                | (Validating, Invalid)
                | (Valid, Stored)
                | (Invalid, Rejected)
                | (FetchFailed, Rejected)
                | (_, Rejected)
        )
    }
}

/// State of one locator plus the path it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorTrack {
    state: LocatorState,
    history: Vec<LocatorState>,
}

impl Default for LocatorTrack {
    fn default() -> Self {
        Self::new()
    }
}

impl LocatorTrack {
    pub fn new() -> Self {
        Self {
            state: LocatorState::Discovered,
            history: vec![LocatorState::Discovered],
        }
    }

    pub fn state(&self) -> LocatorState {
        self.state
    }

    pub fn history(&self) -> &[LocatorState] {
        &self.history
    }

    pub fn advance(&mut self, next: LocatorState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}
