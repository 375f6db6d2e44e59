// src/ingest/builder.rs
//! Article builder: raw content -> validated [`Article`] or a reasoned rejection.
//!
//! Pure apart from the in-run fingerprint set. One builder lives for exactly
//! one run; the set is never carried over. Bodies are sanitized before any
//! rule runs, so lengths and fingerprints are taken on the sanitized text.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::ingest::canonical::{canonical_url, content_fingerprint};
use crate::ingest::extract::{extract, Extracted};
use crate::ingest::lang::{detect_language, normalize_hint};
use crate::ingest::sanitize::{find_unsafe, sanitize};
use crate::ingest::types::{Article, CandidateLocator, RawContent, RejectReason, Source};

fn default_min_body_chars() -> usize {
    300
}
fn default_max_body_chars() -> usize {
    500_000
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BuilderConfig {
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
    #[serde(default)]
    pub require_language: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            min_body_chars: default_min_body_chars(),
            max_body_chars: default_max_body_chars(),
            require_language: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Valid(Article),
    Rejected(RejectReason),
}

#[derive(Debug)]
pub struct ArticleBuilder {
    cfg: BuilderConfig,
    seen: Mutex<HashSet<String>>,
}

impl ArticleBuilder {
    pub fn new(cfg: BuilderConfig) -> Self {
        Self {
            cfg,
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.cfg
    }

    /// Fingerprints accepted so far in this run.
    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Forget `fingerprint` after its article could not be committed, so a
    /// later copy in the same run may still be stored.
    pub fn release(&self, fingerprint: &str) -> bool {
        self.seen.lock().remove(fingerprint)
    }

    pub fn build(
        &self,
        raw: &RawContent,
        source: &Source,
        locator: &CandidateLocator,
    ) -> BuildOutcome {
        let Extracted {
            title,
            body,
            published_at,
            lang_hint,
        } = extract(raw);
        let body = sanitize(&body);

        if body.trim().is_empty() {
            return BuildOutcome::Rejected(RejectReason::EmptyBody);
        }
        if let Some(pattern) = find_unsafe(&body) {
            tracing::debug!(target: "ingest", locator = %locator.locator, pattern, "unsafe content");
            return BuildOutcome::Rejected(RejectReason::UnsafeContent);
        }
        let chars = body.chars().count();
        if chars < self.cfg.min_body_chars {
            return BuildOutcome::Rejected(RejectReason::TooShort);
        }
        if chars > self.cfg.max_body_chars {
            return BuildOutcome::Rejected(RejectReason::TooLong);
        }

        // Fetch may have followed redirects; the served address wins.
        let address = if raw.locator.trim().is_empty() {
            &locator.locator
        } else {
            &raw.locator
        };
        let canonical = canonical_url(address);
        let fingerprint = content_fingerprint(&canonical, &body);

        // Check-and-insert under one lock so two workers cannot both see the
        // same fingerprint as new.
        if !self.seen.lock().insert(fingerprint.clone()) {
            return BuildOutcome::Rejected(RejectReason::DuplicateInRun);
        }

        let language = lang_hint
            .as_deref()
            .and_then(normalize_hint)
            .or_else(|| detect_language(&body).map(str::to_string));
        if language.is_none() && self.cfg.require_language {
            return BuildOutcome::Rejected(RejectReason::UndeterminedLanguage);
        }

        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| canonical.clone());

        BuildOutcome::Valid(Article {
            fingerprint,
            source_id: source.id.clone(),
            canonical_url: canonical,
            title,
            body,
            published_at,
            language,
            fetched_at: raw.fetched_at,
            stored_at: None,
        })
    }
}
