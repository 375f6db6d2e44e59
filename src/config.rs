// src/config.rs
//! Pipeline configuration: TOML file, then environment overrides, then
//! sanitising. Out-of-range values are clamped to something usable rather
//! than rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::builder::BuilderConfig;
use crate::ingest::gateway::GatewayConfig;
use crate::ingest::pipeline::PipelineSettings;
use crate::ingest::pool::{PoolConfig, RetryPolicy};

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

const MAX_CONCURRENCY_CAP: usize = 256;
const MAX_RETRIES_CAP: u32 = 10;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// `feed_url` is an RSS feed.
    #[default]
    Rss,
    /// Keyed news-search API at `endpoint`, walked market by market.
    NewsApi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    /// Display name; defaults to `id`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub feed_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-source discovery timeout; the run-wide one otherwise.
    #[serde(default)]
    pub discovery_timeout_secs: Option<u64>,

    // news_api only
    #[serde(default)]
    pub endpoint: String,
    /// Env var holding the API key (`NEWS_API_KEY` when unset).
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Markets to walk; the built-in list when empty.
    #[serde(default)]
    pub markets: Vec<String>,
    #[serde(default)]
    pub market_delay_ms: Option<u64>,
}

impl SourceConfig {
    /// Where this source is reached: feed URL or API endpoint.
    pub fn address(&self) -> &str {
        match self.kind {
            SourceKind::Rss => &self.feed_url,
            SourceKind::NewsApi => &self.endpoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrency: usize,
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub run_budget_secs: u64,
    pub grace_period_secs: u64,
    pub discovery_timeout_secs: u64,
    pub min_body_chars: usize,
    pub max_body_chars: usize,
    pub require_language: bool,
    pub store_timeout_ms: u64,
    pub store_retries: u32,
    pub max_storage_failures: u32,
    /// Raw payload characters kept on validation rejections.
    pub snapshot_chars: usize,
    pub store_dir: PathBuf,
    /// Write the Prometheus exposition here after each run.
    pub metrics_textfile: Option<PathBuf>,
    pub sources: Vec<SourceConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            fetch_timeout_ms: 10_000,
            max_retries: 2,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            run_budget_secs: 600,
            grace_period_secs: 15,
            discovery_timeout_secs: 30,
            min_body_chars: 300,
            max_body_chars: 500_000,
            require_language: false,
            store_timeout_ms: 5_000,
            store_retries: 3,
            max_storage_failures: 3,
            snapshot_chars: 512,
            store_dir: PathBuf::from("data"),
            metrics_textfile: None,
            sources: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML file, then apply env overrides and sanitise.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let mut cfg: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("parsing ingest config {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks:
    /// 1) $INGEST_CONFIG_PATH (must exist)
    /// 2) config/ingest.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            return Self::load_from(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from(&default_p);
        }
        tracing::info!(target: "ingest", "no config file found, using defaults");
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        override_from_env("INGEST_MAX_CONCURRENCY", &mut self.max_concurrency);
        override_from_env("INGEST_FETCH_TIMEOUT_MS", &mut self.fetch_timeout_ms);
        override_from_env("INGEST_MAX_RETRIES", &mut self.max_retries);
        override_from_env("INGEST_RUN_BUDGET_SECS", &mut self.run_budget_secs);
        override_from_env("INGEST_MIN_BODY_CHARS", &mut self.min_body_chars);
        if let Ok(dir) = env::var("INGEST_STORE_DIR") {
            if !dir.trim().is_empty() {
                self.store_dir = PathBuf::from(dir.trim());
            }
        }
    }

    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        self.max_concurrency = self.max_concurrency.clamp(1, MAX_CONCURRENCY_CAP);
        self.max_retries = self.max_retries.min(MAX_RETRIES_CAP);
        self.store_retries = self.store_retries.min(MAX_RETRIES_CAP);
        self.fetch_timeout_ms = self.fetch_timeout_ms.clamp(100, 120_000);
        self.store_timeout_ms = self.store_timeout_ms.clamp(100, 60_000);
        if self.run_budget_secs == 0 {
            self.run_budget_secs = defaults.run_budget_secs;
        }
        if self.discovery_timeout_secs == 0 {
            self.discovery_timeout_secs = defaults.discovery_timeout_secs;
        }
        self.max_storage_failures = self.max_storage_failures.max(1);

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            std::mem::swap(&mut self.retry_base_delay_ms, &mut self.retry_max_delay_ms);
        }
        if self.max_body_chars == 0 {
            self.max_body_chars = defaults.max_body_chars;
        }
        if self.min_body_chars > self.max_body_chars {
            std::mem::swap(&mut self.min_body_chars, &mut self.max_body_chars);
        }

        self.sources.retain(|s| {
            let ok = !s.id.trim().is_empty() && !s.address().trim().is_empty();
            if !ok {
                tracing::warn!(target: "ingest", id = %s.id, kind = ?s.kind, "dropping source without id or address");
            }
            ok
        });
        for s in &mut self.sources {
            s.id = s.id.trim().to_string();
            s.feed_url = s.feed_url.trim().to_string();
            s.endpoint = s.endpoint.trim().to_string();
            s.markets = s
                .markets
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if s.discovery_timeout_secs == Some(0) {
                s.discovery_timeout_secs = None;
            }
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            pool: PoolConfig {
                max_concurrency: self.max_concurrency,
                fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
                retry: RetryPolicy {
                    max_retries: self.max_retries,
                    base_delay: Duration::from_millis(self.retry_base_delay_ms),
                    max_delay: Duration::from_millis(self.retry_max_delay_ms),
                },
            },
            builder: BuilderConfig {
                min_body_chars: self.min_body_chars,
                max_body_chars: self.max_body_chars,
                require_language: self.require_language,
            },
            gateway: GatewayConfig {
                store_timeout: Duration::from_millis(self.store_timeout_ms),
                store_retries: self.store_retries,
                ..GatewayConfig::default()
            },
            run_budget: Duration::from_secs(self.run_budget_secs),
            grace_period: Duration::from_secs(self.grace_period_secs),
            discovery_timeout: Duration::from_secs(self.discovery_timeout_secs),
            max_storage_failures: self.max_storage_failures,
            snapshot_chars: self.snapshot_chars,
        }
    }
}

fn override_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    let Ok(raw) = env::var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(target: "ingest", key, value = %raw, "ignoring unparsable env override"),
    }
}
