// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod ingest;
pub mod metrics;
pub mod store;

pub use crate::config::{PipelineConfig, SourceConfig};
pub use crate::ingest::{Pipeline, PipelineSettings, RunReport, RunStatus, SourceRegistry};
pub use crate::store::{DocumentStore, JsonlStore, MemoryStore};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::config::SourceKind;
use crate::ingest::providers::news_api::DEFAULT_API_KEY_ENV;
use crate::ingest::providers::{
    HttpFetcher, HttpFetcherConfig, NewsApiConfig, NewsApiSource, RssFeedSource,
};
use crate::ingest::types::{NewsSource, Source};

/// Registry of the RSS and news-API sources listed in the configuration.
///
/// An enabled news-API source needs its key in the environment; a disabled
/// one is registered without it.
pub fn registry_from_config(cfg: &PipelineConfig) -> anyhow::Result<SourceRegistry> {
    let fetcher = HttpFetcher::new(HttpFetcherConfig {
        request_timeout: Duration::from_millis(cfg.fetch_timeout_ms),
        ..HttpFetcherConfig::default()
    })?;

    let mut registry = SourceRegistry::default();
    for sc in &cfg.sources {
        let capability: Arc<dyn NewsSource> = match sc.kind {
            SourceKind::Rss => Arc::new(RssFeedSource::from_url(sc.feed_url.clone(), fetcher.clone())),
            SourceKind::NewsApi => Arc::new(NewsApiSource::new(
                news_api_config(sc)?,
                fetcher.clone(),
            )),
        };
        let mut source = Source::new(sc.id.clone(), capability)
            .with_display_name(sc.name.clone().unwrap_or_else(|| sc.id.clone()))
            .with_enabled(sc.enabled);
        if let Some(secs) = sc.discovery_timeout_secs {
            source = source.with_discovery_timeout(Duration::from_secs(secs));
        }
        registry.register_source(source)?;
    }
    Ok(registry)
}

fn news_api_config(sc: &SourceConfig) -> anyhow::Result<NewsApiConfig> {
    let key_env = sc.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV);
    let key = match std::env::var(key_env) {
        Ok(k) if !k.trim().is_empty() => k.trim().to_string(),
        _ if !sc.enabled => String::new(),
        _ => {
            return Err(anyhow::anyhow!("{key_env} is not set"))
                .with_context(|| format!("news api source `{}`", sc.id))
        }
    };
    let mut api = NewsApiConfig::new(sc.endpoint.clone(), key);
    if !sc.markets.is_empty() {
        api.markets = sc.markets.clone();
    }
    if let Some(ms) = sc.market_delay_ms {
        api.market_delay = Duration::from_millis(ms);
    }
    Ok(api)
}
