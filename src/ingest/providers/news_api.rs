// src/ingest/providers/news_api.rs
//! Keyed news-search API source. Discovery asks the API for the current
//! headlines of every configured market (`en-GB`, `de-AT`, ...) in turn and
//! keeps the article URLs in first-seen order; fetch goes through
//! [`HttpFetcher`] like any other page.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use crate::ingest::error::{DiscoveryError, FetchError};
use crate::ingest::providers::http::HttpFetcher;
use crate::ingest::types::{NewsSource, RawContent};

pub const API_KEY_HEADER: &str = "ocp-apim-subscription-key";
pub const DEFAULT_API_KEY_ENV: &str = "NEWS_API_KEY";
const SEARCH_PATH: &str = "/v7.0/news";

pub const DEFAULT_MARKETS: &[&str] = &[
    "es-AR", "en-AU", "de-AT", "nl-BE", "fr-BE", "pt-BR", "en-CA", "fr-CA", "es-CL", "da-DK",
    "fi-FI", "fr-FR", "de-DE", "zh-HK", "en-IN", "en-ID", "it-IT", "ja-JP", "ko-KR", "en-MY",
    "es-MX", "nl-NL", "en-NZ", "no-NO", "zh-CN", "pl-PL", "en-PH", "ru-RU", "en-ZA", "es-ES",
    "sv-SE", "fr-CH", "de-CH", "zh-TW", "tr-TR", "en-GB", "en-US", "es-US",
];

#[derive(Debug, Clone)]
pub struct NewsApiConfig {
    /// Base URL; requests go to `{endpoint}/v7.0/news`.
    pub endpoint: String,
    pub api_key: String,
    pub markets: Vec<String>,
    /// Pause between two market requests.
    pub market_delay: Duration,
    /// Extra attempts for a market answered with 429.
    pub rate_limit_retries: u32,
    pub rate_limit_backoff: Duration,
}

impl NewsApiConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            markets: DEFAULT_MARKETS.iter().map(|m| m.to_string()).collect(),
            market_delay: Duration::from_secs(1),
            rate_limit_retries: 2,
            rate_limit_backoff: Duration::from_secs(4),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    value: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    url: Option<String>,
}

impl SearchResponse {
    fn links(self) -> Vec<String> {
        self.value
            .into_iter()
            .filter_map(|it| it.url)
            .map(|u| u.trim().to_string())
            .filter(|u| u.starts_with("http"))
            .collect()
    }
}

enum Backend {
    Live,
    /// Market -> canned response body.
    Fixture(HashMap<String, String>),
}

pub struct NewsApiSource {
    cfg: NewsApiConfig,
    backend: Backend,
    fetcher: HttpFetcher,
}

impl NewsApiSource {
    pub fn new(cfg: NewsApiConfig, fetcher: HttpFetcher) -> Self {
        Self {
            cfg,
            backend: Backend::Live,
            fetcher,
        }
    }

    /// Discovery reads `responses` (market -> JSON body) instead of calling
    /// the API. Markets without a response fail like an unreachable API.
    pub fn from_fixtures<I, M, B>(markets: Vec<String>, responses: I, fetcher: HttpFetcher) -> Self
    where
        I: IntoIterator<Item = (M, B)>,
        M: Into<String>,
        B: Into<String>,
    {
        let cfg = NewsApiConfig {
            markets,
            market_delay: Duration::ZERO,
            ..NewsApiConfig::new("", "")
        };
        Self {
            cfg,
            backend: Backend::Fixture(
                responses
                    .into_iter()
                    .map(|(m, b)| (m.into(), b.into()))
                    .collect(),
            ),
            fetcher,
        }
    }

    pub fn markets(&self) -> &[String] {
        &self.cfg.markets
    }

    /// Article URLs in one API response, in response order.
    pub fn parse_links(json: &str) -> Result<Vec<String>, DiscoveryError> {
        let resp: SearchResponse =
            serde_json::from_str(json).map_err(|e| DiscoveryError::Parse(e.to_string()))?;
        Ok(resp.links())
    }

    async fn market_links(&self, market: &str) -> Result<Vec<String>, DiscoveryError> {
        if !is_market(market) {
            return Err(DiscoveryError::Parse(format!("invalid market `{market}`")));
        }
        match &self.backend {
            Backend::Fixture(responses) => match responses.get(market) {
                Some(body) => Self::parse_links(body),
                None => Err(DiscoveryError::Transport(format!(
                    "no response for market {market}"
                ))),
            },
            Backend::Live => Ok(self.search(market).await?.links()),
        }
    }

    async fn search(&self, market: &str) -> Result<SearchResponse, DiscoveryError> {
        let url = format!("{}{SEARCH_PATH}", self.cfg.endpoint.trim_end_matches('/'));
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&self.cfg.api_key)
            .map_err(|e| DiscoveryError::Transport(format!("api key: {e}")))?;
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
        let query = [("mkt", market), ("sortBy", "Relevance"), ("safeSearch", "Off")];

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.fetcher.get_json(&url, &query, headers.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(FetchError::Status(429)) if attempt <= self.cfg.rate_limit_retries => {
                    let delay = self
                        .cfg
                        .rate_limit_backoff
                        .saturating_mul(1u32 << (attempt - 1).min(8));
                    tracing::debug!(target: "ingest", %market, attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(FetchError::Timeout(d)) => return Err(DiscoveryError::Timeout(d)),
                Err(e) => return Err(DiscoveryError::Transport(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl NewsSource for NewsApiSource {
    /// Fails only when every market failed; single market failures are logged.
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut answered = 0usize;
        let mut last_err = None;

        for (i, market) in self.cfg.markets.iter().enumerate() {
            if i > 0 && !self.cfg.market_delay.is_zero() {
                tokio::time::sleep(self.cfg.market_delay).await;
            }
            match self.market_links(market).await {
                Ok(links) => {
                    answered += 1;
                    tracing::debug!(target: "ingest", %market, links = links.len(), "market searched");
                    for l in links {
                        if seen.insert(l.clone()) {
                            out.push(l);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", %market, error = %e, "market search failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if answered == 0 => Err(e),
            _ => Ok(out),
        }
    }

    async fn fetch(&self, locator: &str) -> Result<RawContent, FetchError> {
        self.fetcher.get_text(locator).await
    }
}

/// `ll-CC`: two-letter language, two-letter country.
fn is_market(m: &str) -> bool {
    let mut parts = m.split('-');
    let ok = |p: Option<&str>| p.is_some_and(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_alphabetic()));
    ok(parts.next()) && ok(parts.next()) && parts.next().is_none()
}
