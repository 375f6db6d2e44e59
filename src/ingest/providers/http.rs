// src/ingest/providers/http.rs
//! Article fetching over HTTP with browser-like request headers.

use std::time::Duration;

use metrics::counter;
use rand::seq::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use serde::de::DeserializeOwned;

use crate::ingest::error::FetchError;
use crate::ingest::types::RawContent;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Some sites only answer generic API clients.
const FALLBACK_USER_AGENT: &str = "PostmanRuntime/7.37.3";

/// How a request was made; the `method` label of `ingest_fetch_requests_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    /// Random browser user agent.
    Basic,
    /// Second try with [`FALLBACK_USER_AGENT`].
    Fallback,
    /// Keyed JSON API call.
    Api,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Basic => "basic",
            RequestMethod::Fallback => "fallback",
            RequestMethod::Api => "api",
        }
    }
}

/// Count one finished request. `status` is the HTTP code, or `error` when no
/// response came back.
fn record_request(method: RequestMethod, result: &Result<u16, FetchError>) {
    let status = match result {
        Ok(code) | Err(FetchError::Status(code)) => code.to_string(),
        Err(FetchError::Timeout(_)) => "timeout".to_string(),
        Err(FetchError::Transport(_)) => "error".to_string(),
    };
    counter!("ingest_fetch_requests_total", "method" => method.as_str(), "status" => status)
        .increment(1);
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Retry once with [`FALLBACK_USER_AGENT`] on a non-success status.
    pub fallback_user_agent: bool,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            fallback_user_agent: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    cfg: HttpFetcherConfig,
}

impl HttpFetcher {
    pub fn new(cfg: HttpFetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, cfg })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn random_user_agent() -> &'static str {
        USER_AGENTS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
    }

    /// GET `url` as text.
    pub async fn get_text(&self, url: &str) -> Result<RawContent, FetchError> {
        match self.get_with(url, RequestMethod::Basic).await {
            Err(FetchError::Status(code)) if self.cfg.fallback_user_agent => {
                tracing::debug!(target: "ingest", %url, status = code, "retrying with fallback user agent");
                self.get_with(url, RequestMethod::Fallback).await
            }
            other => other,
        }
    }

    /// GET `url` with `query` and extra `headers`, decoding a JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: HeaderMap,
    ) -> Result<T, FetchError> {
        let sent = self
            .client
            .get(url)
            .query(query)
            .headers(headers)
            .send()
            .await
            .map_err(map_reqwest);
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                record_request(RequestMethod::Api, &Err(e.clone()));
                return Err(e);
            }
        };
        let status = resp.status();
        record_request(RequestMethod::Api, &Ok(status.as_u16()));
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Transport(format!("decoding response: {e}")))
    }

    async fn get_with(&self, url: &str, method: RequestMethod) -> Result<RawContent, FetchError> {
        let user_agent = match method {
            RequestMethod::Fallback => FALLBACK_USER_AGENT,
            _ => Self::random_user_agent(),
        };
        let sent = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(map_reqwest);
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                record_request(method, &Err(e.clone()));
                return Err(e);
            }
        };

        let status = resp.status();
        record_request(method, &Ok(status.as_u16()));
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(map_reqwest)?;

        let mut raw = RawContent::new(final_url, body);
        if let Some(ct) = content_type {
            raw = raw.with_content_type(ct);
        }
        Ok(raw)
    }
}

fn map_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(Duration::ZERO)
    } else if let Some(status) = e.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agents_come_from_the_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&HttpFetcher::random_user_agent()));
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let f = HttpFetcher::new(HttpFetcherConfig {
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
            fallback_user_agent: false,
        })
        .unwrap();
        let err = f.get_text("http://127.0.0.1:9/").await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }
}
