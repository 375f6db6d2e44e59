// src/ingest/providers/rss.rs
//! RSS-backed news source: discovery reads item links from a feed, fetch goes
//! through [`HttpFetcher`].

use async_trait::async_trait;
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::error::{DiscoveryError, FetchError};
use crate::ingest::providers::http::HttpFetcher;
use crate::ingest::types::{NewsSource, RawContent};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    link: Option<String>,
    guid: Option<String>,
}

enum Feed {
    Fixture(String),
    Url(String),
}

pub struct RssFeedSource {
    feed: Feed,
    fetcher: HttpFetcher,
}

impl RssFeedSource {
    pub fn from_url(feed_url: impl Into<String>, fetcher: HttpFetcher) -> Self {
        Self {
            feed: Feed::Url(feed_url.into()),
            fetcher,
        }
    }

    /// Discovery parses `xml` instead of downloading a feed.
    pub fn from_fixture(xml: impl Into<String>, fetcher: HttpFetcher) -> Self {
        Self {
            feed: Feed::Fixture(xml.into()),
            fetcher,
        }
    }

    pub fn parse_links(xml: &str) -> Result<Vec<String>, DiscoveryError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean).map_err(|e| DiscoveryError::Parse(e.to_string()))?;

        let mut out: Vec<String> = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let link = it
                .link
                .or(it.guid.filter(|g| g.starts_with("http")))
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());
            if let Some(l) = link {
                if !out.contains(&l) {
                    out.push(l);
                }
            }
        }

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl NewsSource for RssFeedSource {
    async fn discover(&self) -> Result<Vec<String>, DiscoveryError> {
        match &self.feed {
            Feed::Fixture(s) => Self::parse_links(s),
            Feed::Url(url) => {
                let raw = self.fetcher.get_text(url).await.map_err(|e| match e {
                    FetchError::Timeout(d) => DiscoveryError::Timeout(d),
                    other => DiscoveryError::Transport(other.to_string()),
                })?;
                Self::parse_links(&raw.payload)
            }
        }
    }

    async fn fetch(&self, locator: &str) -> Result<RawContent, FetchError> {
        self.fetcher.get_text(locator).await
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
