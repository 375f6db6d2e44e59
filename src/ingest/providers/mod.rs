// src/ingest/providers/mod.rs
pub mod http;
pub mod news_api;
pub mod rss;

pub use http::{HttpFetcher, HttpFetcherConfig, RequestMethod};
pub use news_api::{NewsApiConfig, NewsApiSource};
pub use rss::RssFeedSource;
