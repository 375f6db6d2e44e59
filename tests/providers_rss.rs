// tests/providers_rss.rs
use globe_news_ingest::ingest::providers::{HttpFetcher, HttpFetcherConfig, RssFeedSource};
use globe_news_ingest::ingest::types::NewsSource;

#[tokio::test]
async fn fixture_feed_yields_item_links() {
    let xml = std::fs::read_to_string("tests/fixtures/wire_rss.xml").expect("fixture");
    let fetcher = HttpFetcher::new(HttpFetcherConfig::default()).unwrap();
    let src = RssFeedSource::from_fixture(xml, fetcher);

    let links = src.discover().await.unwrap();
    assert_eq!(
        links,
        vec![
            "https://wire.example/world/harbour-reopens?utm_source=rss",
            "https://wire.example/local/bridge-repairs",
            "https://wire.example/business/markets-steady",
        ]
    );
}

#[tokio::test]
async fn unreachable_feed_is_a_discovery_error() {
    let fetcher = HttpFetcher::new(HttpFetcherConfig {
        connect_timeout: std::time::Duration::from_millis(200),
        request_timeout: std::time::Duration::from_millis(500),
        fallback_user_agent: false,
    })
    .unwrap();
    let src = RssFeedSource::from_url("http://127.0.0.1:9/rss.xml", fetcher);
    assert!(src.discover().await.is_err());
}
