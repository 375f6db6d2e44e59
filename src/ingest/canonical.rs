// src/ingest/canonical.rs
//! Canonical URLs and content fingerprints.

use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that only carry campaign/click tracking.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "mc_cid", "mc_eid", "igshid", "yclid", "_ga", "_gl",
    "ref_src", "cmpid", "ocid", "smid", "mkt_tok",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonical form of a locator: no fragment, lowercase host, no tracking
/// parameters, remaining parameters sorted, no trailing slash on non-root paths.
///
/// Strings that do not parse as absolute URLs are only trimmed.
pub fn canonical_url(locator: &str) -> String {
    let trimmed = locator.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    url.set_fragment(None);

    // `Url` already lowercases hosts of special schemes; make it explicit for others.
    if let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) {
        if url.host_str() != Some(host.as_str()) && url.set_host(Some(&host)).is_err() {
            tracing::debug!(target: "ingest", %locator, "could not lowercase host");
        }
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if params.is_empty() {
        url.set_query(None);
    } else {
        params.sort();
        url.query_pairs_mut().clear().extend_pairs(params.iter());
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
        if url.path().is_empty() {
            url.set_path("/");
        }
    }

    url.to_string()
}

/// Body as used for identity: lowercase, whitespace collapsed to single spaces.
pub fn normalize_body(body: &str) -> String {
    body.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 over `canonical_url + "\n" + normalize_body(body)`.
pub fn content_fingerprint(canonical_url: &str, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_body(body).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tracking_and_trailing_slash() {
        assert_eq!(
            canonical_url("https://News.Example.COM/world/story/?utm_source=x&id=7&fbclid=abc#top"),
            "https://news.example.com/world/story?id=7"
        );
        assert_eq!(
            canonical_url("https://example.com/"),
            "https://example.com/"
        );
        assert_eq!(
            canonical_url("https://example.com/a?b=2&a=1"),
            "https://example.com/a?a=1&b=2"
        );
    }

    #[test]
    fn unparseable_locators_are_trimmed_only() {
        assert_eq!(canonical_url("  not a url "), "not a url");
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing_of_body() {
        let a = content_fingerprint("https://e.com/a", "Hello   World\nagain");
        let b = content_fingerprint("https://e.com/a", "hello world again");
        let c = content_fingerprint("https://e.com/b", "hello world again");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
