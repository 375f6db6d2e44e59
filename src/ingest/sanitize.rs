// src/ingest/sanitize.rs
//! Text sanitizer applied to every extracted body before validation.
//!
//! Strips embedded script/iframe blocks, stray markup and `$operator` tokens
//! (document-store query operators), drops zero-width characters, normalizes
//! line breaks and applies NFKC.
//! Anything still matching a blocked pattern afterwards is unsafe content.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::ingest::extract::collapse_lines;

struct Blocked {
    name: &'static str,
    re: Regex,
}

static BLOCKED: Lazy<Vec<Blocked>> = Lazy::new(|| {
    [
        ("script", r"(?is)<script\b[^>]*>.*?</script\s*>"),
        ("iframe", r"(?is)<iframe\b[^>]*>.*?</iframe\s*>"),
        ("operator", r"\$[A-Za-z_][A-Za-z0-9_]*"),
    ]
    .into_iter()
    .map(|(name, pattern)| Blocked {
        name,
        re: Regex::new(pattern).unwrap(),
    })
    .collect()
});

static RE_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>\n]+>").unwrap());

/// Zero-width space/joiners, word joiner, BOM. NFKC keeps these.
const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];

pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();
    for b in BLOCKED.iter() {
        out = b.re.replace_all(&out, "").into_owned();
    }
    out = RE_MARKUP.replace_all(&out, "").into_owned();
    let normalized: String = out.nfkc().filter(|c| !INVISIBLE.contains(c)).collect();
    collapse_lines(&normalized)
}

/// Name of the first blocked pattern found in `text`.
pub fn find_unsafe(text: &str) -> Option<&'static str> {
    BLOCKED.iter().find(|b| b.re.is_match(text)).map(|b| b.name)
}
