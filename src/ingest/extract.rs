// src/ingest/extract.rs
//! Minimal HTML-to-text pass: title, body text, publication time and the
//! document's declared language. No site-specific selectors.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::types::RawContent;

const TITLE_MAX_CHARS: usize = 300;

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_INLINE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());

static SEL_META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta[content]").unwrap());
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static SEL_H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static SEL_TIME: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").unwrap());
static SEL_HTML: Lazy<Selector> = Lazy::new(|| Selector::parse("html[lang]").unwrap());
static SEL_ARTICLE: Lazy<Selector> = Lazy::new(|| Selector::parse("article").unwrap());
static SEL_BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Attributes that name a `<meta>` element.
const META_NAME_ATTRS: &[&str] = &["property", "name", "itemprop", "http-equiv"];
const PUBLISHED_KEYS: &[&str] = &["article:published_time", "datePublished", "pubdate", "date"];
const LANGUAGE_KEYS: &[&str] = &["content-language", "language"];

/// Subtrees that never hold article text.
const SKIPPED: &[&str] = &["head", "script", "style", "noscript", "template", "svg", "iframe"];
const BLOCKS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "blockquote",
    "section", "article", "header", "footer", "aside", "main", "figure", "figcaption", "table",
    "tr", "pre",
];

/// What the builder needs out of a page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extracted {
    pub title: Option<String>,
    /// Paragraphs separated by `\n`, whitespace collapsed within lines.
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub lang_hint: Option<String>,
}

/// ASCII quotes, collapsed whitespace.
pub fn tidy_text(s: &str) -> String {
    // “ ” ‘ ’ « » to ASCII quotes
    let out = s
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

pub fn looks_like_html(raw: &RawContent) -> bool {
    if let Some(ct) = raw.content_type.as_deref() {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("html") || ct.contains("xml") {
            return true;
        }
        if ct.starts_with("text/plain") {
            return false;
        }
    }
    let head: String = raw.payload.chars().take(512).collect::<String>().to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html") || head.contains("<body")
}

pub fn extract(raw: &RawContent) -> Extracted {
    if looks_like_html(raw) {
        extract_html(&raw.payload)
    } else {
        extract_plain(&raw.payload)
    }
}

fn extract_plain(text: &str) -> Extracted {
    let body = collapse_lines(&html_escape::decode_html_entities(text));
    let title = body.lines().next().map(|l| truncate_chars(l, TITLE_MAX_CHARS));
    Extracted {
        title,
        body,
        published_at: None,
        lang_hint: None,
    }
}

fn extract_html(html: &str) -> Extracted {
    let doc = Html::parse_document(html);

    let title = meta_content(&doc, &["og:title", "twitter:title"])
        .or_else(|| first_text(&doc, &SEL_TITLE))
        .or_else(|| first_text(&doc, &SEL_H1))
        .map(|t| tidy_text(&t))
        .filter(|t| !t.is_empty())
        .map(|t| truncate_chars(&t, TITLE_MAX_CHARS));

    let published_at = meta_content(&doc, PUBLISHED_KEYS)
        .and_then(|s| parse_timestamp(&s))
        .or_else(|| {
            doc.select(&SEL_TIME)
                .filter_map(|el| el.value().attr("datetime"))
                .find_map(parse_timestamp)
        });

    let lang_hint = doc
        .select(&SEL_HTML)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .and_then(primary_subtag)
        .or_else(|| meta_content(&doc, LANGUAGE_KEYS).as_deref().and_then(primary_subtag));

    let scope = doc
        .select(&SEL_ARTICLE)
        .next()
        .or_else(|| doc.select(&SEL_BODY).next())
        .unwrap_or_else(|| doc.root_element());
    let mut text = String::new();
    push_text(scope, &mut text);

    Extracted {
        title,
        body: collapse_lines(&text),
        published_at,
        lang_hint,
    }
}

/// First non-empty `content` of a `<meta>` named by any of `keys`, in key order.
fn meta_content(doc: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        doc.select(&SEL_META).find_map(|el| {
            let v = el.value();
            let named = META_NAME_ATTRS
                .iter()
                .filter_map(|a| v.attr(a))
                .any(|n| n.trim().eq_ignore_ascii_case(key));
            if !named {
                return None;
            }
            v.attr("content")
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
        })
    })
}

fn first_text(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .map(|el| el.text().collect::<String>())
        .find(|t| !t.trim().is_empty())
}

/// Text of `el` with a line break around every block element.
fn push_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_el) = ElementRef::wrap(child) {
            let name = child_el.value().name();
            if SKIPPED.contains(&name) {
                continue;
            }
            let block = BLOCKS.contains(&name);
            if block {
                out.push('\n');
            }
            push_text(child_el, out);
            if block {
                out.push('\n');
            }
        }
    }
}

/// `en-GB` -> `en`
fn primary_subtag(tag: &str) -> Option<String> {
    let primary = tag.trim().split(['-', '_']).next()?;
    if (2..=3).contains(&primary.len()) && primary.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(primary.to_ascii_lowercase())
    } else {
        None
    }
}

/// RFC 3339 first, then RFC 2822 (common in feeds and `date` metas).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    OffsetDateTime::parse(s, &Rfc2822)
        .ok()
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), 0).single())
}

pub(crate) fn collapse_lines(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n").replace('\u{00A0}', " ");
    unified
        .lines()
        .map(|l| RE_INLINE_WS.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
