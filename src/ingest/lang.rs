// src/ingest/lang.rs
//! Language detection by stop-word frequency. Good enough to tell the common
//! European news languages apart; anything else comes back undetermined.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Minimum stop-word hits before a guess is trusted.
const MIN_HITS: usize = 3;
/// Minimum share of tokens that must be stop words of the winning language.
const MIN_RATIO: f32 = 0.05;
/// Only the first N tokens are scored.
const SAMPLE_TOKENS: usize = 2_000;

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").unwrap());

static STOPWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "of", "to", "in", "is", "that", "for", "it", "with", "was", "on", "as",
            "are", "by", "this", "be", "from", "at", "have", "has", "but", "not", "they", "were",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "de", "que", "y", "en", "los", "del", "se", "las", "por", "un", "para",
            "con", "una", "su", "al", "es", "lo", "como", "más", "pero", "sus", "fue", "este",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "de", "des", "et", "est", "un", "une", "du", "dans", "que", "qui",
            "pour", "pas", "sur", "au", "avec", "il", "elle", "ce", "sont", "mais", "été", "aux",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "und", "das", "ist", "nicht", "den", "mit", "sich", "des", "auf", "für",
            "ein", "eine", "dem", "im", "von", "zu", "auch", "es", "wird", "sie", "werden", "hat",
        ],
    ),
    (
        "it",
        &[
            "il", "di", "che", "e", "la", "per", "un", "una", "del", "della", "in", "non", "sono",
            "gli", "le", "con", "si", "da", "alla", "anche", "nel", "è", "dei", "ha", "questo",
        ],
    ),
    (
        "pt",
        &[
            "o", "a", "de", "que", "e", "do", "da", "em", "um", "uma", "para", "com", "não", "os",
            "as", "no", "na", "por", "mais", "dos", "das", "foi", "ao", "seu", "sua",
        ],
    ),
    (
        "nl",
        &[
            "de", "het", "een", "en", "van", "is", "dat", "op", "te", "in", "zijn", "voor", "niet",
            "met", "die", "aan", "er", "ook", "als", "bij", "door", "werd", "naar", "heeft", "wordt",
        ],
    ),
];

static SUPPORTED: Lazy<Vec<&'static str>> = Lazy::new(|| STOPWORDS.iter().map(|(l, _)| *l).collect());

/// ISO 639-1 codes this detector can return.
pub fn supported_languages() -> &'static [&'static str] {
    &SUPPORTED
}

/// Best-guess ISO 639-1 code for `text`, or `None` when the evidence is thin.
pub fn detect_language(text: &str) -> Option<&'static str> {
    let tokens: Vec<String> = RE_WORD
        .find_iter(text)
        .take(SAMPLE_TOKENS)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if tokens.is_empty() {
        return None;
    }

    let mut hits: HashMap<&'static str, usize> = HashMap::new();
    for (lang, words) in STOPWORDS {
        let n = tokens.iter().filter(|t| words.contains(&t.as_str())).count();
        hits.insert(*lang, n);
    }

    let mut ranked: Vec<(&'static str, usize)> = hits.into_iter().collect();
    // Ties broken by table order so results are deterministic.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| rank_of(a.0).cmp(&rank_of(b.0))));
    let (best, count) = ranked.first().copied()?;

    let ratio = count as f32 / tokens.len() as f32;
    if count >= MIN_HITS && ratio >= MIN_RATIO {
        Some(best)
    } else {
        None
    }
}

/// Accept a declared language only when it is a plausible ISO 639-1 code.
pub fn normalize_hint(hint: &str) -> Option<String> {
    let code: String = hint.trim().chars().take(2).collect::<String>().to_ascii_lowercase();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code)
    } else {
        None
    }
}

fn rank_of(lang: &str) -> usize {
    STOPWORDS
        .iter()
        .position(|(l, _)| *l == lang)
        .unwrap_or(usize::MAX)
}
