//! Deterministic pattern-based extraction fallback.
//!
//! When the LLM is unavailable (or returns garbage) this path still turns
//! raw text into one memory plus whatever claims the fixed patterns can
//! derive. Patterns are first-match-per-pattern, case-insensitive.

use regex::Regex;
use std::sync::LazyLock;

use super::{ExtractedClaim, ExtractedMemory, Extraction};
use crate::store::types::{MemoryKind, Visibility};

/// Inputs longer than this are truncated before storage.
const MAX_MEMORY_TEXT: usize = 2000;

/// Inputs under this length matching the trivial pattern are dropped.
const TRIVIAL_MAX_LEN: usize = 40;

static TRIVIAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(hi|hello|hey|yo|ok|okay|thanks|thank you|thx|yes|no|yep|nope|sure|cool|nice|great|got it|sounds good|good morning|good night|bye|goodbye)[\s.!?]*$",
    )
    .expect("trivial regex")
});

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmy name is\s+([^.,!?\n]+)").expect("name regex"));

static LIVES_IN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi live in\s+([^.,!?\n]+)").expect("lives_in regex"));

static WORKS_AT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi work at\s+([^.,!?\n]+)").expect("works_at regex"));

static FAVORITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmy favorite\s+([a-z][a-z ]*?)\s+is\s+([^.,!?\n]+)").expect("favorite regex")
});

static LIKES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi like\s+([^.,!?\n]+)").expect("likes regex"));

/// Extract one memory (plus pattern-derived claims) from raw text.
///
/// Trivial greetings under 40 chars are dropped unless `force` is set.
pub fn extract(text: &str, force: bool) -> Extraction {
    let trimmed = text.trim();
    if !force && trimmed.len() < TRIVIAL_MAX_LEN && TRIVIAL_RE.is_match(trimmed) {
        return Extraction { memories: vec![] };
    }
    if trimmed.is_empty() {
        return Extraction { memories: vec![] };
    }

    let normalized_text = collapse_whitespace(trimmed);
    let stored_text = truncate_chars(&normalized_text, MAX_MEMORY_TEXT);

    let claims = derive_claims(trimmed);
    let kind = if claims.is_empty() {
        MemoryKind::Note
    } else {
        MemoryKind::Fact
    };

    Extraction {
        memories: vec![ExtractedMemory {
            text: stored_text,
            kind,
            importance: 50,
            confidence: 0.9,
            is_temporal: false,
            visibility: Visibility::Private,
            tags: vec![],
            claims,
        }],
    }
}

/// Run every pattern once, dedupe by (predicate, lowercased value).
fn derive_claims(text: &str) -> Vec<ExtractedClaim> {
    let mut claims: Vec<ExtractedClaim> = Vec::new();

    if let Some(caps) = NAME_RE.captures(text) {
        push_claim(&mut claims, "name", &caps[1], "fact", 0.9);
    }
    if let Some(caps) = LIVES_IN_RE.captures(text) {
        push_claim(&mut claims, "lives_in", &caps[1], "fact", 0.85);
    }
    if let Some(caps) = WORKS_AT_RE.captures(text) {
        push_claim(&mut claims, "works_at", &caps[1], "fact", 0.85);
    }
    if let Some(caps) = FAVORITE_RE.captures(text) {
        // category tokens are alphabetized so word order never forks the slot
        let mut tokens: Vec<String> = caps[1]
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        tokens.sort_unstable();
        let predicate = format!("favorite_{}", normalize_predicate(&tokens.join(" ")));
        push_claim(&mut claims, &predicate, &caps[2], "preference", 0.85);
    }
    if let Some(caps) = LIKES_RE.captures(text) {
        push_claim(&mut claims, "likes", &caps[1], "preference", 0.70);
    }

    claims
}

fn push_claim(
    claims: &mut Vec<ExtractedClaim>,
    predicate: &str,
    raw_value: &str,
    claim_type: &str,
    confidence: f64,
) {
    let predicate = normalize_predicate(predicate);
    let object_value = collapse_whitespace(raw_value.trim());
    if predicate.is_empty() || object_value.is_empty() {
        return;
    }
    let key_value = object_value.to_lowercase();
    if claims
        .iter()
        .any(|c| c.predicate == predicate && c.object_value.to_lowercase() == key_value)
    {
        return;
    }
    claims.push(ExtractedClaim {
        predicate,
        object_value,
        claim_type: claim_type.to_string(),
        confidence,
    });
}

/// Lowercase, whitespace → underscore, strip anything not alphanumeric or
/// underscore.
pub fn normalize_predicate(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for c in raw.trim().to_lowercase().chars() {
        if c.is_whitespace() {
            if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        } else if c.is_alphanumeric() || c == '_' {
            out.push(c);
            last_was_sep = c == '_';
        }
    }
    out.trim_end_matches('_').to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
