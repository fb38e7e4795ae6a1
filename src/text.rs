//! Text utilities (spec §4.2): normalization, tokenization, keyword
//! extraction, token-budget trimming, and lexical similarity scoring.

use std::collections::HashMap;

use crate::token::estimate_text;

/// The built-in English stopword set, exactly as enumerated by spec §4.2.
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "to", "for", "of", "in", "on", "at", "is", "are", "was",
    "were", "be", "been", "this", "that", "it", "as", "with", "by", "from", "about", "into",
    "through", "can", "could", "should", "would", "you", "your", "we", "they", "their", "our",
    "i", "he", "she", "them", "his", "her",
];

/// Bonus added to the lexical score when the exact (lowercased, trimmed)
/// query appears as a substring of the candidate content.
const PHRASE_BONUS: f64 = 0.15;

/// Default cap for [`extract_top_keywords`].
pub const DEFAULT_MAX_KEYWORDS: usize = 24;

/// Collapse `\r\n` to `\n`, cap consecutive blank lines at two, collapse
/// runs of spaces/tabs, and trim.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");

    let mut lines: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in unified.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 2 {
                lines.push("");
            }
        } else {
            blank_run = 0;
            lines.push(line);
        }
    }

    let collapsed = lines
        .into_iter()
        .map(collapse_spaces_tabs)
        .collect::<Vec<_>>()
        .join("\n");

    collapsed.trim().to_string()
}

fn collapse_spaces_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_run = false;
    for c in line.chars() {
        if c == ' ' || c == '\t' {
            if !in_run {
                out.push(' ');
                in_run = true;
            }
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out.trim().to_string()
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '/' | '.' | '-')
}

/// Lower-case, split on runs of characters outside `[a-z0-9_/.-]`, drop
/// tokens shorter than 2 chars, and drop stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !is_token_char(c))
        .filter(|tok| tok.len() >= 2)
        .filter(|tok| !STOPWORDS.contains(tok))
        .map(|s| s.to_string())
        .collect()
}

/// Tokenize `text`, count frequencies, and return the top `max` tokens by
/// frequency, ties broken by first-seen order.
pub fn extract_top_keywords(text: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();
    for tok in tokenize(text) {
        if !counts.contains_key(&tok) {
            first_seen.push(tok.clone());
        }
        *counts.entry(tok).or_insert(0) += 1;
    }

    let mut ranked = first_seen;
    ranked.sort_by(|a, b| counts[b].cmp(&counts[a]));
    ranked.truncate(max);
    ranked
}

/// Normalize, then if already within `target` tokens, return as-is;
/// otherwise binary-search over word prefixes for the longest prefix whose
/// estimate fits. Always returns at least one word for non-empty input.
pub fn trim_to_token_target(text: &str, target: usize) -> String {
    let normalized = normalize(text);
    if estimate_text(&normalized) <= target {
        return normalized;
    }

    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return normalized;
    }

    let mut lo = 1usize;
    let mut hi = words.len();
    let mut best = 1usize;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let candidate = words[..mid].join(" ");
        if estimate_text(&candidate) <= target {
            best = mid;
            lo = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            hi = mid - 1;
        }
    }

    words[..best].join(" ")
}

/// `overlap = |Q ∩ C| / |Q|` plus a phrase bonus for exact substring
/// matches, clamped to `[0, 1]`. `0` if the query tokenizes empty.
pub fn similarity(query: &str, content: &str) -> f64 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }

    let content_set: std::collections::HashSet<String> = tokenize(content).into_iter().collect();
    let query_set: std::collections::HashSet<&String> = query_tokens.iter().collect();

    let overlap_count = query_set.iter().filter(|t| content_set.contains(**t)).count();
    let overlap = overlap_count as f64 / query_tokens.len() as f64;

    let trimmed_query = query.trim().to_lowercase();
    let phrase_bonus = if !trimmed_query.is_empty() && content.to_lowercase().contains(&trimmed_query) {
        PHRASE_BONUS
    } else {
        0.0
    };

    (overlap + phrase_bonus).min(1.0)
}
