use regex::RegexBuilder;
use std::collections::HashSet;

use crate::lemma::LemmaExtractor;

pub const MAX_TEXT_CHARS: usize = 1000;
pub const CONTEXT_CHARS: usize = 50;
pub const FALLBACK_WORDS: usize = 30;

/// Builds the result snippet for `text` (already stripped of markup).
///
/// Around the first case-insensitive occurrence of the literal query when
/// there is one, otherwise the opening words with lemma matches emphasised.
pub fn make_snippet(
    text: &str,
    query: &str,
    query_lemmas: &HashSet<String>,
    extractor: &LemmaExtractor,
) -> String {
    let chars: Vec<char> = text.chars().collect();
    let (text, truncated) = if chars.len() > MAX_TEXT_CHARS {
        (chars[..MAX_TEXT_CHARS].iter().collect::<String>(), true)
    } else {
        (text.to_string(), false)
    };
    let query = query.trim();

    if let Some(window) = window_around(&text, query) {
        return highlight_terms(&window, query);
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(FALLBACK_WORDS);
    for word in words.iter().take(FALLBACK_WORDS) {
        if extractor.contains_any(word, query_lemmas) {
            out.push(format!("<b>{word}</b>"));
        } else {
            out.push((*word).to_string());
        }
    }
    let mut snippet = out.join(" ");
    if words.len() > FALLBACK_WORDS || truncated {
        snippet.push_str("...");
    }
    snippet
}

/// Up to `CONTEXT_CHARS` characters either side of the first match.
fn window_around(text: &str, query: &str) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    let haystack: Vec<char> = text.chars().map(fold_char).collect();
    let needle: Vec<char> = query.chars().map(fold_char).collect();
    if needle.len() > haystack.len() {
        return None;
    }
    let start = (0..=haystack.len() - needle.len())
        .find(|&i| haystack[i..i + needle.len()] == needle[..])?;
    let from = start.saturating_sub(CONTEXT_CHARS);
    let to = (start + needle.len() + CONTEXT_CHARS).min(haystack.len());
    Some(text.chars().skip(from).take(to - from).collect())
}

// One char in, one char out, so indexes line up with the original text.
fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn highlight_terms(snippet: &str, term: &str) -> String {
    match RegexBuilder::new(&regex::escape(term)).case_insensitive(true).build() {
        Ok(pat) => pat
            .replace_all(snippet, |caps: &regex::Captures| format!("<b>{}</b>", &caps[0]))
            .into_owned(),
        Err(_) => snippet.to_string(),
    }
}
