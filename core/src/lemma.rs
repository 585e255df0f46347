use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

use crate::morphology::{Morphology, StemmerMorphology, WordForm};

lazy_static! {
    static ref NON_ALPHABET: Regex = Regex::new(r"[^а-яё\s]+").expect("valid regex");
}

/// Turns free text into normal-form lemmas through a [`Morphology`] backend.
#[derive(Clone)]
pub struct LemmaExtractor {
    morphology: Arc<dyn Morphology>,
}

impl LemmaExtractor {
    pub fn new(morphology: Arc<dyn Morphology>) -> Self {
        Self { morphology }
    }

    /// Extractor backed by the bundled Russian stemmer.
    pub fn russian() -> Self {
        Self::new(Arc::new(StemmerMorphology::new()))
    }

    /// Lemma -> number of occurrences in `text`.
    pub fn extract_counts(&self, text: &str) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        for token in words(text) {
            if let Some(first) = self.content_forms(&token).into_iter().next() {
                *counts.entry(first.normal).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Distinct lemmas in `text`, all normal forms of every content word.
    pub fn extract_set(&self, text: &str) -> HashSet<String> {
        words(text)
            .flat_map(|token| self.content_forms(&token))
            .map(|form| form.normal)
            .collect()
    }

    pub fn contains_any(&self, text: &str, lemmas: &HashSet<String>) -> bool {
        self.extract_set(text).iter().any(|lemma| lemmas.contains(lemma))
    }

    /// Analyses of a content word; empty for function words and unknown tokens.
    fn content_forms(&self, token: &str) -> Vec<WordForm> {
        let forms = self.morphology.analyze(token);
        if forms.iter().any(|form| form.part_of_speech.is_functional()) {
            return Vec::new();
        }
        forms
    }
}

impl std::fmt::Debug for LemmaExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LemmaExtractor").finish_non_exhaustive()
    }
}

/// NFC, lowercase, everything outside the alphabet becomes a separator.
fn words(text: &str) -> impl Iterator<Item = String> {
    let normalized = text.nfc().collect::<String>().to_lowercase();
    NON_ALPHABET
        .replace_all(&normalized, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morphology::PartOfSpeech;

    struct FixedMorphology;

    impl Morphology for FixedMorphology {
        fn analyze(&self, word: &str) -> Vec<WordForm> {
            let form = |normal: &str, part_of_speech| WordForm {
                normal: normal.to_string(),
                part_of_speech,
            };
            match word {
                "леса" | "лес" => vec![form("лес", PartOfSpeech::Content)],
                "стали" => vec![
                    form("стать", PartOfSpeech::Content),
                    form("сталь", PartOfSpeech::Content),
                ],
                "в" => vec![form("в", PartOfSpeech::Preposition)],
                _ => Vec::new(),
            }
        }
    }

    #[test]
    fn counts_use_first_normal_form() {
        let extractor = LemmaExtractor::new(Arc::new(FixedMorphology));
        let counts = extractor.extract_counts("Стали в лесу, леса и ЛЕС!");
        assert_eq!(counts.get("лес"), Some(&2));
        assert_eq!(counts.get("стать"), Some(&1));
        assert!(!counts.contains_key("сталь"));
        assert!(!counts.contains_key("в"));
    }

    #[test]
    fn set_keeps_every_normal_form() {
        let extractor = LemmaExtractor::new(Arc::new(FixedMorphology));
        let set = extractor.extract_set("стали в лес");
        assert_eq!(set.len(), 3);
        assert!(set.contains("сталь"));
    }

    #[test]
    fn blank_input_is_empty() {
        let extractor = LemmaExtractor::russian();
        assert!(extractor.extract_counts("").is_empty());
        assert!(extractor.extract_set("   \n\t 123 !!").is_empty());
    }
}
