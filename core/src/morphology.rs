//! Morphological analysis of single Russian words.
//!
//! [`Morphology`] is the seam the lemma extractor talks to. The bundled
//! [`StemmerMorphology`] reduces a word to its Snowball stem and classifies the
//! closed set of function words (prepositions, conjunctions, interjections,
//! particles) from a fixed table.

use lazy_static::lazy_static;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartOfSpeech {
    Interjection,
    Preposition,
    Conjunction,
    Particle,
    /// Anything that is not a closed-class function word.
    Content,
}

impl PartOfSpeech {
    /// Functional words never produce a lemma.
    pub fn is_functional(&self) -> bool {
        matches!(
            self,
            PartOfSpeech::Interjection | PartOfSpeech::Preposition | PartOfSpeech::Conjunction
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordForm {
    pub normal: String,
    pub part_of_speech: PartOfSpeech,
}

pub trait Morphology: Send + Sync {
    /// All analyses of a lower-cased word. An empty vector means the word could
    /// not be analysed.
    fn analyze(&self, word: &str) -> Vec<WordForm>;
}

lazy_static! {
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::Russian);
    static ref FUNCTION_WORDS: HashMap<&'static str, PartOfSpeech> = {
        let prepositions: &[&str] = &[
            "в","во","без","безо","до","из","изо","к","ко","на","по","о","об","обо","от","ото",
            "перед","передо","пред","при","через","с","со","у","за","над","надо","под","подо",
            "про","для","между","меж","около","после","среди","вокруг","ради","сквозь","кроме",
            "вместо","возле","мимо","вдоль","против","вне","внутри","сверх",
            "близ","вследствие","благодаря","согласно","навстречу","путём",
        ];
        let conjunctions: &[&str] = &[
            "и","а","но","или","либо","да","что","чтобы","если","когда","потому","поэтому",
            "зато","однако","хотя","тоже","также","ни","то","будто","словно","пока","чем",
            "раз","ибо","дабы","причём","притом","коли","нежели","едва","покуда",
        ];
        let interjections: &[&str] = &[
            "ах","ох","эх","ой","ай","ух","увы","ура","эй","ого","ага","фу","тьфу","браво",
            "алло","ау","ба","брр","ишь","караул","ну","ахти",
        ];
        let particles: &[&str] = &[
            "не","ли","же","бы","вот","вон","лишь","даже","ведь","уж","только","именно",
        ];
        let mut table = HashMap::new();
        for (words, class) in [
            (prepositions, PartOfSpeech::Preposition),
            (conjunctions, PartOfSpeech::Conjunction),
            (interjections, PartOfSpeech::Interjection),
            (particles, PartOfSpeech::Particle),
        ] {
            for word in words {
                table.insert(*word, class);
            }
        }
        table
    };
}

/// Snowball-based analyser for Russian.
#[derive(Debug, Default, Clone, Copy)]
pub struct StemmerMorphology;

impl StemmerMorphology {
    pub fn new() -> Self {
        Self
    }
}

impl Morphology for StemmerMorphology {
    fn analyze(&self, word: &str) -> Vec<WordForm> {
        if word.is_empty() || !word.chars().all(is_russian_letter) {
            return Vec::new();
        }
        if let Some(class) = FUNCTION_WORDS.get(word) {
            return vec![WordForm {
                normal: word.to_string(),
                part_of_speech: *class,
            }];
        }
        let stem = STEMMER.stem(word);
        if stem.is_empty() {
            return Vec::new();
        }
        vec![WordForm {
            normal: stem.into_owned(),
            part_of_speech: PartOfSpeech::Content,
        }]
    }
}

/// Lower-case Cyrillic letters the extractor keeps.
pub fn is_russian_letter(c: char) -> bool {
    matches!(c, 'а'..='я' | 'ё')
}
