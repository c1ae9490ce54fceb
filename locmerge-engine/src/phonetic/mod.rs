//! Phonetic coding of locality text
//!
//! The coder is a strategy: the engine only asks for `word -> code`. Coders
//! receive words as produced by the tokenizer (lowercase ASCII letters, or
//! digits only).

pub mod soundex;
pub mod tokenizer;

pub use soundex::Soundex;
pub use tokenizer::{tokenize, DEFAULT_MIN_WORD_LEN};

use locmerge_common::PendingLocality;
use std::sync::Arc;
use tracing::debug;

/// Maps a word to a normalized pronunciation
pub trait PhoneticCoder: Send + Sync {
    /// Registry name, recorded in the pass record
    fn name(&self) -> &'static str;

    /// Code of one word; `None` if the word cannot be coded
    fn code(&self, word: &str) -> Option<String>;
}

/// Identity coder: only identical spellings collide
#[derive(Debug, Clone, Default)]
pub struct ExactCoder;

impl PhoneticCoder for ExactCoder {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn code(&self, word: &str) -> Option<String> {
        if word.is_empty() {
            None
        } else {
            Some(word.to_string())
        }
    }
}

/// Names accepted by `coder_by_name`
pub const CODER_NAMES: &[&str] = &["soundex", "exact"];

pub fn coder_by_name(name: &str) -> Option<Arc<dyn PhoneticCoder>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "soundex" => Some(Arc::new(Soundex::default())),
        "exact" => Some(Arc::new(ExactCoder)),
        _ => None,
    }
}

/// One instance of every shipped coder
pub fn all_coders() -> Vec<Arc<dyn PhoneticCoder>> {
    CODER_NAMES
        .iter()
        .filter_map(|name| coder_by_name(name))
        .collect()
}

/// A word of a locality with its phonetic code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedWord {
    pub word: String,
    pub code: String,
}

/// Words of `name`, `place` and `remarks`, in that order, with their codes
pub fn code_locality(
    coder: &dyn PhoneticCoder,
    locality: &PendingLocality,
    min_len: usize,
) -> Vec<CodedWord> {
    let mut coded = Vec::new();
    for field in locality.text_fields() {
        for word in tokenize(field, min_len) {
            match coder.code(&word) {
                Some(code) => coded.push(CodedWord { word, code }),
                None => debug!(
                    locality = locality.id,
                    word = %word,
                    coder = coder.name(),
                    "Word has no phonetic code, skipped"
                ),
            }
        }
    }
    coded
}
