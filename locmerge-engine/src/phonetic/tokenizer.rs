//! Word extraction from locality text
//!
//! Text splits on anything that is not alphanumeric. Each token is
//! transliterated to ASCII (diacritics dropped) and lowercased, then cut into
//! maximal runs of letters or of digits. Runs of at least `min_len`
//! characters are words; everything shorter is ignored.

use deunicode::deunicode;
use tracing::debug;

/// Shortest letter or digit run counted as a word
pub const DEFAULT_MIN_WORD_LEN: usize = 4;

pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    let mut words = Vec::new();

    for token in text.split(|c: char| !c.is_alphanumeric()) {
        if token.is_empty() {
            continue;
        }

        let normalized = deunicode(token).to_lowercase();
        let before = words.len();
        push_runs(&normalized, min_len, &mut words);

        if words.len() == before && token.chars().count() >= min_len {
            debug!(token, normalized = %normalized, "Token yields no word after normalization, skipped");
        }
    }

    words
}

fn push_runs(normalized: &str, min_len: usize, words: &mut Vec<String>) {
    let mut run = String::new();
    let mut run_is_digits = false;

    for c in normalized.chars() {
        let is_letter = c.is_ascii_lowercase();
        let is_digit = c.is_ascii_digit();

        if !is_letter && !is_digit {
            flush(&mut run, min_len, words);
            continue;
        }
        if !run.is_empty() && run_is_digits != is_digit {
            flush(&mut run, min_len, words);
        }
        run_is_digits = is_digit;
        run.push(c);
    }
    flush(&mut run, min_len, words);
}

fn flush(run: &mut String, min_len: usize, words: &mut Vec<String>) {
    if run.len() >= min_len {
        words.push(std::mem::take(run));
    } else {
        run.clear();
    }
}
