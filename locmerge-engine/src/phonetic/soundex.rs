//! American Soundex
//!
//! First letter kept, following consonants mapped to digit classes, vowels
//! separate repeated classes, `h` and `w` do not. Padded to four characters.
//! Numeric words are their own code.

use super::PhoneticCoder;

#[derive(Debug, Clone)]
pub struct Soundex {
    length: usize,
}

impl Default for Soundex {
    fn default() -> Self {
        Self { length: 4 }
    }
}

impl Soundex {
    pub fn with_length(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }
}

/// Digit class of a letter; `None` for vowels (separators) and `Some('-')`
/// for letters that are skipped without separating
fn class(c: char) -> Option<char> {
    match c {
        'b' | 'f' | 'p' | 'v' => Some('1'),
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
        'd' | 't' => Some('3'),
        'l' => Some('4'),
        'm' | 'n' => Some('5'),
        'r' => Some('6'),
        'h' | 'w' => Some('-'),
        _ => None,
    }
}

impl PhoneticCoder for Soundex {
    fn name(&self) -> &'static str {
        "soundex"
    }

    fn code(&self, word: &str) -> Option<String> {
        if word.is_empty() {
            return None;
        }
        if word.chars().all(|c| c.is_ascii_digit()) {
            return Some(word.to_string());
        }
        if !word.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let lower = word.to_ascii_lowercase();
        let mut chars = lower.chars();
        let first = chars.next()?;

        let mut code = String::with_capacity(self.length);
        code.push(first.to_ascii_uppercase());
        let mut previous = class(first);

        for c in chars {
            if code.len() >= self.length {
                break;
            }
            match class(c) {
                Some('-') => {}
                Some(digit) => {
                    if previous != Some(digit) {
                        code.push(digit);
                    }
                    previous = Some(digit);
                }
                None => previous = None,
            }
        }

        while code.len() < self.length {
            code.push('0');
        }
        Some(code)
    }
}
