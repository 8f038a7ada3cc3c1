//! Text encoding
//!
//! Turns a transcript into the token id sequence the acoustic model
//! consumes. Phonemization and heavyweight normalization are external
//! concerns; the trait below is the seam they plug into, and
//! [`BasicTextEncoder`] is the symbol-table implementation used for
//! grapheme-level corpora.

use std::collections::HashMap;

use crate::error::{DataError, Result};

/// Encoded transcript
#[derive(Debug, Clone)]
pub struct EncodedText {
    /// Token id sequence
    pub ids: Vec<i64>,
    /// Tokens per word, including the separator following each word.
    /// Present only when word-level prosody conditioning is enabled;
    /// the counts sum to `ids.len()`.
    pub word_counts: Option<Vec<usize>>,
}

/// Text normalization / encoding collaborator
pub trait TextEncoder: Send + Sync {
    /// Encode a transcript into token ids, with per-word token counts when
    /// `with_counts` is set
    fn encode(&self, text: &str, with_counts: bool) -> Result<EncodedText>;

    /// Id of the single whitespace token, used for space prepend/append
    fn space_token(&self) -> i64;
}

/// Symbol-table encoder over a fixed character set
///
/// Id 0 is reserved for padding and never produced for real input.
pub struct BasicTextEncoder {
    table: HashMap<char, i64>,
    space_id: i64,
    lowercase: bool,
}

impl BasicTextEncoder {
    /// Build an encoder for a named symbol set and cleaner pipeline
    ///
    /// Recognized sets: `english_basic` (ASCII letters plus punctuation),
    /// `english_basic_lowercase`. Recognized cleaners: `english_cleaners`
    /// (case-preserving) and `basic_cleaners` (case-folding); both collapse
    /// whitespace and strip characters outside the table.
    pub fn new(symbol_set: &str, cleaners: &str) -> Result<Self> {
        let fold_case = match cleaners {
            "english_cleaners" => false,
            "basic_cleaners" => true,
            other => {
                return Err(DataError::Text {
                    message: format!("unknown cleaner pipeline {other:?}"),
                })
            }
        };
        let (symbols, lowercase): (Vec<char>, bool) = match symbol_set {
            "english_basic" => (Self::english_symbols(true), fold_case),
            "english_basic_lowercase" => (Self::english_symbols(false), true),
            other => {
                return Err(DataError::Text {
                    message: format!("unknown symbol set {other:?}"),
                })
            }
        };

        // Id 0 is the pad symbol
        let mut table = HashMap::new();
        for (i, c) in symbols.iter().enumerate() {
            table.insert(*c, (i + 1) as i64);
        }
        let space_id = table[&' '];
        Ok(Self {
            table,
            space_id,
            lowercase,
        })
    }

    /// Build an encoder with the default `english_cleaners` pipeline
    pub fn from_symbol_set(symbol_set: &str) -> Result<Self> {
        Self::new(symbol_set, "english_cleaners")
    }

    fn english_symbols(with_upper: bool) -> Vec<char> {
        let mut symbols: Vec<char> = " -!'\"(),.:;?".chars().collect();
        symbols.extend('a'..='z');
        if with_upper {
            symbols.extend('A'..='Z');
        }
        symbols
    }

    /// Collapse runs of whitespace and strip characters outside the table
    fn clean(&self, text: &str) -> String {
        let mut cleaned = String::with_capacity(text.len());
        let mut prev_space = true;
        for c in text.chars() {
            let c = if self.lowercase {
                c.to_ascii_lowercase()
            } else {
                c
            };
            if c.is_whitespace() {
                if !prev_space {
                    cleaned.push(' ');
                    prev_space = true;
                }
            } else if self.table.contains_key(&c) {
                cleaned.push(c);
                prev_space = false;
            }
        }
        while cleaned.ends_with(' ') {
            cleaned.pop();
        }
        cleaned
    }
}

impl TextEncoder for BasicTextEncoder {
    fn encode(&self, text: &str, with_counts: bool) -> Result<EncodedText> {
        let cleaned = self.clean(text);
        if cleaned.is_empty() {
            return Err(DataError::Text {
                message: format!("no encodable symbols in {text:?}"),
            });
        }

        let ids: Vec<i64> = cleaned.chars().map(|c| self.table[&c]).collect();

        let word_counts = if with_counts {
            // Each separator space is counted with the word before it so
            // that the counts tile the whole token sequence.
            let mut counts = Vec::new();
            let mut current = 0usize;
            for c in cleaned.chars() {
                current += 1;
                if c == ' ' {
                    counts.push(current);
                    current = 0;
                }
            }
            if current > 0 {
                counts.push(current);
            }
            debug_assert_eq!(counts.iter().sum::<usize>(), ids.len());
            Some(counts)
        } else {
            None
        };

        Ok(EncodedText { ids, word_counts })
    }

    fn space_token(&self) -> i64 {
        self.space_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_simple() {
        let enc = BasicTextEncoder::from_symbol_set("english_basic").unwrap();
        let out = enc.encode("hello world", false).unwrap();
        assert_eq!(out.ids.len(), 11);
        assert!(out.word_counts.is_none());
        // Pad id never produced
        assert!(out.ids.iter().all(|&id| id > 0));
    }

    #[test]
    fn test_word_counts_tile_sequence() {
        let enc = BasicTextEncoder::from_symbol_set("english_basic").unwrap();
        let out = enc.encode("the quick fox", true).unwrap();
        let counts = out.word_counts.unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.iter().sum::<usize>(), out.ids.len());
        // "the " = 4 tokens, "quick " = 6, "fox" = 3
        assert_eq!(counts, vec![4, 6, 3]);
    }

    #[test]
    fn test_whitespace_collapsed() {
        let enc = BasicTextEncoder::from_symbol_set("english_basic").unwrap();
        let a = enc.encode("a  b", false).unwrap();
        let b = enc.encode("a b", false).unwrap();
        assert_eq!(a.ids, b.ids);
    }

    #[test]
    fn test_lowercase_set_folds_case() {
        let enc = BasicTextEncoder::from_symbol_set("english_basic_lowercase").unwrap();
        let a = enc.encode("Hello", false).unwrap();
        let b = enc.encode("hello", false).unwrap();
        assert_eq!(a.ids, b.ids);
    }

    #[test]
    fn test_unknown_cleaner_rejected() {
        assert!(BasicTextEncoder::new("english_basic", "unicode_cleaners").is_err());
    }

    #[test]
    fn test_basic_cleaners_fold_case() {
        let enc = BasicTextEncoder::new("english_basic", "basic_cleaners").unwrap();
        let a = enc.encode("Hello", false).unwrap();
        let b = enc.encode("hello", false).unwrap();
        assert_eq!(a.ids, b.ids);
    }

    #[test]
    fn test_unencodable_text_fails() {
        let enc = BasicTextEncoder::from_symbol_set("english_basic").unwrap();
        assert!(enc.encode("\u{4f60}\u{597d}", false).is_err());
    }

    #[test]
    fn test_space_token_is_space() {
        let enc = BasicTextEncoder::from_symbol_set("english_basic").unwrap();
        let out = enc.encode("a b", false).unwrap();
        assert_eq!(out.ids[1], enc.space_token());
    }
}
