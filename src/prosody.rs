//! Word-level prosody label upsampling
//!
//! Prosody labels (accent / continuous-wavelet classes) are stored per
//! word; the model conditions on them per token. Upsampling repeats each
//! word's label across that word's tokens using the per-word token counts
//! gathered during text encoding.

use crate::error::{DataError, Result};

/// Repeat each per-word label over its word's tokens
///
/// `word_counts[w]` is the number of tokens word `w` covers (separator
/// included); the output length is the sum of the counts.
pub fn upsample_word_labels(word_counts: &[usize], labels: &[i64]) -> Result<Vec<i64>> {
    if word_counts.len() != labels.len() {
        return Err(DataError::shape(
            "prosody upsampling",
            format!(
                "{} word counts but {} labels",
                word_counts.len(),
                labels.len()
            ),
        ));
    }
    let total: usize = word_counts.iter().sum();
    let mut upsampled = Vec::with_capacity(total);
    for (&count, &label) in word_counts.iter().zip(labels.iter()) {
        upsampled.extend(std::iter::repeat(label).take(count));
    }
    Ok(upsampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsample_repeats_per_word() {
        let out = upsample_word_labels(&[4, 6, 3], &[2, 0, 1]).unwrap();
        assert_eq!(out.len(), 13);
        assert_eq!(&out[..4], &[2, 2, 2, 2]);
        assert_eq!(&out[4..10], &[0, 0, 0, 0, 0, 0]);
        assert_eq!(&out[10..], &[1, 1, 1]);
    }

    #[test]
    fn test_length_mismatch_fails() {
        assert!(upsample_word_labels(&[2, 3], &[1]).is_err());
    }

    #[test]
    fn test_empty_is_empty() {
        assert_eq!(upsample_word_labels(&[], &[]).unwrap(), Vec::<i64>::new());
    }
}
