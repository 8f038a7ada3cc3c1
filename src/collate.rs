//! Batch collation
//!
//! Assembles a list of variable-length examples into fixed-rectangle,
//! zero-padded batch tensors. Examples are sorted by text length
//! descending (stable, so ties keep their input order); every per-example
//! vector in the returned batch, including the length vectors and the
//! audio path list, follows that one sorted permutation.

use std::path::PathBuf;

use candle_core::{Device, Tensor};

use crate::dataset::Example;
use crate::error::{DataError, Result};

/// A padded training batch
///
/// The recorded lengths let downstream code undo the padding: slicing row
/// `i` of `text` to `input_lengths[i]` (or `mel` to `output_lengths[i]`
/// frames) recovers the original example exactly.
#[derive(Debug)]
pub struct Batch {
    /// Token ids, (N, L_max) i64, zero-padded
    pub text: Tensor,
    /// Original token counts in sorted order, (N,) i64
    pub input_lengths: Tensor,
    /// Mel spectrograms, (N, C, T_max) f32, zero-padded
    pub mel: Tensor,
    /// Original frame counts in sorted order, (N,) i64
    pub output_lengths: Tensor,
    /// Token counts as floats, (N,) f32, for averaging in the training loop
    pub token_counts: Tensor,
    /// Pitch, (N, F, T_max) f32
    pub pitch: Tensor,
    /// Energy, (N, T_max) f32
    pub energy: Tensor,
    /// Speaker ids, (N,) i64, present iff the corpus is multi-speaker
    pub speaker: Option<Tensor>,
    /// Alignment priors, (N, T_max, L_max) f32
    pub attn_prior: Tensor,
    /// Source audio paths in sorted order
    pub audio_paths: Vec<PathBuf>,
    /// Prosody labels, (N, L_max) i64
    pub prosody: Option<Tensor>,
    /// Downsampled mels, (N, C_ds, T_ds_max) f32
    pub mel_ds: Option<Tensor>,
    /// Downsampled frame counts in sorted order, (N,) i64
    pub ds_output_lengths: Option<Tensor>,
}

impl Batch {
    /// Number of examples in the batch
    pub fn len(&self) -> usize {
        self.audio_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.audio_paths.is_empty()
    }
}

/// Collate examples into one padded batch
///
/// Pure function over the example list; optional-feature presence must be
/// uniform across the batch, and mixed presence is rejected rather than
/// silently mis-padded.
pub fn collate(examples: &[Example]) -> Result<Batch> {
    if examples.is_empty() {
        return Err(DataError::shape("collate", "empty batch"));
    }
    let n = examples.len();
    let device = Device::Cpu;

    // Sorted permutation: text length descending, ties stable
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| examples[b].text_len.cmp(&examples[a].text_len));

    check_uniform(examples, "speaker", |ex| ex.speaker.is_some())?;
    check_uniform(examples, "prosody", |ex| ex.prosody.is_some())?;
    check_uniform(examples, "downsampled mel", |ex| ex.mel_ds.is_some())?;

    let n_mels = examples[0].mel.dim(0)?;
    let n_formants = examples[0].pitch.dim(0)?;
    let max_input = examples.iter().map(|ex| ex.text_len).max().unwrap_or(0);
    let mut max_target = 0usize;
    for ex in examples {
        if ex.mel.dim(0)? != n_mels {
            return Err(DataError::shape(
                "collate",
                format!("mel channels differ: {} vs {n_mels}", ex.mel.dim(0)?),
            ));
        }
        if ex.pitch.dim(0)? != n_formants {
            return Err(DataError::shape(
                "collate",
                format!("pitch formants differ: {} vs {n_formants}", ex.pitch.dim(0)?),
            ));
        }
        max_target = max_target.max(ex.mel.dim(1)?);
    }

    let mut text = vec![0i64; n * max_input];
    let mut mel = vec![0f32; n * n_mels * max_target];
    let mut pitch = vec![0f32; n * n_formants * max_target];
    let mut energy = vec![0f32; n * max_target];
    let mut prior = vec![0f32; n * max_target * max_input];
    let mut input_lengths = vec![0i64; n];
    let mut output_lengths = vec![0i64; n];
    let mut token_counts = vec![0f32; n];
    let mut speakers = vec![0i64; n];
    let mut audio_paths = Vec::with_capacity(n);

    let has_speaker = examples[0].speaker.is_some();
    let has_prosody = examples[0].prosody.is_some();
    let has_ds = examples[0].mel_ds.is_some();

    let mut prosody = if has_prosody {
        Some(vec![0i64; n * max_input])
    } else {
        None
    };

    let (mut mel_ds, mut ds_lengths, n_ds_mels, max_ds_target) = if has_ds {
        let first = examples[0].mel_ds.as_ref().unwrap();
        let channels = first.dim(0)?;
        let mut max_ds = 0usize;
        for ex in examples {
            max_ds = max_ds.max(ex.mel_ds.as_ref().unwrap().dim(1)?);
        }
        (
            Some(vec![0f32; n * channels * max_ds]),
            Some(vec![0i64; n]),
            channels,
            max_ds,
        )
    } else {
        (None, None, 0, 0)
    };

    for (row, &src) in order.iter().enumerate() {
        let ex = &examples[src];
        let t = ex.mel.dim(1)?;
        let l = ex.text_len;

        input_lengths[row] = l as i64;
        output_lengths[row] = t as i64;
        token_counts[row] = l as f32;
        audio_paths.push(ex.audio_path.clone());
        if let Some(id) = ex.speaker {
            speakers[row] = id;
        }

        let ids = ex.text.to_vec1::<i64>()?;
        if ids.len() != l {
            return Err(DataError::shape(
                "collate",
                format!("text tensor has {} ids, text_len is {l}", ids.len()),
            ));
        }
        text[row * max_input..row * max_input + l].copy_from_slice(&ids);

        for (c, channel) in ex.mel.to_vec2::<f32>()?.iter().enumerate() {
            let base = (row * n_mels + c) * max_target;
            mel[base..base + t].copy_from_slice(channel);
        }

        if ex.pitch.dim(1)? != t {
            return Err(DataError::shape(
                "collate",
                format!("pitch has {} frames, mel has {t}", ex.pitch.dim(1)?),
            ));
        }
        for (f, formant) in ex.pitch.to_vec2::<f32>()?.iter().enumerate() {
            let base = (row * n_formants + f) * max_target;
            pitch[base..base + t].copy_from_slice(formant);
        }

        let energy_row = ex.energy.to_vec1::<f32>()?;
        if energy_row.len() != t {
            return Err(DataError::shape(
                "collate",
                format!("energy has {} frames, mel has {t}", energy_row.len()),
            ));
        }
        energy[row * max_target..row * max_target + t].copy_from_slice(&energy_row);

        let prior_rows = ex.attn_prior.to_vec2::<f32>()?;
        if prior_rows.len() != t || prior_rows.first().is_some_and(|r| r.len() != l) {
            return Err(DataError::shape(
                "collate",
                format!(
                    "prior is {}x{}, expected {t}x{l}",
                    prior_rows.len(),
                    prior_rows.first().map_or(0, |r| r.len())
                ),
            ));
        }
        for (i, prior_row) in prior_rows.iter().enumerate() {
            let base = (row * max_target + i) * max_input;
            prior[base..base + l].copy_from_slice(prior_row);
        }

        if let (Some(buf), Some(labels)) = (prosody.as_mut(), ex.prosody.as_ref()) {
            let labels = labels.to_vec1::<i64>()?;
            buf[row * max_input..row * max_input + labels.len()].copy_from_slice(&labels);
        }

        if let (Some(buf), Some(lengths), Some(ds)) =
            (mel_ds.as_mut(), ds_lengths.as_mut(), ex.mel_ds.as_ref())
        {
            let t_ds = ds.dim(1)?;
            lengths[row] = t_ds as i64;
            for (c, channel) in ds.to_vec2::<f32>()?.iter().enumerate() {
                let base = (row * n_ds_mels + c) * max_ds_target;
                buf[base..base + t_ds].copy_from_slice(channel);
            }
        }
    }

    Ok(Batch {
        text: Tensor::from_vec(text, (n, max_input), &device)?,
        input_lengths: Tensor::from_vec(input_lengths, n, &device)?,
        mel: Tensor::from_vec(mel, (n, n_mels, max_target), &device)?,
        output_lengths: Tensor::from_vec(output_lengths, n, &device)?,
        token_counts: Tensor::from_vec(token_counts, n, &device)?,
        pitch: Tensor::from_vec(pitch, (n, n_formants, max_target), &device)?,
        energy: Tensor::from_vec(energy, (n, max_target), &device)?,
        speaker: if has_speaker {
            Some(Tensor::from_vec(speakers, n, &device)?)
        } else {
            None
        },
        attn_prior: Tensor::from_vec(prior, (n, max_target, max_input), &device)?,
        audio_paths,
        prosody: match prosody {
            Some(buf) => Some(Tensor::from_vec(buf, (n, max_input), &device)?),
            None => None,
        },
        mel_ds: match mel_ds {
            Some(buf) => Some(Tensor::from_vec(
                buf,
                (n, n_ds_mels, max_ds_target),
                &device,
            )?),
            None => None,
        },
        ds_output_lengths: match ds_lengths {
            Some(buf) => Some(Tensor::from_vec(buf, n, &device)?),
            None => None,
        },
    })
}

fn check_uniform(
    examples: &[Example],
    field: &str,
    present: impl Fn(&Example) -> bool,
) -> Result<()> {
    let first = present(&examples[0]);
    if examples.iter().any(|ex| present(ex) != first) {
        return Err(DataError::shape(
            "collate",
            format!("mixed presence of optional field {field:?} within one batch"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::beta_binomial_prior;
    use std::path::Path;

    fn make_example(text_len: usize, mel_len: usize, tag: &str) -> Example {
        let device = Device::Cpu;
        let text = Tensor::from_vec(
            (1..=text_len as i64).collect::<Vec<_>>(),
            text_len,
            &device,
        )
        .unwrap();
        let mel = Tensor::from_vec(
            vec![1.0f32; 4 * mel_len],
            (4, mel_len),
            &device,
        )
        .unwrap();
        let pitch = Tensor::from_vec(vec![2.0f32; mel_len], (1, mel_len), &device).unwrap();
        let energy = Tensor::from_vec(vec![3.0f32; mel_len], mel_len, &device).unwrap();
        let attn_prior = beta_binomial_prior(text_len, mel_len, 1.0)
            .to_tensor(&device)
            .unwrap();
        Example {
            text,
            mel,
            text_len,
            pitch,
            energy,
            speaker: None,
            attn_prior,
            audio_path: Path::new(tag).to_path_buf(),
            prosody: None,
            mel_ds: None,
        }
    }

    #[test]
    fn test_sorted_descending_scenario() {
        // Texts of length [5, 3, 8] -> sorted lengths [8, 5, 3]
        let examples = vec![
            make_example(5, 20, "a.wav"),
            make_example(3, 12, "b.wav"),
            make_example(8, 30, "c.wav"),
        ];
        let batch = collate(&examples).unwrap();

        assert_eq!(batch.text.dims(), &[3, 8]);
        assert_eq!(
            batch.input_lengths.to_vec1::<i64>().unwrap(),
            vec![8, 5, 3]
        );
        assert_eq!(
            batch.output_lengths.to_vec1::<i64>().unwrap(),
            vec![30, 20, 12]
        );
        // Path list follows the same permutation
        let names: Vec<_> = batch
            .audio_paths
            .iter()
            .map(|p| p.to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["c.wav", "a.wav", "b.wav"]);

        // Row for the length-3 example has 5 trailing zeros
        let rows = batch.text.to_vec2::<i64>().unwrap();
        assert_eq!(rows[2][..3], [1, 2, 3]);
        assert_eq!(rows[2][3..], [0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_padding_roundtrip() {
        let examples = vec![make_example(4, 10, "a.wav"), make_example(6, 14, "b.wav")];
        let batch = collate(&examples).unwrap();

        let text_rows = batch.text.to_vec2::<i64>().unwrap();
        let lengths = batch.input_lengths.to_vec1::<i64>().unwrap();
        // Row 1 is the 4-token example after sorting
        assert_eq!(lengths[1], 4);
        assert_eq!(&text_rows[1][..4], &[1, 2, 3, 4]);

        // Slicing mel back to its length reproduces the original frames
        let out_lengths = batch.output_lengths.to_vec1::<i64>().unwrap();
        let mel = batch.mel.to_vec3::<f32>().unwrap();
        let t = out_lengths[1] as usize;
        assert_eq!(t, 10);
        for channel in &mel[1] {
            assert!(channel[..t].iter().all(|&v| v == 1.0));
            assert!(channel[t..].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_pitch_shapes_single_formant() {
        let examples = vec![make_example(3, 8, "a.wav"), make_example(2, 6, "b.wav")];
        let batch = collate(&examples).unwrap();
        assert_eq!(batch.pitch.dims(), &[2, 1, 8]);
        assert_eq!(batch.energy.dims(), &[2, 8]);
        assert_eq!(batch.attn_prior.dims(), &[2, 8, 3]);
    }

    #[test]
    fn test_stable_tie_order() {
        let examples = vec![
            make_example(5, 10, "first.wav"),
            make_example(5, 11, "second.wav"),
        ];
        let batch = collate(&examples).unwrap();
        assert_eq!(batch.audio_paths[0].to_str().unwrap(), "first.wav");
        assert_eq!(batch.audio_paths[1].to_str().unwrap(), "second.wav");
    }

    #[test]
    fn test_mixed_optional_presence_rejected() {
        let mut a = make_example(3, 8, "a.wav");
        let b = make_example(4, 9, "b.wav");
        a.speaker = Some(1);
        assert!(collate(&[a, b]).is_err());
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(collate(&[]).is_err());
    }

    #[test]
    fn test_text_length_disagreement_rejected() {
        let mut ex = make_example(4, 10, "a.wav");
        ex.text_len = 6;
        assert!(collate(&[ex]).is_err());
    }

    #[test]
    fn test_pitch_frame_disagreement_rejected() {
        let mut ex = make_example(4, 10, "a.wav");
        ex.pitch = Tensor::from_vec(vec![2.0f32; 7], (1, 7), &Device::Cpu).unwrap();
        assert!(collate(&[ex]).is_err());
    }

    #[test]
    fn test_speaker_follows_sort_order() {
        let mut a = make_example(2, 6, "a.wav");
        let mut b = make_example(7, 15, "b.wav");
        a.speaker = Some(10);
        b.speaker = Some(20);
        let batch = collate(&[a, b]).unwrap();
        assert_eq!(
            batch.speaker.unwrap().to_vec1::<i64>().unwrap(),
            vec![20, 10]
        );
    }
}
