//! Device transfer
//!
//! Moves a collated batch to the compute device and splits it into the
//! model-input and training-target groups the training loop consumes.
//! Integer fields stay integral, float fields become f32; nothing else is
//! transformed.

use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};

use crate::collate::Batch;
use crate::error::Result;

/// Everything the acoustic model forward pass consumes
#[derive(Debug)]
pub struct ModelInputs {
    pub text: Tensor,
    pub input_lengths: Tensor,
    pub mel: Tensor,
    pub output_lengths: Tensor,
    pub pitch: Tensor,
    pub energy: Tensor,
    pub speaker: Option<Tensor>,
    pub attn_prior: Tensor,
    pub audio_paths: Vec<PathBuf>,
    pub prosody: Option<Tensor>,
    pub mel_ds: Option<Tensor>,
    pub ds_output_lengths: Option<Tensor>,
}

/// Supervision targets for the loss
#[derive(Debug)]
pub struct TrainingTargets {
    pub mel: Tensor,
    pub input_lengths: Tensor,
    pub output_lengths: Tensor,
}

fn to_float(tensor: &Tensor, device: &Device) -> Result<Tensor> {
    Ok(tensor.to_device(device)?.to_dtype(DType::F32)?)
}

fn to_int(tensor: &Tensor, device: &Device) -> Result<Tensor> {
    Ok(tensor.to_device(device)?.to_dtype(DType::I64)?)
}

/// Move a batch to `device` and partition it
///
/// Also returns the total valid-frame count (sum of output lengths) used
/// to normalize the loss. The mel tensor and the length vectors appear in
/// both groups; they are shallow copies of the same storage.
pub fn batch_to_device(
    batch: &Batch,
    device: &Device,
) -> Result<(ModelInputs, TrainingTargets, u64)> {
    let text = to_int(&batch.text, device)?;
    let input_lengths = to_int(&batch.input_lengths, device)?;
    let mel = to_float(&batch.mel, device)?;
    let output_lengths = to_int(&batch.output_lengths, device)?;
    let pitch = to_float(&batch.pitch, device)?;
    let energy = to_float(&batch.energy, device)?;
    let attn_prior = to_float(&batch.attn_prior, device)?;
    let speaker = match &batch.speaker {
        Some(s) => Some(to_int(s, device)?),
        None => None,
    };
    let prosody = match &batch.prosody {
        Some(p) => Some(to_int(p, device)?),
        None => None,
    };
    let mel_ds = match &batch.mel_ds {
        Some(m) => Some(to_float(m, device)?),
        None => None,
    };
    let ds_output_lengths = match &batch.ds_output_lengths {
        Some(l) => Some(to_int(l, device)?),
        None => None,
    };

    let total_frames: u64 = batch
        .output_lengths
        .to_vec1::<i64>()?
        .iter()
        .map(|&v| v as u64)
        .sum();

    let targets = TrainingTargets {
        mel: mel.clone(),
        input_lengths: input_lengths.clone(),
        output_lengths: output_lengths.clone(),
    };

    let inputs = ModelInputs {
        text,
        input_lengths,
        mel,
        output_lengths,
        pitch,
        energy,
        speaker,
        attn_prior,
        audio_paths: batch.audio_paths.clone(),
        prosody,
        mel_ds,
        ds_output_lengths,
    };

    Ok((inputs, targets, total_frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collate::collate;
    use crate::dataset::Example;
    use crate::prior::beta_binomial_prior;
    use std::path::Path;

    fn make_example(text_len: usize, mel_len: usize) -> Example {
        let device = Device::Cpu;
        Example {
            text: Tensor::zeros(text_len, DType::I64, &device).unwrap(),
            mel: Tensor::zeros((4, mel_len), DType::F32, &device).unwrap(),
            text_len,
            pitch: Tensor::zeros((1, mel_len), DType::F32, &device).unwrap(),
            energy: Tensor::zeros(mel_len, DType::F32, &device).unwrap(),
            speaker: None,
            attn_prior: beta_binomial_prior(text_len, mel_len, 1.0)
                .to_tensor(&device)
                .unwrap(),
            audio_path: Path::new("x.wav").to_path_buf(),
            prosody: None,
            mel_ds: None,
        }
    }

    #[test]
    fn test_partition_and_frame_count() {
        let batch = collate(&[make_example(3, 10), make_example(5, 16)]).unwrap();
        let (inputs, targets, frames) = batch_to_device(&batch, &Device::Cpu).unwrap();

        assert_eq!(frames, 26);
        assert_eq!(inputs.text.dtype(), DType::I64);
        assert_eq!(inputs.mel.dtype(), DType::F32);
        assert_eq!(targets.mel.dims(), inputs.mel.dims());
        assert_eq!(
            targets.output_lengths.to_vec1::<i64>().unwrap(),
            vec![16, 10]
        );
        assert!(inputs.speaker.is_none());
    }
}
