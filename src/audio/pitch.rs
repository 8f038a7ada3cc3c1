//! Pitch estimation
//!
//! The dataset consumes pitch through the [`PitchEstimator`] trait so the
//! F0 tracker is substitutable. [`AutocorrelationPitch`] is the built-in
//! implementation: frame-wise normalized autocorrelation with an optional
//! second pass that narrows the search range around the first-pass median.

use std::path::Path;

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::config::{PitchConfig, PitchNormMethod};
use crate::error::Result;

use super::WaveformLoader;

/// F0 search range in Hz
const F0_MIN: f32 = 60.0;
const F0_MAX: f32 = 500.0;
/// Autocorrelation peak threshold below which a frame counts as unvoiced
const VOICING_THRESHOLD: f32 = 0.3;
/// Analysis window in samples
const FRAME_SIZE: usize = 1024;

/// Pitch estimation collaborator
///
/// Returns a (formants, frames) tensor with exactly `target_frames` frames;
/// unvoiced frames are zero.
pub trait PitchEstimator: Send + Sync {
    fn estimate(
        &self,
        wav_path: &Path,
        target_frames: usize,
        config: &PitchConfig,
        device: &Device,
    ) -> Result<Tensor>;
}

/// Built-in single-formant estimator
pub struct AutocorrelationPitch;

impl PitchEstimator for AutocorrelationPitch {
    fn estimate(
        &self,
        wav_path: &Path,
        target_frames: usize,
        config: &PitchConfig,
        device: &Device,
    ) -> Result<Tensor> {
        let (samples, sample_rate) = WaveformLoader::load(wav_path)?;
        let sr = sample_rate as f32;

        let lag_range = ((sr / F0_MAX) as usize).max(2)..=((sr / F0_MIN) as usize);
        let mut f0 = track(&samples, target_frames, lag_range.clone(), sr);

        if config.two_pass {
            let mut voiced: Vec<f32> = f0.iter().copied().filter(|&v| v > 0.0).collect();
            if !voiced.is_empty() {
                voiced.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let median = voiced[voiced.len() / 2];
                let lo = ((sr / (median * 1.5)) as usize).max(2);
                let hi = (sr / (median * 0.6)) as usize;
                debug!(median, "second-pass pitch search around median");
                f0 = track(&samples, target_frames, lo..=hi.max(lo + 1), sr);
            }
        }

        if config.normalize {
            match config.norm_method {
                PitchNormMethod::MeanStd => {
                    // Unvoiced frames stay at zero
                    for v in f0.iter_mut() {
                        if *v > 0.0 {
                            *v = (*v - config.mean) / config.std;
                        }
                    }
                }
            }
        }

        Ok(Tensor::from_vec(f0, (1, target_frames), device)?)
    }
}

/// One tracking pass over the whole utterance
fn track(
    samples: &[f32],
    target_frames: usize,
    lag_range: std::ops::RangeInclusive<usize>,
    sample_rate: f32,
) -> Vec<f32> {
    let mut f0 = vec![0f32; target_frames];
    if samples.len() < FRAME_SIZE || target_frames == 0 {
        return f0;
    }

    for (t, out) in f0.iter_mut().enumerate() {
        let center = t * samples.len() / target_frames;
        let start = center.saturating_sub(FRAME_SIZE / 2);
        let end = (start + FRAME_SIZE).min(samples.len());
        let frame = &samples[start..end];

        if let Some((lag, peak)) = best_lag(frame, lag_range.clone()) {
            if peak > VOICING_THRESHOLD {
                *out = sample_rate / lag as f32;
            }
        }
    }
    f0
}

/// Normalized autocorrelation peak within the lag range
fn best_lag(frame: &[f32], lag_range: std::ops::RangeInclusive<usize>) -> Option<(usize, f32)> {
    let energy: f32 = frame.iter().map(|v| v * v).sum();
    if energy < 1e-6 {
        return None;
    }

    let mut best: Option<(usize, f32)> = None;
    for lag in lag_range {
        if lag >= frame.len() {
            break;
        }
        let n = frame.len() - lag;
        let mut num = 0f32;
        let mut e0 = 0f32;
        let mut e1 = 0f32;
        for i in 0..n {
            num += frame[i] * frame[i + lag];
            e0 += frame[i] * frame[i];
            e1 += frame[i + lag] * frame[i + lag];
        }
        let denom = (e0 * e1).sqrt();
        if denom < 1e-9 {
            continue;
        }
        let r = num / denom;
        if best.map_or(true, |(_, b)| r > b) {
            best = Some((lag, r));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sine_wav(path: &Path, freq: f32, sample_rate: u32, secs: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (sample_rate as f32 * secs) as usize;
        for i in 0..n {
            let v = 0.6 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin();
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_estimate_sine_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sine.wav");
        write_sine_wav(&path, 220.0, 22050, 0.5);

        let config = PitchConfig {
            normalize: false,
            ..PitchConfig::default()
        };
        let pitch = AutocorrelationPitch
            .estimate(&path, 40, &config, &Device::Cpu)
            .unwrap();
        assert_eq!(pitch.dims(), &[1, 40]);

        let values = pitch.to_vec2::<f32>().unwrap().remove(0);
        let voiced: Vec<f32> = values.into_iter().filter(|&v| v > 0.0).collect();
        assert!(!voiced.is_empty());
        let mean = voiced.iter().sum::<f32>() / voiced.len() as f32;
        assert!(
            (mean - 220.0).abs() < 15.0,
            "estimated {mean} Hz for a 220 Hz sine"
        );
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..11025 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let config = PitchConfig::default();
        let pitch = AutocorrelationPitch
            .estimate(&path, 20, &config, &Device::Cpu)
            .unwrap();
        let values = pitch.to_vec2::<f32>().unwrap().remove(0);
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_normalization_leaves_unvoiced_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sine.wav");
        write_sine_wav(&path, 220.0, 22050, 0.3);

        let config = PitchConfig {
            normalize: true,
            mean: 220.0,
            std: 60.0,
            ..PitchConfig::default()
        };
        let pitch = AutocorrelationPitch
            .estimate(&path, 30, &config, &Device::Cpu)
            .unwrap();
        let values = pitch.to_vec2::<f32>().unwrap().remove(0);
        // Normalized voiced values should sit near zero, well below raw Hz
        for v in values {
            assert!(v.abs() < 10.0);
        }
    }
}
