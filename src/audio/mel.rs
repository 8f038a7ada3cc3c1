//! Mel spectrogram extraction
//!
//! Librosa-style mel spectrograms: centered STFT with reflect padding,
//! magnitude spectrum, triangular slaney-normalized mel filterbank, and
//! log compression with a 1e-5 floor.

use std::f32::consts::PI;
use std::sync::Arc;

use candle_core::{Device, Tensor};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::StftConfig;
use crate::error::Result;

/// Mel spectrogram extractor for one STFT configuration
pub struct MelSpectrogram {
    n_fft: usize,
    hop_length: usize,
    win_length: usize,
    n_mels: usize,
    /// Target sample rate; waveforms at other rates must be rejected by the caller
    pub sample_rate: u32,
    mel_filters: Vec<Vec<f32>>,
    window: Vec<f32>,
    fft: Arc<dyn rustfft::Fft<f32>>,
}

impl MelSpectrogram {
    pub fn from_config(config: &StftConfig) -> Self {
        let fmax = config
            .mel_fmax
            .unwrap_or(config.sample_rate as f32 / 2.0);
        let mel_filters = mel_filterbank(
            config.filter_length,
            config.n_mel_channels,
            config.sample_rate,
            config.mel_fmin,
            fmax,
        );
        let window = hann_window(config.win_length);
        let fft = FftPlanner::new().plan_fft_forward(config.filter_length);

        Self {
            n_fft: config.filter_length,
            hop_length: config.hop_length,
            win_length: config.win_length,
            n_mels: config.n_mel_channels,
            sample_rate: config.sample_rate,
            mel_filters,
            window,
            fft,
        }
    }

    /// Number of mel channels produced
    pub fn n_mel_channels(&self) -> usize {
        self.n_mels
    }

    /// Compute the log-mel spectrogram of mono samples, shaped (n_mels, frames)
    pub fn mel_from_waveform(&self, samples: &[f32], device: &Device) -> Result<Tensor> {
        const LOG_FLOOR: f32 = 1e-5;

        let frames = self.stft(samples);
        let n_frames = frames.len();

        // Channel-major layout so the tensor is (n_mels, n_frames)
        let mut data = vec![0f32; self.n_mels * n_frames];
        for (t, frame) in frames.iter().enumerate() {
            let magnitude: Vec<f32> = frame.iter().map(|c| c.norm()).collect();
            for (m, filter) in self.mel_filters.iter().enumerate() {
                let energy: f32 = filter
                    .iter()
                    .zip(magnitude.iter())
                    .map(|(f, p)| f * p)
                    .sum();
                data[m * n_frames + t] = energy.max(LOG_FLOOR).ln();
            }
        }

        Ok(Tensor::from_vec(data, (self.n_mels, n_frames), device)?)
    }

    fn stft(&self, samples: &[f32]) -> Vec<Vec<Complex<f32>>> {
        if samples.is_empty() {
            return Vec::new();
        }

        // Center frames via reflect padding
        let pad = self.n_fft / 2;
        let mut padded = vec![0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);
        for i in 0..pad {
            padded[pad - 1 - i] = samples[i.min(samples.len() - 1)];
            padded[pad + samples.len() + i] = samples[(samples.len() - 1).saturating_sub(i)];
        }

        let num_frames = (padded.len() - self.n_fft) / self.hop_length + 1;
        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); self.n_fft];

        for i in 0..num_frames {
            let start = i * self.hop_length;
            for j in 0..self.n_fft {
                let window_val = if j < self.win_length { self.window[j] } else { 0.0 };
                buffer[j] = Complex::new(padded[start + j] * window_val, 0.0);
            }
            self.fft.process(&mut buffer);
            frames.push(buffer[..self.n_fft / 2 + 1].to_vec());
        }
        frames
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

fn mel_filterbank(n_fft: usize, n_mels: usize, sr: u32, fmin: f32, fmax: f32) -> Vec<Vec<f32>> {
    let n_freqs = n_fft / 2 + 1;
    let freq_bins: Vec<f32> = (0..n_freqs)
        .map(|i| i as f32 * sr as f32 / n_fft as f32)
        .collect();

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let mel_points: Vec<f32> = (0..=n_mels + 1)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = vec![vec![0.0; n_freqs]; n_mels];
    for i in 0..n_mels {
        let (left, center, right) = (mel_points[i], mel_points[i + 1], mel_points[i + 2]);
        for (j, &freq) in freq_bins.iter().enumerate() {
            if freq >= left && freq < center {
                filters[i][j] = (freq - left) / (center - left);
            } else if freq >= center && freq <= right {
                filters[i][j] = (right - freq) / (right - center);
            }
        }
        let sum: f32 = filters[i].iter().sum();
        if sum > 0.0 {
            for val in filters[i].iter_mut() {
                *val /= sum;
            }
        }
    }
    filters
}
