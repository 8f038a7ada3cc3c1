//! Waveform loading
//!
//! Returns mono f32 samples in [-1, 1] together with the file's native
//! sample rate. No resampling happens here: the dataset compares the
//! native rate against the configured target and fails on mismatch rather
//! than silently converting.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{DataError, Result};

/// Waveform loading collaborator
pub struct WaveformLoader;

impl WaveformLoader {
    /// Load an audio file as mono samples at its native sample rate
    pub fn load(path: &Path) -> Result<(Vec<f32>, u32)> {
        if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        {
            return Self::load_wav(path);
        }
        Self::load_with_symphonia(path)
    }

    /// WAV fast path via hound
    fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| DataError::audio(path, format!("cannot open WAV: {e}")))?;
        let spec = reader.spec();
        let sample_rate = spec.sample_rate;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| DataError::audio(path, format!("corrupt WAV data: {e}")))?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_value))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| DataError::audio(path, format!("corrupt WAV data: {e}")))?
            }
        };

        Ok((downmix(samples, spec.channels as usize), sample_rate))
    }

    /// Fallback for FLAC, OGG and friends
    fn load_with_symphonia(path: &Path) -> Result<(Vec<f32>, u32)> {
        let src = File::open(path)
            .map_err(|e| DataError::audio(path, format!("cannot open file: {e}")))?;
        let mss = MediaSourceStream::new(Box::new(src), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DataError::audio(path, format!("unsupported format: {e}")))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DataError::audio(path, "no decodable audio track"))?;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| DataError::audio(path, "unknown sample rate"))?;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DataError::audio(path, format!("unsupported codec: {e}")))?;

        let mut all_samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => {
                    return Err(DataError::audio(path, format!("packet read error: {e}")));
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(decoded) => {
                    if sample_buf.is_none() {
                        let spec = *decoded.spec();
                        sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                    }
                    if let Some(buf) = sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        all_samples.extend_from_slice(buf.samples());
                    }
                }
                // Skip corrupted packets
                Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
                Err(e) => return Err(DataError::audio(path, format!("decode error: {e}"))),
            }
        }

        Ok((downmix(all_samples, channels), sample_rate))
    }
}

fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples;
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, sample_rate: u32, samples: &[f32]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        let samples: Vec<f32> = (0..2205)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 22050.0).sin())
            .collect();
        write_test_wav(&path, 22050, &samples);

        let (loaded, sr) = WaveformLoader::load(&path).unwrap();
        assert_eq!(sr, 22050);
        assert_eq!(loaded.len(), samples.len());
        for (a, b) in loaded.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_downmix_stereo() {
        let mixed = downmix(vec![1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(mixed, vec![0.5, 0.5]);
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(WaveformLoader::load(Path::new("/nope/missing.wav")).is_err());
    }
}
