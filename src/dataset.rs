//! Per-example feature assembly
//!
//! [`TtsDataset`] owns the corpus index and produces one [`Example`] per
//! entry: token ids, mel, pitch, energy, alignment prior, and the optional
//! prosody / downsampled-mel features. Loading is deterministic given the
//! index and configuration, and `load` takes `&self` so disjoint indices
//! can be loaded from parallel workers; the only shared mutable state is
//! the interpolation bank and the on-disk caches, both of which tolerate
//! concurrent access.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tracing::{debug, info};

use crate::audio::{AutocorrelationPitch, MelSpectrogram, PitchEstimator, WaveformLoader};
use crate::config::{DatasetConfig, PitchConfig};
use crate::corpus::{load_corpus, CorpusEntry, CorpusLayout};
use crate::error::{DataError, Result};
use crate::prior::AlignmentPriorCache;
use crate::prosody::upsample_word_labels;
use crate::tensor_io;
use crate::text::{BasicTextEncoder, TextEncoder};

/// One training example; every field is co-indexed with the others
#[derive(Debug, Clone)]
pub struct Example {
    /// Token ids, (L,) i64
    pub text: Tensor,
    /// Mel spectrogram, (C, T) f32
    pub mel: Tensor,
    /// Token count, kept as a scalar for collation bookkeeping
    pub text_len: usize,
    /// Pitch contour, (F, T) f32 with F >= 1
    pub pitch: Tensor,
    /// Per-frame energy, (T,) f32
    pub energy: Tensor,
    /// Speaker id for multi-speaker corpora
    pub speaker: Option<i64>,
    /// Alignment prior, (T, L) f32
    pub attn_prior: Tensor,
    /// Source audio path, retained for debugging and cache keys
    pub audio_path: PathBuf,
    /// Per-token prosody labels, (L,) i64
    pub prosody: Option<Tensor>,
    /// Downsampled mel, (C, T_ds) f32
    pub mel_ds: Option<Tensor>,
}

impl Example {
    /// Mel frame count
    pub fn mel_len(&self) -> Result<usize> {
        Ok(self.mel.dim(1)?)
    }
}

/// How mel spectrograms are obtained, fixed at construction
enum MelSource {
    FromDisk,
    Compute {
        extractor: MelSpectrogram,
        max_wav_value: f32,
    },
}

/// How pitch contours are obtained, fixed at construction
enum PitchSource {
    FromDisk,
    FromCache(PathBuf),
    Compute,
}

/// Corpus-backed example loader
pub struct TtsDataset {
    entries: Vec<CorpusEntry>,
    dataset_root: PathBuf,
    encoder: Box<dyn TextEncoder>,
    estimator: Box<dyn PitchEstimator>,
    mel_source: MelSource,
    ds_mel_source: Option<MelSource>,
    pitch_source: PitchSource,
    pitch_config: PitchConfig,
    prior: AlignmentPriorCache,
    prepend_space: bool,
    append_space: bool,
    prosody_enabled: bool,
    device: Device,
}

impl TtsDataset {
    /// Build a dataset with the default text encoder and pitch estimator
    pub fn new(config: DatasetConfig) -> Result<Self> {
        let encoder = Box::new(BasicTextEncoder::new(
            &config.symbol_set,
            &config.text_cleaners,
        )?);
        Self::with_components(config, encoder, Box::new(AutocorrelationPitch))
    }

    /// Build a dataset with custom collaborators
    ///
    /// Configuration validation runs here, so invalid option combinations
    /// fail before any example is touched.
    pub fn with_components(
        config: DatasetConfig,
        encoder: Box<dyn TextEncoder>,
        estimator: Box<dyn PitchEstimator>,
    ) -> Result<Self> {
        config.validate()?;

        let layout = CorpusLayout::from_config(&config);
        let entries = load_corpus(&config.filelists, &config.dataset_path, layout)?;

        let mel_source = if config.load_mel_from_disk {
            MelSource::FromDisk
        } else {
            MelSource::Compute {
                extractor: MelSpectrogram::from_config(&config.stft),
                max_wav_value: config.stft.max_wav_value,
            }
        };

        let ds_mel_source = if config.mels_downsampled.enabled {
            Some(if config.mels_downsampled.load_from_disk {
                MelSource::FromDisk
            } else {
                MelSource::Compute {
                    extractor: MelSpectrogram::from_config(&config.mels_downsampled.stft),
                    max_wav_value: config.mels_downsampled.stft.max_wav_value,
                }
            })
        } else {
            None
        };

        let pitch_source = if config.pitch.load_from_disk {
            PitchSource::FromDisk
        } else if let Some(dir) = &config.pitch.cache_dir {
            PitchSource::FromCache(dir.clone())
        } else {
            PitchSource::Compute
        };

        let prior = AlignmentPriorCache::from_config(&config.prior, &config.dataset_path);

        info!(
            entries = entries.len(),
            mel_from_disk = config.load_mel_from_disk,
            pitch_from_disk = config.pitch.load_from_disk,
            interpolated_prior = config.prior.use_interpolator,
            "dataset constructed"
        );

        Ok(Self {
            entries,
            dataset_root: config.dataset_path,
            encoder,
            estimator,
            mel_source,
            ds_mel_source,
            pitch_source,
            pitch_config: config.pitch,
            prior,
            prepend_space: config.prepend_space_to_text,
            append_space: config.append_space_to_text,
            prosody_enabled: config.prosody.enabled,
            device: Device::Cpu,
        })
    }

    /// Number of corpus entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The corpus entry at `index`
    pub fn entry(&self, index: usize) -> &CorpusEntry {
        &self.entries[index]
    }

    /// Load one example
    pub fn load(&self, index: usize) -> Result<Example> {
        let entry = &self.entries[index];
        debug!(index, audio = %entry.audio.display(), "loading example");

        let mel = self.resolve_mel(&entry.audio, &self.mel_source)?;
        let mel_len = mel.dim(1)?;

        let (ids, word_counts) = self.resolve_text(&entry.text)?;
        let text_len = ids.len();

        let pitch = self.resolve_pitch(entry, mel_len)?;
        // A 1-D contour is a single formant
        let pitch = if pitch.rank() == 1 {
            let frames = pitch.dim(0)?;
            pitch.reshape((1, frames))?
        } else {
            pitch
        };
        if pitch.dim(1)? != mel_len {
            return Err(DataError::shape(
                format!("example {index}"),
                format!(
                    "pitch has {} frames but mel has {mel_len}",
                    pitch.dim(1)?
                ),
            ));
        }

        // Per-frame L2 norm across mel channels
        let energy = mel.sqr()?.sum(0)?.sqrt()?;

        let attn_prior = self
            .prior
            .prior_for(&entry.audio, mel_len, text_len, &self.device)?;

        let prosody = if self.prosody_enabled {
            Some(self.resolve_prosody(entry, word_counts.as_deref(), text_len)?)
        } else {
            None
        };

        let mel_ds = match (&self.ds_mel_source, &entry.audio_ds) {
            (Some(source), Some(path)) => Some(self.resolve_mel(path, source)?),
            (Some(_), None) => {
                return Err(DataError::shape(
                    format!("example {index}"),
                    "downsampled mels enabled but corpus entry has no ds audio path",
                ))
            }
            _ => None,
        };

        let text = Tensor::from_vec(ids, text_len, &self.device)?;

        Ok(Example {
            text,
            mel,
            text_len,
            pitch,
            energy,
            speaker: entry.speaker,
            attn_prior,
            audio_path: entry.audio.clone(),
            prosody,
            mel_ds,
        })
    }

    /// Load every example in index order, stopping at the first failure
    pub fn load_all(&self) -> Result<Vec<Example>> {
        (0..self.len()).map(|i| self.load(i)).collect()
    }

    fn resolve_text(&self, text: &str) -> Result<(Vec<i64>, Option<Vec<usize>>)> {
        let encoded = self.encoder.encode(text, self.prosody_enabled)?;
        let mut ids = encoded.ids;
        let space = self.encoder.space_token();
        if self.prepend_space {
            ids.insert(0, space);
        }
        if self.append_space {
            ids.push(space);
        }
        Ok((ids, encoded.word_counts))
    }

    fn resolve_mel(&self, path: &Path, source: &MelSource) -> Result<Tensor> {
        let mel = match source {
            MelSource::FromDisk => tensor_io::load_tensor(path, &self.device)?,
            MelSource::Compute {
                extractor,
                max_wav_value,
            } => {
                let wav_path = waveform_path(path);
                let (samples, sample_rate) = WaveformLoader::load(&wav_path)?;
                if sample_rate != extractor.sample_rate {
                    return Err(DataError::SampleRateMismatch {
                        path: wav_path,
                        got: sample_rate,
                        expected: extractor.sample_rate,
                    });
                }
                let normalized: Vec<f32> =
                    samples.iter().map(|s| s / max_wav_value).collect();
                extractor.mel_from_waveform(&normalized, &self.device)?
            }
        };
        if mel.rank() != 2 {
            return Err(DataError::shape(
                format!("mel {}", path.display()),
                format!("expected a (channels, frames) tensor, got rank {}", mel.rank()),
            ));
        }
        Ok(mel)
    }

    fn resolve_pitch(&self, entry: &CorpusEntry, mel_len: usize) -> Result<Tensor> {
        match &self.pitch_source {
            PitchSource::FromDisk => {
                let path = entry.pitch.as_ref().ok_or_else(|| {
                    DataError::config("pitch.load_from_disk set but corpus has no pitch column")
                })?;
                tensor_io::load_tensor(path, &self.device)
            }
            PitchSource::FromCache(dir) => {
                let cached = tensor_io::cache_path(dir, &self.dataset_root, &entry.audio);
                if cached.is_file() {
                    debug!(path = %cached.display(), "pitch cache hit");
                    return tensor_io::load_tensor(&cached, &self.device);
                }
                let pitch = self.estimator.estimate(
                    &waveform_path(&entry.audio),
                    mel_len,
                    &self.pitch_config,
                    &self.device,
                )?;
                tensor_io::save_tensor(&cached, &pitch)?;
                Ok(pitch)
            }
            PitchSource::Compute => self.estimator.estimate(
                &waveform_path(&entry.audio),
                mel_len,
                &self.pitch_config,
                &self.device,
            ),
        }
    }

    fn resolve_prosody(
        &self,
        entry: &CorpusEntry,
        word_counts: Option<&[usize]>,
        text_len: usize,
    ) -> Result<Tensor> {
        let path = entry.prosody.as_ref().ok_or_else(|| {
            DataError::config("prosody enabled but corpus entry has no prosody column")
        })?;
        let counts = word_counts.ok_or_else(|| {
            DataError::shape("prosody upsampling", "text encoder produced no word counts")
        })?;
        let labels = tensor_io::load_tensor(path, &self.device)?.to_vec1::<i64>()?;

        let mut upsampled = upsample_word_labels(counts, &labels)?;
        // Space tokens added around the text carry the pad label
        if self.prepend_space {
            upsampled.insert(0, 0);
        }
        if self.append_space {
            upsampled.push(0);
        }
        if upsampled.len() != text_len {
            return Err(DataError::shape(
                "prosody upsampling",
                format!("{} labels for {text_len} tokens", upsampled.len()),
            ));
        }
        let n = upsampled.len();
        Ok(Tensor::from_vec(upsampled, n, &self.device)?)
    }
}

/// Map a precomputed-feature path back to its waveform
///
/// Corpus indices sometimes reference mel tensors; the waveform lives in
/// a sibling `wavs/` tree with a `.wav` extension.
fn waveform_path(audio: &Path) -> PathBuf {
    if audio
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
    {
        return audio.to_path_buf();
    }
    let swapped: PathBuf = audio
        .iter()
        .map(|part| {
            if part.to_str() == Some("mels") {
                std::ffi::OsStr::new("wavs")
            } else {
                part
            }
        })
        .collect();
    swapped.with_extension("wav")
}
