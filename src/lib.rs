//! # ttsprep - TTS training-data preparation
//!
//! Prepares paired speech/text examples for training a TTS acoustic model.
//! Given a corpus index of (audio, transcript) pairs it produces, per
//! example: a token id sequence, mel spectrogram, pitch and energy
//! contours, a beta-binomial text-to-mel alignment prior, and optional
//! word-level prosody labels and downsampled mels; then collates
//! variable-length examples into uniformly padded batches.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ttsprep::{batch_to_device, collate, DatasetConfig, TtsDataset};
//!
//! let config = DatasetConfig::from_file("dataset.json")?;
//! let dataset = TtsDataset::new(config)?;
//!
//! let examples: Vec<_> = (0..8).map(|i| dataset.load(i)).collect::<Result<_, _>>()?;
//! let batch = collate(&examples)?;
//! let (inputs, targets, num_frames) = batch_to_device(&batch, &device)?;
//! ```
//!
//! ## Caching
//!
//! Alignment priors are expensive for long utterances; by default they are
//! served from a bucketed interpolator that memoizes exact matrices for
//! rounded sizes. Priors and pitch contours can alternatively be cached on
//! disk as safetensors files keyed by the corpus-relative audio path; the
//! `ttsprep` binary warms those caches ahead of training.

pub mod audio;
pub mod collate;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod device;
pub mod error;
pub mod prior;
pub mod prosody;
pub mod tensor_io;
pub mod text;

pub use collate::{collate, Batch};
pub use config::{DatasetConfig, PitchConfig, PriorConfig, StftConfig};
pub use corpus::{CorpusEntry, CorpusLayout};
pub use dataset::{Example, TtsDataset};
pub use device::{batch_to_device, ModelInputs, TrainingTargets};
pub use error::{DataError, Result};
pub use prior::{beta_binomial_prior, AlignmentPriorCache, BetaBinomialInterpolator};
pub use text::{BasicTextEncoder, EncodedText, TextEncoder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
