//! Dataset configuration
//!
//! All knobs recognized by the preparation pipeline. The raw flag surface
//! mirrors the training recipes it is driven from; `validate` rejects
//! inconsistent combinations before any example is loaded, and the dataset
//! constructor resolves the flags into explicit source enums so that no
//! per-example branching on configuration booleans remains.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};

/// STFT / mel filterbank parameters for one spectrogram extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StftConfig {
    /// Target sample rate; waveforms at any other rate are rejected
    pub sample_rate: u32,
    /// FFT size
    pub filter_length: usize,
    /// Hop between frames
    pub hop_length: usize,
    /// Analysis window length
    pub win_length: usize,
    /// Number of mel bands
    pub n_mel_channels: usize,
    /// Minimum mel frequency
    pub mel_fmin: f32,
    /// Maximum mel frequency (None = Nyquist)
    pub mel_fmax: Option<f32>,
    /// Peak value the loaded waveform is divided by before analysis
    #[serde(default = "default_max_wav_value")]
    pub max_wav_value: f32,
}

fn default_max_wav_value() -> f32 {
    1.0
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            filter_length: 1024,
            hop_length: 256,
            win_length: 1024,
            n_mel_channels: 80,
            mel_fmin: 0.0,
            mel_fmax: Some(8000.0),
            max_wav_value: 1.0,
        }
    }
}

/// Pitch estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PitchMethod {
    /// Frame-wise normalized autocorrelation
    #[default]
    Autocorrelation,
}

/// Pitch normalization method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PitchNormMethod {
    /// Subtract mean, divide by std over voiced frames
    #[default]
    MeanStd,
}

/// Pitch sourcing and normalization options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitchConfig {
    /// Load precomputed pitch tensors from the paths in the corpus index
    #[serde(default)]
    pub load_from_disk: bool,
    /// Cache computed pitch tensors under this directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Estimation method used when computing online
    #[serde(default)]
    pub method: PitchMethod,
    /// Refine the search range from a first-pass median estimate
    #[serde(default)]
    pub two_pass: bool,
    /// Apply normalization to the estimated contour
    #[serde(default = "default_true")]
    pub normalize: bool,
    /// Normalization method
    #[serde(default)]
    pub norm_method: PitchNormMethod,
    /// Corpus pitch mean in Hz (LJSpeech default)
    #[serde(default = "default_pitch_mean")]
    pub mean: f32,
    /// Corpus pitch std in Hz (LJSpeech default)
    #[serde(default = "default_pitch_std")]
    pub std: f32,
}

fn default_true() -> bool {
    true
}

fn default_pitch_mean() -> f32 {
    214.72203
}

fn default_pitch_std() -> f32 {
    65.72038
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            load_from_disk: false,
            cache_dir: None,
            method: PitchMethod::Autocorrelation,
            two_pass: false,
            normalize: true,
            norm_method: PitchNormMethod::MeanStd,
            mean: default_pitch_mean(),
            std: default_pitch_std(),
        }
    }
}

/// Alignment-prior sourcing options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorConfig {
    /// Use the bucketed interpolator instead of exact per-example matrices
    #[serde(default = "default_true")]
    pub use_interpolator: bool,
    /// Mel-length bucket size for the interpolator
    #[serde(default = "default_mel_bucket")]
    pub round_mel_len_to: usize,
    /// Text-length bucket size for the interpolator
    #[serde(default = "default_text_bucket")]
    pub round_text_len_to: usize,
    /// Cache exact matrices under this directory (ignored when interpolating)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Beta-binomial shape scaling
    #[serde(default = "default_scaling")]
    pub scaling: f32,
}

fn default_mel_bucket() -> usize {
    100
}

fn default_text_bucket() -> usize {
    20
}

fn default_scaling() -> f32 {
    1.0
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            use_interpolator: true,
            round_mel_len_to: default_mel_bucket(),
            round_text_len_to: default_text_bucket(),
            cache_dir: None,
            scaling: default_scaling(),
        }
    }
}

/// Downsampled-mel options (second, independently configured extractor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownsampledMelConfig {
    /// Produce the downsampled mel feature at all
    #[serde(default)]
    pub enabled: bool,
    /// Load precomputed downsampled mels from disk
    #[serde(default)]
    pub load_from_disk: bool,
    /// STFT parameters of the low-rate extractor
    #[serde(default = "default_ds_stft")]
    pub stft: StftConfig,
}

impl Default for DownsampledMelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            load_from_disk: false,
            stft: default_ds_stft(),
        }
    }
}

fn default_ds_stft() -> StftConfig {
    StftConfig {
        sample_rate: 800,
        hop_length: 10,
        win_length: 40,
        mel_fmax: Some(400.0),
        ..StftConfig::default()
    }
}

/// Word-level prosody label options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProsodyConfig {
    /// Attach upsampled word-level labels to each example
    #[serde(default)]
    pub enabled: bool,
    /// Load per-word labels from the paths in the corpus index
    #[serde(default)]
    pub load_from_disk: bool,
}

/// Top-level dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Root all corpus-relative paths resolve against
    pub dataset_path: PathBuf,
    /// Corpus index files (pipe-delimited records)
    pub filelists: Vec<PathBuf>,
    /// Number of speakers; a speaker column is expected when > 1
    #[serde(default = "default_n_speakers")]
    pub n_speakers: usize,
    /// Text cleaner pipeline name
    #[serde(default = "default_cleaner")]
    pub text_cleaners: String,
    /// Symbol set name for the text encoder
    #[serde(default = "default_symbol_set")]
    pub symbol_set: String,
    /// Phonemization probability; only exactly 0.0 or 1.0 is accepted
    #[serde(default = "default_p_phonemize")]
    pub p_phonemize: f32,
    /// Load precomputed mel tensors instead of computing from waveforms
    #[serde(default = "default_true")]
    pub load_mel_from_disk: bool,
    /// Primary spectrogram extractor parameters
    #[serde(default)]
    pub stft: StftConfig,
    /// Pitch options
    #[serde(default)]
    pub pitch: PitchConfig,
    /// Alignment-prior options
    #[serde(default)]
    pub prior: PriorConfig,
    /// Prepend one space token to every encoded text
    #[serde(default)]
    pub prepend_space_to_text: bool,
    /// Append one space token to every encoded text
    #[serde(default)]
    pub append_space_to_text: bool,
    /// Word-level prosody label options
    #[serde(default)]
    pub prosody: ProsodyConfig,
    /// Downsampled-mel options
    #[serde(default)]
    pub mels_downsampled: DownsampledMelConfig,
}

fn default_n_speakers() -> usize {
    1
}

fn default_p_phonemize() -> f32 {
    1.0
}

fn default_cleaner() -> String {
    "english_cleaners".to_string()
}

fn default_symbol_set() -> String {
    "english_basic".to_string()
}

impl DatasetConfig {
    /// Read a configuration from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            DataError::config(format!("{}: {e}", path.as_ref().display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate mutually exclusive and constrained options
    ///
    /// Runs at dataset construction so that invalid configurations fail
    /// before the first training iteration.
    pub fn validate(&self) -> Result<()> {
        if self.p_phonemize != 0.0 && self.p_phonemize != 1.0 {
            return Err(DataError::config(format!(
                "p_phonemize must be exactly 0.0 or 1.0, got {}; \
                 variable probability breaks caching of alignment priors",
                self.p_phonemize
            )));
        }
        if self.pitch.load_from_disk && self.pitch.cache_dir.is_some() {
            return Err(DataError::config(
                "pitch.load_from_disk and pitch.cache_dir are mutually exclusive",
            ));
        }
        if self.filelists.is_empty() {
            return Err(DataError::config("at least one filelist is required"));
        }
        if self.prior.use_interpolator
            && (self.prior.round_mel_len_to == 0 || self.prior.round_text_len_to == 0)
        {
            return Err(DataError::config(
                "interpolator bucket sizes must be at least 1",
            ));
        }
        if self.prosody.enabled && !self.prosody.load_from_disk {
            return Err(DataError::config(
                "prosody labels are enabled but no source is configured",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DatasetConfig {
        DatasetConfig {
            dataset_path: PathBuf::from("/data"),
            filelists: vec![PathBuf::from("train.txt")],
            n_speakers: 1,
            text_cleaners: default_cleaner(),
            symbol_set: default_symbol_set(),
            p_phonemize: 0.0,
            load_mel_from_disk: true,
            stft: StftConfig::default(),
            pitch: PitchConfig::default(),
            prior: PriorConfig::default(),
            prepend_space_to_text: false,
            append_space_to_text: false,
            prosody: ProsodyConfig::default(),
            mels_downsampled: DownsampledMelConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_fractional_phonemize_rejected() {
        let mut config = base_config();
        config.p_phonemize = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pitch_disk_and_cache_exclusive() {
        let mut config = base_config();
        config.pitch.load_from_disk = true;
        config.pitch.cache_dir = Some(PathBuf::from("/tmp/pitch"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_bucket_rejected() {
        let mut config = base_config();
        config.prior.round_mel_len_to = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_json() {
        let config = base_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DatasetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.n_speakers, 1);
        assert!(parsed.prior.use_interpolator);
    }
}
