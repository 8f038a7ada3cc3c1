//! Audio front-end: waveform loading, mel extraction, pitch estimation

mod loader;
mod mel;
mod pitch;

pub use loader::WaveformLoader;
pub use mel::MelSpectrogram;
pub use pitch::{AutocorrelationPitch, PitchEstimator};
