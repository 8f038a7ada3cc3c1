//! Corpus index parsing
//!
//! A corpus index is a text file of pipe-delimited records, one per
//! training example. Column layout depends on the dataset configuration:
//!
//! ```text
//! audio [| pitch] [| prosody] [| ds_audio] | text [| speaker]
//! ```
//!
//! Optional columns are present only when the corresponding feature is
//! loaded from disk. Paths resolve relative to the dataset root.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::DatasetConfig;
use crate::error::{DataError, Result};

/// One corpus record, loaded once at dataset construction
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    /// Audio or precomputed-mel path
    pub audio: PathBuf,
    /// Transcript text
    pub text: String,
    /// Speaker id, present when the corpus is multi-speaker
    pub speaker: Option<i64>,
    /// Precomputed pitch tensor path
    pub pitch: Option<PathBuf>,
    /// Per-word prosody label tensor path
    pub prosody: Option<PathBuf>,
    /// Audio path for the downsampled-mel extractor
    pub audio_ds: Option<PathBuf>,
}

/// Which optional columns the filelists carry
#[derive(Debug, Clone, Copy)]
pub struct CorpusLayout {
    pub has_pitch: bool,
    pub has_prosody: bool,
    pub has_ds_audio: bool,
    pub has_speaker: bool,
}

impl CorpusLayout {
    /// Derive the column layout from the dataset configuration
    pub fn from_config(config: &DatasetConfig) -> Self {
        Self {
            has_pitch: config.pitch.load_from_disk,
            has_prosody: config.prosody.enabled && config.prosody.load_from_disk,
            has_ds_audio: config.mels_downsampled.enabled,
            has_speaker: config.n_speakers > 1,
        }
    }

    fn expected_columns(&self) -> usize {
        2 + usize::from(self.has_pitch)
            + usize::from(self.has_prosody)
            + usize::from(self.has_ds_audio)
            + usize::from(self.has_speaker)
    }
}

/// Load and concatenate all filelists into a corpus entry list
pub fn load_corpus(
    filelists: &[PathBuf],
    root: &Path,
    layout: CorpusLayout,
) -> Result<Vec<CorpusEntry>> {
    let mut entries = Vec::new();
    for filelist in filelists {
        let text = std::fs::read_to_string(filelist).map_err(|e| DataError::Corpus {
            file: filelist.clone(),
            line: 0,
            message: format!("cannot read filelist: {e}"),
        })?;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            entries.push(parse_line(line, filelist, lineno + 1, root, layout)?);
        }
    }
    info!(
        entries = entries.len(),
        filelists = filelists.len(),
        "loaded corpus index"
    );
    Ok(entries)
}

fn parse_line(
    line: &str,
    file: &Path,
    lineno: usize,
    root: &Path,
    layout: CorpusLayout,
) -> Result<CorpusEntry> {
    let fields: Vec<&str> = line.split('|').collect();
    let expected = layout.expected_columns();
    if fields.len() != expected {
        return Err(DataError::Corpus {
            file: file.to_path_buf(),
            line: lineno,
            message: format!("expected {expected} columns, found {}", fields.len()),
        });
    }

    let mut iter = fields.into_iter();
    let mut next = || {
        iter.next().ok_or_else(|| DataError::Corpus {
            file: file.to_path_buf(),
            line: lineno,
            message: "missing column".to_string(),
        })
    };

    let audio = root.join(next()?);
    let pitch = if layout.has_pitch {
        Some(root.join(next()?))
    } else {
        None
    };
    let prosody = if layout.has_prosody {
        Some(root.join(next()?))
    } else {
        None
    };
    let audio_ds = if layout.has_ds_audio {
        Some(root.join(next()?))
    } else {
        None
    };
    let text = next()?.to_string();
    let speaker = if layout.has_speaker {
        let raw = next()?;
        Some(raw.parse::<i64>().map_err(|_| DataError::Corpus {
            file: file.to_path_buf(),
            line: lineno,
            message: format!("invalid speaker id {raw:?}"),
        })?)
    } else {
        None
    };

    Ok(CorpusEntry {
        audio,
        text,
        speaker,
        pitch,
        prosody,
        audio_ds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT_PLAIN: CorpusLayout = CorpusLayout {
        has_pitch: false,
        has_prosody: false,
        has_ds_audio: false,
        has_speaker: false,
    };

    #[test]
    fn test_parse_plain_line() {
        let entry = parse_line(
            "wavs/a.wav|hello world",
            Path::new("list.txt"),
            1,
            Path::new("/data"),
            LAYOUT_PLAIN,
        )
        .unwrap();
        assert_eq!(entry.audio, PathBuf::from("/data/wavs/a.wav"));
        assert_eq!(entry.text, "hello world");
        assert!(entry.speaker.is_none());
        assert!(entry.pitch.is_none());
    }

    #[test]
    fn test_parse_full_line() {
        let layout = CorpusLayout {
            has_pitch: true,
            has_prosody: true,
            has_ds_audio: true,
            has_speaker: true,
        };
        let entry = parse_line(
            "mels/a.safetensors|pitch/a.safetensors|cwt/a.safetensors|wavs_ds/a.wav|hi there|3",
            Path::new("list.txt"),
            1,
            Path::new("/data"),
            layout,
        )
        .unwrap();
        assert_eq!(entry.speaker, Some(3));
        assert_eq!(entry.pitch, Some(PathBuf::from("/data/pitch/a.safetensors")));
        assert_eq!(entry.audio_ds, Some(PathBuf::from("/data/wavs_ds/a.wav")));
        assert_eq!(entry.text, "hi there");
    }

    #[test]
    fn test_wrong_column_count_fails() {
        let err = parse_line(
            "wavs/a.wav|hello|extra",
            Path::new("list.txt"),
            7,
            Path::new("/data"),
            LAYOUT_PLAIN,
        )
        .unwrap_err();
        match err {
            DataError::Corpus { line, .. } => assert_eq!(line, 7),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_speaker_id_fails() {
        let layout = CorpusLayout {
            has_speaker: true,
            ..LAYOUT_PLAIN
        };
        assert!(parse_line(
            "wavs/a.wav|hello|abc",
            Path::new("list.txt"),
            1,
            Path::new("/data"),
            layout,
        )
        .is_err());
    }
}
