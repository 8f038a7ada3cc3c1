//! Serialized tensor I/O
//!
//! All on-disk feature caches (pitch, alignment priors, precomputed mels)
//! use safetensors files holding a single tensor under the key `"data"`.
//! Writes go through a temp file and an atomic rename so that concurrent
//! first-time computation by different workers cannot leave a partial file
//! behind; content is deterministic given the inputs, so last writer wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::error::{DataError, Result};

/// Key the single tensor is stored under
const TENSOR_KEY: &str = "data";

/// Extension used by all cached feature tensors
pub const TENSOR_SUFFIX: &str = "safetensors";

/// Load a single tensor from a safetensors file
pub fn load_tensor(path: &Path, device: &Device) -> Result<Tensor> {
    let tensors = candle_core::safetensors::load(path, device).map_err(|e| {
        DataError::TensorCache {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;
    tensors
        .get(TENSOR_KEY)
        .cloned()
        .ok_or_else(|| DataError::TensorCache {
            path: path.to_path_buf(),
            message: format!("missing {TENSOR_KEY:?} entry"),
        })
}

/// Write a single tensor, creating parent directories, atomically renaming
/// into place
pub fn save_tensor(path: &Path, tensor: &Tensor) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    let mut tensors = HashMap::new();
    tensors.insert(TENSOR_KEY.to_string(), tensor.clone());
    candle_core::safetensors::save(&tensors, &tmp).map_err(|e| DataError::TensorCache {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "wrote cached tensor");
    Ok(())
}

/// Derive the cache file path for an audio path: the audio path relative to
/// the dataset root, re-rooted under the cache dir with the tensor suffix
pub fn cache_path(cache_dir: &Path, dataset_root: &Path, audio_path: &Path) -> PathBuf {
    let relative = audio_path
        .strip_prefix(dataset_root)
        .unwrap_or(audio_path);
    cache_dir.join(relative.with_extension(TENSOR_SUFFIX))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("t.safetensors");
        let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (2, 2), &Device::Cpu).unwrap();

        save_tensor(&path, &tensor).unwrap();
        assert!(path.exists());

        let loaded = load_tensor(&path, &Device::Cpu).unwrap();
        assert_eq!(loaded.dims(), &[2, 2]);
        assert_eq!(loaded.dtype(), DType::F32);
        assert_eq!(
            loaded.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]]
        );
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.safetensors");
        let tensor = Tensor::zeros((3,), DType::F32, &Device::Cpu).unwrap();
        save_tensor(&path, &tensor).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_cache_path_derivation() {
        let p = cache_path(
            Path::new("/cache/pitch"),
            Path::new("/data"),
            Path::new("/data/wavs/sub/a.wav"),
        );
        assert_eq!(p, PathBuf::from("/cache/pitch/wavs/sub/a.safetensors"));
    }

    #[test]
    fn test_cache_path_outside_root() {
        // Paths not under the root are used as-is
        let p = cache_path(
            Path::new("/cache"),
            Path::new("/data"),
            Path::new("elsewhere/a.wav"),
        );
        assert_eq!(p, PathBuf::from("/cache/elsewhere/a.safetensors"));
    }
}
