//! Beta-binomial alignment priors
//!
//! The alignment prior biases attention toward monotonic text-to-mel
//! alignment: entry (i, j) of the (mel_len, text_len) matrix is the
//! probability that mel frame i attends to text position j. Row i is a
//! beta-binomial PMF whose peak moves across the text as mel frames
//! progress, sharpening away from the sequence boundaries.
//!
//! Exact matrices are costly for long utterances, so three retrieval modes
//! exist: exact recomputation, a disk cache keyed by the audio path, and a
//! bucketed interpolator that memoizes exact matrices for rounded sizes and
//! resizes them with bilinear interpolation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use dashmap::DashMap;
use tracing::debug;

use crate::config::PriorConfig;
use crate::error::Result;
use crate::tensor_io;

/// A dense (mel_len, text_len) prior matrix in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct PriorMatrix {
    pub mel_len: usize,
    pub text_len: usize,
    data: Vec<f32>,
}

impl PriorMatrix {
    fn new(mel_len: usize, text_len: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), mel_len * text_len);
        Self {
            mel_len,
            text_len,
            data,
        }
    }

    /// Value at (mel frame, text position)
    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.data[i * self.text_len + j]
    }

    /// Convert into a (mel_len, text_len) f32 tensor
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_vec(
            self.data.clone(),
            (self.mel_len, self.text_len),
            device,
        )?)
    }
}

/// Natural log of the gamma function (Lanczos approximation, g = 7)
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection formula
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Compute the exact beta-binomial prior for `text_len` positions and
/// `mel_len` frames, shaped (mel_len, text_len)
///
/// Row i (1-based) is the beta-binomial PMF over the `text_len` support
/// points with shape parameters a = scaling * i, b = scaling * (M + 1 - i);
/// every row sums to 1.
pub fn beta_binomial_prior(text_len: usize, mel_len: usize, scaling: f32) -> PriorMatrix {
    assert!(text_len >= 1 && mel_len >= 1, "prior needs non-empty axes");
    let p = text_len;
    let m = mel_len;
    // Support {0, .., P-1} so each row is a full PMF over text positions
    let n = (p - 1) as f64;

    let mut data = Vec::with_capacity(m * p);
    let ln_choose: Vec<f64> = (0..p)
        .map(|k| {
            let k = k as f64;
            ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
        })
        .collect();

    for i in 1..=m {
        let a = scaling as f64 * i as f64;
        let b = scaling as f64 * (m + 1 - i) as f64;
        let ln_beta_ab = ln_beta(a, b);
        for (k, lc) in ln_choose.iter().enumerate() {
            let k = k as f64;
            let ln_pmf = lc + ln_beta(k + a, n - k + b) - ln_beta_ab;
            data.push(ln_pmf.exp() as f32);
        }
    }
    PriorMatrix::new(m, p, data)
}

/// Round a length up to its bucket: the nearest positive multiple of `to`
///
/// Monotone non-decreasing in `v` and never less than one bucket.
pub fn round_to_bucket(v: usize, to: usize) -> usize {
    let rounded = ((v as f64 + 1.0) / to as f64).round() as usize;
    rounded.max(1) * to
}

/// Order-1 (bilinear) resize of a prior matrix to an exact target shape
fn resize_bilinear(src: &PriorMatrix, mel_len: usize, text_len: usize) -> PriorMatrix {
    let src_pos = |out_idx: usize, out_len: usize, in_len: usize| -> (usize, usize, f32) {
        if out_len <= 1 || in_len <= 1 {
            return (0, 0, 0.0);
        }
        let pos = out_idx as f32 * (in_len - 1) as f32 / (out_len - 1) as f32;
        let lo = pos.floor() as usize;
        let hi = (lo + 1).min(in_len - 1);
        (lo, hi, pos - lo as f32)
    };

    let mut data = Vec::with_capacity(mel_len * text_len);
    for i in 0..mel_len {
        let (r0, r1, fr) = src_pos(i, mel_len, src.mel_len);
        for j in 0..text_len {
            let (c0, c1, fc) = src_pos(j, text_len, src.text_len);
            let top = src.get(r0, c0) * (1.0 - fc) + src.get(r0, c1) * fc;
            let bottom = src.get(r1, c0) * (1.0 - fc) + src.get(r1, c1) * fc;
            data.push(top * (1.0 - fr) + bottom * fr);
        }
    }
    PriorMatrix::new(mel_len, text_len, data)
}

/// Interpolating prior bank
///
/// Memoizes exact matrices for rounded (mel, text) bucket pairs and
/// resizes them to the requested shape. The bank grows without bound, but
/// bucket cardinality is limited by corpus length diversity, so in practice
/// it stays small; this memory-growth tradeoff is accepted deliberately.
pub struct BetaBinomialInterpolator {
    round_mel_len_to: usize,
    round_text_len_to: usize,
    scaling: f32,
    bank: DashMap<(usize, usize), Arc<PriorMatrix>>,
    computed: AtomicU64,
}

impl BetaBinomialInterpolator {
    pub fn new(round_mel_len_to: usize, round_text_len_to: usize, scaling: f32) -> Self {
        Self {
            round_mel_len_to,
            round_text_len_to,
            scaling,
            bank: DashMap::new(),
            computed: AtomicU64::new(0),
        }
    }

    /// Prior matrix for the exact requested (mel_len, text_len) shape
    ///
    /// Panics if the resized matrix does not match the requested shape;
    /// that would indicate a bucket-rounding or interpolation bug, not a
    /// recoverable condition.
    pub fn prior(&self, mel_len: usize, text_len: usize) -> PriorMatrix {
        let bucket_mel = round_to_bucket(mel_len, self.round_mel_len_to);
        let bucket_text = round_to_bucket(text_len, self.round_text_len_to);

        let exact = self
            .bank
            .entry((bucket_mel, bucket_text))
            .or_insert_with(|| {
                self.computed.fetch_add(1, Ordering::Relaxed);
                debug!(bucket_mel, bucket_text, "computing prior bucket matrix");
                Arc::new(beta_binomial_prior(bucket_text, bucket_mel, self.scaling))
            })
            .clone();

        let resized = resize_bilinear(&exact, mel_len, text_len);
        assert_eq!(
            (resized.mel_len, resized.text_len),
            (mel_len, text_len),
            "interpolated prior shape mismatch"
        );
        resized
    }

    /// Number of bucket matrices computed so far (cache misses)
    pub fn bucket_computations(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }

    /// Number of bucket matrices currently memoized
    pub fn bank_len(&self) -> usize {
        self.bank.len()
    }
}

/// Retrieval mode, resolved once from configuration
enum PriorMode {
    Interpolated(BetaBinomialInterpolator),
    DiskCached { cache_dir: PathBuf },
    Exact,
}

/// Alignment-prior provider for the dataset
///
/// Safe to share across loader threads: the interpolator bank is a
/// concurrent map and disk-cache writes are atomic renames.
pub struct AlignmentPriorCache {
    mode: PriorMode,
    scaling: f32,
    dataset_root: PathBuf,
}

impl AlignmentPriorCache {
    pub fn from_config(config: &PriorConfig, dataset_root: impl Into<PathBuf>) -> Self {
        let mode = if config.use_interpolator {
            PriorMode::Interpolated(BetaBinomialInterpolator::new(
                config.round_mel_len_to,
                config.round_text_len_to,
                config.scaling,
            ))
        } else if let Some(dir) = &config.cache_dir {
            PriorMode::DiskCached {
                cache_dir: dir.clone(),
            }
        } else {
            PriorMode::Exact
        };
        Self {
            mode,
            scaling: config.scaling,
            dataset_root: dataset_root.into(),
        }
    }

    /// Prior for one example, shaped (mel_len, text_len)
    ///
    /// `audio_path` keys the disk cache; it is unused by the other modes.
    pub fn prior_for(
        &self,
        audio_path: &Path,
        mel_len: usize,
        text_len: usize,
        device: &Device,
    ) -> Result<Tensor> {
        match &self.mode {
            PriorMode::Interpolated(interpolator) => {
                interpolator.prior(mel_len, text_len).to_tensor(device)
            }
            PriorMode::DiskCached { cache_dir } => {
                let cached = tensor_io::cache_path(cache_dir, &self.dataset_root, audio_path);
                if cached.is_file() {
                    debug!(path = %cached.display(), "prior cache hit");
                    return tensor_io::load_tensor(&cached, device);
                }
                let tensor =
                    beta_binomial_prior(text_len, mel_len, self.scaling).to_tensor(device)?;
                tensor_io::save_tensor(&cached, &tensor)?;
                Ok(tensor)
            }
            PriorMode::Exact => {
                beta_binomial_prior(text_len, mel_len, self.scaling).to_tensor(device)
            }
        }
    }
}
