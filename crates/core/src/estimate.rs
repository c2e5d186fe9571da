//! Duration model records.

use serde::{Deserialize, Serialize};

use crate::Time;

/// Measured duration of one successfully completed computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Digits computed
    pub n: u64,
    /// Wall-clock seconds
    pub duration: f64,
}

impl SampleRecord {
    /// Create a sample.
    pub fn new(n: u64, duration: f64) -> Self {
        Self { n, duration }
    }

    /// Samples must be strictly positive on both axes to be log-transformed.
    pub fn is_usable(&self) -> bool {
        self.n > 0 && self.duration.is_finite() && self.duration > 0.0
    }
}

/// Retained samples for one digit count, averaged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleEntry {
    /// Digits computed
    pub n: u64,
    /// Mean wall-clock seconds over `count` samples
    pub mean_duration: f64,
    /// Samples averaged into this entry
    pub count: u64,
}

impl SampleEntry {
    /// Start an entry from one sample.
    pub fn from_sample(sample: SampleRecord) -> Self {
        Self {
            n: sample.n,
            mean_duration: sample.duration,
            count: 1,
        }
    }

    /// Fold another sample for the same `n` into the running mean.
    pub fn absorb(&mut self, duration: f64) {
        self.count += 1;
        self.mean_duration += (duration - self.mean_duration) / self.count as f64;
    }
}

/// Coefficients of the power-law model `T(n) = exp(a) * n^b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorParams {
    /// Intercept in log space
    pub a: f64,
    /// Exponent
    pub b: f64,
    /// When the fit was computed
    pub fitted_at: Time,
    /// Samples that went into the fit
    pub sample_count: u64,
}

impl EstimatorParams {
    /// Create params fitted now.
    pub fn new(a: f64, b: f64, sample_count: u64) -> Self {
        Self {
            a,
            b,
            fitted_at: chrono::Utc::now(),
            sample_count,
        }
    }

    /// Evaluate the curve at `n` digits, in seconds.
    pub fn predict(&self, n: u64) -> f64 {
        self.a.exp() * (n.max(1) as f64).powf(self.b)
    }
}
