//! Precision requests - what a caller asks the system to compute.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// Series used to evaluate pi.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Chudnovsky series evaluated by binary splitting
    #[default]
    Chudnovsky,
}

impl Algorithm {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Chudnovsky => "chudnovsky",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chudnovsky" => Ok(Algorithm::Chudnovsky),
            _ => Err(ModelError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// A request for `n` digits of pi.
///
/// `n` is signed so that out-of-range submissions can be represented and
/// rejected at the boundary instead of being silently clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionRequest {
    /// Number of digits requested
    pub n: i64,

    /// Algorithm to use
    #[serde(default)]
    pub algorithm: Algorithm,
}

impl PrecisionRequest {
    /// Create a Chudnovsky request for `n` digits.
    pub fn new(n: i64) -> Self {
        Self {
            n,
            algorithm: Algorithm::default(),
        }
    }

    /// Use a specific algorithm.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// The digit count if it is a valid precision (`n >= 1`).
    pub fn digits(&self) -> Option<u64> {
        u64::try_from(self.n).ok().filter(|n| *n >= 1)
    }
}
