//! Completion time estimation.
//!
//! Fits `T(n) = exp(a) * n^b` by ordinary least squares on
//! `(ln n, ln duration)` over the retained samples, one point per distinct
//! digit count. All updates go through one async mutex, so concurrent
//! completions are applied and persisted one at a time.

use std::collections::BTreeMap;
use std::sync::Arc;

use picalc_core::{EstimatorParams, SampleEntry, SampleRecord};
use picalc_storage::{Storage, StorageError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Curve used until at least two distinct digit counts have been measured:
/// `exp(-13.8155) * n^1.6`, i.e. `1e-6 * n^1.6` seconds.
pub const DEFAULT_PARAMS: (f64, f64) = (-13.815_510_557_964_274, 1.6);

/// Errors from the estimator.
#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    /// Not enough distinct samples to fit a curve
    #[error("estimator unfit: {distinct} distinct sample(s), need at least 2")]
    Unfit {
        /// Distinct digit counts available
        distinct: usize,
    },

    /// Persistence failed
    #[error("estimator storage: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for estimator operations.
pub type Result<T> = std::result::Result<T, EstimatorError>;

/// Estimator configuration.
#[derive(Debug, Clone)]
pub struct EstimatorConfig {
    /// `(a, b)` used while unfit
    pub default_params: (f64, f64),
    /// Distinct digit counts required before fitting (at least 2)
    pub min_distinct: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            default_params: DEFAULT_PARAMS,
            min_distinct: 2,
        }
    }
}

#[derive(Debug, Default)]
struct EstimatorState {
    entries: BTreeMap<u64, SampleEntry>,
    params: Option<EstimatorParams>,
}

impl EstimatorState {
    fn sample_count(&self) -> u64 {
        self.entries.values().map(|e| e.count).sum()
    }

    fn points(&self) -> Vec<(f64, f64)> {
        self.entries
            .values()
            .map(|e| (e.n as f64, e.mean_duration))
            .collect()
    }
}

/// Power-law duration estimator backed by durable storage.
pub struct DurationEstimator {
    storage: Arc<dyn Storage>,
    config: EstimatorConfig,
    state: Mutex<EstimatorState>,
}

impl DurationEstimator {
    /// Load persisted params and samples.
    pub async fn load(storage: Arc<dyn Storage>, config: EstimatorConfig) -> Result<Self> {
        let params = storage.load_params().await?;
        let entries = storage
            .load_samples()
            .await?
            .into_iter()
            .filter(|e| e.count > 0 && SampleRecord::new(e.n, e.mean_duration).is_usable())
            .map(|e| (e.n, e))
            .collect::<BTreeMap<_, _>>();

        match &params {
            Some(p) => info!(
                "Loaded estimator params a={:.4} b={:.4} from {} samples",
                p.a, p.b, p.sample_count
            ),
            None => debug!("No estimator params stored, using defaults"),
        }

        Ok(Self {
            storage,
            config,
            state: Mutex::new(EstimatorState { entries, params }),
        })
    }

    /// Predicted seconds for `n` digits. Never fails: while unfit the
    /// configured default curve is used.
    pub async fn predict(&self, n: u64) -> f64 {
        let state = self.state.lock().await;
        self.current(&state).predict(n)
    }

    fn current(&self, state: &EstimatorState) -> EstimatorParams {
        state.params.unwrap_or_else(|| {
            let (a, b) = self.config.default_params;
            EstimatorParams::new(a, b, 0)
        })
    }

    /// Fitted params, if a fit exists.
    pub async fn params(&self) -> Option<EstimatorParams> {
        self.state.lock().await.params
    }

    /// Retained samples, ordered by `n`.
    pub async fn samples(&self) -> Vec<SampleEntry> {
        self.state.lock().await.entries.values().copied().collect()
    }

    /// Add a sample and refit when enough distinct digit counts exist.
    ///
    /// Returns the new params if a refit happened. Unusable samples
    /// (non-positive duration) are dropped with a warning.
    pub async fn record_sample(&self, sample: SampleRecord) -> Result<Option<EstimatorParams>> {
        if !sample.is_usable() {
            warn!("Ignoring unusable sample n={} duration={}", sample.n, sample.duration);
            return Ok(None);
        }

        let mut state = self.state.lock().await;
        state
            .entries
            .entry(sample.n)
            .and_modify(|e| e.absorb(sample.duration))
            .or_insert_with(|| SampleEntry::from_sample(sample));
        debug!("Recorded sample n={} duration={:.6}s", sample.n, sample.duration);

        let entries: Vec<SampleEntry> = state.entries.values().copied().collect();
        self.storage.save_samples(&entries).await?;

        if state.entries.len() < self.config.min_distinct.max(2) {
            return Ok(None);
        }
        self.refit_locked(&mut state).await.map(Some)
    }

    /// Recompute `(a, b)` from all retained samples and persist them.
    pub async fn refit(&self) -> Result<EstimatorParams> {
        let mut state = self.state.lock().await;
        self.refit_locked(&mut state).await
    }

    async fn refit_locked(&self, state: &mut EstimatorState) -> Result<EstimatorParams> {
        let distinct = state.entries.len();
        if distinct < self.config.min_distinct.max(2) {
            return Err(EstimatorError::Unfit { distinct });
        }
        let (a, b) = fit_power_law(&state.points()).ok_or(EstimatorError::Unfit { distinct })?;

        let params = EstimatorParams::new(a, b, state.sample_count());
        self.storage.save_params(&params).await?;
        state.params = Some(params);

        info!(
            "Refit estimator: a={:.4} b={:.4} over {} samples",
            a, b, params.sample_count
        );
        Ok(params)
    }
}

/// Least-squares fit of `ln T = a + b ln n`.
///
/// Points with non-positive coordinates are skipped. Returns `None` when
/// fewer than two usable points with distinct `n` remain.
pub fn fit_power_law(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let logs: Vec<(f64, f64)> = points
        .iter()
        .filter(|(n, t)| *n > 0.0 && *t > 0.0 && n.is_finite() && t.is_finite())
        .map(|(n, t)| (n.ln(), t.ln()))
        .collect();
    if logs.len() < 2 {
        return None;
    }

    let count = logs.len() as f64;
    let mean_x = logs.iter().map(|(x, _)| x).sum::<f64>() / count;
    let mean_y = logs.iter().map(|(_, y)| y).sum::<f64>() / count;

    let var_x = logs.iter().map(|(x, _)| (x - mean_x).powi(2)).sum::<f64>() / count;
    if var_x <= f64::EPSILON {
        return None;
    }
    let cov_xy = logs
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum::<f64>()
        / count;

    let b = cov_xy / var_x;
    let a = mean_y - b * mean_x;
    Some((a, b))
}
