//! Progress Tracking (Layer 2)
//!
//! Published task snapshots, cancellation flags and the duration estimator.

#![warn(missing_docs)]

pub mod tracker;
pub mod cancel;
pub mod estimator;

pub use tracker::{TaskBoard, TrackerError, CancelOutcome};
pub use cancel::StopFlag;
pub use estimator::{
    fit_power_law, DurationEstimator, EstimatorConfig, EstimatorError, DEFAULT_PARAMS,
};
