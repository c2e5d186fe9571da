//! picalc core data models.
//!
//! Tasks, precision requests and the duration model records shared by the
//! evaluator, the estimator and the task orchestration layer.

#![warn(missing_docs)]

// Core identities
mod id;

// Requests and task lifecycle
mod request;
mod task;

// Duration model records
mod estimate;

mod error;

// Re-exports
pub use id::*;

pub use request::{Algorithm, PrecisionRequest};
pub use task::{Task, TaskFilter, TaskSnapshot, TaskState};
pub use estimate::{EstimatorParams, SampleEntry, SampleRecord};
pub use error::ModelError;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
