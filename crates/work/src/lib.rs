//! Task orchestration (Layer 3)
//!
//! Submission, polling and cancellation of pi computations, and the worker
//! pool that runs them.

#![warn(missing_docs)]

pub mod error;
pub mod executor;
pub mod manager;

pub use error::{TaskError, Result};
pub use executor::{Job, RunOutcome, Worker};
pub use manager::{ManagerConfig, SubmitReceipt, TaskManager, TaskService};
