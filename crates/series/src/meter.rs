//! Bounded-cadence progress reporting.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use crate::{EvalError, ProgressFn, Result};

/// One progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Units completed
    pub iteration: u64,
    /// Units in total
    pub total: u64,
    /// Time since the run started
    pub elapsed: Duration,
}

impl Progress {
    /// Completed fraction.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.iteration as f64 / self.total as f64
    }
}

/// Counts completed work units and calls back every `stride` units.
///
/// The last unit is always reported, so a run that completes has published
/// `iteration == total`.
pub struct ProgressMeter<'a, 'f> {
    callback: &'a mut ProgressFn<'f>,
    started: Instant,
    done: u64,
    total: u64,
    stride: u64,
    next_report: u64,
}

impl<'a, 'f> ProgressMeter<'a, 'f> {
    /// Report at most about `reports` times over `total` units.
    pub fn new(callback: &'a mut ProgressFn<'f>, total: u64, reports: u64) -> Self {
        let stride = total.div_ceil(reports.max(1)).max(1);
        Self {
            callback,
            started: Instant::now(),
            done: 0,
            total,
            stride,
            next_report: stride,
        }
    }

    /// Mark one unit done. Fails with `Cancelled` if the callback says stop.
    pub fn tick(&mut self) -> Result<()> {
        self.done += 1;
        if self.done < self.next_report && self.done < self.total {
            return Ok(());
        }
        self.next_report = self.done + self.stride;

        let progress = Progress {
            iteration: self.done.min(self.total),
            total: self.total,
            elapsed: self.started.elapsed(),
        };
        match (self.callback)(progress) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(()) => Err(EvalError::Cancelled),
        }
    }

    /// Time since the meter was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
