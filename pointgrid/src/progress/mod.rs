//! Run-scoped progress accounting.
//!
//! One [`Progress`] value spans one binning run: streaming jobs report
//! chunks of completed points, the executor reports whole completed
//! jobs, and everything funnels through a single serialized update
//! path. The value is owned by the caller and cloned (shared handle)
//! into jobs; it is never a process-wide singleton. Rendering (progress
//! bars, console output) is somebody else's job; this is only the
//! accounting contract.

use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct ProgressState {
    points_done: u64,
    chunks_done: u64,
    jobs_done: u64,
}

/// Shared progress counters for one run.
///
/// Cheap to clone; all clones update the same state.
#[derive(Debug, Clone)]
pub struct Progress {
    total_points: u64,
    state: Arc<Mutex<ProgressState>>,
}

impl Progress {
    /// Creates progress accounting expecting `total_points` overall.
    pub fn new(total_points: u64) -> Self {
        Self {
            total_points,
            state: Arc::new(Mutex::new(ProgressState::default())),
        }
    }

    /// Records one completed chunk of `points` points.
    pub fn chunk(&self, points: u64) {
        let mut state = self.state.lock().unwrap();
        state.points_done += points;
        state.chunks_done += 1;
        tracing::trace!(
            points_done = state.points_done,
            total = self.total_points,
            "progress"
        );
    }

    /// Records one completed non-streaming job.
    pub fn job_done(&self) {
        self.state.lock().unwrap().jobs_done += 1;
    }

    /// Total points expected over the run.
    pub fn total_points(&self) -> u64 {
        self.total_points
    }

    /// A consistent copy of the counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap();
        ProgressSnapshot {
            points_done: state.points_done,
            chunks_done: state.chunks_done,
            jobs_done: state.jobs_done,
            total_points: self.total_points,
        }
    }
}

/// Point-in-time view of the run's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Points reported done via chunk updates
    pub points_done: u64,
    /// Chunk updates received
    pub chunks_done: u64,
    /// Whole jobs completed
    pub jobs_done: u64,
    /// Points expected overall
    pub total_points: u64,
}

impl ProgressSnapshot {
    /// Completed fraction in `[0, 1]`; an empty run counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total_points == 0 {
            1.0
        } else {
            self.points_done as f64 / self.total_points as f64
        }
    }
}
