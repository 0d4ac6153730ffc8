//! Bounded-concurrency job runner.
//!
//! [`ParallelExecutor`] runs a batch of independent jobs on a fixed
//! pool of named OS worker threads: `min(job_count, max_threads)`
//! workers draw boxed jobs from a shared queue until it is empty, then
//! the caller joins them all (a barrier; no partial results are usable
//! before completion). Each job is dropped the moment it finishes, so
//! peak memory is bounded by the worker count times one job's
//! footprint, not by the batch size.
//!
//! A failing job is recorded in the [`ExecutorSummary`] and does not
//! cancel or abort its siblings; whether the overall run should stop is
//! the caller's policy.

use crate::progress::Progress;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failure of one job.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct JobError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl JobError {
    /// Creates an error from a message alone.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error preserving an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// One independent unit of parallel work.
///
/// Consumed by `run`, so a job's working resources are released as soon
/// as it completes.
pub trait Job: Send {
    /// Short name for logging and failure reporting.
    fn name(&self) -> &str;

    /// Runs the job to completion. There is no cancellation or pause;
    /// a job either finishes or fails.
    fn run(self: Box<Self>) -> Result<(), JobError>;
}

/// A job that failed, by name.
#[derive(Debug)]
pub struct JobFailure {
    /// The failed job's name
    pub name: String,
    /// What went wrong
    pub error: JobError,
}

/// Outcome of one executor batch.
#[derive(Debug)]
pub struct ExecutorSummary {
    /// Jobs submitted
    pub jobs: usize,
    /// Jobs that completed successfully
    pub succeeded: usize,
    /// Failures, in completion order
    pub failures: Vec<JobFailure>,
    /// Wall-clock time from submission to the join barrier
    pub elapsed: Duration,
}

impl ExecutorSummary {
    /// True when every job succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fixed-size worker pool over a shared job queue.
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    max_threads: usize,
}

impl ParallelExecutor {
    /// Creates an executor using at most `max_threads` workers.
    pub fn new(max_threads: usize) -> Self {
        Self {
            max_threads: max_threads.max(1),
        }
    }

    /// The configured worker cap.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Runs the batch to completion and reports the outcome.
    ///
    /// `progress` receives one `job_done` per completed job; streaming
    /// jobs additionally report their own chunks through their clone of
    /// the same handle.
    pub fn run(&self, jobs: Vec<Box<dyn Job>>, progress: &Progress) -> ExecutorSummary {
        let job_count = jobs.len();
        let start = Instant::now();
        if job_count == 0 {
            return ExecutorSummary {
                jobs: 0,
                succeeded: 0,
                failures: Vec::new(),
                elapsed: start.elapsed(),
            };
        }

        let threads = self.max_threads.min(job_count);
        tracing::info!(jobs = job_count, threads, "executor starting");

        let (sender, receiver) = mpsc::channel::<Box<dyn Job>>();
        for job in jobs {
            sender.send(job).expect("queue alive before workers start");
        }
        drop(sender);

        let receiver = Arc::new(Mutex::new(receiver));
        let failures = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = Arc::clone(&receiver);
            let failures = Arc::clone(&failures);
            let progress = progress.clone();

            let handle = thread::Builder::new()
                .name(format!("bin-worker-{}", i))
                .spawn(move || loop {
                    // Hold the queue lock only to draw the next job.
                    let job = {
                        let receiver = receiver.lock().unwrap();
                        receiver.recv()
                    };
                    let Ok(job) = job else {
                        break; // queue drained and closed
                    };

                    let name = job.name().to_string();
                    tracing::debug!(job = %name, "job started");
                    match job.run() {
                        Ok(()) => progress.job_done(),
                        Err(error) => {
                            tracing::error!(job = %name, %error, "job failed");
                            failures.lock().unwrap().push(JobFailure { name, error });
                        }
                    }
                    // The job was consumed by run(): its buffers are
                    // released here, before the next job is drawn.
                })
                .expect("failed to spawn bin worker thread");
            handles.push(handle);
        }

        // Join barrier: nothing is usable until every worker is done.
        for handle in handles {
            let _ = handle.join();
        }

        let elapsed = start.elapsed();
        let failures = Arc::try_unwrap(failures)
            .expect("workers joined")
            .into_inner()
            .unwrap();
        let summary = ExecutorSummary {
            jobs: job_count,
            succeeded: job_count - failures.len(),
            failures,
            elapsed,
        };
        tracing::info!(
            jobs = summary.jobs,
            succeeded = summary.succeeded,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "executor finished"
        );
        summary
    }
}
