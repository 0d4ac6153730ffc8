//! End-to-end binning runs.
//!
//! [`BinningPipeline`] wires the pieces together for one run: it seeds
//! the [`TileGrid`] from every input file's pre-scanned extents, spins
//! up one scan job per file on the [`ParallelExecutor`], and finalizes
//! by flushing every remaining cell. The returned [`RunSummary`] is
//! only meaningful for the jobs that completed; per-job failures are
//! listed, and whether to treat any failure as fatal for the whole run
//! is the caller's decision.

use crate::cell::CellManager;
use crate::config::{ConfigError, EngineConfig};
use crate::executor::{ExecutorSummary, Job, JobError, ParallelExecutor};
use crate::grid::TileGrid;
use crate::progress::{Progress, ProgressSnapshot};
use crate::scan::FileProcessor;
use crate::source::{FileInfo, SourceFactory};
use crate::writer::{TileWriter, WriterError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of a whole pipeline run (as opposed to one of its jobs).
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configuration is unusable
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The final flush of remaining cells failed
    #[error("final tile flush failed: {0}")]
    Flush(#[from] WriterError),
}

/// Outcome of one binning run.
#[derive(Debug)]
pub struct RunSummary {
    /// Tile columns and rows of the grid the run used
    pub grid_size: (i32, i32),
    /// Final progress counters
    pub points: ProgressSnapshot,
    /// Cells drained by the final flush
    pub cells_finalized: usize,
    /// Total buffers handed to the writer over the run
    pub fragments: u64,
    /// Per-job outcome and wall-clock timing
    pub executor: ExecutorSummary,
}

impl RunSummary {
    /// Wall-clock duration of the parallel phase.
    pub fn elapsed(&self) -> Duration {
        self.executor.elapsed
    }

    /// True when every file scanned cleanly.
    pub fn all_succeeded(&self) -> bool {
        self.executor.all_succeeded()
    }
}

/// One whole binning run over a set of input files.
pub struct BinningPipeline {
    config: EngineConfig,
    sources: Arc<dyn SourceFactory>,
    writer: Arc<dyn TileWriter>,
}

impl BinningPipeline {
    /// Validates `config` and builds the pipeline.
    pub fn new(
        config: EngineConfig,
        sources: Arc<dyn SourceFactory>,
        writer: Arc<dyn TileWriter>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            sources,
            writer,
        })
    }

    /// The source factory this pipeline opens files through.
    pub fn sources(&self) -> &Arc<dyn SourceFactory> {
        &self.sources
    }

    /// Runs the full binning job over `files`.
    ///
    /// The grid is seeded from every file's extents before any worker
    /// starts, and is immutable from then on.
    pub fn run(&self, files: Vec<FileInfo>) -> Result<RunSummary, PipelineError> {
        let mut grid = TileGrid::new(self.config.tile_length);
        let mut total_points = 0u64;
        for file in &files {
            grid.expand(&file.bounds, file.num_points);
            total_points += file.num_points;
        }
        let grid = Arc::new(grid);
        tracing::info!(
            files = files.len(),
            total_points,
            size_x = grid.size_x(),
            size_y = grid.size_y(),
            "binning run starting"
        );

        let progress = Progress::new(total_points);
        let layout = Arc::new(self.config.layout.clone());
        let cells = CellManager::new(
            layout.point_size(),
            self.config.cell_capacity,
            Arc::clone(&self.writer),
        );

        let jobs: Vec<Box<dyn Job>> = files
            .into_iter()
            .map(|info| {
                Box::new(ScanJob {
                    name: info.path.display().to_string(),
                    processor: FileProcessor::new(
                        info,
                        Arc::clone(&layout),
                        Arc::clone(&grid),
                        cells.clone(),
                        Arc::clone(&self.sources),
                        progress.clone(),
                        self.config.chunk_size,
                    ),
                }) as Box<dyn Job>
            })
            .collect();

        let executor = ParallelExecutor::new(self.config.max_threads);
        let summary = executor.run(jobs, &progress);

        // All workers joined: every lease is gone, drain what's left.
        let cells_finalized = cells.flush_all()?;

        Ok(RunSummary {
            grid_size: (grid.size_x(), grid.size_y()),
            points: progress.snapshot(),
            cells_finalized,
            fragments: cells.flush_count(),
            executor: summary,
        })
    }
}

/// Adapter making one [`FileProcessor`] run an executor job.
struct ScanJob {
    name: String,
    processor: FileProcessor,
}

impl Job for ScanJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>) -> Result<(), JobError> {
        let name = self.name;
        self.processor
            .run()
            .map(|_| ())
            .map_err(|err| JobError::with_source(format!("scan of {} failed", name), err))
    }
}

/// Probes a batch of paths through the factory, skipping files no
/// reader can be inferred for.
///
/// Probe failure is reported (warning) but never aborts the batch; the
/// result simply omits the file.
pub fn probe_files(factory: &Arc<dyn SourceFactory>, paths: &[PathBuf]) -> Vec<FileInfo> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match factory.probe(path) {
            Some(info) => files.push(info),
            None => {
                tracing::warn!(path = %path.display(), "cannot infer a reader, skipping");
            }
        }
    }
    files
}
