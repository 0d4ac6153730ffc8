//! Engine configuration.
//!
//! Plain data with builder-style setters; [`EngineConfig::validate`]
//! runs once before a pipeline starts.

use crate::scan::DEFAULT_CHUNK_SIZE;
use crate::schema::PointLayout;
use thiserror::Error;

/// Points buffered per tile cell before a flush, when not overridden.
pub const DEFAULT_CELL_CAPACITY: usize = 40_960;

/// Fallback worker count when CPU detection fails.
pub const FALLBACK_CPU_COUNT: usize = 8;

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Tile side length must be positive and finite
    #[error("invalid tile length: {0}")]
    InvalidTileLength(f64),

    /// Progress chunk size must be non-zero
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,

    /// Cell capacity must be non-zero
    #[error("cell capacity must be non-zero")]
    ZeroCellCapacity,
}

/// Settings for one binning run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Tile side length in the dataset's coordinate units
    pub tile_length: f64,
    /// Maximum worker threads (default: available parallelism)
    pub max_threads: usize,
    /// Points per progress update
    pub chunk_size: u64,
    /// Points buffered per tile before a flush
    pub cell_capacity: usize,
    /// Target record layout shared by every file of the run
    pub layout: PointLayout,
}

impl EngineConfig {
    /// Creates a configuration with defaults for everything but the
    /// tile length and layout.
    pub fn new(tile_length: f64, layout: PointLayout) -> Self {
        Self {
            tile_length,
            max_threads: default_thread_count(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            cell_capacity: DEFAULT_CELL_CAPACITY,
            layout,
        }
    }

    /// Sets the worker thread cap.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Sets the points-per-progress-update chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the per-tile buffer capacity in points.
    pub fn with_cell_capacity(mut self, cell_capacity: usize) -> Self {
        self.cell_capacity = cell_capacity;
        self
    }

    /// Checks the settings for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tile_length.is_finite() || self.tile_length <= 0.0 {
            return Err(ConfigError::InvalidTileLength(self.tile_length));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.cell_capacity == 0 {
            return Err(ConfigError::ZeroCellCapacity);
        }
        Ok(())
    }
}

/// Worker count matching the machine, with a floor for odd platforms.
pub fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_CPU_COUNT)
}
