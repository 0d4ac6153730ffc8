//! Point stream collaborators.
//!
//! Format decoding lives outside the binning engine. The engine
//! consumes a [`PointSource`]: a sequential, non-restartable feed that
//! decodes one record at a time straight into the caller's buffer in
//! the run's target layout, obtained from a [`SourceFactory`] per
//! input file. Decode failures surface as one opaque [`SourceError`];
//! the engine wraps them as fatal for the owning file's job and never
//! retries.

use crate::grid::Bounds;
use crate::schema::PointLayout;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Opaque failure from a point stream or its factory.
///
/// Decoders collapse their internal error taxonomy into this single
/// kind; the original cause is preserved as the source chain.
#[derive(Debug, Error)]
#[error("point stream error: {message}")]
pub struct SourceError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SourceError {
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

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source("I/O failure in point stream", err)
    }
}

/// One input file's metadata, as discovered by the upstream pre-scan.
///
/// `bounds` and `num_points` seed [`crate::grid::TileGrid::expand`]
/// before any binning starts; `start` supports formats that allow
/// partial reads.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path of the input file
    pub path: PathBuf,
    /// Declared number of points in this file (or slice of it)
    pub num_points: u64,
    /// Index of the first point to read, for partial reads
    pub start: u64,
    /// Pre-scanned 3D extent of the file's points
    pub bounds: Bounds,
}

impl FileInfo {
    /// Describes a whole file.
    pub fn new(path: impl Into<PathBuf>, num_points: u64, bounds: Bounds) -> Self {
        Self {
            path: path.into(),
            num_points,
            start: 0,
            bounds,
        }
    }

    /// Sets the first point index for a partial read.
    pub fn with_start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }
}

/// Sequential feed of point records.
///
/// Not restartable; one pass per instance.
pub trait PointSource {
    /// Decodes the next point into `record` (exactly one record in the
    /// target layout).
    ///
    /// Returns `Ok(false)` at end of stream, in which case `record`
    /// contents are unspecified.
    fn read_point(&mut self, record: &mut [u8]) -> Result<bool, SourceError>;
}

/// Opens point streams and infers how to read files.
pub trait SourceFactory: Send + Sync {
    /// Opens a one-pass stream over `info`, decoding into `layout`.
    fn open(
        &self,
        info: &FileInfo,
        layout: &PointLayout,
    ) -> Result<Box<dyn PointSource + Send>, SourceError>;

    /// Probes a path: determines how to read it and returns its
    /// metadata, or `None` when no reader can be inferred.
    ///
    /// Probe failure is not an error; callers skip or report the file
    /// without aborting siblings.
    fn probe(&self, _path: &Path) -> Option<FileInfo> {
        None
    }
}
