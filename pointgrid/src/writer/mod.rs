//! Tile persistence.
//!
//! The binning engine hands full cell buffers to a [`TileWriter`] and
//! never looks at them again. Writers must be append-capable: one tile
//! may be flushed several times over a run (one fragment per flush) and
//! the fragments together form that tile's output. Flush order across
//! tiles and files is unconstrained.
//!
//! [`DirectoryWriter`] is the shipped implementation, appending each
//! tile's fragments to a single `x_y_z.bin` file under an output
//! directory.

mod disk;

pub use disk::DirectoryWriter;

use crate::grid::TileKey;
use thiserror::Error;

/// Errors raised while persisting a tile buffer.
#[derive(Debug, Error)]
pub enum WriterError {
    /// I/O failure writing a tile artifact
    #[error("tile write I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store rejected the buffer
    #[error("tile write rejected: {0}")]
    Rejected(String),
}

/// Persists flushed tile buffers.
///
/// `data` holds a whole number of point records in the run's target
/// layout. Implementations may be called concurrently from any worker
/// thread.
pub trait TileWriter: Send + Sync {
    /// Durably appends `data` as the next fragment of tile `key`.
    fn write(&self, key: TileKey, data: &[u8]) -> Result<(), WriterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err = WriterError::from(std::io::Error::other("disk gone"));
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_rejected_display() {
        let err = WriterError::Rejected("bucket closed".to_string());
        assert_eq!(err.to_string(), "tile write rejected: bucket closed");
    }
}
