//! Directory-backed tile writer.

use super::{TileWriter, WriterError};
use crate::grid::TileKey;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes tile fragments as files under one output directory.
///
/// Each tile maps to a single `x_y_z.bin` file; successive flushes of
/// the same tile append, so a tile's output stays one contiguous
/// artifact no matter how many fragments it took.
pub struct DirectoryWriter {
    dir: PathBuf,
}

impl DirectoryWriter {
    /// Creates the writer, creating the output directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, WriterError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The output file for one tile.
    pub fn tile_path(&self, key: TileKey) -> PathBuf {
        self.dir.join(format!("{}_{}_{}.bin", key.x, key.y, key.z))
    }
}

impl TileWriter for DirectoryWriter {
    fn write(&self, key: TileKey, data: &[u8]) -> Result<(), WriterError> {
        let path = self.tile_path(key);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(data)?;
        tracing::trace!(tile = %key, bytes = data.len(), "tile fragment written");
        Ok(())
    }
}
