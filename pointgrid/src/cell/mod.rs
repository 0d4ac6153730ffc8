//! Per-tile write buffers and their shared lifecycle.
//!
//! A [`Cell`] is one tile's in-memory buffer: a fixed number of record
//! slots and a write cursor. The [`CellManager`] owns every live cell,
//! shared across all worker threads, and enforces the binning protocol:
//!
//! 1. Each worker keeps a [`CellLease`] on the cell it touched last and
//!    decodes the next record straight into that cell's cursor slot,
//!    betting it is the right tile (points cluster in short spatial
//!    runs, so the bet usually pays and the map lookup is skipped).
//! 2. When the bet fails, the record is staged out and stored into the
//!    correct cell, resolved through [`CellManager::get`].
//! 3. A cell whose buffer fills is flushed to the [`TileWriter`] and
//!    its slot reused. A cell with an outstanding lease is never
//!    flushed out from under its holder.
//!
//! Lock order is live-set before cell, everywhere; writer I/O happens
//! outside the live-set critical section.

mod manager;

pub use manager::{AppendError, Appended, CellLease, CellManager};

use crate::grid::TileKey;

/// One tile's write buffer: record slots plus a cursor.
///
/// Owned by the [`CellManager`]; workers only ever reach a cell through
/// a [`CellLease`].
#[derive(Debug)]
pub struct Cell {
    key: TileKey,
    buf: Vec<u8>,
    cursor: usize,
    point_size: usize,
}

impl Cell {
    pub(crate) fn new(key: TileKey, point_size: usize, capacity_points: usize) -> Self {
        Self {
            key,
            buf: vec![0u8; point_size * capacity_points],
            cursor: 0,
            point_size,
        }
    }

    /// The tile this cell buffers. Immutable for the cell's lifetime.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Writable view of the record slot at the cursor.
    pub fn point(&mut self) -> &mut [u8] {
        &mut self.buf[self.cursor..self.cursor + self.point_size]
    }

    /// Moves the cursor past the record at it.
    ///
    /// The caller must have fully written the record first. There is no
    /// bounds check here; the manager flushes before a full cell is
    /// written into again.
    pub fn advance(&mut self) {
        self.cursor += self.point_size;
    }

    /// Copies one record's bytes to the cursor without advancing.
    ///
    /// `src` must be exactly one record long. Used to relocate a point
    /// that was speculatively written into the wrong cell.
    pub fn copy_point(&mut self, src: &[u8]) {
        self.buf[self.cursor..self.cursor + self.point_size].copy_from_slice(src);
    }

    /// Number of records written so far.
    pub fn count(&self) -> usize {
        self.cursor / self.point_size
    }

    /// True when no further record fits.
    pub fn is_full(&self) -> bool {
        self.cursor == self.buf.len()
    }

    /// The written prefix of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.cursor]
    }

    /// Takes the written records out, leaving an empty buffer of the
    /// same capacity behind.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        let capacity = self.buf.len();
        let mut data = std::mem::replace(&mut self.buf, vec![0u8; capacity]);
        data.truncate(self.cursor);
        self.cursor = 0;
        data
    }
}
