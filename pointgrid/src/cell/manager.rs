//! Shared live-cell set and the lease-based binning protocol.

use super::Cell;
use crate::grid::TileKey;
use crate::writer::{TileWriter, WriterError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Outcome of one speculative append through a [`CellLease`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// The record landed in the leased cell.
    Written,
    /// The record belongs to the tile with this key; its bytes were
    /// staged for relocation and the leased cell's cursor did not move.
    Misplaced(TileKey),
    /// The fill callback reported end of input; nothing was written.
    Exhausted,
}

/// Failure of one speculative append.
#[derive(Debug, Error)]
pub enum AppendError<E> {
    /// The fill callback failed
    #[error("record fill failed: {0}")]
    Fill(E),

    /// Flushing the full cell to make room failed
    #[error("cell flush failed: {0}")]
    Flush(#[from] WriterError),
}

struct Slot {
    cell: Arc<Mutex<Cell>>,
    /// Outstanding leases. A pinned cell is never selected for flush.
    pins: u32,
}

struct Shared {
    point_size: usize,
    cell_capacity: usize,
    writer: Arc<dyn TileWriter>,
    live: Mutex<HashMap<TileKey, Slot>>,
    flushes: AtomicU64,
}

impl Shared {
    fn persist(&self, key: TileKey, data: &[u8]) -> Result<(), WriterError> {
        self.writer.write(key, data)?;
        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tile = %key, bytes = data.len(), "cell flushed");
        Ok(())
    }

    /// Flushes a cell the caller already holds locked, leaving it empty
    /// for reuse. No-op on an empty cell.
    fn flush_locked(&self, cell: &mut Cell) -> Result<(), WriterError> {
        let key = cell.key();
        let data = cell.take();
        if data.is_empty() {
            return Ok(());
        }
        self.persist(key, &data)
    }
}

/// Owns the full set of live cells, shared across all worker threads.
///
/// Cells are created lazily on first reference and flushed to the
/// [`TileWriter`] when full: by the next append that finds them full,
/// by any thread's [`get`](Self::get) sweeping full unleased cells out
/// of the live set, or by [`flush_all`](Self::flush_all) at end of run.
/// All live-set mutations and the flush decision are serialized behind
/// one lock; writer I/O for swept cells happens after that lock is
/// released.
#[derive(Clone)]
pub struct CellManager {
    shared: Arc<Shared>,
}

impl CellManager {
    /// Creates a manager for records of `point_size` bytes, buffering
    /// up to `cell_capacity` records per tile before flushing to
    /// `writer`.
    pub fn new(point_size: usize, cell_capacity: usize, writer: Arc<dyn TileWriter>) -> Self {
        Self {
            shared: Arc::new(Shared {
                point_size,
                cell_capacity,
                writer,
                live: Mutex::new(HashMap::new()),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    /// Resolves the cell for `key`, creating it on first reference, and
    /// returns a lease pinning it.
    ///
    /// While resolving, full cells with no outstanding lease are swept
    /// out of the live set and handed to the writer. `excluding` names
    /// the caller's currently-in-use cell; it is never the one selected
    /// for flush during this call (a leased cell never is), so its
    /// buffer stays valid for a pending relocation copy. The returned
    /// cell is pinned before the live-set lock is released, making
    /// resolve-and-store atomic with respect to flush.
    pub fn get(
        &self,
        key: TileKey,
        excluding: Option<&CellLease>,
    ) -> Result<CellLease, WriterError> {
        let mut swept: Vec<(TileKey, Vec<u8>)> = Vec::new();
        let lease = {
            let mut live = self.shared.live.lock().unwrap();
            let slot = live.entry(key).or_insert_with(|| Slot {
                cell: Arc::new(Mutex::new(Cell::new(
                    key,
                    self.shared.point_size,
                    self.shared.cell_capacity,
                ))),
                pins: 0,
            });
            slot.pins += 1;
            let lease = CellLease {
                shared: Arc::clone(&self.shared),
                key,
                cell: Arc::clone(&slot.cell),
            };

            let excluded = excluding.map(|l| l.key);
            let full: Vec<TileKey> = live
                .iter()
                .filter(|(k, slot)| {
                    slot.pins == 0
                        && Some(**k) != excluded
                        && slot.cell.lock().unwrap().is_full()
                })
                .map(|(k, _)| *k)
                .collect();
            for k in full {
                if let Some(slot) = live.remove(&k) {
                    swept.push((k, slot.cell.lock().unwrap().take()));
                }
            }
            lease
        };

        for (k, data) in swept {
            self.shared.persist(k, &data)?;
        }
        Ok(lease)
    }

    /// Flushes every unleased cell and removes it from the live set.
    ///
    /// Call after all workers have finished (leases dropped); cells
    /// still leased are left alone. Returns the number of non-empty
    /// cells persisted.
    pub fn flush_all(&self) -> Result<usize, WriterError> {
        let mut drained: Vec<(TileKey, Vec<u8>)> = Vec::new();
        {
            let mut live = self.shared.live.lock().unwrap();
            let keys: Vec<TileKey> = live
                .iter()
                .filter(|(_, slot)| slot.pins == 0)
                .map(|(k, _)| *k)
                .collect();
            for k in keys {
                if let Some(slot) = live.remove(&k) {
                    let data = slot.cell.lock().unwrap().take();
                    if !data.is_empty() {
                        drained.push((k, data));
                    }
                }
            }
        }

        let count = drained.len();
        for (k, data) in drained {
            self.shared.persist(k, &data)?;
        }
        tracing::debug!(cells = count, "final cell flush");
        Ok(count)
    }

    /// Number of cells currently live.
    pub fn live_cells(&self) -> usize {
        self.shared.live.lock().unwrap().len()
    }

    /// Number of buffers handed to the writer so far.
    pub fn flush_count(&self) -> u64 {
        self.shared.flushes.load(Ordering::Relaxed)
    }

    /// Record size this manager was built for.
    pub fn point_size(&self) -> usize {
        self.shared.point_size
    }
}

impl std::fmt::Debug for CellManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellManager")
            .field("point_size", &self.shared.point_size)
            .field("cell_capacity", &self.shared.cell_capacity)
            .field("live_cells", &self.live_cells())
            .field("flushes", &self.flush_count())
            .finish()
    }
}

/// A worker's handle on one live cell, the explicit form of the
/// "last cell touched by this thread" state.
///
/// Holding a lease pins the cell: it cannot be flushed or reclaimed by
/// any other thread. The pin is released when the lease drops, on every
/// exit path.
pub struct CellLease {
    shared: Arc<Shared>,
    key: TileKey,
    cell: Arc<Mutex<Cell>>,
}

impl CellLease {
    /// The tile this lease's cell buffers.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Records currently buffered in the leased cell.
    pub fn count(&self) -> usize {
        self.cell.lock().unwrap().count()
    }

    /// One speculative append.
    ///
    /// `fill` decodes the next record directly into the cell's cursor
    /// slot and returns the tile key computed from the written bytes,
    /// or `None` at end of input. If the key matches this lease's tile
    /// the cursor advances ([`Appended::Written`]). Otherwise the
    /// written bytes are copied into `staging` under the same cell
    /// lock, so no concurrent append or flush can touch them first,
    /// and [`Appended::Misplaced`] reports where they belong.
    ///
    /// A full cell is flushed before `fill` runs, so there is always
    /// room for one record.
    pub fn append_with<E>(
        &self,
        staging: &mut Vec<u8>,
        fill: impl FnOnce(&mut [u8]) -> Result<Option<TileKey>, E>,
    ) -> Result<Appended, AppendError<E>> {
        let mut cell = self.cell.lock().unwrap();
        if cell.is_full() {
            self.shared.flush_locked(&mut cell)?;
        }

        let key = match fill(cell.point()).map_err(AppendError::Fill)? {
            Some(key) => key,
            None => return Ok(Appended::Exhausted),
        };

        if key == self.key {
            cell.advance();
            Ok(Appended::Written)
        } else {
            staging.clear();
            staging.extend_from_slice(cell.point());
            Ok(Appended::Misplaced(key))
        }
    }

    /// Stores one staged record into the leased cell (relocation
    /// target). Flushes first if the cell is full.
    pub fn store(&self, record: &[u8]) -> Result<(), WriterError> {
        let mut cell = self.cell.lock().unwrap();
        if cell.is_full() {
            self.shared.flush_locked(&mut cell)?;
        }
        cell.copy_point(record);
        cell.advance();
        Ok(())
    }
}

impl Drop for CellLease {
    fn drop(&mut self) {
        let mut live = self.shared.live.lock().unwrap();
        if let Some(slot) = live.get_mut(&self.key) {
            slot.pins = slot.pins.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for CellLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellLease").field("key", &self.key).finish()
    }
}
