//! Per-file sequential scan.
//!
//! A [`FileProcessor`] streams every point of one input file through
//! the speculative-write/relocate protocol of [`crate::cell`]: each
//! record is decoded straight into the cursor slot of the cell touched
//! last by this worker, in the hope that consecutive points share a
//! tile (scan lines usually do). Only when the computed tile differs is
//! the record relocated through a live-set lookup.
//!
//! One thread owns a processor for its entire run. Progress is reported
//! in fixed-size chunks plus one final partial update.

use crate::cell::{AppendError, Appended, CellManager};
use crate::grid::{TileGrid, TileKey};
use crate::progress::Progress;
use crate::schema::PointLayout;
use crate::source::{FileInfo, SourceError, SourceFactory};
use crate::writer::WriterError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Points per progress update when the caller does not override it.
pub const DEFAULT_CHUNK_SIZE: u64 = 100_000;

/// Failure of one file's scan job.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Preparing or executing the point stream failed; carries the
    /// original cause. Aborts this file's job only.
    #[error("fatal error scanning {}: {source}", .path.display())]
    Fatal {
        path: PathBuf,
        #[source]
        source: SourceError,
    },

    /// Persisting a full cell failed mid-scan.
    #[error("tile flush failed: {0}")]
    Flush(#[from] WriterError),
}

/// Per-worker scan state, threaded explicitly through the loop: the
/// current cell lease, the relocation staging buffer, and the chunk
/// counters.
struct WorkerContext {
    lease: crate::cell::CellLease,
    staging: Vec<u8>,
    chunk: u64,
    total: u64,
}

/// Scans one input file and bins every point.
pub struct FileProcessor {
    info: FileInfo,
    layout: Arc<PointLayout>,
    grid: Arc<TileGrid>,
    cells: CellManager,
    sources: Arc<dyn SourceFactory>,
    progress: Progress,
    chunk_size: u64,
}

impl FileProcessor {
    /// Creates a processor for `info`.
    ///
    /// `grid` must be fully expanded before any processor runs.
    pub fn new(
        info: FileInfo,
        layout: Arc<PointLayout>,
        grid: Arc<TileGrid>,
        cells: CellManager,
        sources: Arc<dyn SourceFactory>,
        progress: Progress,
        chunk_size: u64,
    ) -> Self {
        Self {
            info,
            layout,
            grid,
            cells,
            sources,
            progress,
            chunk_size,
        }
    }

    /// The file this processor scans.
    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    /// Streams every point of the file into its tile cell.
    ///
    /// Returns the number of points processed. Stream failures and
    /// flush failures abort this job without touching any other
    /// processor's state.
    pub fn run(&self) -> Result<u64, ScanError> {
        let mut source = self
            .sources
            .open(&self.info, &self.layout)
            .map_err(|source| ScanError::Fatal {
                path: self.info.path.clone(),
                source,
            })?;

        // Seed cell: any cell works as the first speculative target,
        // the first point either matches it or relocates.
        let mut ctx = WorkerContext {
            lease: self.cells.get(TileKey::default(), None)?,
            staging: Vec::with_capacity(self.layout.point_size()),
            chunk: 0,
            total: 0,
        };

        loop {
            let outcome = ctx
                .lease
                .append_with(&mut ctx.staging, |slot| match source.read_point(slot) {
                    Ok(true) => {
                        let (x, y, z) = self.layout.position(slot);
                        Ok(Some(self.grid.key(x, y, z)))
                    }
                    Ok(false) => Ok(None),
                    Err(err) => Err(err),
                })
                .map_err(|err| match err {
                    AppendError::Fill(source) => ScanError::Fatal {
                        path: self.info.path.clone(),
                        source,
                    },
                    AppendError::Flush(err) => ScanError::Flush(err),
                })?;

            match outcome {
                Appended::Exhausted => break,
                Appended::Written => {}
                Appended::Misplaced(key) => {
                    // The record went to the wrong cell; move it. The
                    // old lease stays pinned until the swap below, and
                    // the target is pinned from resolution to store.
                    let next = self.cells.get(key, Some(&ctx.lease))?;
                    next.store(&ctx.staging)?;
                    ctx.lease = next;
                }
            }

            ctx.total += 1;
            ctx.chunk += 1;
            if ctx.chunk == self.chunk_size {
                self.progress.chunk(ctx.chunk);
                ctx.chunk = 0;
            }
        }

        // Report the tail that never filled a whole chunk.
        if ctx.chunk > 0 {
            self.progress.chunk(ctx.chunk);
        }

        if ctx.total != self.info.num_points {
            tracing::warn!(
                path = %self.info.path.display(),
                declared = self.info.num_points,
                observed = ctx.total,
                "point count mismatch"
            );
        }
        tracing::debug!(
            path = %self.info.path.display(),
            points = ctx.total,
            "file scan complete"
        );
        Ok(ctx.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Bounds;
    use crate::source::PointSource;
    use crate::writer::TileWriter;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory source yielding a scripted list of coordinates, with
    /// an optional failure injected at a given index.
    struct ScriptedSource {
        layout: PointLayout,
        points: Vec<(f64, f64, f64)>,
        next: usize,
        fail_at: Option<usize>,
    }

    impl PointSource for ScriptedSource {
        fn read_point(&mut self, record: &mut [u8]) -> Result<bool, SourceError> {
            if self.fail_at == Some(self.next) {
                return Err(SourceError::new("corrupt record"));
            }
            let Some(&(x, y, z)) = self.points.get(self.next) else {
                return Ok(false);
            };
            self.next += 1;
            self.layout.set_position(record, x, y, z);
            Ok(true)
        }
    }

    struct ScriptedFactory {
        files: Mutex<HashMap<PathBuf, (Vec<(f64, f64, f64)>, Option<usize>)>>,
    }

    impl ScriptedFactory {
        fn new() -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
            }
        }

        fn add(&self, path: &str, points: Vec<(f64, f64, f64)>) {
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), (points, None));
        }

        fn add_failing(&self, path: &str, points: Vec<(f64, f64, f64)>, fail_at: usize) {
            self.files
                .lock()
                .unwrap()
                .insert(PathBuf::from(path), (points, Some(fail_at)));
        }
    }

    impl SourceFactory for ScriptedFactory {
        fn open(
            &self,
            info: &FileInfo,
            layout: &PointLayout,
        ) -> Result<Box<dyn PointSource + Send>, SourceError> {
            let files = self.files.lock().unwrap();
            let (points, fail_at) = files
                .get(&info.path)
                .ok_or_else(|| SourceError::new("no such file"))?
                .clone();
            Ok(Box::new(ScriptedSource {
                layout: layout.clone(),
                points,
                next: info.start as usize,
                fail_at,
            }))
        }
    }

    #[derive(Default)]
    struct CapturingWriter {
        tiles: Mutex<HashMap<TileKey, Vec<u8>>>,
    }

    impl CapturingWriter {
        fn records_for(&self, key: TileKey, layout: &PointLayout) -> Vec<(f64, f64, f64)> {
            let tiles = self.tiles.lock().unwrap();
            let Some(bytes) = tiles.get(&key) else {
                return Vec::new();
            };
            bytes
                .chunks_exact(layout.point_size())
                .map(|record| layout.position(record))
                .collect()
        }
    }

    impl TileWriter for CapturingWriter {
        fn write(&self, key: TileKey, data: &[u8]) -> Result<(), WriterError> {
            self.tiles
                .lock()
                .unwrap()
                .entry(key)
                .or_default()
                .extend_from_slice(data);
            Ok(())
        }
    }

    struct Fixture {
        factory: Arc<ScriptedFactory>,
        writer: Arc<CapturingWriter>,
        layout: Arc<PointLayout>,
        grid: Arc<TileGrid>,
        cells: CellManager,
        progress: Progress,
    }

    fn fixture(total_points: u64) -> Fixture {
        let mut grid = TileGrid::new(50.0);
        grid.expand(&Bounds::new([0.0, 0.0, 0.0], [100.0, 100.0, 10.0]), 0);
        let layout = Arc::new(PointLayout::xyz());
        let writer = Arc::new(CapturingWriter::default());
        let cells = CellManager::new(layout.point_size(), 4, writer.clone());
        Fixture {
            factory: Arc::new(ScriptedFactory::new()),
            writer,
            layout,
            grid: Arc::new(grid),
            cells,
            progress: Progress::new(total_points),
        }
    }

    impl Fixture {
        fn processor(&self, path: &str, num_points: u64, chunk_size: u64) -> FileProcessor {
            FileProcessor::new(
                FileInfo::new(path, num_points, Bounds::empty()),
                Arc::clone(&self.layout),
                Arc::clone(&self.grid),
                self.cells.clone(),
                self.factory.clone(),
                self.progress.clone(),
                chunk_size,
            )
        }
    }

    #[test]
    fn test_bins_points_into_their_tiles() {
        let fx = fixture(4);
        fx.factory.add(
            "a.las",
            vec![
                (10.0, 10.0, 0.0),
                (12.0, 11.0, 1.0),
                (99.0, 99.0, 2.0),
                (100.0, 100.0, 3.0),
            ],
        );

        let total = fx.processor("a.las", 4, 100).run().unwrap();
        assert_eq!(total, 4);
        fx.cells.flush_all().unwrap();

        let near = fx.writer.records_for(TileKey::new(0, 0, 0), &fx.layout);
        assert_eq!(near, vec![(10.0, 10.0, 0.0), (12.0, 11.0, 1.0)]);

        // The max-corner point clamps into the last tile.
        let far = fx.writer.records_for(TileKey::new(1, 1, 0), &fx.layout);
        assert_eq!(far, vec![(99.0, 99.0, 2.0), (100.0, 100.0, 3.0)]);
    }

    #[test]
    fn test_relocation_keeps_every_point() {
        let fx = fixture(6);
        // Alternate tiles so every second point relocates.
        fx.factory.add(
            "zigzag.las",
            vec![
                (10.0, 10.0, 0.0),
                (90.0, 90.0, 0.0),
                (11.0, 10.0, 0.0),
                (91.0, 90.0, 0.0),
                (12.0, 10.0, 0.0),
                (92.0, 90.0, 0.0),
            ],
        );

        fx.processor("zigzag.las", 6, 100).run().unwrap();
        fx.cells.flush_all().unwrap();

        let a = fx.writer.records_for(TileKey::new(0, 0, 0), &fx.layout);
        let b = fx.writer.records_for(TileKey::new(1, 1, 0), &fx.layout);
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 3);
        assert!(a.iter().all(|&(x, _, _)| x < 50.0));
        assert!(b.iter().all(|&(x, _, _)| x >= 50.0));
    }

    #[test]
    fn test_progress_chunks_sum_to_total() {
        let fx = fixture(7);
        fx.factory.add(
            "chunky.las",
            (0..7).map(|i| (i as f64, 1.0, 0.0)).collect(),
        );

        fx.processor("chunky.las", 7, 3).run().unwrap();

        let snap = fx.progress.snapshot();
        assert_eq!(snap.points_done, 7);
        // 3 + 3 + final partial 1
        assert_eq!(snap.chunks_done, 3);
    }

    #[test]
    fn test_source_failure_is_fatal_with_cause() {
        let fx = fixture(5);
        fx.factory
            .add_failing("bad.las", vec![(1.0, 1.0, 0.0); 5], 2);

        let err = fx.processor("bad.las", 5, 100).run().unwrap_err();
        match err {
            ScanError::Fatal { path, source } => {
                assert_eq!(path, PathBuf::from("bad.las"));
                assert!(source.to_string().contains("corrupt record"));
            }
            other => panic!("expected fatal error, got {other:?}"),
        }

        // The two points before the failure are still accounted for in
        // live cells, not lost silently.
        fx.cells.flush_all().unwrap();
        let kept = fx.writer.records_for(TileKey::new(0, 0, 0), &fx.layout);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_open_failure_is_fatal() {
        let fx = fixture(1);
        let err = fx.processor("missing.las", 1, 100).run().unwrap_err();
        assert!(matches!(err, ScanError::Fatal { .. }));
    }

    #[test]
    fn test_start_offset_skips_leading_points() {
        let fx = fixture(2);
        fx.factory.add(
            "sliced.las",
            vec![
                (1.0, 1.0, 0.0),
                (2.0, 2.0, 0.0),
                (3.0, 3.0, 0.0),
                (4.0, 4.0, 0.0),
            ],
        );

        let processor = FileProcessor::new(
            FileInfo::new("sliced.las", 2, Bounds::empty()).with_start(2),
            Arc::clone(&fx.layout),
            Arc::clone(&fx.grid),
            fx.cells.clone(),
            fx.factory.clone(),
            fx.progress.clone(),
            100,
        );
        assert_eq!(processor.run().unwrap(), 2);

        fx.cells.flush_all().unwrap();
        let records = fx.writer.records_for(TileKey::new(0, 0, 0), &fx.layout);
        assert_eq!(records, vec![(3.0, 3.0, 0.0), (4.0, 4.0, 0.0)]);
    }
}
