//! PointGrid - Out-of-core spatial tile binning for massive point clouds
//!
//! This library partitions very large collections of 3D point records,
//! spread across many input files, into a flat spatial tile grid. Each
//! tile's points are written out as a self-contained unit while memory
//! stays bounded: points arrive in file order, are buffered per tile in
//! fixed-capacity cells, and full cells are flushed to a [`writer::TileWriter`]
//! as the scan progresses.
//!
//! # High-Level API
//!
//! For most use cases, the [`pipeline`] module drives a whole run:
//!
//! ```ignore
//! use pointgrid::config::EngineConfig;
//! use pointgrid::pipeline::BinningPipeline;
//! use pointgrid::schema::PointLayout;
//! use pointgrid::writer::DirectoryWriter;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::new(50.0, PointLayout::xyz()).with_max_threads(8);
//! let writer = Arc::new(DirectoryWriter::new("tiles")?);
//! let pipeline = BinningPipeline::new(config, sources, writer)?;
//!
//! let files = pointgrid::pipeline::probe_files(pipeline.sources(), &paths);
//! let summary = pipeline.run(files)?;
//! println!("{} points in {:?}", summary.points.points_done, summary.elapsed());
//! ```

pub mod cell;
pub mod config;
pub mod executor;
pub mod grid;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod scan;
pub mod schema;
pub mod source;
pub mod writer;

/// Version of the PointGrid library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
