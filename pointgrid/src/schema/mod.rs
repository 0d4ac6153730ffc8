//! Point-record layout.
//!
//! Every input file of a run decodes into the same fixed-layout byte
//! record: a list of named dimensions, each with a scalar type and a
//! byte offset. The binning engine itself never interprets field
//! contents beyond reading the X/Y/Z coordinates to compute a tile key,
//! so [`PointLayout`] validates exactly that much up front: X, Y and Z
//! exist, are `f64`, and fit inside the record.

use thiserror::Error;

/// Scalar type of one record dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    /// Size of the scalar in bytes.
    pub fn size(&self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }
}

/// One named dimension of the point record.
#[derive(Debug, Clone, PartialEq)]
pub struct DimInfo {
    /// Dimension name (e.g. "X", "Intensity")
    pub name: String,
    /// Scalar type stored at `offset`
    pub scalar: ScalarType,
    /// Byte offset within the record
    pub offset: usize,
}

impl DimInfo {
    /// Creates a dimension descriptor.
    pub fn new(name: impl Into<String>, scalar: ScalarType, offset: usize) -> Self {
        Self {
            name: name.into(),
            scalar,
            offset,
        }
    }
}

/// Layout validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    /// The layout has no dimensions at all
    #[error("point layout has no dimensions")]
    Empty,

    /// A coordinate dimension is missing
    #[error("point layout is missing required dimension '{0}'")]
    MissingDimension(&'static str),

    /// A coordinate dimension has the wrong scalar type
    #[error("dimension '{name}' must be F64, found {found:?}")]
    WrongScalarType { name: String, found: ScalarType },

    /// Two dimensions share one name
    #[error("duplicate dimension '{0}'")]
    DuplicateDimension(String),
}

/// Validated record layout shared by all files of one run.
#[derive(Debug, Clone)]
pub struct PointLayout {
    dims: Vec<DimInfo>,
    point_size: usize,
    x_offset: usize,
    y_offset: usize,
    z_offset: usize,
}

impl PointLayout {
    /// Builds and validates a layout from its dimension list.
    ///
    /// The record size is the end of the furthest dimension. X, Y and Z
    /// must be present as `f64` dimensions.
    pub fn new(dims: Vec<DimInfo>) -> Result<Self, LayoutError> {
        if dims.is_empty() {
            return Err(LayoutError::Empty);
        }
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].iter().any(|d| d.name == dim.name) {
                return Err(LayoutError::DuplicateDimension(dim.name.clone()));
            }
        }

        let point_size = dims
            .iter()
            .map(|d| d.offset + d.scalar.size())
            .max()
            .unwrap_or(0);

        let coord = |name: &'static str| -> Result<usize, LayoutError> {
            let dim = dims
                .iter()
                .find(|d| d.name == name)
                .ok_or(LayoutError::MissingDimension(name))?;
            if dim.scalar != ScalarType::F64 {
                return Err(LayoutError::WrongScalarType {
                    name: dim.name.clone(),
                    found: dim.scalar,
                });
            }
            Ok(dim.offset)
        };

        let x_offset = coord("X")?;
        let y_offset = coord("Y")?;
        let z_offset = coord("Z")?;

        Ok(Self {
            dims,
            point_size,
            x_offset,
            y_offset,
            z_offset,
        })
    }

    /// The minimal coordinate-only layout: X, Y, Z as `f64` at offsets
    /// 0, 8 and 16, 24 bytes per record.
    pub fn xyz() -> Self {
        Self::new(vec![
            DimInfo::new("X", ScalarType::F64, 0),
            DimInfo::new("Y", ScalarType::F64, 8),
            DimInfo::new("Z", ScalarType::F64, 16),
        ])
        .expect("coordinate-only layout is always valid")
    }

    /// Record size in bytes.
    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// The dimension list.
    pub fn dims(&self) -> &[DimInfo] {
        &self.dims
    }

    /// Reads the X/Y/Z coordinates out of one record.
    ///
    /// `record` must be exactly [`point_size`](Self::point_size) bytes,
    /// little-endian field encoding.
    pub fn position(&self, record: &[u8]) -> (f64, f64, f64) {
        debug_assert_eq!(record.len(), self.point_size);
        (
            read_f64(record, self.x_offset),
            read_f64(record, self.y_offset),
            read_f64(record, self.z_offset),
        )
    }

    /// Writes X/Y/Z coordinates into one record.
    ///
    /// Counterpart of [`position`](Self::position); used by point
    /// sources that decode into the target layout.
    pub fn set_position(&self, record: &mut [u8], x: f64, y: f64, z: f64) {
        debug_assert_eq!(record.len(), self.point_size);
        write_f64(record, self.x_offset, x);
        write_f64(record, self.y_offset, y);
        write_f64(record, self.z_offset, z);
    }
}

fn read_f64(record: &[u8], offset: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&record[offset..offset + 8]);
    f64::from_le_bytes(bytes)
}

fn write_f64(record: &mut [u8], offset: usize, value: f64) {
    record[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
