//! Loading the input batch and the filter, with the shape rules applied.
//!
//! - Data files must declare exactly three dimensions, `b m n`.
//! - Filter files declare either `k` or `k k`. The one-entry form still
//!   means a `k × k` filter, and its body must supply `k²` values. The
//!   two-entry form must be square.

use std::path::Path;

use log::debug;
use stencil_core::{Dims, Filter, GlobalBatch};

use crate::body::read_body;
use crate::header::{count_dims, open_reader, parse_dims, read_header_line};
use crate::{FileError, DEFAULT_MAX_HEADER_BYTES};

/// Reader settings for the plain-text tensor format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextFormat {
    /// Longest header line accepted, excluding the newline.
    pub max_header_bytes: usize,
}

impl Default for TextFormat {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl TextFormat {
    pub fn with_max_header_bytes(max_header_bytes: usize) -> Self {
        Self { max_header_bytes }
    }

    fn header(&self, path: &Path) -> Result<String, FileError> {
        let mut reader = open_reader(path)?;
        read_header_line(&mut reader, path, self.max_header_bytes)
    }

    /// Number of dimensions declared by the header of `path`.
    pub fn dimension_count(&self, path: &Path) -> Result<usize, FileError> {
        count_dims(path, &self.header(path)?)
    }

    /// The dimension sizes declared by `path`, which must number `count`.
    pub fn read_dimensions(&self, path: &Path, count: usize) -> Result<Vec<usize>, FileError> {
        let dims = parse_dims(path, &self.header(path)?)?;
        if dims.len() != count {
            return Err(FileError::format(
                path,
                format!("expected {} dimensions, header declares {}", count, dims.len()),
            ));
        }
        Ok(dims)
    }

    /// The `product(dims)` values of `path`, skipping the header line.
    pub fn read_flat_array(&self, path: &Path, dims: &[usize]) -> Result<Vec<f32>, FileError> {
        let mut reader = open_reader(path)?;
        read_header_line(&mut reader, path, self.max_header_bytes)?;
        read_body(&mut reader, path, dims)
    }

    /// Load a `b × m × n` input batch.
    pub fn load_batch(&self, path: &Path) -> Result<GlobalBatch, FileError> {
        let count = self.dimension_count(path)?;
        if count != 3 {
            return Err(FileError::format(
                path,
                format!("input must have 3 dimensions (b m n), header declares {}", count),
            ));
        }
        let dims = self.read_dimensions(path, count)?;
        let values = self.read_flat_array(path, &dims)?;
        let dims = Dims::new(dims[0], dims[1], dims[2]);
        debug!("Loaded input {} from {}", dims, path.display());
        GlobalBatch::new(dims, values).map_err(|e| FileError::format(path, e.to_string()))
    }

    /// Load a square `k × k` filter.
    pub fn load_filter(&self, path: &Path) -> Result<Filter, FileError> {
        let count = self.dimension_count(path)?;
        if count != 1 && count != 2 {
            return Err(FileError::format(
                path,
                format!("filter header must hold 1 or 2 dimensions (k or k k), found {}", count),
            ));
        }
        let dims = self.read_dimensions(path, count)?;
        let k = dims[0];
        if dims.iter().any(|&d| d != k) {
            return Err(FileError::DimensionMismatch {
                path: path.to_path_buf(),
                dims,
            });
        }
        let values = self.read_flat_array(path, &[k, k])?;
        debug!("Loaded {}x{} filter from {}", k, k, path.display());
        Filter::new(k, values).map_err(|e| FileError::format(path, e.to_string()))
    }
}

/// Load a `b × m × n` input batch with the default settings.
pub fn load_batch(path: &Path) -> Result<GlobalBatch, FileError> {
    TextFormat::default().load_batch(path)
}

/// Load a square filter with the default settings.
pub fn load_filter(path: &Path) -> Result<Filter, FileError> {
    TextFormat::default().load_filter(path)
}
