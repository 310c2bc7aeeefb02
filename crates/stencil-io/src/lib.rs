//! # Stencil I/O
//!
//! Plain-text tensor files for the stencil pipeline. A file is a header line
//! of space-separated dimension sizes followed by whitespace-separated
//! floating-point values in row-major order:
//!
//! ```text
//! 2 3 3
//! 0.5 1.0 1.5 ...
//! ```
//!
//! - **Header** ([`header`]): Dimension counting and parsing, with a bounded line read.
//! - **Body** ([`body`]): The flat value array that follows the header.
//! - **Writer** ([`writer`]): Output files (`"b m n "` header, values to 7 decimals).
//! - **Loader** ([`loader`]): Input batch and filter loading with the shape rules applied.

pub mod body;
pub mod header;
pub mod loader;
pub mod writer;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use body::read_flat_array;
pub use header::{dimension_count, read_dimensions, DEFAULT_MAX_HEADER_BYTES};
pub use loader::{load_batch, load_filter, TextFormat};
pub use writer::write_output;

/// Errors while reading or writing tensor files.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Unable to open file {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed file {path}: {message}")]
    FileFormat { path: PathBuf, message: String },

    #[error("Filter {path} must be square (k k), header declares {dims:?}")]
    DimensionMismatch { path: PathBuf, dims: Vec<usize> },

    #[error("Cannot allocate {elements} values for {path}")]
    Allocation { path: PathBuf, elements: usize },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    pub(crate) fn format(path: &Path, message: impl Into<String>) -> Self {
        Self::FileFormat {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn open(path: &Path, source: std::io::Error) -> Self {
        Self::FileOpen {
            path: path.to_path_buf(),
            source,
        }
    }

    /// The file the error refers to.
    pub fn path(&self) -> &Path {
        match self {
            Self::FileOpen { path, .. }
            | Self::FileFormat { path, .. }
            | Self::DimensionMismatch { path, .. }
            | Self::Allocation { path, .. }
            | Self::Write { path, .. } => path,
        }
    }
}
