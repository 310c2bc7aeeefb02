//! Core types shared across the stencil pipeline.
//!
//! Buffers are stored flat in row-major order and exposed through borrowed
//! [`ndarray`] views. Owners never hand out the storage itself, so the
//! views cannot outlive it and every index is bounds-checked.

use ndarray::{ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a flat buffer does not match its declared shape.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("Dimension '{name}' must be at least 1")]
    ZeroDimension { name: &'static str },

    #[error("Buffer holds {actual} values but shape {shape:?} needs {expected}")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Shape {0:?} overflows the addressable element count")]
    Overflow(Vec<usize>),

    #[error("Invalid strided view: {0}")]
    View(#[from] ndarray::ShapeError),
}

/// Product of a list of dimension sizes.
///
/// Returns `None` if the product overflows `usize`. The empty product is 1.
pub fn product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Shape of a batch of matrices: `batch × rows × cols`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dims {
    /// Number of independent matrices.
    pub batch: usize,
    /// Rows per matrix (`m`).
    pub rows: usize,
    /// Columns per matrix (`n`).
    pub cols: usize,
}

impl Dims {
    pub fn new(batch: usize, rows: usize, cols: usize) -> Self {
        Self { batch, rows, cols }
    }

    /// Elements in a single matrix (`m·n`).
    pub fn plane_len(&self) -> Option<usize> {
        self.rows.checked_mul(self.cols)
    }

    /// Total number of elements (`b·m·n`).
    pub fn element_count(&self) -> Option<usize> {
        product(&self.as_array())
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.batch, self.rows, self.cols]
    }

    /// Same spatial shape with a different batch count.
    pub fn with_batch(&self, batch: usize) -> Self {
        Self { batch, ..*self }
    }

    fn check_nonzero(&self) -> Result<(), ShapeError> {
        for (name, value) in [("b", self.batch), ("m", self.rows), ("n", self.cols)] {
            if value == 0 {
                return Err(ShapeError::ZeroDimension { name });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Dims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.batch, self.rows, self.cols)
    }
}

/// A square `k × k` filter, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    size: usize,
    weights: Vec<f32>,
}

impl Filter {
    /// Wrap `weights` as a `size × size` filter.
    pub fn new(size: usize, weights: Vec<f32>) -> Result<Self, ShapeError> {
        if size == 0 {
            return Err(ShapeError::ZeroDimension { name: "k" });
        }
        let expected = size
            .checked_mul(size)
            .ok_or_else(|| ShapeError::Overflow(vec![size, size]))?;
        if weights.len() != expected {
            return Err(ShapeError::LengthMismatch {
                shape: vec![size, size],
                expected,
                actual: weights.len(),
            });
        }
        Ok(Self { size, weights })
    }

    /// Filter with a single 1 at `(size/2, size/2)` and zeros elsewhere.
    pub fn identity(size: usize) -> Result<Self, ShapeError> {
        let len = size
            .checked_mul(size)
            .ok_or_else(|| ShapeError::Overflow(vec![size, size]))?;
        let mut weights = vec![0.0; len];
        if size > 0 {
            let centre = size / 2;
            weights[centre * size + centre] = 1.0;
        }
        Self::new(size, weights)
    }

    /// Side length `k`.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }

    /// Borrowed `k × k` view of the weights.
    pub fn view(&self) -> Result<ArrayView2<'_, f32>, ShapeError> {
        Ok(ArrayView2::from_shape((self.size, self.size), &self.weights)?)
    }
}

/// The full input batch, owned by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalBatch {
    dims: Dims,
    data: Vec<f32>,
}

impl GlobalBatch {
    /// Wrap a flat buffer. Every dimension must be at least 1 and the buffer
    /// length must equal `b·m·n`.
    pub fn new(dims: Dims, data: Vec<f32>) -> Result<Self, ShapeError> {
        dims.check_nonzero()?;
        let expected = dims
            .element_count()
            .ok_or_else(|| ShapeError::Overflow(dims.as_array().to_vec()))?;
        if data.len() != expected {
            return Err(ShapeError::LengthMismatch {
                shape: dims.as_array().to_vec(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Borrowed `b × m × n` view.
    pub fn view(&self) -> Result<ArrayView3<'_, f32>, ShapeError> {
        batch_view(self.dims, &self.data)
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// Borrow a flat row-major slice as a `dims`-shaped 3-D view.
pub fn batch_view(dims: Dims, data: &[f32]) -> Result<ArrayView3<'_, f32>, ShapeError> {
    Ok(ArrayView3::from_shape(
        (dims.batch, dims.rows, dims.cols),
        data,
    )?)
}
