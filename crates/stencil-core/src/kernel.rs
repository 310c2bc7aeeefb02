//! Local box-stencil kernel with a copy-boundary policy.
//!
//! For a `k × k` filter the boundary widths are `lower = (k - 1) / 2` and
//! `upper = k - 1 - lower`, which covers both odd and even `k`. A cell
//! `(i, j)` is in the boundary zone when the full filter window does not fit
//! around it; such cells are copied from the input unchanged. Every other
//! cell receives the cross-correlation
//!
//! ```text
//! out[b][i][j] = Σ_fi Σ_fj in[b][i + fi - lower][j + fj - lower] · w[fi][fj]
//! ```
//!
//! accumulated in `f32`, row-major over `(fi, fj)`. The filter is not
//! flipped.
//!
//! # Parallelism
//!
//! Output rows (one per `(batch, i)` pair) are split across Rayon worker
//! threads. Each output cell reads only from the input, so rows are
//! independent and need no locking. The column loop stays sequential.

use ndarray::{ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

/// Widths of the copy-boundary zone on each side of a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryWidths {
    /// Rows/columns at the top/left that are copied through.
    pub lower: usize,
    /// Rows/columns at the bottom/right that are copied through.
    pub upper: usize,
}

impl BoundaryWidths {
    pub fn for_filter(size: usize) -> Self {
        let reach = size.saturating_sub(1);
        let lower = reach / 2;
        Self {
            lower,
            upper: reach - lower,
        }
    }

    /// Whether `index` lies outside the interior of an axis of length `len`.
    #[inline]
    pub fn is_boundary(&self, index: usize, len: usize) -> bool {
        index < self.lower || index + self.upper >= len
    }
}

/// Apply the stencil to every matrix of `input`, writing into `output`.
///
/// `output` is the flat row-major buffer of the same `b × m × n` shape.
///
/// # Panics
///
/// Panics if `filter` is not square or if `output.len()` differs from the
/// number of input elements.
pub fn apply_stencil(input: ArrayView3<'_, f32>, filter: ArrayView2<'_, f32>, output: &mut [f32]) {
    let (_, rows, cols) = input.dim();
    assert_eq!(filter.nrows(), filter.ncols(), "Filter must be square");
    assert_eq!(output.len(), input.len(), "Output buffer does not match input shape");
    if output.is_empty() {
        return;
    }

    let bounds = BoundaryWidths::for_filter(filter.nrows());
    output
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            let plane = input.index_axis(Axis(0), row / rows);
            stencil_row(plane, filter, bounds, row % rows, out_row);
        });
}

/// Sequential variant of [`apply_stencil`], used as a reference.
#[cfg(test)]
pub(crate) fn apply_stencil_serial(
    input: ArrayView3<'_, f32>,
    filter: ArrayView2<'_, f32>,
    output: &mut [f32],
) {
    let (_, rows, cols) = input.dim();
    assert_eq!(filter.nrows(), filter.ncols(), "Filter must be square");
    assert_eq!(output.len(), input.len(), "Output buffer does not match input shape");
    if output.is_empty() {
        return;
    }

    let bounds = BoundaryWidths::for_filter(filter.nrows());
    for (row, out_row) in output.chunks_mut(cols).enumerate() {
        let plane = input.index_axis(Axis(0), row / rows);
        stencil_row(plane, filter, bounds, row % rows, out_row);
    }
}

/// Compute output row `i` of a single `m × n` plane.
fn stencil_row(
    plane: ArrayView2<'_, f32>,
    filter: ArrayView2<'_, f32>,
    bounds: BoundaryWidths,
    i: usize,
    out_row: &mut [f32],
) {
    let (rows, cols) = plane.dim();
    let k = filter.nrows();
    let input_row = plane.row(i);

    if bounds.is_boundary(i, rows) {
        for (out, &value) in out_row.iter_mut().zip(input_row.iter()) {
            *out = value;
        }
        return;
    }

    for (j, out) in out_row.iter_mut().enumerate() {
        if bounds.is_boundary(j, cols) {
            *out = input_row[j];
            continue;
        }
        let mut acc = 0.0f32;
        for fi in 0..k {
            let window_row = plane.row(i + fi - bounds.lower);
            for fj in 0..k {
                acc += window_row[j + fj - bounds.lower] * filter[[fi, fj]];
            }
        }
        *out = acc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Array3};

    fn sequential(batch: usize, rows: usize, cols: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, rows, cols), |(b, i, j)| {
            (b * rows * cols + i * cols + j) as f32
        })
    }

    fn run(input: &Array3<f32>, filter: &Array2<f32>) -> Array3<f32> {
        let mut out = vec![0.0; input.len()];
        apply_stencil(input.view(), filter.view(), &mut out);
        Array3::from_shape_vec(input.dim(), out).unwrap()
    }

    #[test]
    fn test_boundary_widths() {
        assert_eq!(BoundaryWidths::for_filter(1), BoundaryWidths { lower: 0, upper: 0 });
        assert_eq!(BoundaryWidths::for_filter(3), BoundaryWidths { lower: 1, upper: 1 });
        assert_eq!(BoundaryWidths::for_filter(4), BoundaryWidths { lower: 1, upper: 2 });
        assert_eq!(BoundaryWidths::for_filter(5), BoundaryWidths { lower: 2, upper: 2 });
    }

    #[test]
    fn test_box_filter_on_sequential_4x4() {
        let input = sequential(1, 4, 4);
        let out = run(&input, &Array2::ones((3, 3)));

        assert_eq!(out[[0, 1, 1]], 45.0);
        assert_eq!(out[[0, 1, 2]], 54.0);
        assert_eq!(out[[0, 2, 1]], 81.0);
        assert_eq!(out[[0, 2, 2]], 90.0);

        for i in 0..4 {
            for j in 0..4 {
                if i == 0 || i == 3 || j == 0 || j == 3 {
                    assert_eq!(out[[0, i, j]], input[[0, i, j]]);
                }
            }
        }
    }

    #[test]
    fn test_filter_is_not_flipped() {
        // Only the top-left weight is set, so each interior cell picks up its
        // up-left neighbour.
        let input = sequential(1, 3, 3);
        let mut filter = Array2::zeros((3, 3));
        filter[[0, 0]] = 1.0;
        let out = run(&input, &filter);
        assert_eq!(out[[0, 1, 1]], input[[0, 0, 0]]);
    }

    #[test]
    fn test_identity_filter_reproduces_input() {
        for k in [1usize, 3, 5] {
            let input = sequential(3, 7, 6).mapv(|v| (v * 0.37).sin());
            let mut filter = Array2::zeros((k, k));
            filter[[k / 2, k / 2]] = 1.0;
            let out = run(&input, &filter);
            for (a, b) in out.iter().zip(input.iter()) {
                assert_eq!(a.to_bits(), b.to_bits());
            }
        }
    }

    #[test]
    fn test_even_filter_boundary_is_asymmetric() {
        // k = 4: lower = 1, upper = 2, so on a 5x5 matrix only rows/cols 1..3
        // are interior.
        let input = sequential(1, 5, 5);
        let out = run(&input, &Array2::ones((4, 4)));
        for i in 0..5 {
            for j in 0..5 {
                let interior = (1..3).contains(&i) && (1..3).contains(&j);
                if !interior {
                    assert_eq!(out[[0, i, j]], input[[0, i, j]], "({i}, {j})");
                }
            }
        }
        // Window rows 0..4, cols 0..4 around (1, 1).
        let expected: f32 = (0..4).flat_map(|r| (0..4).map(move |c| (r * 5 + c) as f32)).sum();
        assert_abs_diff_eq!(out[[0, 1, 1]], expected);
    }

    #[test]
    fn test_filter_larger_than_matrix_copies_everything() {
        let input = sequential(2, 2, 3);
        let out = run(&input, &Array2::ones((5, 5)));
        assert_eq!(out, input);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let input = sequential(4, 17, 13).mapv(|v| (v * 0.013).cos());
        let filter = Array2::from_shape_fn((5, 5), |(a, b)| (a as f32 - 2.0) * 0.1 + b as f32 * 0.05);
        let mut serial = vec![0.0; input.len()];
        apply_stencil_serial(input.view(), filter.view(), &mut serial);
        let parallel = run(&input, &filter);
        for (a, b) in parallel.iter().zip(serial.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let input = Array3::<f32>::zeros((0, 4, 4));
        let mut out: Vec<f32> = Vec::new();
        apply_stencil(input.view(), Array2::ones((3, 3)).view(), &mut out);
        assert!(out.is_empty());
    }
}
