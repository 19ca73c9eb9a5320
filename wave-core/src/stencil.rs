//! Five-point Laplacian used by every backend.

use crate::grid::Field;

/// Discrete Laplacian at flat index `idx` of a row-major buffer with `cols`
/// columns: half the sum of the four axis neighbours minus twice the centre.
///
/// `idx` must address an interior cell; no bounds are checked beyond the
/// slice indexing itself.
#[inline(always)]
pub fn laplacian(u: &[f64], cols: usize, idx: usize) -> f64 {
    (u[idx - 1] + u[idx + 1] + u[idx - cols] + u[idx + cols]) / 2.0 - 2.0 * u[idx]
}

/// Field-level convenience wrapper around [`laplacian`].
pub fn laplacian_at(u: &Field, i: usize, j: usize) -> f64 {
    debug_assert!(!u.is_boundary(i, j));
    laplacian(u.as_slice(), u.cols(), u.index(i, j))
}
