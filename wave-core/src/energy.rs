//! Total energy of a state: kinetic `v^2 / 2` per interior cell plus
//! potential `(u_a - u_b)^2 / 4` per link between axis neighbours.
//!
//! Every link is counted once, in a single pass, by attributing it to an
//! interior cell: each cell owns its link down and its link right, cells in
//! row 1 also own the link up to row 0 and cells in column 1 own the link
//! left to column 0.
//!
//! Floor policy: an interior cell whose displacement magnitude exceeds the
//! floor is excluded entirely. It loses its kinetic term and every link that
//! touches it, whichever cell owns that link, so the amount removed does not
//! depend on where the cell sits. Boundary cells are never excluded. The
//! exclusion is a multiplicative mask so the inner loops stay branch free.

use crate::exec::Executor;
use crate::state::SimulationState;

/// Floor value that disables the exclusion policy.
pub const NO_FLOOR: f64 = f64::INFINITY;

#[inline(always)]
fn keep(u: f64, floor: f64) -> f64 {
    f64::from(u8::from(u.abs() <= floor))
}

#[inline(always)]
fn link(a: f64, b: f64) -> f64 {
    let d = a - b;
    d * d / 4.0
}

/// Which links an interior cell owns, and whether its down/right neighbours
/// are interior (and so subject to the floor).
#[derive(Clone, Copy)]
struct Owned {
    up: bool,
    left: bool,
    down_interior: bool,
    right_interior: bool,
}

/// Energy owned by the interior cell at flat index `idx`.
#[inline(always)]
fn cell_energy(u: &[f64], v: &[f64], cols: usize, idx: usize, o: Owned, floor: f64) -> f64 {
    let c = u[idx];
    let down = u[idx + cols];
    let right = u[idx + 1];
    let keep_down = if o.down_interior { keep(down, floor) } else { 1.0 };
    let keep_right = if o.right_interior { keep(right, floor) } else { 1.0 };

    let mut e = v[idx] * v[idx] / 2.0 + keep_down * link(c, down) + keep_right * link(c, right);
    if o.up {
        e += link(c, u[idx - cols]);
    }
    if o.left {
        e += link(c, u[idx - 1]);
    }
    keep(c, floor) * e
}

/// Energy owned by interior row `i`.
///
/// Column 1 and the last interior column are peeled off so the main loop
/// runs with a fixed ownership pattern.
pub fn row_energy(state: &SimulationState, i: usize, floor: f64) -> f64 {
    let rows = state.rows();
    let cols = state.cols();
    let u = state.u.as_slice();
    let v = state.v.as_slice();
    let row = i * cols;
    let last = cols - 2;
    let up = i == 1;
    let down_interior = i + 2 < rows;

    let first = Owned {
        up,
        left: true,
        down_interior,
        right_interior: last > 1,
    };
    let mut acc = cell_energy(u, v, cols, row + 1, first, floor);

    let middle = Owned {
        up,
        left: false,
        down_interior,
        right_interior: true,
    };
    for j in 2..last {
        acc += cell_energy(u, v, cols, row + j, middle, floor);
    }

    if last > 1 {
        let end = Owned {
            right_interior: false,
            ..middle
        };
        acc += cell_energy(u, v, cols, row + last, end, floor);
    }
    acc
}

/// Total energy with the given displacement floor.
///
/// Serial and thread-pool executors give bit-identical totals. The device
/// executor reduces per tile and agrees to rounding.
pub fn total_energy(state: &SimulationState, floor: f64, exec: &Executor) -> f64 {
    let rows = state.rows();
    let cols = state.cols();
    if exec.is_device() {
        let u = state.u.as_slice();
        let v = state.v.as_slice();
        exec.reduce_2d(1..rows - 1, 1..cols - 1, |i, j| {
            let o = Owned {
                up: i == 1,
                left: j == 1,
                down_interior: i + 2 < rows,
                right_interior: j + 2 < cols,
            };
            cell_energy(u, v, cols, i * cols + j, o, floor)
        })
    } else {
        exec.sum_rows(1..rows - 1, |i| row_energy(state, i, floor))
    }
}

/// Per-cell reference used by tests: no peeling, no masking tricks.
#[cfg(test)]
fn naive_energy(state: &SimulationState, floor: f64) -> f64 {
    let (rows, cols) = (state.rows(), state.cols());
    let excluded = |i: usize, j: usize| {
        !state.u.is_boundary(i, j) && state.u.get(i, j).unwrap().abs() > floor
    };
    let mut e = 0.0;
    for i in 1..rows - 1 {
        for j in 1..cols - 1 {
            if excluded(i, j) {
                continue;
            }
            let c = state.u.get(i, j).unwrap();
            let v = state.v.get(i, j).unwrap();
            e += v * v / 2.0;
            let mut neighbours = vec![(i + 1, j), (i, j + 1)];
            if i == 1 {
                neighbours.push((0, j));
            }
            if j == 1 {
                neighbours.push((i, 0));
            }
            for (ni, nj) in neighbours {
                if !excluded(ni, nj) {
                    e += link(c, state.u.get(ni, nj).unwrap());
                }
            }
        }
    }
    e
}
