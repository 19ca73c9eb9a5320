//! One explicit time step of the damped wave equation.
//!
//! Interior cells advance with a damped symplectic Euler step:
//!
//! ```text
//! v' = (1 - dt*c) v + dt * L(u) / dx^2
//! u' = u + dt * v'
//! ```
//!
//! The step reads only from `current` and writes only into `next`; the
//! caller swaps the two afterwards.

use serde::{Deserialize, Serialize};

use crate::exec::{DeviceView, Executor};
use crate::grid::Field;
use crate::state::SimulationState;
use crate::stencil::laplacian;

/// How boundary cells evolve. The interior stencil never touches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryRule {
    /// Boundary displacement and velocity keep their initial values.
    #[default]
    Fixed,
    /// Boundary cells mirror their nearest interior neighbour after each step.
    Reflective,
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    dt: f64,
    damp: f64,
    inv_dx2: f64,
}

impl Coefficients {
    fn of(state: &SimulationState) -> Self {
        Coefficients {
            dt: state.dt,
            damp: 1.0 - state.dt * state.damping,
            inv_dx2: 1.0 / (state.dx * state.dx),
        }
    }
}

#[inline(always)]
fn advance_cell(u: &[f64], v: &[f64], cols: usize, idx: usize, k: Coefficients) -> (f64, f64) {
    let v_next = k.damp * v[idx] + k.dt * laplacian(u, cols, idx) * k.inv_dx2;
    (u[idx] + k.dt * v_next, v_next)
}

/// Advance `current` by one step into `next`.
///
/// `next` must have the same shape as `current`; its previous contents are
/// overwritten completely. Nothing is allocated.
pub fn step(
    current: &SimulationState,
    next: &mut SimulationState,
    exec: &Executor,
    boundary: BoundaryRule,
) {
    debug_assert!(current.u.same_shape(&next.u) && current.v.same_shape(&next.v));

    let k = Coefficients::of(current);
    let rows = current.rows();
    let cols = current.cols();
    let u = current.u.as_slice();
    let v = current.v.as_slice();

    if exec.is_device() {
        let u_out = DeviceView::new(next.u.as_mut_slice());
        let v_out = DeviceView::new(next.v.as_mut_slice());
        exec.launch_2d(1..rows - 1, 1..cols - 1, |i, j| {
            let idx = i * cols + j;
            let (un, vn) = advance_cell(u, v, cols, idx, k);
            // SAFETY: each (i, j) of the launch is a distinct work-item.
            unsafe {
                u_out.write(idx, un);
                v_out.write(idx, vn);
            }
        });
    } else {
        exec.for_each_interior_row(
            cols,
            next.u.as_mut_slice(),
            next.v.as_mut_slice(),
            |i, u_row, v_row| {
                let row = i * cols;
                for j in 1..cols - 1 {
                    let (un, vn) = advance_cell(u, v, cols, row + j, k);
                    u_row[j] = un;
                    v_row[j] = vn;
                }
            },
        );
    }

    apply_boundary(boundary, current, next);

    next.step = current.step + 1;
    next.time = current.time + current.dt;
    next.dt = current.dt;
    next.dx = current.dx;
    next.damping = current.damping;
}

fn apply_boundary(rule: BoundaryRule, current: &SimulationState, next: &mut SimulationState) {
    match rule {
        BoundaryRule::Fixed => {
            copy_boundary(&current.u, &mut next.u);
            copy_boundary(&current.v, &mut next.v);
        }
        BoundaryRule::Reflective => {
            mirror_boundary(&mut next.u);
            mirror_boundary(&mut next.v);
        }
    }
}

fn copy_boundary(src: &Field, dst: &mut Field) {
    let rows = src.rows();
    let cols = src.cols();
    let s = src.as_slice();
    let d = dst.as_mut_slice();

    d[..cols].copy_from_slice(&s[..cols]);
    let last = (rows - 1) * cols;
    d[last..].copy_from_slice(&s[last..]);
    for i in 1..rows - 1 {
        let row = i * cols;
        d[row] = s[row];
        d[row + cols - 1] = s[row + cols - 1];
    }
}

fn mirror_boundary(f: &mut Field) {
    let rows = f.rows();
    let cols = f.cols();
    let d = f.as_mut_slice();

    for i in 1..rows - 1 {
        let row = i * cols;
        d[row] = d[row + 1];
        d[row + cols - 1] = d[row + cols - 2];
    }
    // Full rows last so the corners pick up the mirrored edge values.
    d.copy_within(cols..2 * cols, 0);
    let last = (rows - 1) * cols;
    d.copy_within(last - cols..last, last);
}
