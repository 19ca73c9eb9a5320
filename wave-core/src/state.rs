use crate::error::GridError;
use crate::grid::Field;

pub const DEFAULT_DT: f64 = 0.01;
pub const DEFAULT_DX: f64 = 1.0;

/// Displacement and velocity fields plus the scalar metadata needed to
/// continue a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub u: Field,
    pub v: Field,
    pub step: u64,
    pub time: f64,
    pub dt: f64,
    pub dx: f64,
    pub damping: f64,
}

impl SimulationState {
    /// Zero displacement and velocity at step 0.
    pub fn new(rows: usize, cols: usize, damping: f64) -> Result<SimulationState, GridError> {
        Ok(SimulationState {
            u: Field::new(rows, cols)?,
            v: Field::new(rows, cols)?,
            step: 0,
            time: 0.0,
            dt: DEFAULT_DT,
            dx: DEFAULT_DX,
            damping,
        })
    }

    pub fn from_fields(u: Field, v: Field, damping: f64) -> Result<SimulationState, GridError> {
        if !u.same_shape(&v) {
            return Err(GridError::ShapeMismatch {
                u_rows: u.rows(),
                u_cols: u.cols(),
                v_rows: v.rows(),
                v_cols: v.cols(),
            });
        }
        Ok(SimulationState {
            u,
            v,
            step: 0,
            time: 0.0,
            dt: DEFAULT_DT,
            dx: DEFAULT_DX,
            damping,
        })
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_dx(mut self, dx: f64) -> Self {
        self.dx = dx;
        self
    }

    pub fn rows(&self) -> usize {
        self.u.rows()
    }

    pub fn cols(&self) -> usize {
        self.u.cols()
    }

    /// A same-shaped state for use as the write side of a step.
    pub fn scratch(&self) -> SimulationState {
        self.clone()
    }

    pub fn is_finite(&self) -> bool {
        self.u.is_finite() && self.v.is_finite() && self.time.is_finite()
    }
}
