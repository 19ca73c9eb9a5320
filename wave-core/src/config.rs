use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::energy::NO_FLOOR;
use crate::error::WaveError;
use crate::exec::Backend;
use crate::state::{DEFAULT_DT, DEFAULT_DX};
use crate::update::BoundaryRule;

/// Everything a run needs besides the initial state.
///
/// All fields have defaults so a JSON config file only has to name what it
/// changes. At least one of `steps`, `until_time` or `stop_energy` must be
/// set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Stop after this many steps (counted from step 0, not from a resume).
    pub steps: Option<u64>,
    /// Stop once physical time reaches this value.
    pub until_time: Option<f64>,
    /// Stop once total energy falls to or below this value.
    pub stop_energy: Option<f64>,

    pub dt: f64,
    pub dx: f64,
    pub boundary: BoundaryRule,

    /// Interior cells with `|u|` above this are left out of the energy.
    /// `None` disables the exclusion.
    pub energy_floor: Option<f64>,

    /// Record a diagnostic every N steps; 0 records only the final one.
    pub diagnostic_interval: u64,

    /// Write a checkpoint every N steps; 0 disables periodic checkpoints.
    pub checkpoint_interval: u64,
    pub checkpoint_path: Option<PathBuf>,

    pub backend: Backend,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            steps: None,
            until_time: None,
            stop_energy: None,
            dt: DEFAULT_DT,
            dx: DEFAULT_DX,
            boundary: BoundaryRule::Fixed,
            energy_floor: None,
            diagnostic_interval: 0,
            checkpoint_interval: 0,
            checkpoint_path: None,
            backend: Backend::Serial,
        }
    }
}

impl RunConfig {
    pub fn with_steps(steps: u64) -> Self {
        RunConfig {
            steps: Some(steps),
            ..RunConfig::default()
        }
    }

    pub fn floor(&self) -> f64 {
        self.energy_floor.unwrap_or(NO_FLOOR)
    }

    pub fn validate(&self) -> Result<(), WaveError> {
        if self.steps.is_none() && self.until_time.is_none() && self.stop_energy.is_none() {
            return Err(WaveError::Config(
                "no termination condition: set steps, until_time or stop_energy".into(),
            ));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(WaveError::Config(format!("dt must be finite and > 0, got {}", self.dt)));
        }
        if !(self.dx.is_finite() && self.dx > 0.0) {
            return Err(WaveError::Config(format!("dx must be finite and > 0, got {}", self.dx)));
        }
        if let Some(t) = self.until_time {
            if !t.is_finite() {
                return Err(WaveError::Config(format!("until_time must be finite, got {t}")));
            }
        }
        if let Some(e) = self.stop_energy {
            if !e.is_finite() || e < 0.0 {
                return Err(WaveError::Config(format!(
                    "stop_energy must be finite and >= 0, got {e}"
                )));
            }
        }
        if let Some(f) = self.energy_floor {
            if f.is_nan() || f < 0.0 {
                return Err(WaveError::Config(format!("energy_floor must be >= 0, got {f}")));
            }
        }
        if self.checkpoint_interval > 0 && self.checkpoint_path.is_none() {
            return Err(WaveError::Config(
                "checkpoint_interval is set but checkpoint_path is not".into(),
            ));
        }
        self.backend.validate()
    }
}
