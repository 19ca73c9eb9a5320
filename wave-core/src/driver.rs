//! Time-stepping driver.
//!
//! Owns the state, its scratch twin and the executor. Each step writes the
//! next state into the scratch buffers and swaps them in; nothing the size
//! of a field is copied or allocated inside the loop.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::RunConfig;
use crate::energy::total_energy;
use crate::error::{Result, WaveError};
use crate::exec::Executor;
use crate::state::SimulationState;
use crate::update;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initialized,
    Running,
    Checkpointing,
    Completed,
    Failed,
}

/// Energy sample taken after a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Diagnostic {
    pub step: u64,
    pub time: f64,
    pub energy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub step: u64,
    pub time: f64,
    pub final_energy: f64,
    /// Samples at every `diagnostic_interval` step, plus the final step.
    pub diagnostics: Vec<Diagnostic>,
    pub checkpoints_written: u64,
}

pub struct Driver {
    config: RunConfig,
    exec: Executor,
    state: SimulationState,
    scratch: SimulationState,
    checkpoints: Option<CheckpointManager>,
    phase: Phase,
}

impl Driver {
    /// A fresh state (step 0) takes `dt`/`dx` from the config; a resumed state
    /// keeps the values it was checkpointed with.
    pub fn new(mut state: SimulationState, config: RunConfig) -> Result<Driver> {
        config.validate()?;
        if state.step == 0 {
            state.dt = config.dt;
            state.dx = config.dx;
        } else if state.dt != config.dt || state.dx != config.dx {
            warn!(
                state_dt = state.dt,
                state_dx = state.dx,
                config_dt = config.dt,
                config_dx = config.dx,
                "resumed state keeps its own dt/dx"
            );
        }
        if !state.is_finite() {
            return Err(WaveError::NonFinite { step: state.step });
        }

        let exec = Executor::new(config.backend)?;
        let checkpoints = config
            .checkpoint_path
            .as_ref()
            .map(|p| CheckpointManager::new(p, config.checkpoint_interval));
        let scratch = state.scratch();

        Ok(Driver {
            config,
            exec,
            state,
            scratch,
            checkpoints,
            phase: Phase::Initialized,
        })
    }

    /// Resume from the configured checkpoint when one exists, otherwise start
    /// from `initial()`. A corrupt checkpoint is an error, not a fresh start.
    pub fn resume_or_start<F>(config: RunConfig, initial: F) -> Result<Driver>
    where
        F: FnOnce() -> Result<SimulationState>,
    {
        let resumed = match &config.checkpoint_path {
            Some(path) => CheckpointManager::new(path, config.checkpoint_interval).resume()?,
            None => None,
        };
        let state = match resumed {
            Some(state) => {
                warn!(step = state.step, time = state.time, "resuming from checkpoint");
                state
            }
            None => initial()?,
        };
        Driver::new(state, config)
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn into_state(self) -> SimulationState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn energy(&self) -> f64 {
        total_energy(&self.state, self.config.floor(), &self.exec)
    }

    /// Advance one step. Fails, and leaves the driver in [`Phase::Failed`],
    /// if the new state has a NaN or infinity anywhere.
    pub fn step_once(&mut self) -> Result<()> {
        update::step(&self.state, &mut self.scratch, &self.exec, self.config.boundary);
        std::mem::swap(&mut self.state, &mut self.scratch);

        let finite = self.exec.all_finite(self.state.u.as_slice())
            && self.exec.all_finite(self.state.v.as_slice());
        if !finite {
            self.phase = Phase::Failed;
            error!(step = self.state.step, time = self.state.time, "state became non-finite");
            return Err(WaveError::NonFinite {
                step: self.state.step,
            });
        }
        Ok(())
    }

    fn done(&self, energy: Option<f64>) -> bool {
        let s = &self.state;
        if self.config.steps.is_some_and(|n| s.step >= n) {
            return true;
        }
        // Half a step of slack absorbs rounding in the accumulated time.
        if self.config.until_time.is_some_and(|t| s.time >= t - 0.5 * s.dt) {
            return true;
        }
        matches!((self.config.stop_energy, energy), (Some(stop), Some(e)) if e <= stop)
    }

    fn checkpoint(&mut self) -> Result<()> {
        let Some(mgr) = &self.checkpoints else {
            return Ok(());
        };
        self.phase = Phase::Checkpointing;
        if let Err(e) = mgr.write(&self.state) {
            self.phase = Phase::Failed;
            error!(step = self.state.step, error = %e, "checkpoint write failed");
            return Err(e.into());
        }
        self.phase = Phase::Running;
        Ok(())
    }

    /// Step until a termination condition holds.
    pub fn run(&mut self) -> Result<RunReport> {
        self.phase = Phase::Running;
        let floor = self.config.floor();
        let interval = self.config.diagnostic_interval;
        let track_energy = self.config.stop_energy.is_some();

        info!(
            rows = self.state.rows(),
            cols = self.state.cols(),
            step = self.state.step,
            time = self.state.time,
            backend = ?self.exec.backend(),
            threads = self.exec.threads(),
            "starting run"
        );

        let mut diagnostics = Vec::new();
        let mut checkpoints_written = 0;
        let mut energy = track_energy.then(|| total_energy(&self.state, floor, &self.exec));

        while !self.done(energy) {
            self.step_once()?;
            let step = self.state.step;
            let sample = interval > 0 && step % interval == 0;

            energy = (track_energy || sample).then(|| total_energy(&self.state, floor, &self.exec));
            if sample {
                let d = Diagnostic {
                    step,
                    time: self.state.time,
                    energy: energy.unwrap_or_default(),
                };
                debug!(step = d.step, time = d.time, energy = d.energy, "diagnostic");
                diagnostics.push(d);
            }

            if self.checkpoints.as_ref().is_some_and(|m| m.due(step)) {
                self.checkpoint()?;
                checkpoints_written += 1;
            }
        }

        let final_energy = match energy {
            Some(e) => e,
            None => total_energy(&self.state, floor, &self.exec),
        };
        if diagnostics.last().map(|d| d.step) != Some(self.state.step) {
            diagnostics.push(Diagnostic {
                step: self.state.step,
                time: self.state.time,
                energy: final_energy,
            });
        }

        let last_written = self
            .checkpoints
            .as_ref()
            .is_some_and(|m| m.due(self.state.step));
        if self.checkpoints.is_some() && !last_written {
            self.checkpoint()?;
            checkpoints_written += 1;
        }

        self.phase = Phase::Completed;
        info!(
            step = self.state.step,
            time = self.state.time,
            energy = final_energy,
            checkpoints = checkpoints_written,
            "run completed"
        );

        Ok(RunReport {
            step: self.state.step,
            time: self.state.time,
            final_energy,
            diagnostics,
            checkpoints_written,
        })
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("phase", &self.phase)
            .field("step", &self.state.step)
            .field("exec", &self.exec)
            .finish()
    }
}
