//! Explicit finite-difference solver for the damped 2D wave equation on a
//! rectangular grid, with checkpoint/restart and interchangeable serial,
//! multi-threaded and tiled (device-style) execution.
//!
//! ```no_run
//! use wave_core::{Driver, RunConfig, scenario};
//!
//! let state = scenario::load("init.wo".as_ref())?;
//! let mut driver = Driver::new(state, RunConfig::with_steps(100))?;
//! let report = driver.run()?;
//! println!("{:.2}", report.final_energy);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod energy;
pub mod error;
pub mod exec;
pub mod grid;
pub mod scenario;
pub mod state;
pub mod stencil;
pub mod update;

pub use checkpoint::CheckpointManager;
pub use config::RunConfig;
pub use driver::{Diagnostic, Driver, Phase, RunReport};
pub use error::{CheckpointError, GridError, Result, ScenarioError, WaveError};
pub use exec::{Backend, Executor};
pub use grid::Field;
pub use state::SimulationState;
pub use update::BoundaryRule;
