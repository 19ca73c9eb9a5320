use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use tracing::info;
use wave_core::{Backend, BoundaryRule, Driver, RunConfig, RunReport, SimulationState, scenario};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Initial scenario (.wo)
    pub input: PathBuf,

    /// JSON run configuration; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop after this many steps
    #[arg(long)]
    pub steps: Option<u64>,

    /// Stop once simulated time reaches this value
    #[arg(long)]
    pub until_time: Option<f64>,

    /// Stop once total energy falls to or below this value
    #[arg(long)]
    pub stop_energy: Option<f64>,

    /// Time step
    #[arg(long)]
    pub dt: Option<f64>,

    /// Grid spacing
    #[arg(long)]
    pub dx: Option<f64>,

    #[arg(long, value_enum)]
    pub boundary: Option<BoundaryArg>,

    /// Leave cells with |u| above this out of the energy
    #[arg(long)]
    pub energy_floor: Option<f64>,

    /// Record the energy every N steps (0: final only)
    #[arg(long)]
    pub diagnostic_interval: Option<u64>,

    /// Checkpoint file
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Write the checkpoint every N steps
    #[arg(long)]
    pub checkpoint_interval: Option<u64>,

    /// Continue from the checkpoint file if it exists
    #[arg(long)]
    pub resume: bool,

    /// Worker threads (1 runs serially)
    #[arg(long, env = "WAVE_NUM_THREADS")]
    pub threads: Option<usize>,

    /// Use the tiled device-style backend
    #[arg(long)]
    pub device: bool,

    #[arg(long, default_value_t = 16)]
    pub tile_rows: usize,

    #[arg(long, default_value_t = 64)]
    pub tile_cols: usize,

    /// Write the final state as a scenario file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Write recorded diagnostics as JSON lines
    #[arg(long)]
    pub diagnostics: Option<PathBuf>,

    /// Decimal places of the printed energy
    #[arg(long, default_value_t = 2)]
    pub precision: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BoundaryArg {
    Fixed,
    Reflective,
}

impl From<BoundaryArg> for BoundaryRule {
    fn from(b: BoundaryArg) -> Self {
        match b {
            BoundaryArg::Fixed => BoundaryRule::Fixed,
            BoundaryArg::Reflective => BoundaryRule::Reflective,
        }
    }
}

fn load_config(path: &Path) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let file = File::open(path).map_err(|e| format!("config {}: {e}", path.display()))?;
    let cfg = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| format!("config {}: {e}", path.display()))?;
    Ok(cfg)
}

/// File config (or defaults) with command-line overrides applied.
pub fn build_config(args: &RunArgs) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => RunConfig::default(),
    };

    if args.steps.is_some() {
        cfg.steps = args.steps;
    }
    if args.until_time.is_some() {
        cfg.until_time = args.until_time;
    }
    if args.stop_energy.is_some() {
        cfg.stop_energy = args.stop_energy;
    }
    if let Some(dt) = args.dt {
        cfg.dt = dt;
    }
    if let Some(dx) = args.dx {
        cfg.dx = dx;
    }
    if let Some(b) = args.boundary {
        cfg.boundary = b.into();
    }
    if args.energy_floor.is_some() {
        cfg.energy_floor = args.energy_floor;
    }
    if let Some(n) = args.diagnostic_interval {
        cfg.diagnostic_interval = n;
    }
    if args.checkpoint.is_some() {
        cfg.checkpoint_path = args.checkpoint.clone();
    }
    if let Some(n) = args.checkpoint_interval {
        cfg.checkpoint_interval = n;
    }
    if args.device {
        cfg.backend = Backend::Device {
            tile_rows: args.tile_rows,
            tile_cols: args.tile_cols,
        };
    } else if let Some(threads) = args.threads {
        cfg.backend = Backend::from_threads(threads);
    }

    if args.resume && cfg.checkpoint_path.is_none() {
        return Err("--resume needs a checkpoint path".into());
    }
    cfg.validate()?;
    Ok(cfg)
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = build_config(&args)?;
    let load_input = || -> wave_core::Result<SimulationState> {
        let state = scenario::load(&args.input)?;
        info!(input = %args.input.display(), rows = state.rows(), cols = state.cols(), "scenario loaded");
        Ok(state)
    };

    let mut driver = if args.resume {
        Driver::resume_or_start(cfg, load_input)?
    } else {
        Driver::new(load_input()?, cfg)?
    };

    let report = driver.run()?;

    if let Some(path) = &args.diagnostics {
        write_diagnostics(path, &report)?;
    }
    if let Some(path) = &args.output {
        scenario::save(driver.state(), path)?;
        info!(output = %path.display(), "final state written");
    }

    println!("{:.*}", args.precision, report.final_energy);
    Ok(())
}

fn write_diagnostics(path: &Path, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
    let mut w = BufWriter::new(File::create(path)?);
    for d in &report.diagnostics {
        serde_json::to_writer(&mut w, d)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}
