use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Args;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::info;
use wave_core::{Field, SimulationState, scenario};

use crate::ic::{IcType, generate_ic, sample_ic_type};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Scenario file to write (.wo)
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 64)]
    pub rows: usize,

    #[arg(long, default_value_t = 64)]
    pub cols: usize,

    /// Damping coefficient c
    #[arg(long, default_value_t = 0.0)]
    pub damping: f64,

    /// RNG seed (reproducibility)
    #[arg(long, default_value_t = 123)]
    pub seed: u64,

    /// Initial displacement shape; sampled from the seed when omitted
    #[arg(long, value_enum)]
    pub kind: Option<IcType>,

    /// Largest |u| in the generated field
    #[arg(long, default_value_t = 1.0)]
    pub amplitude: f64,

    /// Also give interior cells a random velocity of at most this magnitude
    #[arg(long, default_value_t = 0.0)]
    pub velocity: f64,

    /// Write a JSON description of the generated scenario here
    #[arg(long)]
    pub meta: Option<PathBuf>,
}

#[derive(Serialize)]
struct MetaRow<'a> {
    seed: u64,
    rows: usize,
    cols: usize,
    damping: f64,
    amplitude: f64,
    velocity: f64,
    ic_type: &'a str,
}

pub fn build_state(args: &GenerateArgs) -> Result<(SimulationState, IcType), Box<dyn std::error::Error>> {
    if !(args.amplitude.is_finite() && args.amplitude >= 0.0) {
        return Err(format!("amplitude must be finite and >= 0, got {}", args.amplitude).into());
    }
    if !(args.velocity.is_finite() && args.velocity >= 0.0) {
        return Err(format!("velocity must be finite and >= 0, got {}", args.velocity).into());
    }
    if !(args.damping.is_finite() && args.damping >= 0.0) {
        return Err(format!("damping must be finite and >= 0, got {}", args.damping).into());
    }

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let ic = args.kind.unwrap_or_else(|| sample_ic_type(&mut rng));

    // Validate the shape before asking the generator for rows*cols cells.
    let mut v = Field::new(args.rows, args.cols)?;
    let u = Field::from_vec(
        args.rows,
        args.cols,
        generate_ic(&mut rng, args.rows, args.cols, ic, args.amplitude),
    )?;

    if args.velocity > 0.0 {
        for i in 1..args.rows - 1 {
            for j in 1..args.cols - 1 {
                v.set(i, j, rng.gen_range(-args.velocity..=args.velocity))?;
            }
        }
    }

    Ok((SimulationState::from_fields(u, v, args.damping)?, ic))
}

pub fn run(args: GenerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (state, ic) = build_state(&args)?;
    scenario::save(&state, &args.out)?;
    info!(
        out = %args.out.display(),
        rows = args.rows,
        cols = args.cols,
        seed = args.seed,
        ic = ic.as_str(),
        "scenario written"
    );

    if let Some(path) = &args.meta {
        let row = MetaRow {
            seed: args.seed,
            rows: args.rows,
            cols: args.cols,
            damping: args.damping,
            amplitude: args.amplitude,
            velocity: args.velocity,
            ic_type: ic.as_str(),
        };
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, &row)?;
        w.write_all(b"\n")?;
        w.flush()?;
    }
    Ok(())
}
