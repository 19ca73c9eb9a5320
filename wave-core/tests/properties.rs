use proptest::prelude::*;
use tempfile::TempDir;
use wave_core::energy::{NO_FLOOR, total_energy};
use wave_core::{
    Backend, BoundaryRule, Driver, Executor, RunConfig, SimulationState, checkpoint, scenario,
    update,
};

/// 10x10 grid, a raised plateau off-centre and a velocity kick.
fn scenario_10x10(damping: f64) -> SimulationState {
    let mut s = SimulationState::new(10, 10, damping).unwrap();
    for i in 2..5 {
        for j in 3..7 {
            s.u.set(i, j, 1.0).unwrap();
        }
    }
    s.v.set(6, 6, 0.5).unwrap();
    s
}

fn run(state: SimulationState, cfg: RunConfig) -> (wave_core::RunReport, SimulationState) {
    let mut d = Driver::new(state, cfg).unwrap();
    let report = d.run().unwrap();
    (report, d.into_state())
}

#[test]
fn single_thread_runs_are_bit_identical() {
    let cfg = RunConfig {
        diagnostic_interval: 1,
        ..RunConfig::with_steps(100)
    };
    let (a, sa) = run(scenario_10x10(0.05), cfg.clone());
    let (b, sb) = run(scenario_10x10(0.05), cfg);
    assert_eq!(a.diagnostics.len(), 100);
    for (x, y) in a.diagnostics.iter().zip(&b.diagnostics) {
        assert_eq!(x.energy.to_bits(), y.energy.to_bits());
    }
    assert_eq!(sa, sb);
}

#[test]
fn reference_scenario_final_energy_is_pinned() {
    let (report, state) = run(scenario_10x10(0.05), RunConfig::with_steps(100));
    assert_eq!(state.step, 100);
    assert_eq!(format!("{:.2}", report.final_energy), "3.51");
    assert_eq!(report.final_energy.to_bits(), 0x400c_0dea_b1b4_3608);
}

#[test]
fn restart_from_checkpoint_matches_uninterrupted_run() {
    let dir = TempDir::new().unwrap();
    let ckpt = dir.path().join("run.ckpt");

    let full_cfg = RunConfig {
        diagnostic_interval: 1,
        ..RunConfig::with_steps(100)
    };
    let (full, full_state) = run(scenario_10x10(0.05), full_cfg.clone());

    // First leg stops at 40 and leaves a checkpoint behind.
    let first_leg = RunConfig {
        checkpoint_path: Some(ckpt.clone()),
        checkpoint_interval: 20,
        ..RunConfig::with_steps(40)
    };
    run(scenario_10x10(0.05), first_leg);

    let resumed = checkpoint::load(&ckpt).unwrap();
    assert_eq!(resumed.step, 40);
    let (second, second_state) = run(resumed, full_cfg);

    let tail: Vec<_> = full.diagnostics.iter().filter(|d| d.step > 40).collect();
    assert_eq!(tail.len(), second.diagnostics.len());
    for (x, y) in tail.iter().zip(&second.diagnostics) {
        assert_eq!(x.step, y.step);
        assert_eq!(x.time.to_bits(), y.time.to_bits());
        assert_eq!(x.energy.to_bits(), y.energy.to_bits());
    }
    assert_eq!(full_state, second_state);
}

#[test]
fn thread_count_leaves_final_diagnostic_unchanged() {
    let cfg = |backend| RunConfig {
        backend,
        ..RunConfig::with_steps(100)
    };
    let (reference, _) = run(scenario_10x10(0.05), cfg(Backend::Serial));
    for threads in [1, 2, 4, 8] {
        let (r, _) = run(scenario_10x10(0.05), cfg(Backend::Threads { threads }));
        assert_eq!(r.final_energy.to_bits(), reference.final_energy.to_bits());
    }
}

#[test]
fn one_interior_cell_follows_the_analytic_step() {
    let mut s = SimulationState::new(3, 3, 0.0).unwrap();
    s.u.set(1, 1, 1.0).unwrap();
    let (report, state) = run(s, RunConfig::with_steps(1));

    let v = 0.01 * -2.0;
    let u = 1.0 + 0.01 * v;
    assert_eq!(state.v.get(1, 1), Some(v));
    assert_eq!(state.u.get(1, 1), Some(u));
    // Four unit-weight links of (u - 0)^2 / 4 plus v^2 / 2.
    let expected = v * v / 2.0 + u * u;
    assert!((report.final_energy - expected).abs() < 1e-14);
}

#[test]
fn undamped_energy_is_nearly_conserved() {
    let s = scenario_10x10(0.0);
    let e0 = total_energy(&s, NO_FLOOR, &Executor::serial());
    let (report, _) = run(s, RunConfig::with_steps(100));
    assert!((report.final_energy - e0).abs() / e0 < 0.05);
}

#[test]
fn damping_drains_energy() {
    let s = scenario_10x10(0.5);
    let e0 = total_energy(&s, NO_FLOOR, &Executor::serial());
    let (report, _) = run(s, RunConfig::with_steps(100));
    assert!(report.final_energy < e0);
}

#[test]
fn scenario_file_round_trip_through_a_run() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("init.wo");
    let output = dir.path().join("final.wo");
    scenario::save(&scenario_10x10(0.05), &input).unwrap();

    let (report, state) = run(scenario::load(&input).unwrap(), RunConfig::with_steps(100));
    scenario::save(&state, &output).unwrap();

    let back = scenario::load(&output).unwrap();
    assert_eq!(back.u, state.u);
    assert_eq!(back.v, state.v);
    assert_eq!(back.time, report.time);
}

fn arb_state() -> impl Strategy<Value = SimulationState> {
    (3usize..24, 3usize..24).prop_flat_map(|(rows, cols)| {
        let n = rows * cols;
        (
            prop::collection::vec(-2.0f64..2.0, n),
            prop::collection::vec(-1.0f64..1.0, n),
            0.0f64..1.0,
        )
            .prop_map(move |(u, v, damping)| {
                let u = wave_core::Field::from_vec(rows, cols, u).unwrap();
                let v = wave_core::Field::from_vec(rows, cols, v).unwrap();
                SimulationState::from_fields(u, v, damping).unwrap()
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_backend_computes_the_same_step(state in arb_state(), reflective in any::<bool>()) {
        let rule = if reflective { BoundaryRule::Reflective } else { BoundaryRule::Fixed };
        let mut reference = state.scratch();
        update::step(&state, &mut reference, &Executor::serial(), rule);

        for backend in [
            Backend::Threads { threads: 3 },
            Backend::Device { tile_rows: 5, tile_cols: 3 },
        ] {
            let exec = Executor::new(backend).unwrap();
            let mut next = state.scratch();
            update::step(&state, &mut next, &exec, rule);
            prop_assert_eq!(&next, &reference);
        }
    }

    #[test]
    fn floor_never_increases_energy(state in arb_state(), floor in 0.0f64..2.5) {
        let exec = Executor::serial();
        let all = total_energy(&state, NO_FLOOR, &exec);
        let floored = total_energy(&state, floor, &exec);
        prop_assert!(floored <= all + 1e-12 * all.max(1.0));
    }
}
