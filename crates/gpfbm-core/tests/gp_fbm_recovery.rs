use gpfbm::core::models::params::DiffusionParams;
use gpfbm::engine::config::{FitConfig, FitConfigBuilder};
use gpfbm::workflows::gp_fbm::GpFbm;
use gpfbm::workflows::simulate::{SimulationParams, coupled_trajectories, fbm_trajectory};
use rand::SeedableRng;
use rand::rngs::StdRng;

const D: f64 = 0.1;
const A: f64 = 0.45;

fn mean_single_fit(trials: usize, seed: u64) -> (f64, f64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let params = SimulationParams::new(D, A);
    let trajectories = (0..trials)
        .map(|_| fbm_trajectory(&mut rng, &params).unwrap())
        .collect();

    let mut gp = GpFbm::new(trajectories, FitConfig::default()).unwrap();
    let fits: Vec<DiffusionParams> = gp.single_model_all().unwrap();
    let d = fits.iter().map(|p| p.d).sum::<f64>() / trials as f64;
    let a = fits.iter().map(|p| p.a).sum::<f64>() / trials as f64;
    (d, a)
}

fn coupled_particles(steps: usize) -> [SimulationParams; 2] {
    [
        SimulationParams {
            num_steps: steps,
            ..SimulationParams::new(0.1, 0.45)
        },
        SimulationParams::new(0.08, 0.5),
    ]
}

#[test]
fn single_model_recovers_parameters_on_average() {
    let (d, a) = mean_single_fit(10, 2024);
    assert!((d - D).abs() < 0.06, "mean D = {d}");
    assert!((a - A).abs() < 0.15, "mean A = {a}");
}

#[test]
fn single_model_all_matches_individual_fits() {
    let mut rng = StdRng::seed_from_u64(99);
    let params = SimulationParams::new(D, A);
    let trajectories: Vec<_> = (0..3)
        .map(|_| fbm_trajectory(&mut rng, &params).unwrap())
        .collect();

    let mut batch = GpFbm::new(trajectories.clone(), FitConfig::default()).unwrap();
    let all = batch.single_model_all().unwrap();

    let mut one_by_one = GpFbm::new(trajectories, FitConfig::default()).unwrap();
    for (id, fit) in all.iter().enumerate() {
        let single = one_by_one.single_model(id).unwrap();
        assert!((single.d - fit.d).abs() < 1e-12);
        assert!((single.a - fit.a).abs() < 1e-12);
    }
}

#[test]
fn coupled_model_attributes_shared_motion_to_substrate() {
    let mut rng = StdRng::seed_from_u64(31);
    let set = coupled_trajectories(&mut rng, &coupled_particles(120), 0.5, 1.0).unwrap();
    let mut gp = GpFbm::new(set, FitConfig::default()).unwrap();

    let coupled = gp.coupled_model().unwrap();
    assert_eq!(coupled.num_particles(), 2);
    assert!(coupled.ar > 0.0 && coupled.ar < 2.0);
    let largest_particle_d = coupled
        .particles
        .iter()
        .map(|p| p.d)
        .fold(0.0, f64::max);
    assert!(
        coupled.dr > largest_particle_d,
        "DR = {}, particle D = {largest_particle_d}",
        coupled.dr
    );

    let substrate = gp.estimate_substrate_movement().unwrap();
    assert_eq!(substrate.len(), 120);
}

#[test]
fn coupled_posterior_has_one_column_per_parameter() {
    let mut rng = StdRng::seed_from_u64(5);
    let set = coupled_trajectories(&mut rng, &coupled_particles(60), 0.5, 1.0).unwrap();
    let config = FitConfigBuilder::new()
        .sample_size(200)
        .max_calibration_batches(5)
        .build()
        .unwrap();
    let mut gp = GpFbm::new(set, config).unwrap();

    let posterior = gp.distrib_coupled_model(&mut rng).unwrap();
    assert_eq!(posterior.names, vec!["D_0", "A_0", "D_1", "A_1", "DR", "AR"]);
    assert_eq!(posterior.samples.shape(), (200, 6));
    assert!(posterior.samples.iter().all(|v| v.is_finite() && *v > 0.0));
    assert!(posterior.calibration.batches <= 5);
}

#[test]
#[ignore = "100 trials of 200 samples each; run with --ignored"]
fn single_model_calibration() {
    let (d, a) = mean_single_fit(100, 7);
    assert!((d - D).abs() < 0.1, "mean D = {d}");
    assert!((a - A).abs() < 0.1, "mean A = {a}");
}

#[test]
#[ignore = "100 coupled fits of 200 samples each; run with --ignored"]
fn coupled_model_calibration() {
    let trials = 100;
    let mut rng = StdRng::seed_from_u64(11);
    let mut sums = [0.0; 6];
    for _ in 0..trials {
        let set = coupled_trajectories(&mut rng, &coupled_particles(200), 0.5, 1.0).unwrap();
        let mut gp = GpFbm::new(set, FitConfig::default()).unwrap();
        let fit = gp.coupled_model().unwrap();
        let values = [
            fit.particles[0].d,
            fit.particles[0].a,
            fit.particles[1].d,
            fit.particles[1].a,
            fit.dr,
            fit.ar,
        ];
        for (sum, v) in sums.iter_mut().zip(values) {
            *sum += v;
        }
    }

    let expected = [0.1, 0.45, 0.08, 0.5, 0.5, 1.0];
    for (k, (sum, want)) in sums.iter().zip(expected).enumerate() {
        let mean = sum / trials as f64;
        assert!((mean - want).abs() < 0.1, "parameter {k}: mean {mean}, expected {want}");
    }
}
