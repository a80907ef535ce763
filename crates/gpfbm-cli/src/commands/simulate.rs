use crate::cli::SimulateArgs;
use crate::error::{CliError, Result};
use crate::tables;
use gpfbm::core::models::trajectory::Trajectory;
use gpfbm::workflows::simulate::{SimulationParams, coupled_trajectories, fbm_trajectory};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use tracing::info;

/// `out.csv` stays as is for a single particle; otherwise particle `k` goes to
/// `out_k.csv`.
fn output_path(base: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return base.to_path_buf();
    }
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("trajectory");
    let name = match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, index, ext),
        None => format!("{}_{}", stem, index),
    };
    base.with_file_name(name)
}

fn generate(args: &SimulateArgs) -> Result<Vec<Trajectory>> {
    if args.particles == 0 {
        return Err(CliError::Argument("--particles must be at least 1".to_string()));
    }
    let params = SimulationParams {
        num_steps: args.steps,
        time_step: args.time_step,
        error: args.error,
        ..SimulationParams::new(args.d, args.a)
    };
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let trajectories = match args.substrate.as_deref() {
        Some(&[dr, ar]) => {
            info!(
                "Simulating {} particle(s) coupled by substrate motion (DR = {}, AR = {})",
                args.particles, dr, ar
            );
            coupled_trajectories(&mut rng, &vec![params; args.particles], dr, ar)?
        }
        Some(values) => {
            return Err(CliError::Argument(format!(
                "--substrate expects two values, got {}",
                values.len()
            )));
        }
        None => {
            info!("Simulating {} independent particle(s)", args.particles);
            (0..args.particles)
                .map(|_| fbm_trajectory(&mut rng, &params))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(trajectories)
}

pub fn run(args: SimulateArgs) -> Result<()> {
    let trajectories = generate(&args)?;
    let total = trajectories.len();
    for (index, trajectory) in trajectories.iter().enumerate() {
        let path = output_path(&args.output, index, total);
        tables::write_trajectory(&path, trajectory)?;
        println!("✓ Trajectory {} written to: {}", index, path.display());
    }
    Ok(())
}
