use crate::cli::FitArgs;
use crate::config::PartialFitConfig;
use crate::error::{CliError, Result};
use crate::tables;
use crate::utils::progress::CliProgressHandler;
use gpfbm::{
    core::models::params::{CoupledParams, DiffusionParams},
    core::models::trajectory::TrackPoint,
    core::utils::statistics::{ColumnSummary, Histogram},
    engine::progress::ProgressReporter,
    workflows::gp_fbm::{GpFbm, ParameterPosterior},
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct PosteriorReport {
    parameters: Vec<String>,
    acceptance: f64,
    proposal_step: f64,
    calibrated: bool,
    summaries: Vec<ColumnSummary>,
    histograms: Vec<Histogram>,
}

impl From<&ParameterPosterior> for PosteriorReport {
    fn from(p: &ParameterPosterior) -> Self {
        Self {
            parameters: p.names.clone(),
            acceptance: p.acceptance,
            proposal_step: p.calibration.step,
            calibrated: p.calibration.converged,
            summaries: p.summaries(),
            histograms: p.histograms(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ParticleReport {
    id: usize,
    source: String,
    samples: usize,
    fit: DiffusionParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    posterior: Option<PosteriorReport>,
}

#[derive(Debug, Serialize)]
struct CoupledReport {
    fit: CoupledParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    posterior: Option<PosteriorReport>,
}

#[derive(Debug, Serialize)]
struct FitReport {
    particles: Vec<ParticleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    coupled: Option<CoupledReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    substrate: Option<Vec<TrackPoint>>,
}

fn sampler_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn analyse(args: &FitArgs, reporter: ProgressReporter<'_>) -> Result<FitReport> {
    let config = PartialFitConfig::load(args.config.as_deref())?.merge_with_cli(args)?;

    let trajectories = args
        .inputs
        .iter()
        .map(|path| {
            info!("Loading trajectory from {:?}", path);
            tables::read_trajectory(path)
        })
        .collect::<Result<Vec<_>>>()?;
    let lengths: Vec<usize> = trajectories.iter().map(|t| t.len()).collect();

    if args.wants_coupled() && trajectories.len() < 2 {
        return Err(CliError::Argument(
            "--coupled and --substrate need at least two trajectory files".to_string(),
        ));
    }

    let mut gp = GpFbm::new(trajectories, config)?.with_reporter(reporter);
    let mut rng = sampler_rng(args.seed);

    let fits = gp.single_model_all()?;
    let mut particles = Vec::with_capacity(fits.len());
    for (id, fit) in fits.into_iter().enumerate() {
        let posterior = if args.posterior {
            Some(PosteriorReport::from(&gp.distrib_single_model(id, &mut rng)?))
        } else {
            None
        };
        particles.push(ParticleReport {
            id,
            source: args.inputs[id].display().to_string(),
            samples: lengths[id],
            fit,
            posterior,
        });
    }

    let coupled = if args.wants_coupled() {
        let fit = gp.coupled_model()?;
        let posterior = if args.posterior {
            Some(PosteriorReport::from(&gp.distrib_coupled_model(&mut rng)?))
        } else {
            None
        };
        Some(CoupledReport { fit, posterior })
    } else {
        None
    };

    let substrate = if args.substrate {
        Some(gp.estimate_substrate_movement()?.points().to_vec())
    } else {
        None
    };

    Ok(FitReport {
        particles,
        coupled,
        substrate,
    })
}

fn write_report(report: &FitReport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report).map_err(|e| CliError::Other(e.into()))?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("✓ Report written to: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub fn run(args: FitArgs) -> Result<()> {
    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    info!(
        "Fitting {} trajectory file(s) (coupled: {}, posterior: {}, substrate: {})",
        args.inputs.len(),
        args.wants_coupled(),
        args.posterior,
        args.substrate
    );
    let report = analyse(&args, reporter)?;

    for particle in &report.particles {
        info!(
            "Particle {}: D = {:.5}, A = {:.4}",
            particle.id, particle.fit.d, particle.fit.a
        );
        if particle.posterior.as_ref().is_some_and(|p| !p.calibrated) {
            warn!(
                "Posterior of particle {} used an uncalibrated proposal; credible intervals are approximate.",
                particle.id
            );
        }
    }

    write_report(&report, args.output.as_deref())
}
