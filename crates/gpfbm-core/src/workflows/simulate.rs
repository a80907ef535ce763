//! Synthetic trajectories drawn from the FBM model, used for calibration
//! runs and demos.

use crate::core::fbm::kernel::fbm_kernel;
use crate::core::models::trajectory::{TrackPoint, Trajectory};
use crate::engine::error::EngineError;
use nalgebra::{Cholesky, DMatrix, Vector2};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::debug;

/// Jitter used for noise-free kernels so that the sample at `t = 0` can be
/// factorized.
const SIMULATION_JITTER: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParams {
    pub d: f64,
    pub a: f64,
    pub num_steps: usize,
    pub time_step: f64,
    /// Localization error per axis. Also written into the error columns.
    pub error: f64,
    pub origin: Vector2<f64>,
}

impl SimulationParams {
    pub fn new(d: f64, a: f64) -> Self {
        Self {
            d,
            a,
            num_steps: 200,
            time_step: 0.5,
            error: 0.05,
            origin: Vector2::zeros(),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if !(self.d > 0.0 && self.d.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "diffusion coefficient must be positive, got {}",
                self.d
            )));
        }
        if !(self.a > 0.0 && self.a < 2.0) {
            return Err(EngineError::InvalidInput(format!(
                "anomalous exponent must lie in (0, 2), got {}",
                self.a
            )));
        }
        if self.num_steps == 0 || !(self.time_step > 0.0) || !(self.error >= 0.0) {
            return Err(EngineError::InvalidInput(
                "simulation needs at least one step, a positive time step and a non-negative error"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn times(&self) -> Vec<f64> {
        (0..self.num_steps).map(|i| i as f64 * self.time_step).collect()
    }
}

/// Draws `columns` independent samples from `N(0, K)`, one per column.
fn draw<R: Rng>(rng: &mut R, covariance: DMatrix<f64>, columns: usize) -> Result<DMatrix<f64>, EngineError> {
    let n = covariance.nrows();
    let chol = Cholesky::new(covariance).ok_or(EngineError::NotPositiveDefinite {
        context: "simulation kernel",
    })?;
    let z = DMatrix::from_fn(n, columns, |_, _| rng.sample::<f64, _>(StandardNormal));
    Ok(chol.l() * z)
}

/// Kernel of the observed positions: FBM plus localization variance.
fn observed_kernel(d: f64, a: f64, times: &[f64], variance: f64) -> DMatrix<f64> {
    let mut k = fbm_kernel(d, a, times, times);
    for i in 0..times.len() {
        k[(i, i)] += variance + SIMULATION_JITTER;
    }
    k
}

fn assemble(params: &SimulationParams, times: &[f64], xy: &DMatrix<f64>) -> Result<Trajectory, EngineError> {
    let points = times
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            TrackPoint::new(
                i as u32,
                t,
                params.origin + Vector2::new(xy[(i, 0)], xy[(i, 1)]),
                Vector2::new(params.error, params.error),
            )
        })
        .collect();
    Trajectory::new(points).map_err(|source| EngineError::Trajectory { id: 0, source })
}

/// One noisy 2D FBM trajectory with frames `0..num_steps` and times
/// `frame · time_step`.
pub fn fbm_trajectory<R: Rng>(rng: &mut R, params: &SimulationParams) -> Result<Trajectory, EngineError> {
    params.validate()?;
    let times = params.times();
    let kernel = observed_kernel(params.d, params.a, &times, params.error * params.error);
    let xy = draw(rng, kernel, 2)?;
    debug!(d = params.d, a = params.a, steps = params.num_steps, "Simulated FBM trajectory");
    assemble(params, &times, &xy)
}

/// Trajectories that each follow their own FBM and all share one substrate
/// FBM `(dr, ar)` added on top. Every trajectory uses the time grid of the
/// first entry in `particles`.
pub fn coupled_trajectories<R: Rng>(
    rng: &mut R,
    particles: &[SimulationParams],
    dr: f64,
    ar: f64,
) -> Result<Vec<Trajectory>, EngineError> {
    let first = particles.first().ok_or_else(|| {
        EngineError::InvalidInput("at least one particle is needed".to_string())
    })?;
    SimulationParams { d: dr, a: ar, ..*first }.validate()?;

    let times = first.times();
    let substrate = draw(rng, observed_kernel(dr, ar, &times, 0.0), 2)?;

    particles
        .iter()
        .map(|p| {
            let p = SimulationParams {
                num_steps: first.num_steps,
                time_step: first.time_step,
                ..*p
            };
            p.validate()?;
            let own = draw(rng, observed_kernel(p.d, p.a, &times, p.error * p.error), 2)?;
            assemble(&p, &times, &(own + &substrate))
        })
        .collect()
}
