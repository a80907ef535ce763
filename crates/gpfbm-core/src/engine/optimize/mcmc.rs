use super::{Objective, OptimizeError, sanitize};
use crate::engine::cancel::CancellationToken;
use crate::engine::config::SamplerConfig;
use crate::engine::progress::{Progress, ProgressReporter};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, warn};

/// Outcome of the proposal-width tuning that precedes sampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub step: f64,
    pub batches: usize,
    pub acceptance: f64,
    /// `false` when the batch limit was hit before the acceptance fraction
    /// entered the target band. Credible intervals are then approximate.
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct Posterior {
    /// One row per recorded chain state, one column per parameter.
    pub samples: DMatrix<f64>,
    pub calibration: Calibration,
    pub acceptance: f64,
}

struct Chain {
    position: DVector<f64>,
    log_likelihood: f64,
    proposal: DVector<f64>,
}

/// Random-walk Metropolis sampler with an isotropic Gaussian proposal.
///
/// The objective is read as a negative log-likelihood. The generator is owned
/// by the sampler, so callers decide how it is seeded.
pub struct MetropolisSampler<R: Rng> {
    config: SamplerConfig,
    rng: R,
    cancel: Option<CancellationToken>,
}

impl<R: Rng> MetropolisSampler<R> {
    pub fn new(config: SamplerConfig, rng: R) -> Self {
        Self {
            config,
            rng,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self, iterations: usize) -> Result<(), OptimizeError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(OptimizeError::Cancelled { iterations }),
            _ => Ok(()),
        }
    }

    /// Proposes one move and applies the Metropolis rule. Returns whether the
    /// proposal was accepted.
    fn step<O: Objective + ?Sized>(&mut self, objective: &O, chain: &mut Chain, width: f64) -> bool {
        for (p, x) in chain.proposal.iter_mut().zip(chain.position.iter()) {
            let z: f64 = self.rng.sample(StandardNormal);
            *p = x + width * z;
        }
        let log_likelihood = -sanitize(objective.weight(&chain.proposal));
        let u: f64 = self.rng.r#gen();
        if u < (log_likelihood - chain.log_likelihood).exp() {
            std::mem::swap(&mut chain.position, &mut chain.proposal);
            chain.log_likelihood = log_likelihood;
            true
        } else {
            false
        }
    }

    fn calibrate<O: Objective + ?Sized>(
        &mut self,
        objective: &O,
        chain: &mut Chain,
    ) -> Result<Calibration, OptimizeError> {
        let cfg = self.config;
        let mut width = cfg.initial_step;
        let mut acceptance = 0.0;
        let mut steps = 0;

        for batch in 1..=cfg.max_calibration_batches {
            let mut accepted = 0usize;
            for _ in 0..cfg.batch_size {
                self.check_cancelled(steps)?;
                if self.step(objective, chain, width) {
                    accepted += 1;
                }
                steps += 1;
            }

            acceptance = accepted as f64 / cfg.batch_size as f64;
            if (acceptance - cfg.target_acceptance).abs() < cfg.acceptance_tolerance {
                debug!(batch, width, acceptance, "Proposal width calibrated");
                return Ok(Calibration {
                    step: width,
                    batches: batch,
                    acceptance,
                    converged: true,
                });
            }
            width = (width * acceptance / cfg.rescale_reference).max(cfg.min_step);
        }

        warn!(
            batches = cfg.max_calibration_batches,
            width, acceptance, "Proposal width never reached the target acceptance band"
        );
        Ok(Calibration {
            step: width,
            batches: cfg.max_calibration_batches,
            acceptance,
            converged: false,
        })
    }

    /// Calibrates the proposal width around `start`, then records
    /// `sample_size` chain states.
    pub fn sample<O: Objective + ?Sized>(
        &mut self,
        objective: &O,
        start: &DVector<f64>,
        sample_size: usize,
        reporter: &ProgressReporter,
    ) -> Result<Posterior, OptimizeError> {
        let n = start.len();
        if n == 0 {
            return Err(OptimizeError::EmptyParameters);
        }
        let log_likelihood = -sanitize(objective.weight(start));
        if !log_likelihood.is_finite() {
            return Err(OptimizeError::InvalidStart(
                "objective is not finite at the starting point".to_string(),
            ));
        }

        let mut chain = Chain {
            position: start.clone(),
            log_likelihood,
            proposal: start.clone(),
        };

        let calibration = self.calibrate(objective, &mut chain)?;

        let mut samples = DMatrix::zeros(sample_size, n);
        let mut accepted = 0usize;
        let stride = (sample_size / 100).max(1);
        reporter.report(Progress::TaskStart {
            total_steps: sample_size.div_ceil(stride) as u64,
        });

        for row in 0..sample_size {
            self.check_cancelled(row)?;
            if self.step(objective, &mut chain, calibration.step) {
                accepted += 1;
            }
            samples.set_row(row, &chain.position.transpose());
            if (row + 1) % stride == 0 || row + 1 == sample_size {
                reporter.report(Progress::TaskIncrement);
            }
        }
        reporter.report(Progress::TaskFinish);

        let acceptance = if sample_size > 0 {
            accepted as f64 / sample_size as f64
        } else {
            0.0
        };
        debug!(sample_size, acceptance, "Posterior sampling finished");

        Ok(Posterior {
            samples,
            calibration,
            acceptance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gaussian(x: &DVector<f64>) -> f64 {
        0.5 * x.norm_squared()
    }

    #[test]
    fn samples_a_standard_normal() {
        let mut sampler = MetropolisSampler::new(SamplerConfig::default(), StdRng::seed_from_u64(7));
        let start = DVector::from_vec(vec![0.0, 0.0]);
        let posterior = sampler
            .sample(&gaussian, &start, 20_000, &ProgressReporter::new())
            .unwrap();

        assert_eq!(posterior.samples.shape(), (20_000, 2));
        assert!(posterior.calibration.converged);
        assert!(posterior.calibration.step >= 0.001);
        assert!((0.15..=0.35).contains(&posterior.calibration.acceptance));
        assert!(
            (0.15..=0.35).contains(&posterior.acceptance),
            "acceptance {}",
            posterior.acceptance
        );

        for col in 0..2 {
            let column = posterior.samples.column(col);
            let mean = column.mean();
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 20_000.0;
            assert!(mean.abs() < 0.15, "mean {mean}");
            assert!((var.sqrt() - 1.0).abs() < 0.15, "sd {}", var.sqrt());
        }
    }

    #[test]
    fn same_seed_gives_identical_chains() {
        let start = DVector::from_vec(vec![0.3]);
        let run = || {
            MetropolisSampler::new(SamplerConfig::default(), StdRng::seed_from_u64(42))
                .sample(&gaussian, &start, 500, &ProgressReporter::new())
                .unwrap()
                .samples
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn unreachable_band_keeps_the_step_floor_and_flags_the_calibration() {
        let config = SamplerConfig {
            max_calibration_batches: 5,
            batch_size: 200,
            ..SamplerConfig::default()
        };
        let steep = |x: &DVector<f64>| 1e12 * x.norm_squared();
        let mut sampler = MetropolisSampler::new(config, StdRng::seed_from_u64(3));
        let posterior = sampler
            .sample(&steep, &DVector::zeros(3), 100, &ProgressReporter::new())
            .unwrap();
        assert!(!posterior.calibration.converged);
        assert_eq!(posterior.calibration.batches, 5);
        assert!((posterior.calibration.step - 0.001).abs() < 1e-15);
        assert_eq!(posterior.samples.nrows(), 100);
    }

    #[test]
    fn infeasible_start_is_rejected() {
        let objective = |_: &DVector<f64>| f64::INFINITY;
        let mut sampler = MetropolisSampler::new(SamplerConfig::default(), StdRng::seed_from_u64(1));
        let result = sampler.sample(&objective, &DVector::zeros(2), 10, &ProgressReporter::new());
        assert!(matches!(result, Err(OptimizeError::InvalidStart(_))));
    }

    #[test]
    fn cancellation_aborts_sampling() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sampler = MetropolisSampler::new(SamplerConfig::default(), StdRng::seed_from_u64(1))
            .with_cancellation(token);
        let result = sampler.sample(&gaussian, &DVector::zeros(1), 10, &ProgressReporter::new());
        assert_eq!(result.unwrap_err(), OptimizeError::Cancelled { iterations: 0 });
    }

    #[test]
    fn progress_reports_percent_increments() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let increments = AtomicUsize::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if matches!(event, Progress::TaskIncrement) {
                increments.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let mut sampler = MetropolisSampler::new(SamplerConfig::default(), StdRng::seed_from_u64(9));
        sampler
            .sample(&gaussian, &DVector::zeros(1), 1000, &reporter)
            .unwrap();
        drop(reporter);
        assert_eq!(increments.into_inner(), 100);
    }
}
