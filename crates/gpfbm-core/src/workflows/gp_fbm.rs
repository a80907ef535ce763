use crate::core::fbm::kernel::{KERNEL_JITTER, add_noise, factorize, fbm_kernel, spd_inverse};
use crate::core::fbm::regression::{Prediction, predict};
use crate::core::models::params::{CoupledParams, DiffusionParams};
use crate::core::models::trajectory::{TrackPoint, Trajectory};
use crate::core::utils::reparam::{decode_a, decode_d, encode_a, encode_d};
use crate::core::utils::statistics::{self, ColumnSummary, Histogram};
use crate::engine::cancel::CancellationToken;
use crate::engine::config::FitConfig;
use crate::engine::error::EngineError;
use crate::engine::optimize::mcmc::{Calibration, MetropolisSampler};
use crate::engine::optimize::simplex::NelderMead;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::tasks::likelihood::{
    CoupledData, PreparedTrack, coupled_weight, decode_coupled, single_weight,
};
use nalgebra::{DMatrix, DVector, Vector2};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Posterior draws of a fit, back-transformed to physical units.
#[derive(Debug, Clone)]
pub struct ParameterPosterior {
    /// Column labels, e.g. `D`, `A`, `mu_x`, `mu_y`.
    pub names: Vec<String>,
    pub samples: DMatrix<f64>,
    pub calibration: Calibration,
    pub acceptance: f64,
}

impl ParameterPosterior {
    pub fn summaries(&self) -> Vec<ColumnSummary> {
        statistics::summarize(&self.samples)
    }

    pub fn histograms(&self) -> Vec<Histogram> {
        statistics::histograms(&self.samples)
    }
}

#[derive(Debug, Clone)]
struct CoupledFit {
    params: CoupledParams,
    data: CoupledData,
}

/// Gaussian-process inference of fractional Brownian motion parameters for
/// one or more trajectories.
///
/// All trajectories are shifted so the earliest sample across all of them
/// sits at `t = 0`. Single and coupled fits are cached on the instance.
pub struct GpFbm<'a> {
    tracks: Vec<PreparedTrack>,
    origin: f64,
    config: FitConfig,
    cancel: CancellationToken,
    reporter: ProgressReporter<'a>,
    single: Vec<Option<DiffusionParams>>,
    coupled: Option<CoupledFit>,
}

impl<'a> GpFbm<'a> {
    pub fn new(trajectories: Vec<Trajectory>, config: FitConfig) -> Result<Self, EngineError> {
        if trajectories.is_empty() {
            return Err(EngineError::InvalidInput(
                "at least one trajectory is required".to_string(),
            ));
        }

        let origin = trajectories
            .iter()
            .map(|t| t.start_time())
            .fold(f64::INFINITY, f64::min);
        let tracks: Vec<PreparedTrack> = trajectories
            .iter()
            .map(|t| PreparedTrack::new(t, origin))
            .collect();

        debug!(
            particles = tracks.len(),
            origin, "Prepared trajectories for GP-FBM inference"
        );

        Ok(Self {
            single: vec![None; tracks.len()],
            tracks,
            origin,
            config,
            cancel: CancellationToken::new(),
            reporter: ProgressReporter::new(),
            coupled: None,
        })
    }

    /// Builds the model from numeric tables with columns
    /// `frame, time, pos_x, pos_y, err_x, err_y`.
    pub fn from_matrices(tables: &[DMatrix<f64>], config: FitConfig) -> Result<Self, EngineError> {
        let trajectories = tables
            .iter()
            .enumerate()
            .map(|(id, m)| {
                Trajectory::from_matrix(m).map_err(|source| EngineError::Trajectory { id, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(trajectories, config)
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter<'a>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn num_particles(&self) -> usize {
        self.tracks.len()
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// A handle that can stop running fits from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requests that any running optimization or sampling abandons its work.
    /// Only the run in flight is affected; the next public fit call starts
    /// with a cleared token.
    pub fn stop(&self) {
        info!("Stop requested for GP-FBM inference");
        self.cancel.cancel();
    }

    fn begin_run(&self) {
        self.cancel.reset();
    }

    fn check_id(&self, id: usize) -> Result<(), EngineError> {
        if id >= self.tracks.len() {
            return Err(EngineError::ParticleOutOfRange {
                id,
                count: self.tracks.len(),
            });
        }
        Ok(())
    }

    fn simplex(&self) -> NelderMead {
        NelderMead::new(&self.config.simplex).with_cancellation(self.cancel.clone())
    }

    fn fit_single(&self, id: usize) -> Result<DiffusionParams, EngineError> {
        let track = &self.tracks[id];
        let required = self.config.min_size_per_traj;
        if track.len() < required {
            return Err(EngineError::TrajectoryTooShort {
                id,
                len: track.len(),
                required,
            });
        }

        let first = track.first_position();
        let start = DVector::from_vec(vec![0.5f64.ln(), 0.5f64.ln(), first.x, first.y]);
        let objective = |p: &DVector<f64>| single_weight(track, p);

        let outcome = self
            .simplex()
            .minimize(&objective, &start)
            .map_err(|e| EngineError::from_optimize("single model", e))?;

        let p = &outcome.position;
        let params = DiffusionParams::new(decode_d(p[0]), decode_a(p[1]), Vector2::new(p[2], p[3]));
        info!(
            id,
            d = params.d,
            a = params.a,
            iterations = outcome.iterations,
            "Single-particle model converged"
        );
        Ok(params)
    }

    /// Fits `(D, A, mu)` of trajectory `id` on its own.
    #[instrument(skip_all, name = "gp_fbm_single_model", fields(id))]
    pub fn single_model(&mut self, id: usize) -> Result<DiffusionParams, EngineError> {
        self.begin_run();
        self.cached_single(id)
    }

    fn cached_single(&mut self, id: usize) -> Result<DiffusionParams, EngineError> {
        self.check_id(id)?;
        if let Some(params) = self.single[id] {
            return Ok(params);
        }
        let params = self.fit_single(id)?;
        self.single[id] = Some(params);
        Ok(params)
    }

    /// Fits every trajectory independently, in parallel when the `parallel`
    /// feature is enabled. Successful fits are cached even if another one
    /// fails; the first failure is returned.
    #[instrument(skip_all, name = "gp_fbm_single_model_all")]
    pub fn single_model_all(&mut self) -> Result<Vec<DiffusionParams>, EngineError> {
        self.begin_run();
        self.fit_all_singles()
    }

    fn fit_all_singles(&mut self) -> Result<Vec<DiffusionParams>, EngineError> {
        let pending: Vec<usize> = (0..self.tracks.len())
            .filter(|&id| self.single[id].is_none())
            .collect();

        if !pending.is_empty() {
            self.reporter.report(Progress::PhaseStart {
                name: "Single-particle fits",
            });
            self.reporter.report(Progress::TaskStart {
                total_steps: pending.len() as u64,
            });

            let this = &*self;
            let fit = |&id: &usize| {
                let result = this.fit_single(id);
                this.reporter.report(Progress::TaskIncrement);
                (id, result)
            };

            #[cfg(feature = "parallel")]
            let results: Vec<(usize, Result<DiffusionParams, EngineError>)> =
                pending.par_iter().map(fit).collect();
            #[cfg(not(feature = "parallel"))]
            let results: Vec<(usize, Result<DiffusionParams, EngineError>)> =
                pending.iter().map(fit).collect();

            self.reporter.report(Progress::TaskFinish);
            self.reporter.report(Progress::PhaseFinish);

            let mut first_error = None;
            for (id, result) in results {
                match result {
                    Ok(params) => self.single[id] = Some(params),
                    Err(e) => {
                        warn!(id, error = %e, "Single-particle fit failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        self.single
            .iter()
            .map(|p| p.ok_or_else(|| EngineError::Internal("single fit missing from cache".to_string())))
            .collect()
    }

    fn common_frames(&self) -> BTreeSet<u32> {
        let mut iter = self.tracks.iter();
        let mut common: BTreeSet<u32> = iter
            .next()
            .map(|t| t.frames().iter().copied().collect())
            .unwrap_or_default();
        for track in iter {
            let frames: BTreeSet<u32> = track.frames().iter().copied().collect();
            common.retain(|f| frames.contains(f));
        }
        common
    }

    fn fit_coupled(&mut self) -> Result<&CoupledFit, EngineError> {
        let count = self.tracks.len();
        if count < 2 {
            return Err(EngineError::NotEnoughParticles(count));
        }

        let singles = self.fit_all_singles()?;

        let common = self.common_frames();
        let required = self.config.min_size_per_traj;
        if common.len() < required {
            return Err(EngineError::InsufficientOverlap {
                common: common.len(),
                required,
            });
        }

        let tracks: Vec<PreparedTrack> = self
            .tracks
            .iter()
            .zip(&singles)
            .map(|(t, s)| t.restrict(&common).centered(&s.mu))
            .collect();
        if tracks.iter().any(|t| t.len() != common.len()) {
            return Err(EngineError::InvalidInput(
                "a trajectory reports the same frame more than once".to_string(),
            ));
        }
        let data = CoupledData::new(tracks);

        let mut start: Vec<f64> = singles
            .iter()
            .flat_map(|s| [encode_d(s.d), encode_a(s.a)])
            .collect();
        start.extend([encode_d(1.0), encode_a(1.0)]);
        let start = DVector::from_vec(start);

        self.reporter.report(Progress::PhaseStart {
            name: "Coupled fit",
        });
        let objective = |p: &DVector<f64>| coupled_weight(&data, p);
        let outcome = self
            .simplex()
            .minimize(&objective, &start)
            .map_err(|e| EngineError::from_optimize("coupled model", e));
        self.reporter.report(Progress::PhaseFinish);
        let outcome = outcome?;

        let (pairs, (dr, ar)) = decode_coupled(&outcome.position);
        let params = CoupledParams {
            particles: pairs
                .iter()
                .zip(&singles)
                .map(|(&(d, a), s)| DiffusionParams::new(d, a, s.mu))
                .collect(),
            dr,
            ar,
        };
        info!(
            particles = count,
            common_frames = common.len(),
            dr,
            ar,
            iterations = outcome.iterations,
            "Coupled model converged"
        );

        Ok(&*self.coupled.insert(CoupledFit { params, data }))
    }

    /// Jointly fits every particle's private motion and the shared substrate
    /// motion over the frames common to all trajectories.
    #[instrument(skip_all, name = "gp_fbm_coupled_model")]
    pub fn coupled_model(&mut self) -> Result<CoupledParams, EngineError> {
        self.begin_run();
        self.cached_coupled()
    }

    fn cached_coupled(&mut self) -> Result<CoupledParams, EngineError> {
        if let Some(fit) = &self.coupled {
            return Ok(fit.params.clone());
        }
        self.fit_coupled().map(|fit| fit.params.clone())
    }

    /// Samples the posterior of `(D, A, mu_x, mu_y)` for trajectory `id`
    /// around its single-model optimum.
    #[instrument(skip_all, name = "gp_fbm_distrib_single_model", fields(id))]
    pub fn distrib_single_model<R: Rng>(
        &mut self,
        id: usize,
        rng: &mut R,
    ) -> Result<ParameterPosterior, EngineError> {
        self.begin_run();
        let params = self.cached_single(id)?;
        let track = &self.tracks[id];
        let start = DVector::from_vec(vec![
            encode_d(params.d),
            encode_a(params.a),
            params.mu.x,
            params.mu.y,
        ]);
        let objective = |p: &DVector<f64>| single_weight(track, p);

        self.reporter.report(Progress::PhaseStart {
            name: "Single-particle posterior",
        });
        let posterior = MetropolisSampler::new(self.config.sampler, rng)
            .with_cancellation(self.cancel.clone())
            .sample(&objective, &start, self.config.sampler.sample_size, &self.reporter)
            .map_err(|e| EngineError::from_optimize("single model posterior", e));
        self.reporter.report(Progress::PhaseFinish);
        let posterior = posterior?;

        let mut samples = posterior.samples;
        for mut row in samples.row_iter_mut() {
            row[0] = decode_d(row[0]);
            row[1] = decode_a(row[1]);
        }

        Ok(ParameterPosterior {
            names: ["D", "A", "mu_x", "mu_y"].map(String::from).to_vec(),
            samples,
            calibration: posterior.calibration,
            acceptance: posterior.acceptance,
        })
    }

    /// Samples the joint posterior of the coupled model. Columns are
    /// `D_0, A_0, …, D_{P-1}, A_{P-1}, DR, AR`.
    #[instrument(skip_all, name = "gp_fbm_distrib_coupled_model")]
    pub fn distrib_coupled_model<R: Rng>(&mut self, rng: &mut R) -> Result<ParameterPosterior, EngineError> {
        self.begin_run();
        self.cached_coupled()?;
        let Some(fit) = &self.coupled else {
            return Err(EngineError::Internal("coupled fit missing from cache".to_string()));
        };

        let params = &fit.params;
        let mut start: Vec<f64> = params
            .particles
            .iter()
            .flat_map(|p| [encode_d(p.d), encode_a(p.a)])
            .collect();
        start.extend([encode_d(params.dr), encode_a(params.ar)]);
        let start = DVector::from_vec(start);
        let objective = |p: &DVector<f64>| coupled_weight(&fit.data, p);

        self.reporter.report(Progress::PhaseStart {
            name: "Coupled posterior",
        });
        let posterior = MetropolisSampler::new(self.config.sampler, rng)
            .with_cancellation(self.cancel.clone())
            .sample(&objective, &start, self.config.sampler.sample_size, &self.reporter)
            .map_err(|e| EngineError::from_optimize("coupled model posterior", e));
        self.reporter.report(Progress::PhaseFinish);
        let posterior = posterior?;

        let mut samples = posterior.samples;
        for mut row in samples.row_iter_mut() {
            for pair in 0..row.ncols() / 2 {
                row[2 * pair] = decode_d(row[2 * pair]);
                row[2 * pair + 1] = decode_a(row[2 * pair + 1]);
            }
        }

        let count = params.particles.len();
        let mut names: Vec<String> = (0..count)
            .flat_map(|k| [format!("D_{k}"), format!("A_{k}")])
            .collect();
        names.extend(["DR".to_string(), "AR".to_string()]);

        Ok(ParameterPosterior {
            names,
            samples,
            calibration: posterior.calibration,
            acceptance: posterior.acceptance,
        })
    }

    fn shifted_times(&self, times: &[f64]) -> Result<Vec<f64>, EngineError> {
        times
            .iter()
            .map(|&t| {
                let s = t - self.origin;
                if s.is_finite() && s >= 0.0 {
                    Ok(s)
                } else {
                    Err(EngineError::InvalidInput(format!(
                        "time {t} lies before the first observation ({})",
                        self.origin
                    )))
                }
            })
            .collect()
    }

    /// Posterior of trajectory `id`'s centered motion at `times` (already
    /// shifted to the model origin), per axis.
    fn predict_track(
        &self,
        id: usize,
        params: &DiffusionParams,
        times: &[f64],
    ) -> Result<[Prediction; 2], EngineError> {
        let track = &self.tracks[id];
        let (d, a) = (params.d, params.a);
        let base = fbm_kernel(d, a, track.times(), track.times());
        let cross = fbm_kernel(d, a, track.times(), times);
        let prior = DVector::from_iterator(times.len(), times.iter().map(|t| 2.0 * d * t.powf(a)));

        let solve = |axis: usize| -> Result<Prediction, EngineError> {
            let mut kernel = base.clone();
            add_noise(&mut kernel, track.variances(axis));
            let chol = factorize(kernel).ok_or(EngineError::NotPositiveDefinite {
                context: "trajectory kernel",
            })?;
            let centered = track.positions(axis).add_scalar(-params.mu[axis]);
            Ok(predict(&chol, &cross, &prior, &centered))
        };
        Ok([solve(0)?, solve(1)?])
    }

    /// Expected trajectory of particle `id` at `times` (in the caller's time
    /// coordinates), by Gaussian-process regression on its single-model fit.
    /// Error columns hold the posterior standard deviation; frames are the
    /// indices into `times`.
    #[instrument(skip_all, name = "gp_fbm_avg_trajectory", fields(id))]
    pub fn calc_avg_trajectory(&mut self, times: &[f64], id: usize) -> Result<Trajectory, EngineError> {
        self.begin_run();
        let params = self.cached_single(id)?;
        if times.is_empty() {
            return Err(EngineError::InvalidInput("time grid is empty".to_string()));
        }
        let shifted = self.shifted_times(times)?;
        let [px, py] = self.predict_track(id, &params, &shifted)?;

        let points = times
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                TrackPoint::new(
                    i as u32,
                    t,
                    Vector2::new(px.mean[i], py.mean[i]) + params.mu,
                    Vector2::new(px.variance[i].sqrt(), py.variance[i].sqrt()),
                )
            })
            .collect();
        Trajectory::new(points).map_err(|source| EngineError::Trajectory { id, source })
    }

    /// Union of all frames with their (shifted) acquisition times.
    fn frame_grid(&self) -> BTreeMap<u32, f64> {
        let mut grid = BTreeMap::new();
        for track in &self.tracks {
            for (&f, &t) in track.frames().iter().zip(track.times()) {
                grid.entry(f).or_insert(t);
            }
        }
        grid
    }

    /// Estimates the shared substrate motion on the union of all frames by
    /// combining every particle's averaged trajectory with the coupled
    /// kernels. Error columns hold the posterior standard deviation.
    #[instrument(skip_all, name = "gp_fbm_substrate")]
    pub fn estimate_substrate_movement(&mut self) -> Result<Trajectory, EngineError> {
        self.begin_run();
        let coupled = self.cached_coupled()?;
        let singles = self.fit_all_singles()?;

        let grid = self.frame_grid();
        let frames: Vec<u32> = grid.keys().copied().collect();
        let times: Vec<f64> = grid.values().copied().collect();
        let n = times.len();

        let mut substrate_kernel = fbm_kernel(coupled.dr, coupled.ar, &times, &times);
        for i in 0..n {
            substrate_kernel[(i, i)] += KERNEL_JITTER;
        }
        let substrate_precision = spd_inverse(substrate_kernel).ok_or(EngineError::NotPositiveDefinite {
            context: "substrate kernel",
        })?;

        let mut precision = [substrate_precision.clone(), substrate_precision];
        let mut weighted = [DVector::<f64>::zeros(n), DVector::<f64>::zeros(n)];

        for (id, single) in singles.iter().enumerate() {
            let predictions = self.predict_track(id, single, &times)?;
            let own = &coupled.particles[id];
            let base = fbm_kernel(own.d, own.a, &times, &times);

            for (axis, prediction) in predictions.iter().enumerate() {
                let mut kernel = base.clone();
                add_noise(&mut kernel, prediction.variance.as_slice());
                let inverse = spd_inverse(kernel).ok_or(EngineError::NotPositiveDefinite {
                    context: "particle kernel",
                })?;
                weighted[axis] += &inverse * &prediction.mean;
                precision[axis] += inverse;
            }
        }

        let mut estimate = Vec::with_capacity(2);
        for axis in 0..2 {
            let covariance = precision[axis]
                .clone()
                .try_inverse()
                .ok_or(EngineError::NotPositiveDefinite {
                    context: "substrate posterior",
                })?;
            let mean = &covariance * &weighted[axis];
            let sd = covariance.diagonal().map(|v| v.max(0.0).sqrt());
            estimate.push((mean, sd));
        }

        let points = (0..n)
            .map(|i| {
                TrackPoint::new(
                    frames[i],
                    times[i] + self.origin,
                    Vector2::new(estimate[0].0[i], estimate[1].0[i]),
                    Vector2::new(estimate[0].1[i], estimate[1].1[i]),
                )
            })
            .collect();
        info!(frames = n, "Substrate movement estimated");
        Trajectory::new(points).map_err(|source| EngineError::Trajectory { id: 0, source })
    }
}
