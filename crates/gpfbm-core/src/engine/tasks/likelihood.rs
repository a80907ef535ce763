use crate::core::fbm::kernel::{add_noise, factorize, fbm_kernel, neg_log_likelihood};
use crate::core::models::trajectory::Trajectory;
use crate::core::utils::reparam::{decode_a, decode_d, flat_prior_penalty};
use nalgebra::{DMatrix, DVector, Vector2};
use std::collections::BTreeSet;
use tracing::trace;

/// A trajectory in the form the likelihoods consume: times relative to a
/// shared origin, one position vector per axis and localization variances.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTrack {
    frames: Vec<u32>,
    times: Vec<f64>,
    positions: [DVector<f64>; 2],
    variances: [Vec<f64>; 2],
}

impl PreparedTrack {
    pub fn new(trajectory: &Trajectory, origin: f64) -> Self {
        let points = trajectory.points();
        let axis = |f: fn(&Vector2<f64>) -> f64| -> DVector<f64> {
            DVector::from_iterator(points.len(), points.iter().map(|p| f(&p.position)))
        };
        Self {
            frames: points.iter().map(|p| p.frame).collect(),
            times: points.iter().map(|p| p.time - origin).collect(),
            positions: [axis(|v: &Vector2<f64>| v.x), axis(|v: &Vector2<f64>| v.y)],
            variances: [
                points.iter().map(|p| p.error.x * p.error.x).collect(),
                points.iter().map(|p| p.error.y * p.error.y).collect(),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn frames(&self) -> &[u32] {
        &self.frames
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn positions(&self, axis: usize) -> &DVector<f64> {
        &self.positions[axis]
    }

    pub fn variances(&self, axis: usize) -> &[f64] {
        &self.variances[axis]
    }

    pub fn first_position(&self) -> Vector2<f64> {
        Vector2::new(self.positions[0][0], self.positions[1][0])
    }

    /// Keeps only the samples whose frame is in `frames`.
    pub fn restrict(&self, frames: &BTreeSet<u32>) -> Self {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| frames.contains(&self.frames[i]))
            .collect();
        let pick = |v: &DVector<f64>| DVector::from_iterator(keep.len(), keep.iter().map(|&i| v[i]));
        Self {
            frames: keep.iter().map(|&i| self.frames[i]).collect(),
            times: keep.iter().map(|&i| self.times[i]).collect(),
            positions: [pick(&self.positions[0]), pick(&self.positions[1])],
            variances: [
                keep.iter().map(|&i| self.variances[0][i]).collect(),
                keep.iter().map(|&i| self.variances[1][i]).collect(),
            ],
        }
    }

    /// Subtracts `mu` from every position.
    pub fn centered(&self, mu: &Vector2<f64>) -> Self {
        let mut out = self.clone();
        out.positions[0].add_scalar_mut(-mu.x);
        out.positions[1].add_scalar_mut(-mu.y);
        out
    }
}

/// Negative log-likelihood of one track plus flat-prior correction.
///
/// `params` is `[ln D, logit(A/2), mu_x, mu_y]`. Degenerate kernels give
/// `+∞`.
pub fn single_weight(track: &PreparedTrack, params: &DVector<f64>) -> f64 {
    let (x_d, x_a) = (params[0], params[1]);
    let d = decode_d(x_d);
    let a = decode_a(x_a);
    let base = fbm_kernel(d, a, track.times(), track.times());

    let mut weight = 0.0;
    for axis in 0..2 {
        let mut kernel = base.clone();
        add_noise(&mut kernel, track.variances(axis));
        let Some(chol) = factorize(kernel) else {
            trace!(d, a, axis, "Single-track kernel is not positive definite");
            return f64::INFINITY;
        };
        let centered = track.positions(axis).add_scalar(-params[2 + axis]);
        weight += neg_log_likelihood(&chol, &centered);
    }

    weight + flat_prior_penalty(x_d, x_a)
}

/// Tracks restricted to their common frames and centered on their
/// single-model means, ready for the joint likelihood.
#[derive(Debug, Clone)]
pub struct CoupledData {
    tracks: Vec<PreparedTrack>,
    positions: [DVector<f64>; 2],
    variances: [Vec<f64>; 2],
}

impl CoupledData {
    /// All tracks must share the same frames in the same order.
    pub fn new(tracks: Vec<PreparedTrack>) -> Self {
        let total: usize = tracks.iter().map(|t| t.len()).sum();
        let stack = |axis: usize| {
            DVector::from_iterator(
                total,
                tracks.iter().flat_map(|t| t.positions(axis).iter().copied()),
            )
        };
        let noise = |axis: usize| {
            tracks
                .iter()
                .flat_map(|t| t.variances(axis).iter().copied())
                .collect::<Vec<_>>()
        };
        let positions = [stack(0), stack(1)];
        let variances = [noise(0), noise(1)];
        Self {
            tracks,
            positions,
            variances,
        }
    }

    pub fn num_particles(&self) -> usize {
        self.tracks.len()
    }

    pub fn samples_per_track(&self) -> usize {
        self.tracks.first().map_or(0, |t| t.len())
    }

    pub fn tracks(&self) -> &[PreparedTrack] {
        &self.tracks
    }

    /// Shared time axis, taken from the first track.
    pub fn times(&self) -> &[f64] {
        self.tracks.first().map_or(&[][..], |t| t.times())
    }
}

/// Covariance of `P` tracks that each follow their own FBM plus a shared
/// substrate FBM: diagonal blocks `K_k + K_R`, off-diagonal blocks `K_R`.
pub fn coupled_kernel(times: &[f64], particles: &[(f64, f64)], substrate: (f64, f64)) -> DMatrix<f64> {
    let n = times.len();
    let p = particles.len();
    let shared = fbm_kernel(substrate.0, substrate.1, times, times);

    let mut kernel = DMatrix::zeros(n * p, n * p);
    for (row, &(d, a)) in particles.iter().enumerate() {
        let own = fbm_kernel(d, a, times, times);
        kernel
            .view_mut((row * n, row * n), (n, n))
            .copy_from(&(own + &shared));
        for col in (row + 1)..p {
            kernel.view_mut((row * n, col * n), (n, n)).copy_from(&shared);
            kernel.view_mut((col * n, row * n), (n, n)).copy_from(&shared);
        }
    }
    kernel
}

/// Decodes the interleaved coupled parameter vector
/// `[ln D_0, x_A0, …, ln D_R, x_AR]` into physical pairs.
pub fn decode_coupled(params: &DVector<f64>) -> (Vec<(f64, f64)>, (f64, f64)) {
    let pairs: Vec<(f64, f64)> = params
        .as_slice()
        .chunks_exact(2)
        .map(|c| (decode_d(c[0]), decode_a(c[1])))
        .collect();
    match pairs.split_last() {
        Some((substrate, particles)) => (particles.to_vec(), *substrate),
        None => (Vec::new(), (1.0, 1.0)),
    }
}

/// Joint negative log-likelihood of the coupled model with flat priors on
/// every `(D, A)` pair.
pub fn coupled_weight(data: &CoupledData, params: &DVector<f64>) -> f64 {
    let (particles, substrate) = decode_coupled(params);
    let base = coupled_kernel(data.times(), &particles, substrate);

    let mut weight = 0.0;
    for axis in 0..2 {
        let mut kernel = base.clone();
        add_noise(&mut kernel, &data.variances[axis]);
        let Some(chol) = factorize(kernel) else {
            trace!(axis, "Coupled kernel is not positive definite");
            return f64::INFINITY;
        };
        weight += neg_log_likelihood(&chol, &data.positions[axis]);
    }

    for pair in params.as_slice().chunks_exact(2) {
        weight += flat_prior_penalty(pair[0], pair[1]);
    }
    weight
}
