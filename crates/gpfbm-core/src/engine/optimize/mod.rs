pub mod mcmc;
pub mod simplex;

use nalgebra::DVector;
use thiserror::Error;

/// A scalar cost over a parameter vector. Lower is better.
///
/// Implementations may return `f64::INFINITY` for infeasible points; NaN is
/// treated the same way by the optimizers.
pub trait Objective {
    fn weight(&self, params: &DVector<f64>) -> f64;
}

impl<F> Objective for F
where
    F: Fn(&DVector<f64>) -> f64,
{
    #[inline]
    fn weight(&self, params: &DVector<f64>) -> f64 {
        self(params)
    }
}

#[inline]
pub(crate) fn sanitize(weight: f64) -> f64 {
    if weight.is_nan() { f64::INFINITY } else { weight }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizeError {
    #[error("Simplex did not converge after {iterations} iterations (size {size:.3e})")]
    NotConverged { iterations: usize, size: f64 },

    #[error("Optimization cancelled after {iterations} iterations")]
    Cancelled { iterations: usize },

    #[error("Cannot optimize over an empty parameter vector")]
    EmptyParameters,

    #[error("Invalid starting point: {0}")]
    InvalidStart(String),
}
