use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Fitted motion parameters of a single particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffusionParams {
    /// Diffusion coefficient, `D >= 0`.
    pub d: f64,
    /// Anomalous exponent, `0 < A < 2`.
    pub a: f64,
    /// Mean position offset of the trajectory.
    pub mu: Vector2<f64>,
}

impl DiffusionParams {
    pub fn new(d: f64, a: f64, mu: Vector2<f64>) -> Self {
        Self { d, a, mu }
    }
}

/// Jointly fitted parameters of particles sharing a common substrate motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoupledParams {
    /// Private motion of each particle, in input order.
    pub particles: Vec<DiffusionParams>,
    /// Diffusion coefficient of the shared substrate motion.
    pub dr: f64,
    /// Anomalous exponent of the shared substrate motion.
    pub ar: f64,
}

impl CoupledParams {
    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }
}
