use super::config::ConfigError;
use super::optimize::OptimizeError;
use crate::core::models::image::ImageError;
use crate::core::models::trajectory::TrajectoryError;
use crate::core::models::transform::TransformError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid trajectory {id}: {source}")]
    Trajectory {
        id: usize,
        #[source]
        source: TrajectoryError,
    },

    #[error("Trajectory {id} has {len} valid samples, at least {required} are required")]
    TrajectoryTooShort {
        id: usize,
        len: usize,
        required: usize,
    },

    #[error("Particle index {id} is out of range ({count} trajectories loaded)")]
    ParticleOutOfRange { id: usize, count: usize },

    #[error("The coupled model needs at least two trajectories, got {0}")]
    NotEnoughParticles(usize),

    #[error("Trajectories share only {common} frames, at least {required} are required")]
    InsufficientOverlap { common: usize, required: usize },

    #[error("Covariance kernel is not positive definite: {context}")]
    NotPositiveDefinite { context: &'static str },

    #[error("Optimization phase '{phase}' failed to converge after {iterations} iterations")]
    Convergence {
        phase: &'static str,
        iterations: usize,
    },

    #[error("Operation '{phase}' was cancelled")]
    Cancelled { phase: &'static str },

    #[error("Image frames do not match: {0}")]
    ImageMismatch(String),

    #[error("Transform error: {source}")]
    Transform {
        #[from]
        source: TransformError,
    },

    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl From<ImageError> for EngineError {
    fn from(err: ImageError) -> Self {
        Self::ImageMismatch(err.to_string())
    }
}

impl EngineError {
    /// Tags an optimizer failure with the workflow phase it happened in.
    pub fn from_optimize(phase: &'static str, err: OptimizeError) -> Self {
        match err {
            OptimizeError::NotConverged { iterations, .. } => Self::Convergence { phase, iterations },
            OptimizeError::Cancelled { .. } => Self::Cancelled { phase },
            OptimizeError::EmptyParameters => {
                Self::Internal(format!("phase '{}' started with an empty parameter vector", phase))
            }
            OptimizeError::InvalidStart(msg) => Self::InvalidInput(format!("{}: {}", phase, msg)),
        }
    }

    /// Cancellation and convergence failures are reported the same way to callers.
    pub fn is_fit_failure(&self) -> bool {
        matches!(self, Self::Convergence { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimizer_failures_keep_their_phase() {
        let err = EngineError::from_optimize(
            "single model",
            OptimizeError::NotConverged {
                iterations: 10,
                size: 1.0,
            },
        );
        assert!(matches!(
            err,
            EngineError::Convergence {
                phase: "single model",
                iterations: 10
            }
        ));
        assert!(err.is_fit_failure());
    }

    #[test]
    fn cancellation_is_a_fit_failure() {
        let err = EngineError::from_optimize("align cameras", OptimizeError::Cancelled { iterations: 3 });
        assert!(matches!(err, EngineError::Cancelled { phase: "align cameras" }));
        assert!(err.is_fit_failure());
        assert!(!EngineError::NotEnoughParticles(1).is_fit_failure());
    }
}
