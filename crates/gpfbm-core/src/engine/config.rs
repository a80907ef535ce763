use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Invalid value {value} for '{name}': {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },
}

fn positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            value,
            reason: "must be a positive finite number",
        })
    }
}

fn nonzero(name: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            value: 0.0,
            reason: "must be greater than zero",
        })
    }
}

pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimplexConfig {
    /// Simplex size below which the search is considered converged.
    pub threshold: f64,
    /// Offset applied along each axis to build the initial simplex.
    pub step: f64,
    pub max_iterations: usize,
}

impl SimplexConfig {
    pub fn new(threshold: f64, step: f64) -> Result<Self, ConfigError> {
        Ok(Self {
            threshold: positive("threshold", threshold)?,
            step: positive("step", step)?,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        })
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Result<Self, ConfigError> {
        self.max_iterations = nonzero("max_iterations", max_iterations)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    pub initial_step: f64,
    pub batch_size: usize,
    pub max_calibration_batches: usize,
    pub target_acceptance: f64,
    pub acceptance_tolerance: f64,
    pub rescale_reference: f64,
    pub min_step: f64,
    pub sample_size: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            initial_step: 0.02,
            batch_size: 1000,
            max_calibration_batches: 100,
            target_acceptance: 0.25,
            acceptance_tolerance: 0.1,
            rescale_reference: 0.2,
            min_step: 0.001,
            sample_size: 10_000,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("initial_step", self.initial_step)?;
        positive("min_step", self.min_step)?;
        positive("rescale_reference", self.rescale_reference)?;
        positive("acceptance_tolerance", self.acceptance_tolerance)?;
        nonzero("batch_size", self.batch_size)?;
        nonzero("sample_size", self.sample_size)?;
        if !(self.target_acceptance > 0.0 && self.target_acceptance < 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "target_acceptance",
                value: self.target_acceptance,
                reason: "must lie strictly between 0 and 1",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    pub simplex: SimplexConfig,
    pub sampler: SamplerConfig,
    pub min_size_per_traj: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            simplex: SimplexConfig {
                threshold: 1e-4,
                step: 1.0,
                max_iterations: DEFAULT_MAX_ITERATIONS,
            },
            sampler: SamplerConfig::default(),
            min_size_per_traj: 50,
        }
    }
}

#[derive(Default)]
pub struct FitConfigBuilder {
    threshold: Option<f64>,
    step: Option<f64>,
    max_iterations: Option<usize>,
    sample_size: Option<usize>,
    initial_proposal_step: Option<f64>,
    max_calibration_batches: Option<usize>,
    min_size_per_traj: Option<usize>,
}

impl FitConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
    pub fn step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }
    pub fn sample_size(mut self, n: usize) -> Self {
        self.sample_size = Some(n);
        self
    }
    pub fn initial_proposal_step(mut self, step: f64) -> Self {
        self.initial_proposal_step = Some(step);
        self
    }
    pub fn max_calibration_batches(mut self, n: usize) -> Self {
        self.max_calibration_batches = Some(n);
        self
    }
    pub fn min_size_per_traj(mut self, n: usize) -> Self {
        self.min_size_per_traj = Some(n);
        self
    }

    pub fn build(self) -> Result<FitConfig, ConfigError> {
        let defaults = FitConfig::default();

        let simplex = SimplexConfig::new(
            self.threshold.unwrap_or(defaults.simplex.threshold),
            self.step.unwrap_or(defaults.simplex.step),
        )?
        .with_max_iterations(self.max_iterations.unwrap_or(defaults.simplex.max_iterations))?;

        let sampler = SamplerConfig {
            initial_step: self
                .initial_proposal_step
                .unwrap_or(defaults.sampler.initial_step),
            max_calibration_batches: self
                .max_calibration_batches
                .unwrap_or(defaults.sampler.max_calibration_batches),
            sample_size: self.sample_size.unwrap_or(defaults.sampler.sample_size),
            ..defaults.sampler
        };
        sampler.validate()?;

        let min_size_per_traj = self.min_size_per_traj.unwrap_or(defaults.min_size_per_traj);
        if min_size_per_traj < 2 {
            return Err(ConfigError::InvalidParameter {
                name: "min_size_per_traj",
                value: min_size_per_traj as f64,
                reason: "a trajectory needs at least two samples",
            });
        }

        Ok(FitConfig {
            simplex,
            sampler,
            min_size_per_traj,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhancementConfig {
    pub median_size: usize,
    pub clip_limit: f64,
    pub tile_width: usize,
    pub tile_height: usize,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            median_size: 3,
            clip_limit: 5.0,
            tile_width: 32,
            tile_height: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignConfig {
    pub coarse: SimplexConfig,
    pub fine: SimplexConfig,
    pub interpolation: Interpolation,
    pub enhancement: Option<EnhancementConfig>,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            coarse: SimplexConfig {
                threshold: 1e-8,
                step: 15.0,
                max_iterations: DEFAULT_MAX_ITERATIONS,
            },
            fine: SimplexConfig {
                threshold: 1e-8,
                step: 0.1,
                max_iterations: DEFAULT_MAX_ITERATIONS,
            },
            interpolation: Interpolation::default(),
            enhancement: Some(EnhancementConfig::default()),
        }
    }
}

#[derive(Default)]
pub struct AlignConfigBuilder {
    coarse_step: Option<f64>,
    fine_step: Option<f64>,
    threshold: Option<f64>,
    max_iterations: Option<usize>,
    interpolation: Option<Interpolation>,
    enhancement: Option<Option<EnhancementConfig>>,
}

impl AlignConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coarse_step(mut self, step: f64) -> Self {
        self.coarse_step = Some(step);
        self
    }
    pub fn fine_step(mut self, step: f64) -> Self {
        self.fine_step = Some(step);
        self
    }
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }
    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = Some(interpolation);
        self
    }
    pub fn enhancement(mut self, enhancement: Option<EnhancementConfig>) -> Self {
        self.enhancement = Some(enhancement);
        self
    }

    pub fn build(self) -> Result<AlignConfig, ConfigError> {
        let defaults = AlignConfig::default();
        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);

        let coarse = SimplexConfig::new(
            self.threshold.unwrap_or(defaults.coarse.threshold),
            self.coarse_step.unwrap_or(defaults.coarse.step),
        )?
        .with_max_iterations(max_iterations)?;
        let fine = SimplexConfig::new(
            self.threshold.unwrap_or(defaults.fine.threshold),
            self.fine_step.unwrap_or(defaults.fine.step),
        )?
        .with_max_iterations(max_iterations)?;

        let enhancement = self.enhancement.unwrap_or(defaults.enhancement);
        if let Some(e) = &enhancement {
            positive("clip_limit", e.clip_limit)?;
            nonzero("tile_width", e.tile_width)?;
            nonzero("tile_height", e.tile_height)?;
        }

        Ok(AlignConfig {
            coarse,
            fine,
            interpolation: self.interpolation.unwrap_or(defaults.interpolation),
            enhancement,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_builder_falls_back_to_defaults() {
        let config = FitConfigBuilder::new().build().unwrap();
        assert_eq!(config, FitConfig::default());
        assert_eq!(config.simplex.max_iterations, 10_000);
        assert_eq!(config.sampler.sample_size, 10_000);
        assert_eq!(config.min_size_per_traj, 50);
    }

    #[test]
    fn fit_builder_applies_overrides() {
        let config = FitConfigBuilder::new()
            .threshold(1e-6)
            .step(0.5)
            .sample_size(500)
            .min_size_per_traj(20)
            .build()
            .unwrap();
        assert_eq!(config.simplex.threshold, 1e-6);
        assert_eq!(config.simplex.step, 0.5);
        assert_eq!(config.sampler.sample_size, 500);
        assert_eq!(config.sampler.initial_step, 0.02);
        assert_eq!(config.min_size_per_traj, 20);
    }

    #[test]
    fn fit_builder_rejects_non_positive_threshold() {
        let result = FitConfigBuilder::new().threshold(0.0).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "threshold",
                ..
            })
        ));
    }

    #[test]
    fn fit_builder_rejects_zero_iterations_and_samples() {
        assert!(FitConfigBuilder::new().max_iterations(0).build().is_err());
        assert!(FitConfigBuilder::new().sample_size(0).build().is_err());
        assert!(FitConfigBuilder::new().min_size_per_traj(1).build().is_err());
    }

    #[test]
    fn align_builder_uses_coarse_and_fine_steps() {
        let config = AlignConfigBuilder::new()
            .coarse_step(5.0)
            .fine_step(0.05)
            .interpolation(Interpolation::Nearest)
            .enhancement(None)
            .build()
            .unwrap();
        assert_eq!(config.coarse.step, 5.0);
        assert_eq!(config.fine.step, 0.05);
        assert_eq!(config.coarse.threshold, 1e-8);
        assert_eq!(config.interpolation, Interpolation::Nearest);
        assert!(config.enhancement.is_none());
    }

    #[test]
    fn align_builder_validates_enhancement() {
        let bad = EnhancementConfig {
            tile_width: 0,
            ..EnhancementConfig::default()
        };
        assert!(AlignConfigBuilder::new().enhancement(Some(bad)).build().is_err());
    }

    #[test]
    fn sampler_defaults_are_valid() {
        assert!(SamplerConfig::default().validate().is_ok());
        let bad = SamplerConfig {
            target_acceptance: 1.5,
            ..SamplerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
