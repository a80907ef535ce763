use crate::cli::FitArgs;
use crate::error::{CliError, Result};
use gpfbm::engine::config as core_config;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSimplexConfig {
    threshold: Option<f64>,
    step: Option<f64>,
    max_iterations: Option<usize>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSamplerConfig {
    sample_size: Option<usize>,
    initial_step: Option<f64>,
    max_calibration_batches: Option<usize>,
}

/// The `fit` configuration as read from a TOML file, before CLI overrides.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialFitConfig {
    simplex: Option<PartialSimplexConfig>,
    sampler: Option<PartialSamplerConfig>,
    min_size_per_traj: Option<usize>,
}

fn parse_value<T: FromStr>(key: &str, value: &str, kind: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid {} value for {}: {}", kind, key, value)))
}

impl PartialFitConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Reads `path` when given, otherwise starts from an empty configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Resolves the final config. Precedence, highest first: CLI flags, `-S`
    /// assignments, file values, library defaults.
    pub fn merge_with_cli(mut self, args: &FitArgs) -> Result<core_config::FitConfig> {
        self.apply_set_values(&args.set_values)?;

        let simplex = self.simplex.take().unwrap_or_default();
        let sampler = self.sampler.take().unwrap_or_default();

        let mut builder = core_config::FitConfigBuilder::new();
        if let Some(threshold) = args.threshold.or(simplex.threshold) {
            builder = builder.threshold(threshold);
        }
        if let Some(step) = args.step.or(simplex.step) {
            builder = builder.step(step);
        }
        if let Some(iterations) = simplex.max_iterations {
            builder = builder.max_iterations(iterations);
        }
        if let Some(n) = args.sample_size.or(sampler.sample_size) {
            builder = builder.sample_size(n);
        }
        if let Some(step) = sampler.initial_step {
            builder = builder.initial_proposal_step(step);
        }
        if let Some(n) = sampler.max_calibration_batches {
            builder = builder.max_calibration_batches(n);
        }
        if let Some(n) = args.min_size.or(self.min_size_per_traj) {
            builder = builder.min_size_per_traj(n);
        }

        builder.build().map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "simplex.threshold" => {
                    self.simplex.get_or_insert_with(Default::default).threshold =
                        Some(parse_value(key, value, "float")?);
                }
                "simplex.step" => {
                    self.simplex.get_or_insert_with(Default::default).step =
                        Some(parse_value(key, value, "float")?);
                }
                "simplex.max-iterations" => {
                    self.simplex.get_or_insert_with(Default::default).max_iterations =
                        Some(parse_value(key, value, "integer")?);
                }
                "sampler.sample-size" => {
                    self.sampler.get_or_insert_with(Default::default).sample_size =
                        Some(parse_value(key, value, "integer")?);
                }
                "sampler.initial-step" => {
                    self.sampler.get_or_insert_with(Default::default).initial_step =
                        Some(parse_value(key, value, "float")?);
                }
                "sampler.max-calibration-batches" => {
                    self.sampler
                        .get_or_insert_with(Default::default)
                        .max_calibration_batches = Some(parse_value(key, value, "integer")?);
                }
                "min-size-per-traj" => {
                    self.min_size_per_traj = Some(parse_value(key, value, "integer")?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}
