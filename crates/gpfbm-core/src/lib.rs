//! # GP-FBM Core Library
//!
//! Inference of anomalous diffusion from single-particle tracking data, using
//! Gaussian-process models of fractional Brownian motion, plus the camera
//! registration needed to combine two imaging channels.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Trajectory`,
//!   `DiffusionParams`, `TransformData`, `ImageStack`), the FBM covariance
//!   kernel with its Gaussian-process algebra, and numeric utilities such as
//!   parameter reparameterization and posterior statistics.
//!
//! - **[`engine`]: The Logic Core.** A derivative-free optimization engine
//!   (Nelder-Mead simplex and an adaptive Metropolis sampler behind the
//!   `Objective` trait), the objective functions built on it (trajectory
//!   likelihoods, parallel pixel energy), image enhancement, configuration,
//!   errors, progress reporting and cooperative cancellation.
//!
//! - **[`workflows`]: The Public API.** `GpFbm`, `Aligner` and trajectory
//!   simulation, each running a complete scientific procedure on top of the
//!   engine.
//!
//! Parallel evaluation uses `rayon` and is enabled by the default `parallel`
//! feature.

pub mod core;
pub mod engine;
pub mod workflows;
