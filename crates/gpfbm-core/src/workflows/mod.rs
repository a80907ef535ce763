//! # Workflows Module
//!
//! High-level entry points that tie the data models in [`crate::core`] to the
//! optimizers and tasks in [`crate::engine`].
//!
//! ## Overview
//!
//! - **GP-FBM inference** ([`gp_fbm`]) - Maximum-likelihood and posterior
//!   estimation of fractional Brownian motion parameters for single particles
//!   and for groups of particles sharing a substrate motion, together with
//!   averaged trajectories and the substrate estimate.
//! - **Image alignment** ([`align`]) - Registration of a second camera channel
//!   onto a reference channel by minimizing a pixel energy.
//! - **Simulation** ([`simulate`]) - Synthetic noisy FBM trajectories drawn
//!   from the same kernels the inference uses.
//!
//! Every workflow owns a [`CancellationToken`](crate::engine::cancel::CancellationToken)
//! and accepts an optional [`ProgressReporter`](crate::engine::progress::ProgressReporter).
//! A failed, cancelled or non-converged fit returns an
//! [`EngineError`](crate::engine::error::EngineError) and never exposes a
//! partial result.

pub mod align;
pub mod gp_fbm;
pub mod simulate;
