//! # Engine Module
//!
//! The stateful numerical machinery shared by every fit in the library.
//!
//! ## Overview
//!
//! A fit is always the same pipeline: a workflow wraps its data into an
//! objective, the Nelder-Mead simplex finds the minimizing vector, and
//! optionally the Metropolis sampler explores the posterior around it. The
//! engine owns those optimizers and the supporting pieces they need.
//!
//! ## Architecture
//!
//! - **Optimizers** ([`optimize`]) - Nelder-Mead simplex, Metropolis sampler and the `Objective` trait
//! - **Tasks** ([`tasks`]) - Likelihoods, parallel pixel energy and frame enhancement
//! - **Configuration** ([`config`]) - Convergence thresholds, step sizes, sampler calibration
//! - **Progress Monitoring** ([`progress`]) - Optional callback sink for long-running work
//! - **Cancellation** ([`cancel`]) - Cooperative stop flag polled by every loop
//! - **Error Handling** ([`error`]) - The library-wide `EngineError`
//!
//! Optimizers run single-threaded per invocation. Parallelism happens inside
//! one objective evaluation (pixel energy) or across independent fits.

pub mod cancel;
pub mod config;
pub mod error;
pub mod optimize;
pub mod progress;
pub mod tasks;
