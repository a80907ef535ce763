//! # Core Module
//!
//! Stateless data and pure mathematics underneath the fitting engine.
//!
//! - **Data models** ([`models`]) - Trajectories, fitted parameters, camera transforms and image stacks
//! - **Gaussian processes** ([`fbm`]) - Fractional Brownian motion kernels, Cholesky likelihoods and kriging
//! - **Utilities** ([`utils`]) - Parameter reparameterization and posterior statistics
//!
//! Nothing in this layer holds mutable state across calls or spawns threads,
//! which keeps it trivially safe to share between parallel fits.

pub mod fbm;
pub mod models;
pub mod utils;
