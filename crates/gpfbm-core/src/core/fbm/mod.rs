//! Gaussian-process machinery for fractional Brownian motion: kernel
//! construction, Cholesky-based likelihoods and conditional (kriging)
//! predictions.

pub mod kernel;
pub mod regression;
