//! Objective evaluations and data preparation used by the workflows.
//!
//! Each submodule provides one computational unit: the GP-FBM likelihoods
//! for single and coupled models, the parallel pixel energy of an alignment
//! candidate, and the contrast enhancement applied to frames before they are
//! aligned. None of them own optimizer state; they are wrapped into
//! [`Objective`](crate::engine::optimize::Objective) closures by the caller.

pub mod enhancement;
pub mod likelihood;
pub mod pixel_energy;
