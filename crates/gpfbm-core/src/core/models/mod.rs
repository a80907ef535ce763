//! # Core Models Module
//!
//! Plain data exchanged between the numerical engine and its callers.
//!
//! - [`trajectory`] - Validated particle trajectories (`frame, time, x, y, err_x, err_y`)
//! - [`params`] - Fitted diffusion parameters for single and coupled models
//! - [`transform`] - Camera registration transforms and their persistable record
//! - [`image`] - Equally sized frame stacks used for channel alignment
//!
//! All of these are owned by the caller once returned; none of them hold
//! references into engine state.

pub mod image;
pub mod params;
pub mod trajectory;
pub mod transform;
