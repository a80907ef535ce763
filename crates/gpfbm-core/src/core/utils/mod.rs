pub mod reparam;
pub mod statistics;
