pub mod fit;
pub mod simulate;
