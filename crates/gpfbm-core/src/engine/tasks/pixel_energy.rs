use crate::core::models::image::ImageStack;
use crate::engine::cancel::CancellationToken;
use crate::engine::config::Interpolation;
use nalgebra::{DMatrix, Matrix3, Point2};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Accumulated squared difference between a reference stack and a warped
/// moving stack.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelEnergy {
    pub sum_squares: f64,
    /// Number of reference pixels whose warped sample fell inside the
    /// moving image.
    pub overlap: usize,
}

impl std::ops::Add for PixelEnergy {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            sum_squares: self.sum_squares + rhs.sum_squares,
            overlap: self.overlap + rhs.overlap,
        }
    }
}

fn sample(image: &DMatrix<f64>, p: &Point2<f64>, interpolation: Interpolation) -> Option<f64> {
    let (h, w) = image.shape();
    match interpolation {
        Interpolation::Nearest => {
            let (i, j) = (p.x.floor(), p.y.floor());
            if i < 0.0 || j < 0.0 || i >= w as f64 || j >= h as f64 {
                return None;
            }
            Some(image[(j as usize, i as usize)])
        }
        Interpolation::Bilinear => {
            // pixel centers sit at half-integer coordinates
            let (fx, fy) = (p.x - 0.5, p.y - 0.5);
            if !(fx >= 0.0 && fy >= 0.0 && fx <= (w - 1) as f64 && fy <= (h - 1) as f64) {
                return None;
            }
            let (x0, y0) = (fx.floor() as usize, fy.floor() as usize);
            let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
            let (tx, ty) = (fx - x0 as f64, fy - y0 as f64);
            let top = image[(y0, x0)] * (1.0 - tx) + image[(y0, x1)] * tx;
            let bottom = image[(y1, x0)] * (1.0 - tx) + image[(y1, x1)] * tx;
            Some(top * (1.0 - ty) + bottom * ty)
        }
    }
}

fn row_energy(
    reference: &DMatrix<f64>,
    moving: &DMatrix<f64>,
    itrf: &Matrix3<f64>,
    y: usize,
    interpolation: Interpolation,
) -> PixelEnergy {
    let mut acc = PixelEnergy::default();
    for x in 0..reference.ncols() {
        let target = itrf.transform_point(&Point2::new(x as f64 + 0.5, y as f64 + 0.5));
        let mut diff = reference[(y, x)];
        if let Some(v) = sample(moving, &target, interpolation) {
            diff -= v;
            acc.overlap += 1;
        }
        acc.sum_squares += diff * diff;
    }
    acc
}

fn frame_energy(
    reference: &DMatrix<f64>,
    moving: &DMatrix<f64>,
    itrf: &Matrix3<f64>,
    interpolation: Interpolation,
) -> PixelEnergy {
    #[cfg(feature = "parallel")]
    let rows = (0..reference.nrows()).into_par_iter();
    #[cfg(not(feature = "parallel"))]
    let rows = 0..reference.nrows();

    let energies = rows.map(|y| row_energy(reference, moving, itrf, y, interpolation));

    #[cfg(feature = "parallel")]
    let total = energies.reduce(PixelEnergy::default, |a, b| a + b);
    #[cfg(not(feature = "parallel"))]
    let total = energies.fold(PixelEnergy::default(), |a, b| a + b);

    total
}

/// Sums the squared residual `I₀(x) − I₁(itrf·x)` over every pixel of every
/// frame pair. Pixels mapped outside the moving image compare against zero.
///
/// Returns `None` if `cancel` fires; the token is polled once per frame.
pub fn compute(
    reference: &ImageStack,
    moving: &ImageStack,
    itrf: &Matrix3<f64>,
    interpolation: Interpolation,
    cancel: Option<&CancellationToken>,
) -> Option<PixelEnergy> {
    let pairs: Vec<(&DMatrix<f64>, &DMatrix<f64>)> = reference
        .frames()
        .iter()
        .zip(moving.frames().iter())
        .collect();

    let frame = |&(r, m): &(&DMatrix<f64>, &DMatrix<f64>)| {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return None;
        }
        Some(frame_energy(r, m, itrf, interpolation))
    };

    #[cfg(feature = "parallel")]
    let total = pairs
        .par_iter()
        .map(frame)
        .try_reduce(PixelEnergy::default, |a, b| Some(a + b));
    #[cfg(not(feature = "parallel"))]
    let total = pairs
        .iter()
        .map(frame)
        .try_fold(PixelEnergy::default(), |acc, e| e.map(|e| acc + e));

    total
}

/// Objective value `½·W·H·ln(E)` of an alignment candidate. A candidate with
/// no overlapping pixel at all is infeasible.
pub fn alignment_weight(energy: &PixelEnergy, width: usize, height: usize) -> f64 {
    if energy.overlap == 0 {
        return f64::INFINITY;
    }
    0.5 * (width * height) as f64 * energy.sum_squares.max(f64::MIN_POSITIVE).ln()
}
