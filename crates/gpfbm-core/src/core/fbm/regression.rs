use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Conditional mean and variance of a Gaussian process at new inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub mean: DVector<f64>,
    /// Marginal variances, clamped at zero.
    pub variance: DVector<f64>,
}

/// Conditions a zero-mean process on `values`.
///
/// `chol` factors the (noisy) covariance of the observations, `cross` is the
/// `n_obs × n_new` covariance between observations and the new inputs, and
/// `prior_variance` is the diagonal of the prior covariance at the new inputs.
pub fn predict(
    chol: &Cholesky<f64, Dyn>,
    cross: &DMatrix<f64>,
    prior_variance: &DVector<f64>,
    values: &DVector<f64>,
) -> Prediction {
    let alpha = chol.solve(values);
    let mean = cross.tr_mul(&alpha);

    let reduced = chol.solve(cross);
    let variance = DVector::from_fn(cross.ncols(), |j, _| {
        let explained = cross.column(j).dot(&reduced.column(j));
        (prior_variance[j] - explained).max(0.0)
    });

    Prediction { mean, variance }
}
