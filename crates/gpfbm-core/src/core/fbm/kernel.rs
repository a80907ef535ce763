use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Constant added to every kernel diagonal on top of the localization
/// variance. Keeps the factorization defined for samples at `t = 0`.
pub const KERNEL_JITTER: f64 = 1e-4;

/// Covariance of fractional Brownian motion between the time points `t1` and
/// `t2`: `D·(t1^A + t2^A − |t1 − t2|^A)`.
///
/// Times are expected relative to the motion's origin, so they are
/// non-negative.
pub fn fbm_kernel(d: f64, a: f64, t1: &[f64], t2: &[f64]) -> DMatrix<f64> {
    let ta1: Vec<f64> = t1.iter().map(|t| t.powf(a)).collect();

    if std::ptr::eq(t1, t2) {
        let n = t1.len();
        let mut kernel = DMatrix::zeros(n, n);
        for i in 0..n {
            kernel[(i, i)] = 2.0 * d * ta1[i];
            for j in (i + 1)..n {
                let v = d * (ta1[i] + ta1[j] - (t1[j] - t1[i]).abs().powf(a));
                kernel[(i, j)] = v;
                kernel[(j, i)] = v;
            }
        }
        return kernel;
    }

    let ta2: Vec<f64> = t2.iter().map(|t| t.powf(a)).collect();
    DMatrix::from_fn(t1.len(), t2.len(), |i, j| {
        d * (ta1[i] + ta2[j] - (t2[j] - t1[i]).abs().powf(a))
    })
}

/// Adds `noise + KERNEL_JITTER` to the diagonal.
pub fn add_noise(kernel: &mut DMatrix<f64>, noise: &[f64]) {
    for (i, v) in noise.iter().enumerate() {
        kernel[(i, i)] += v + KERNEL_JITTER;
    }
}

pub fn factorize(kernel: DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    if kernel.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Cholesky::new(kernel)
}

/// `½·vᵀK⁻¹v + ½·ln|K|` for a zero-mean Gaussian with covariance `K`,
/// dropping the constant term.
pub fn neg_log_likelihood(chol: &Cholesky<f64, Dyn>, values: &DVector<f64>) -> f64 {
    let alpha = chol.solve(values);
    let log_det_half: f64 = chol.l_dirty().diagonal().iter().map(|v| v.ln()).sum();
    0.5 * values.dot(&alpha) + log_det_half
}

/// Inverse of a symmetric positive-definite matrix, or `None` if the
/// factorization fails.
pub fn spd_inverse(matrix: DMatrix<f64>) -> Option<DMatrix<f64>> {
    factorize(matrix).map(|c| c.inverse())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brownian_kernel_is_twice_d_times_min_time() {
        let t = [0.0, 0.5, 1.0, 2.5];
        let k = fbm_kernel(0.3, 1.0, &t, &t);
        for i in 0..4 {
            for j in 0..4 {
                let expected = 2.0 * 0.3 * t[i].min(t[j]);
                assert!((k[(i, j)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn square_and_cross_kernels_agree() {
        let t = [0.1, 0.4, 0.9, 1.7];
        let copy = t;
        let square = fbm_kernel(0.8, 0.45, &t, &t);
        let cross = fbm_kernel(0.8, 0.45, &t, &copy);
        assert!((&square - &cross).abs().max() < 1e-12);
        assert_eq!(square, square.transpose());
    }

    #[test]
    fn cross_kernel_has_requested_shape() {
        let k = fbm_kernel(1.0, 1.2, &[0.0, 1.0, 2.0], &[0.5, 1.5]);
        assert_eq!(k.shape(), (3, 2));
    }

    #[test]
    fn noisy_kernel_factorizes_even_with_a_zero_time() {
        let t: Vec<f64> = (0..50).map(|i| 0.5 * i as f64).collect();
        let mut k = fbm_kernel(0.1, 0.45, &t, &t);
        assert_eq!(k[(0, 0)], 0.0);
        add_noise(&mut k, &vec![0.0025; t.len()]);
        assert!(factorize(k).is_some());
    }

    #[test]
    fn non_finite_kernel_is_not_factorized() {
        let mut k = DMatrix::identity(2, 2);
        k[(0, 1)] = f64::NAN;
        assert!(factorize(k).is_none());
        assert!(factorize(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0])).is_none());
    }

    #[test]
    fn likelihood_of_identity_covariance() {
        let chol = factorize(DMatrix::identity(3, 3)).unwrap();
        let v = DVector::from_vec(vec![1.0, 2.0, 2.0]);
        assert!((neg_log_likelihood(&chol, &v) - 4.5).abs() < 1e-12);

        let scaled = factorize(DMatrix::identity(2, 2) * 4.0).unwrap();
        let zero = DVector::zeros(2);
        assert!((neg_log_likelihood(&scaled, &zero) - 2.0 * 2f64.ln()).abs() < 1e-12);
    }
}
