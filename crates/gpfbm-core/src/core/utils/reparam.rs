//! Maps between the physical `(D, A)` parameters and the unconstrained space
//! searched by the optimizers.
//!
//! `D = e^x` keeps the diffusion coefficient positive, and
//! `A = 2e^x / (1 + e^x)` keeps the anomalous exponent inside `(0, 2)`.

/// Stable `ln(1 + e^x)`.
#[inline]
pub fn softplus(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp().ln_1p() }
}

#[inline]
pub fn encode_d(d: f64) -> f64 {
    d.ln()
}

#[inline]
pub fn decode_d(x: f64) -> f64 {
    x.exp()
}

#[inline]
pub fn encode_a(a: f64) -> f64 {
    -(2.0 / a - 1.0).ln()
}

#[inline]
pub fn decode_a(x: f64) -> f64 {
    // 2 / (1 + e^-x), which does not overflow for large |x|
    2.0 / (1.0 + (-x).exp())
}

/// `ln |dD/dx|` at `x`.
#[inline]
pub fn log_jacobian_d(x: f64) -> f64 {
    x
}

/// `ln |dA/dx|` at `x`, up to the constant `ln 2`.
#[inline]
pub fn log_jacobian_a(x: f64) -> f64 {
    x - 2.0 * softplus(x)
}

/// Negative log-density contribution that makes a flat prior in `(D, A)`
/// flat after the change of variables.
#[inline]
pub fn flat_prior_penalty(x_d: f64, x_a: f64) -> f64 {
    -log_jacobian_d(x_d) - log_jacobian_a(x_a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_and_decode_are_inverses() {
        for &d in &[1e-4, 0.1, 1.0, 37.0] {
            assert!((decode_d(encode_d(d)) - d).abs() < 1e-12 * d.max(1.0));
        }
        for &a in &[0.01, 0.45, 1.0, 1.7, 1.999] {
            assert!((decode_a(encode_a(a)) - a).abs() < 1e-10);
        }
    }

    #[test]
    fn unit_exponent_maps_to_zero() {
        assert!(encode_a(1.0).abs() < 1e-15);
        assert_eq!(decode_a(0.0), 1.0);
    }

    #[test]
    fn decoded_exponent_stays_in_range_for_extreme_inputs() {
        assert!(decode_a(-800.0) >= 0.0);
        assert!(decode_a(800.0) <= 2.0);
        assert!(decode_a(800.0).is_finite());
    }

    #[test]
    fn softplus_is_stable() {
        assert!((softplus(0.0) - 2f64.ln()).abs() < 1e-15);
        assert_eq!(softplus(1000.0), 1000.0);
        assert!(softplus(-1000.0) >= 0.0);
    }

    #[test]
    fn jacobian_of_exponent_matches_finite_difference() {
        let x = 0.3;
        let h = 1e-6;
        let numeric = ((decode_a(x + h) - decode_a(x - h)) / (2.0 * h)).ln();
        assert!((numeric - (log_jacobian_a(x) + 2f64.ln())).abs() < 1e-6);
    }
}
