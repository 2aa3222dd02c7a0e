//! Poisson distribution utilities.

use ps_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

/// Log-PMF of a Poisson distribution with mean `lambda` at count `k`.
///
/// `log P(K=k) = k*ln(lambda) - lambda - ln(k!)`
pub fn logpmf(k: u64, lambda: f64) -> Result<f64> {
    if !lambda.is_finite() || lambda <= 0.0 {
        return Err(Error::Validation(format!("lambda must be finite and > 0, got {}", lambda)));
    }
    let kf = k as f64;
    Ok(kf * lambda.ln() - lambda - ln_gamma(kf + 1.0))
}

/// Negative log-likelihood for Poisson(`lambda`) at `k`.
pub fn nll(k: u64, lambda: f64) -> Result<f64> {
    Ok(-logpmf(k, lambda)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_k0() {
        // P(K=0) = exp(-lambda)
        let lp = logpmf(0, 2.0).unwrap();
        assert_relative_eq!(lp, -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mode_is_most_probable() {
        // For lambda=4, k=4 should beat k=1 and k=10.
        let lp4 = logpmf(4, 4.0).unwrap();
        assert!(lp4 > logpmf(1, 4.0).unwrap());
        assert!(lp4 > logpmf(10, 4.0).unwrap());
    }

    #[test]
    fn test_invalid_lambda() {
        assert!(logpmf(0, 0.0).is_err());
        assert!(logpmf(0, -1.0).is_err());
        assert!(logpmf(0, f64::NAN).is_err());
    }
}
