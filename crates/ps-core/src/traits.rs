//! Core traits for pathsynth.
//!
//! [`LogDensityModel`] is the seam between model specification and
//! inference: the sampler sees only a differentiable negative log-density
//! over a named, bounded parameter vector.

use crate::Result;

/// A differentiable joint log-density over a fixed parameter vector.
///
/// Implementations own their data and priors; `nll` must include all prior
/// terms so that `-nll` is the (unnormalized) log-posterior in constrained
/// space. Bounds drive the unconstrained reparameterization used by the
/// sampler.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names, length `dim()`.
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds `(min, max)` in constrained space, length `dim()`.
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// Deterministic initial point in constrained space, length `dim()`.
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-density (likelihood + priors, up to a constant).
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Analytic gradient of `nll`, length `dim()`.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl LogDensityModel for Quadratic {
        fn dim(&self) -> usize {
            1
        }
        fn parameter_names(&self) -> Vec<String> {
            vec!["x".to_string()]
        }
        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY)]
        }
        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0]
        }
        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok(0.5 * params[0] * params[0])
        }
        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![params[0]])
        }
    }

    #[test]
    fn test_trait_object_safety() {
        let m: &dyn LogDensityModel = &Quadratic;
        assert_eq!(m.dim(), 1);
        assert_eq!(m.nll(&[2.0]).unwrap(), 2.0);
        assert_eq!(m.grad_nll(&[2.0]).unwrap(), vec![2.0]);
    }
}
