//! Posterior distribution over a [`LogDensityModel`].
//!
//! Wraps a model and provides log-posterior density and gradient in both
//! constrained and unconstrained parameterizations. The model's `nll`
//! already includes all prior terms; this layer adds only the bijector
//! Jacobian corrections.

use ps_core::Result;
use ps_core::traits::LogDensityModel;
use ps_prob::transforms::ParameterTransform;

/// Posterior wrapping a model with bound-derived transforms.
///
/// - `logpdf(theta) = -model.nll(theta)`
/// - `logpdf_unconstrained(z) = logpdf(transform(z)) + log|J(z)|`
pub struct Posterior<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
    transform: ParameterTransform,
}

impl<'a, M: LogDensityModel + ?Sized> Posterior<'a, M> {
    /// Create a posterior for the given model.
    pub fn new(model: &'a M) -> Self {
        let bounds = model.parameter_bounds();
        let transform = ParameterTransform::from_bounds(&bounds);
        Self { model, transform }
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    /// Reference to the parameter transform.
    pub fn transform(&self) -> &ParameterTransform {
        &self.transform
    }

    /// Log-posterior in constrained space.
    pub fn logpdf(&self, theta: &[f64]) -> Result<f64> {
        Ok(-self.model.nll(theta)?)
    }

    /// Gradient of log-posterior in constrained space.
    pub fn grad(&self, theta: &[f64]) -> Result<Vec<f64>> {
        let mut g = self.model.grad_nll(theta)?;
        for gi in g.iter_mut() {
            *gi = -*gi;
        }
        Ok(g)
    }

    /// Log-posterior in unconstrained space: `logpdf(transform(z)) + log|J(z)|`.
    pub fn logpdf_unconstrained(&self, z: &[f64]) -> Result<f64> {
        let theta = self.transform.forward(z);
        let lp = self.logpdf(&theta)?;
        let log_jac = self.transform.log_abs_det_jacobian(z);
        Ok(lp + log_jac)
    }

    /// Gradient of log-posterior in unconstrained space.
    ///
    /// Chain rule with a diagonal Jacobian:
    /// `grad_z[i] = (dtheta_i/dz_i) * grad_theta[i] + d/dz_i log|J_i|`
    pub fn grad_unconstrained(&self, z: &[f64]) -> Result<Vec<f64>> {
        let theta = self.transform.forward(z);
        let grad_theta = self.grad(&theta)?;
        let jac_diag = self.transform.jacobian_diag(z);
        let grad_log_jac = self.transform.grad_log_abs_det_jacobian(z);

        let grad_z: Vec<f64> = grad_theta
            .iter()
            .zip(jac_diag.iter())
            .zip(grad_log_jac.iter())
            .map(|((&gt, &jd), &glj)| gt * jd + glj)
            .collect();

        Ok(grad_z)
    }

    /// Map constrained -> unconstrained.
    pub fn to_unconstrained(&self, theta: &[f64]) -> Vec<f64> {
        self.transform.inverse(theta)
    }

    /// Map unconstrained -> constrained.
    pub fn to_constrained(&self, z: &[f64]) -> Vec<f64> {
        self.transform.forward(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_core::Result;

    /// Gamma-like toy model: one positive parameter with a quadratic
    /// log-density in log-space, exercising the exp bijector path.
    struct PositiveScaleModel;

    impl LogDensityModel for PositiveScaleModel {
        fn dim(&self) -> usize {
            1
        }
        fn parameter_names(&self) -> Vec<String> {
            vec!["scale".to_string()]
        }
        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(0.0, f64::INFINITY)]
        }
        fn parameter_init(&self) -> Vec<f64> {
            vec![1.0]
        }
        fn nll(&self, params: &[f64]) -> Result<f64> {
            let s = params[0];
            if !s.is_finite() || s <= 0.0 {
                return Err(ps_core::Error::Validation(format!(
                    "scale must be finite and > 0, got {}",
                    s
                )));
            }
            let t = s.ln();
            Ok(0.5 * t * t)
        }
        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            let s = params[0];
            Ok(vec![s.ln() / s])
        }
    }

    #[test]
    fn test_logpdf_is_neg_nll() {
        let m = PositiveScaleModel;
        let p = Posterior::new(&m);
        let theta = vec![2.0];
        let lp = p.logpdf(&theta).unwrap();
        let nll = m.nll(&theta).unwrap();
        assert!((lp + nll).abs() < 1e-12);
    }

    #[test]
    fn test_unconstrained_roundtrip_and_jacobian() {
        let m = PositiveScaleModel;
        let p = Posterior::new(&m);

        let theta = vec![0.7];
        let z = p.to_unconstrained(&theta);
        let theta_back = p.to_constrained(&z);
        assert!((theta[0] - theta_back[0]).abs() < 1e-12);

        let lp_c = p.logpdf(&theta).unwrap();
        let lp_u = p.logpdf_unconstrained(&z).unwrap();
        let log_jac = p.transform().log_abs_det_jacobian(&z);
        assert!((lp_u - lp_c - log_jac).abs() < 1e-12);
    }

    #[test]
    fn test_unconstrained_grad_vs_finite_diff() {
        let m = PositiveScaleModel;
        let p = Posterior::new(&m);

        let z = vec![0.4];
        let grad = p.grad_unconstrained(&z).unwrap();

        let eps = 1e-6;
        let fd = (p.logpdf_unconstrained(&[z[0] + eps]).unwrap()
            - p.logpdf_unconstrained(&[z[0] - eps]).unwrap())
            / (2.0 * eps);
        approx::assert_relative_eq!(grad[0], fd, epsilon = 1e-5);
    }
}
