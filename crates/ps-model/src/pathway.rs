//! The joint four-stream pathway model.
//!
//! One latent effect `theta` ties four likelihood terms together through
//! per-stream link coefficients. The streams are treated as conditionally
//! independent given `theta` and their own nuisance parameters; this is a
//! modeling assumption, not a verified property of the data sources.
//!
//! Constrained parameter vector:
//! `[theta, lambda0, beta0, sigma_step, phi, delta, tau, eps_0..eps_{T-1}]`
//!
//! The case-report random walk is non-centered: the trajectory is
//! `sigma_step * cumsum(eps)` with `eps_t ~ N(0, 1)`. This decouples the
//! step-scale estimate from the trajectory shape and keeps the sampling
//! geometry well conditioned at low counts.

use crate::config::{LinkConfig, PriorConfig};
use crate::evidence::{
    CaseSeriesEvidence, MechanisticEvidence, PharmacovigilanceEvidence, TrialEvidence,
};
use ps_core::traits::LogDensityModel;
use ps_core::{Error, Result};
use ps_prob::{neg_binomial, normal, poisson};
use statrs::function::gamma::digamma;

/// Number of scalar parameters before the random-walk innovations.
pub const N_SCALAR_PARAMS: usize = 7;

/// Log-mean clamp for the NB2 linear predictor. Outside this range the state
/// is already divergent; clamping keeps the log-density finite rather than
/// erroring out of the whole run.
const ETA_CLAMP: f64 = 40.0;

/// Dispersion clamp for the NB2 likelihood (tiny alpha is numerically Poisson).
const ALPHA_FLOOR: f64 = 1e-8;

/// The joint pathway model. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct PathwayModel {
    trial: TrialEvidence,
    series: CaseSeriesEvidence,
    pharmacovigilance: PharmacovigilanceEvidence,
    mechanistic: MechanisticEvidence,
    priors: PriorConfig,
    links: LinkConfig,
    log_ror: f64,
}

impl PathwayModel {
    /// Build the joint model from validated evidence, priors, and links.
    ///
    /// Prior scales are re-checked here: a non-positive scale at this layer is
    /// an internal contradiction (validation should have caught it), so it is
    /// reported as `Error::ModelSpecification` rather than `Validation`.
    pub fn new(
        trial: TrialEvidence,
        series: CaseSeriesEvidence,
        pharmacovigilance: PharmacovigilanceEvidence,
        mechanistic: MechanisticEvidence,
        priors: PriorConfig,
        links: LinkConfig,
    ) -> Result<Self> {
        for (name, scale) in [
            ("theta_sd", priors.theta_sd),
            ("lambda0_log_sd", priors.lambda0_log_sd),
            ("beta0_sd", priors.beta0_sd),
            ("sigma_step_scale", priors.sigma_step_scale),
            ("phi_scale", priors.phi_scale),
            ("delta_sd", priors.delta_sd),
            ("tau_scale", priors.tau_scale),
        ] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(Error::ModelSpecification(format!(
                    "prior scale {} must be finite and > 0, got {}",
                    name, scale
                )));
            }
        }

        let log_ror = pharmacovigilance.log_ror();
        Ok(Self { trial, series, pharmacovigilance, mechanistic, priors, links, log_ror })
    }

    /// Number of time steps in the case-report series.
    pub fn series_len(&self) -> usize {
        self.series.len()
    }

    /// The trial-stream link coefficient (needed by the derived engine).
    pub fn trial_link(&self) -> f64 {
        self.links.trial
    }

    /// Evidence accessors for reporting.
    pub fn trial(&self) -> &TrialEvidence {
        &self.trial
    }
    /// Case-report series evidence.
    pub fn series(&self) -> &CaseSeriesEvidence {
        &self.series
    }
    /// Pharmacovigilance evidence.
    pub fn pharmacovigilance(&self) -> &PharmacovigilanceEvidence {
        &self.pharmacovigilance
    }
    /// Mechanistic evidence.
    pub fn mechanistic(&self) -> &MechanisticEvidence {
        &self.mechanistic
    }
    /// Link coefficients.
    pub fn links(&self) -> &LinkConfig {
        &self.links
    }

    /// NB2 mean trajectory for the case-report series at the given draw.
    ///
    /// Shared by the likelihood and the posterior predictive simulator.
    pub fn series_means(&self, theta: f64, beta0: f64, sigma_step: f64, eps: &[f64]) -> Vec<f64> {
        let mut means = Vec::with_capacity(eps.len());
        let mut cum = 0.0;
        for &e in eps {
            cum += e;
            let eta = (beta0 + theta * self.links.series + sigma_step * cum)
                .clamp(-ETA_CLAMP, ETA_CLAMP);
            means.push(eta.exp());
        }
        means
    }
}

impl LogDensityModel for PathwayModel {
    fn dim(&self) -> usize {
        N_SCALAR_PARAMS + self.series.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names = vec![
            "theta".to_string(),
            "lambda0".to_string(),
            "beta0".to_string(),
            "sigma_step".to_string(),
            "phi".to_string(),
            "delta".to_string(),
            "tau".to_string(),
        ];
        for t in 0..self.series.len() {
            names.push(format!("eps[{}]", t));
        }
        names
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        let inf = f64::INFINITY;
        let mut bounds = vec![
            (f64::NEG_INFINITY, inf), // theta
            (0.0, inf),               // lambda0
            (f64::NEG_INFINITY, inf), // beta0
            (0.0, inf),               // sigma_step
            (0.0, inf),               // phi
            (f64::NEG_INFINITY, inf), // delta
            (0.0, inf),               // tau
        ];
        bounds.extend(std::iter::repeat((f64::NEG_INFINITY, inf)).take(self.series.len()));
        bounds
    }

    fn parameter_init(&self) -> Vec<f64> {
        // Data-informed starting point: crude comparator rate (continuity
        // corrected for zero counts) and the log mean monthly count.
        let lambda0_init =
            (self.trial.comparator_events as f64 + 0.5) / self.trial.comparator_person_years;
        let beta0_init = (self.series.mean() + 0.5).ln();

        let mut init = vec![0.0, lambda0_init, beta0_init, 0.1, 0.5, 0.0, 0.3];
        init.extend(std::iter::repeat(0.0).take(self.series.len()));
        init
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        if params.len() != self.dim() {
            return Err(Error::Computation(format!(
                "parameter vector has length {}, model dimension is {}",
                params.len(),
                self.dim()
            )));
        }
        if params.iter().any(|p| !p.is_finite()) {
            return Ok(f64::INFINITY);
        }

        let theta = params[0];
        let lambda0 = params[1];
        let beta0 = params[2];
        let sigma_step = params[3];
        let phi = params[4];
        let delta = params[5];
        let tau = params[6];
        let eps = &params[N_SCALAR_PARAMS..];
        let p = &self.priors;

        let mut nll = 0.0;

        // Priors.
        nll += normal::nll(theta, p.theta_mean, p.theta_sd)?;
        nll += lambda0.ln() + normal::nll(lambda0.ln(), p.lambda0_log_mean, p.lambda0_log_sd)?;
        nll += normal::nll(beta0, p.beta0_mean, p.beta0_sd)?;
        nll += normal::nll(sigma_step, 0.0, p.sigma_step_scale)?; // HalfNormal up to ln 2
        nll += normal::nll(phi, 0.0, p.phi_scale)?;
        nll += normal::nll(delta, p.delta_mean, p.delta_sd)?;
        nll += (1.0 + (tau / p.tau_scale).powi(2)).ln(); // HalfCauchy up to constants
        for &e in eps {
            nll += 0.5 * e * e;
        }

        // Trial stream: two Poisson arms sharing lambda0.
        let mean_c = lambda0 * self.trial.comparator_person_years;
        let mean_e = lambda0 * (theta * self.links.trial).exp() * self.trial.exposed_person_years;
        if !mean_c.is_finite() || !mean_e.is_finite() || mean_c <= 0.0 || mean_e <= 0.0 {
            return Ok(f64::INFINITY);
        }
        nll += poisson::nll(self.trial.comparator_events, mean_c)?;
        nll += poisson::nll(self.trial.exposed_events, mean_e)?;

        // Case-report stream: NB2 around the random-walk mean.
        let alpha = phi.max(ALPHA_FLOOR);
        let means = self.series_means(theta, beta0, sigma_step, eps);
        for (&y, &mu) in self.series.counts().iter().zip(means.iter()) {
            nll -= neg_binomial::logpmf_mean_disp(y, mu, alpha)?;
        }

        // Pharmacovigilance stream.
        let pv_mean = theta * self.links.pharmacovigilance + delta;
        nll += normal::nll(self.log_ror, pv_mean, self.pharmacovigilance.log_se)?;

        // Mechanistic stream: partial pooling with heterogeneity tau.
        let mech_mean = theta * self.links.mechanistic;
        if tau <= 0.0 {
            return Ok(f64::INFINITY);
        }
        for &effect in self.mechanistic.effects() {
            nll += normal::nll(effect, mech_mean, tau)?;
        }

        Ok(nll)
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        let dim = self.dim();
        if params.len() != dim {
            return Err(Error::Computation(format!(
                "parameter vector has length {}, model dimension is {}",
                params.len(),
                dim
            )));
        }
        if params.iter().any(|p| !p.is_finite()) {
            return Ok(vec![0.0; dim]);
        }

        let theta = params[0];
        let lambda0 = params[1];
        let beta0 = params[2];
        let sigma_step = params[3];
        let phi = params[4];
        let delta = params[5];
        let tau = params[6];
        let eps = &params[N_SCALAR_PARAMS..];
        let p = &self.priors;

        let mut g = vec![0.0; dim];

        // Priors.
        g[0] += (theta - p.theta_mean) / (p.theta_sd * p.theta_sd);
        g[1] += (1.0
            + (lambda0.ln() - p.lambda0_log_mean) / (p.lambda0_log_sd * p.lambda0_log_sd))
            / lambda0;
        g[2] += (beta0 - p.beta0_mean) / (p.beta0_sd * p.beta0_sd);
        g[3] += sigma_step / (p.sigma_step_scale * p.sigma_step_scale);
        g[4] += phi / (p.phi_scale * p.phi_scale);
        g[5] += (delta - p.delta_mean) / (p.delta_sd * p.delta_sd);
        g[6] += 2.0 * tau / (p.tau_scale * p.tau_scale + tau * tau);
        for (i, &e) in eps.iter().enumerate() {
            g[N_SCALAR_PARAMS + i] += e;
        }

        // Trial stream.
        let mean_c = lambda0 * self.trial.comparator_person_years;
        let mean_e = lambda0 * (theta * self.links.trial).exp() * self.trial.exposed_person_years;
        if mean_c.is_finite() && mean_e.is_finite() && mean_c > 0.0 && mean_e > 0.0 {
            let y_c = self.trial.comparator_events as f64;
            let y_e = self.trial.exposed_events as f64;
            g[1] += (mean_c - y_c + mean_e - y_e) / lambda0;
            g[0] += self.links.trial * (mean_e - y_e);
        }

        // Case-report stream.
        // d nll/d eta_t = mu_t (y_t + r) / (r + mu_t) - y_t with r = 1/alpha;
        // eta_t = beta0 + theta*link + sigma_step * cumsum(eps)_t, so the
        // innovation gradient is a reverse cumulative sum of the eta gradients.
        let alpha = phi.max(ALPHA_FLOOR);
        let r = 1.0 / alpha;
        let means = self.series_means(theta, beta0, sigma_step, eps);
        let counts = self.series.counts();
        let t_len = counts.len();

        let mut g_eta = vec![0.0; t_len];
        let mut dlogp_dr = 0.0;
        let mut cum = 0.0;
        for t in 0..t_len {
            let y = counts[t] as f64;
            let mu = means[t];
            let denom = r + mu;
            g_eta[t] = mu * (y + r) / denom - y;

            dlogp_dr += digamma(y + r) - digamma(r) + r.ln() + 1.0 - denom.ln() - (r + y) / denom;

            cum += eps[t];
            g[3] += g_eta[t] * cum;
        }
        let g_eta_sum: f64 = g_eta.iter().sum();
        g[2] += g_eta_sum;
        g[0] += self.links.series * g_eta_sum;
        // d nll/d phi = (d logpmf/d r) / phi^2 via r = 1/phi.
        if phi > ALPHA_FLOOR {
            g[4] += dlogp_dr / (phi * phi);
        }
        let mut suffix = 0.0;
        for t in (0..t_len).rev() {
            suffix += g_eta[t];
            g[N_SCALAR_PARAMS + t] += sigma_step * suffix;
        }

        // Pharmacovigilance stream.
        let se2 = self.pharmacovigilance.log_se * self.pharmacovigilance.log_se;
        let pv_resid = self.log_ror - (theta * self.links.pharmacovigilance + delta);
        g[0] -= self.links.pharmacovigilance * pv_resid / se2;
        g[5] -= pv_resid / se2;

        // Mechanistic stream.
        let mech_mean = theta * self.links.mechanistic;
        let tau2 = tau * tau;
        for &effect in self.mechanistic.effects() {
            let resid = effect - mech_mean;
            g[0] -= self.links.mechanistic * resid / tau2;
            g[6] += 1.0 / tau - resid * resid / (tau2 * tau);
        }

        Ok(g)
    }
}
