//! Analysis configuration.
//!
//! A single deserializable record carrying the observed data for all four
//! evidence streams, prior hyperparameters, link coefficients, sampler
//! settings, convergence thresholds, and derived-metric options.
//! `AnalysisConfig::validate` performs all domain checks up front so that no
//! compute cost is spent on a malformed configuration.

use ps_core::{Error, Result};
use serde::Deserialize;

/// Two-arm trial counts and person-time.
#[derive(Debug, Clone, Deserialize)]
pub struct TrialConfig {
    /// Events in the exposed arm.
    pub exposed_events: u64,
    /// Person-years in the exposed arm.
    pub exposed_person_years: f64,
    /// Events in the comparator arm.
    pub comparator_events: u64,
    /// Person-years in the comparator arm.
    pub comparator_person_years: f64,
}

/// Prior hyperparameters for the joint model.
///
/// `theta` deliberately gets an informative (never flat) prior reflecting
/// plausible clinical effect sizes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// Mean of the Normal prior on theta.
    pub theta_mean: f64,
    /// Scale of the Normal prior on theta.
    pub theta_sd: f64,
    /// Log-scale mean of the LogNormal prior on the comparator rate.
    pub lambda0_log_mean: f64,
    /// Log-scale sd of the LogNormal prior on the comparator rate.
    pub lambda0_log_sd: f64,
    /// Mean of the Normal prior on the series baseline log level.
    pub beta0_mean: f64,
    /// Scale of the Normal prior on the series baseline log level.
    pub beta0_sd: f64,
    /// Scale of the HalfNormal prior on the random-walk step scale.
    pub sigma_step_scale: f64,
    /// Scale of the HalfNormal prior on the NB2 dispersion.
    pub phi_scale: f64,
    /// Mean of the Normal prior on the reporting-bias offset.
    pub delta_mean: f64,
    /// Scale of the Normal prior on the reporting-bias offset.
    pub delta_sd: f64,
    /// Scale of the HalfCauchy prior on the between-study heterogeneity.
    pub tau_scale: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            theta_mean: 0.0,
            theta_sd: 1.0,
            lambda0_log_mean: -10.0,
            lambda0_log_sd: 3.0,
            beta0_mean: 0.0,
            beta0_sd: 3.0,
            sigma_step_scale: 0.5,
            phi_scale: 1.0,
            delta_mean: 0.0,
            delta_sd: 0.5,
            tau_scale: 0.5,
        }
    }
}

/// Per-stream link coefficients mapping theta onto each native scale.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Trial stream: theta acts as `exp(theta * trial)` on the rate ratio.
    pub trial: f64,
    /// Case-report stream: additive `theta * series` on the log mean.
    pub series: f64,
    /// Pharmacovigilance stream: `theta * pharmacovigilance` on the log-ROR.
    pub pharmacovigilance: f64,
    /// Mechanistic stream: study effects center at `theta * mechanistic`.
    pub mechanistic: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { trial: 1.0, series: 1.0, pharmacovigilance: 1.0, mechanistic: 1.0 }
    }
}

/// Sampler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of independent chains (>= 2 for cross-chain diagnostics).
    pub n_chains: usize,
    /// Warmup iterations per chain.
    pub n_warmup: usize,
    /// Post-warmup draws per chain.
    pub n_samples: usize,
    /// Target average acceptance probability.
    pub target_accept: f64,
    /// Maximum NUTS tree depth.
    pub max_treedepth: usize,
    /// Base RNG seed; chain `i` uses `seed + i`.
    pub seed: u64,
    /// Stddev of unconstrained-space jitter on per-chain initial points.
    pub init_jitter: f64,
    /// Optional wall-clock deadline in seconds for the whole multi-chain run.
    pub deadline_secs: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            n_chains: 4,
            n_warmup: 1000,
            n_samples: 1000,
            target_accept: 0.8,
            max_treedepth: 10,
            seed: 42,
            init_jitter: 1.0,
            deadline_secs: None,
        }
    }
}

/// Convergence thresholds for the verdict gate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Maximum acceptable rank-normalized folded split R-hat.
    pub max_r_hat: f64,
    /// Minimum acceptable bulk ESS.
    pub min_ess_bulk: f64,
    /// Minimum acceptable tail ESS.
    pub min_ess_tail: f64,
    /// Maximum acceptable number of divergent transitions.
    pub max_divergent: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self { max_r_hat: 1.01, min_ess_bulk: 400.0, min_ess_tail: 400.0, max_divergent: 0 }
    }
}

/// Derived-metric options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Credible interval mass (default 0.95).
    pub interval_mass: f64,
    /// Use a highest-density interval instead of equal-tailed.
    pub use_hdi: bool,
    /// Clinically meaningful excess-rate threshold (events per 100,000 PY).
    pub excess_threshold_per_100k: f64,
    /// Prior probability that an excess event is attributable to the pathway.
    pub causal_fraction_prior: f64,
    /// NNH mean/median ratio beyond which a skew warning is raised.
    pub skew_ratio_threshold: f64,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            interval_mass: 0.95,
            use_hdi: false,
            excess_threshold_per_100k: 1.0,
            causal_fraction_prior: 0.5,
            skew_ratio_threshold: 2.0,
        }
    }
}

/// Full analysis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Trial stream data.
    pub trial: TrialConfig,
    /// Monthly case-report counts, in time order.
    pub case_series: Vec<u64>,
    /// Observed reporting odds ratio.
    pub ror: f64,
    /// Standard error of the log reporting odds ratio.
    pub ror_log_se: f64,
    /// Mechanistic per-study effect sizes.
    pub mechanistic_effects: Vec<f64>,
    /// Prior hyperparameters.
    #[serde(default)]
    pub priors: PriorConfig,
    /// Per-stream link coefficients.
    #[serde(default)]
    pub links: LinkConfig,
    /// Sampler settings.
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Convergence thresholds.
    #[serde(default)]
    pub convergence: ConvergenceConfig,
    /// Derived-metric options.
    #[serde(default)]
    pub metrics: MetricConfig,
}

impl AnalysisConfig {
    /// Validate every field against its domain constraint.
    ///
    /// Evidence-level constraints are re-checked by the adapters; this method
    /// additionally covers prior, sampler, and metric settings so that a bad
    /// configuration fails before any sampling starts.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, v: f64) -> Result<()> {
            if !v.is_finite() || v <= 0.0 {
                return Err(Error::Validation(format!(
                    "{} must be finite and > 0, got {}",
                    name, v
                )));
            }
            Ok(())
        }
        fn finite(name: &str, v: f64) -> Result<()> {
            if !v.is_finite() {
                return Err(Error::Validation(format!("{} must be finite, got {}", name, v)));
            }
            Ok(())
        }

        positive("trial.exposed_person_years", self.trial.exposed_person_years)?;
        positive("trial.comparator_person_years", self.trial.comparator_person_years)?;
        if self.case_series.is_empty() {
            return Err(Error::Validation(
                "case_series must contain at least one monthly count".to_string(),
            ));
        }
        positive("ror", self.ror)?;
        positive("ror_log_se", self.ror_log_se)?;
        if self.mechanistic_effects.is_empty() {
            return Err(Error::Validation(
                "mechanistic_effects must contain at least one study effect".to_string(),
            ));
        }

        finite("priors.theta_mean", self.priors.theta_mean)?;
        positive("priors.theta_sd", self.priors.theta_sd)?;
        finite("priors.lambda0_log_mean", self.priors.lambda0_log_mean)?;
        positive("priors.lambda0_log_sd", self.priors.lambda0_log_sd)?;
        finite("priors.beta0_mean", self.priors.beta0_mean)?;
        positive("priors.beta0_sd", self.priors.beta0_sd)?;
        positive("priors.sigma_step_scale", self.priors.sigma_step_scale)?;
        positive("priors.phi_scale", self.priors.phi_scale)?;
        finite("priors.delta_mean", self.priors.delta_mean)?;
        positive("priors.delta_sd", self.priors.delta_sd)?;
        positive("priors.tau_scale", self.priors.tau_scale)?;

        finite("links.trial", self.links.trial)?;
        finite("links.series", self.links.series)?;
        finite("links.pharmacovigilance", self.links.pharmacovigilance)?;
        finite("links.mechanistic", self.links.mechanistic)?;

        if self.sampler.n_chains < 2 {
            return Err(Error::Validation(format!(
                "sampler.n_chains must be >= 2 for cross-chain diagnostics, got {}",
                self.sampler.n_chains
            )));
        }
        if self.sampler.n_samples == 0 {
            return Err(Error::Validation("sampler.n_samples must be > 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.sampler.target_accept) || self.sampler.target_accept <= 0.0 {
            return Err(Error::Validation(format!(
                "sampler.target_accept must be in (0, 1), got {}",
                self.sampler.target_accept
            )));
        }

        if !(0.0..1.0).contains(&self.metrics.interval_mass) || self.metrics.interval_mass <= 0.0 {
            return Err(Error::Validation(format!(
                "metrics.interval_mass must be in (0, 1), got {}",
                self.metrics.interval_mass
            )));
        }
        if !(0.0..=1.0).contains(&self.metrics.causal_fraction_prior) {
            return Err(Error::Validation(format!(
                "metrics.causal_fraction_prior must be in [0, 1], got {}",
                self.metrics.causal_fraction_prior
            )));
        }
        positive("metrics.excess_threshold_per_100k", self.metrics.excess_threshold_per_100k)?;
        positive("metrics.skew_ratio_threshold", self.metrics.skew_ratio_threshold)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AnalysisConfig {
        AnalysisConfig {
            trial: TrialConfig {
                exposed_events: 8,
                exposed_person_years: 144_226.0,
                comparator_events: 4,
                comparator_person_years: 132_922.0,
            },
            case_series: vec![1, 0, 2, 1],
            ror: 1.23,
            ror_log_se: 0.35,
            mechanistic_effects: vec![0.3, 0.5, -0.1],
            priors: PriorConfig::default(),
            links: LinkConfig::default(),
            sampler: SamplerConfig::default(),
            convergence: ConvergenceConfig::default(),
            metrics: MetricConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_person_years() {
        let mut c = valid_config();
        c.trial.exposed_person_years = -1.0;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("exposed_person_years")));
    }

    #[test]
    fn test_rejects_empty_series() {
        let mut c = valid_config();
        c.case_series.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_prior_scale() {
        let mut c = valid_config();
        c.priors.tau_scale = 0.0;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("tau_scale")));
    }

    #[test]
    fn test_rejects_single_chain() {
        let mut c = valid_config();
        c.sampler.n_chains = 1;
        let err = c.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("n_chains")));
    }

    #[test]
    fn test_rejects_causal_prior_out_of_range() {
        let mut c = valid_config();
        c.metrics.causal_fraction_prior = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_deserialize_minimal_json() {
        let json = r#"{
            "trial": {
                "exposed_events": 8,
                "exposed_person_years": 144226.0,
                "comparator_events": 4,
                "comparator_person_years": 132922.0
            },
            "case_series": [1, 0, 2, 1, 0, 3],
            "ror": 1.23,
            "ror_log_se": 0.35,
            "mechanistic_effects": [0.3, 0.5, -0.1]
        }"#;
        let c: AnalysisConfig = serde_json::from_str(json).unwrap();
        c.validate().unwrap();
        assert_eq!(c.sampler.n_chains, 4);
        assert!((c.metrics.interval_mass - 0.95).abs() < 1e-12);
    }
}
