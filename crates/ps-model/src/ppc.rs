//! Posterior predictive checks.
//!
//! For each evidence stream, replicate data are simulated from a seeded
//! subset of posterior draws and compared to the observed data through
//! summary statistics. The output is advisory: it annotates the report and
//! never gates downstream computation.

use crate::pathway::PathwayModel;
use ps_core::traits::LogDensityModel;
use ps_core::{Error, Result};
use ps_inference::SamplerResult;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, Normal, Poisson};
use serde::Serialize;

/// Maximum number of posterior draws used for replicate simulation.
const MAX_REPLICATES: usize = 500;

/// One stream's predictive check.
#[derive(Debug, Clone, Serialize)]
pub struct StreamCheck {
    /// Stream name.
    pub stream: String,
    /// Discrepancy statistic name.
    pub statistic: String,
    /// Observed value of the statistic.
    pub observed: f64,
    /// Bayesian p-value: fraction of replicates with statistic >= observed.
    ///
    /// Values near 0 or 1 indicate the model systematically under- or
    /// over-predicts the statistic.
    pub p_value: f64,
}

/// Posterior predictive check results for all four streams.
#[derive(Debug, Clone, Serialize)]
pub struct PpcReport {
    /// Per-stream, per-statistic checks.
    pub checks: Vec<StreamCheck>,
    /// Number of posterior draws used per check.
    pub n_replicates: usize,
}

/// Run posterior predictive checks against the observed data.
pub fn run_ppc(model: &PathwayModel, result: &SamplerResult, seed: u64) -> Result<PpcReport> {
    let n_draws = result.total_draws();
    if n_draws == 0 {
        return Err(Error::Computation("no posterior draws for predictive checks".to_string()));
    }

    // Flatten draws and take an evenly spaced subset.
    let all_draws: Vec<&Vec<f64>> =
        result.chains.iter().flat_map(|c| c.draws_constrained.iter()).collect();
    let n_rep = n_draws.min(MAX_REPLICATES);
    let stride = (n_draws / n_rep).max(1);
    let subset: Vec<&Vec<f64>> = all_draws.iter().step_by(stride).take(n_rep).copied().collect();

    let mut rng = StdRng::seed_from_u64(seed);
    let unit_normal = Normal::new(0.0, 1.0).unwrap();

    let trial = model.trial();
    let series = model.series();
    let pv = model.pharmacovigilance();
    let mech = model.mechanistic();
    let links = model.links();

    let obs_trial_total = (trial.exposed_events + trial.comparator_events) as f64;
    let obs_series_total = series.total() as f64;
    let obs_series_var = series.variance();
    let obs_log_ror = pv.log_ror();
    let obs_mech_mean = mech.mean_effect();

    let mut ge_trial_total = 0usize;
    let mut ge_series_total = 0usize;
    let mut ge_series_var = 0usize;
    let mut ge_log_ror = 0usize;
    let mut ge_mech_mean = 0usize;

    for draw in &subset {
        let theta = draw[0];
        let lambda0 = draw[1];
        let beta0 = draw[2];
        let sigma_step = draw[3];
        let phi = draw[4];
        let delta = draw[5];
        let tau = draw[6];
        let eps = &draw[crate::pathway::N_SCALAR_PARAMS..];

        // Trial stream: Poisson replicate counts for both arms.
        let mean_c = lambda0 * trial.comparator_person_years;
        let mean_e = lambda0 * (theta * links.trial).exp() * trial.exposed_person_years;
        let rep_c = sample_poisson(&mut rng, mean_c)?;
        let rep_e = sample_poisson(&mut rng, mean_e)?;
        if rep_c + rep_e >= obs_trial_total {
            ge_trial_total += 1;
        }

        // Case-report stream: NB2 replicates via the gamma-Poisson mixture.
        let alpha = phi.max(1e-8);
        let r = 1.0 / alpha;
        let means = model.series_means(theta, beta0, sigma_step, eps);
        let mut rep_counts = Vec::with_capacity(means.len());
        for &mu in &means {
            let gamma = Gamma::new(r, mu / r).map_err(|e| {
                Error::Computation(format!("gamma mixture parameters invalid: {}", e))
            })?;
            let rate: f64 = gamma.sample(&mut rng);
            rep_counts.push(sample_poisson(&mut rng, rate.max(1e-12))?);
        }
        let rep_total: f64 = rep_counts.iter().sum();
        let rep_mean = rep_total / rep_counts.len() as f64;
        let rep_var = if rep_counts.len() > 1 {
            rep_counts.iter().map(|&c| (c - rep_mean).powi(2)).sum::<f64>()
                / (rep_counts.len() as f64 - 1.0)
        } else {
            0.0
        };
        if rep_total >= obs_series_total {
            ge_series_total += 1;
        }
        if rep_var >= obs_series_var {
            ge_series_var += 1;
        }

        // Pharmacovigilance stream: one Normal replicate of the log-ROR.
        let pv_mean = theta * links.pharmacovigilance + delta;
        let rep_log_ror = pv_mean + pv.log_se * unit_normal.sample(&mut rng);
        if rep_log_ror >= obs_log_ror {
            ge_log_ror += 1;
        }

        // Mechanistic stream: replicate study effects, compare mean.
        let mech_mean = theta * links.mechanistic;
        let rep_mech_mean = (0..mech.n_studies())
            .map(|_| mech_mean + tau * unit_normal.sample(&mut rng))
            .sum::<f64>()
            / mech.n_studies() as f64;
        if rep_mech_mean >= obs_mech_mean {
            ge_mech_mean += 1;
        }
    }

    let n = subset.len() as f64;
    let checks = vec![
        StreamCheck {
            stream: "trial".to_string(),
            statistic: "total_events".to_string(),
            observed: obs_trial_total,
            p_value: ge_trial_total as f64 / n,
        },
        StreamCheck {
            stream: "case_series".to_string(),
            statistic: "total_count".to_string(),
            observed: obs_series_total,
            p_value: ge_series_total as f64 / n,
        },
        StreamCheck {
            stream: "case_series".to_string(),
            statistic: "variance".to_string(),
            observed: obs_series_var,
            p_value: ge_series_var as f64 / n,
        },
        StreamCheck {
            stream: "pharmacovigilance".to_string(),
            statistic: "log_ror".to_string(),
            observed: obs_log_ror,
            p_value: ge_log_ror as f64 / n,
        },
        StreamCheck {
            stream: "mechanistic".to_string(),
            statistic: "mean_effect".to_string(),
            observed: obs_mech_mean,
            p_value: ge_mech_mean as f64 / n,
        },
    ];

    Ok(PpcReport { checks, n_replicates: subset.len() })
}

fn sample_poisson(rng: &mut StdRng, mean: f64) -> Result<f64> {
    if !mean.is_finite() || mean <= 0.0 {
        return Err(Error::Computation(format!(
            "replicate Poisson mean must be finite and > 0, got {}",
            mean
        )));
    }
    let pois = Poisson::new(mean)
        .map_err(|e| Error::Computation(format!("Poisson parameter invalid: {}", e)))?;
    Ok(pois.sample(rng))
}
