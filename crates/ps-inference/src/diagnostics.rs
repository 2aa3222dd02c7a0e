//! MCMC diagnostics: split R-hat, bulk ESS, tail ESS, convergence verdict.
//!
//! This module implements:
//! - Split R-hat (Gelman et al.)
//! - Rank-normalized + folded split R-hat (Vehtari et al. 2021) for robustness
//! - Bulk ESS (variogram + Geyer initial monotone sequence) and tail ESS
//! - E-BFMI and a hard pass/fail convergence verdict

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

/// Diagnostics for a multi-chain NUTS run.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsResult {
    /// Rank-normalized folded split R-hat per parameter.
    pub r_hat: Vec<f64>,
    /// Bulk ESS per parameter.
    pub ess_bulk: Vec<f64>,
    /// Tail ESS per parameter.
    pub ess_tail: Vec<f64>,
    /// Total number of divergent transitions.
    pub n_divergent: usize,
    /// Fraction of divergent transitions.
    pub divergence_rate: f64,
    /// Fraction of transitions hitting max treedepth.
    pub max_treedepth_rate: f64,
    /// E-BFMI per chain (energy Bayesian fraction of missing information).
    pub ebfmi: Vec<f64>,
}

/// Thresholds for the convergence verdict.
#[derive(Debug, Clone)]
pub struct VerdictThresholds {
    /// Maximum acceptable R-hat across all parameters.
    pub max_r_hat: f64,
    /// Minimum acceptable bulk ESS across all parameters.
    pub min_ess_bulk: f64,
    /// Minimum acceptable tail ESS across all parameters.
    pub min_ess_tail: f64,
    /// Maximum acceptable number of divergent transitions.
    pub max_divergent: usize,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        // Vehtari et al. 2021 recommendations, plus zero tolerance for
        // divergences: any divergence means the sampler could not explore
        // some region of the posterior.
        Self { max_r_hat: 1.01, min_ess_bulk: 400.0, min_ess_tail: 400.0, max_divergent: 0 }
    }
}

/// Hard pass/fail convergence assessment.
///
/// A failed verdict does not suppress results; downstream consumers attach
/// it as a warning so estimates are reported but flagged as unreliable.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceVerdict {
    /// Whether every check passed.
    pub passed: bool,
    /// Human-readable description of each failed check.
    pub failures: Vec<String>,
    /// Worst R-hat across parameters.
    pub max_r_hat: f64,
    /// Worst bulk ESS across parameters.
    pub min_ess_bulk: f64,
    /// Worst tail ESS across parameters.
    pub min_ess_tail: f64,
    /// Total number of divergent transitions.
    pub n_divergent: usize,
}

/// Evaluate the convergence verdict for a diagnostics result.
pub fn convergence_verdict(
    diag: &DiagnosticsResult,
    param_names: &[String],
    thresholds: &VerdictThresholds,
) -> ConvergenceVerdict {
    let mut failures = Vec::new();

    let max_r_hat =
        diag.r_hat.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max);
    let min_ess_bulk =
        diag.ess_bulk.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min);
    let min_ess_tail =
        diag.ess_tail.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min);

    for (i, &r) in diag.r_hat.iter().enumerate() {
        if !r.is_finite() || r > thresholds.max_r_hat {
            let name = param_names.get(i).map(|s| s.as_str()).unwrap_or("?");
            failures.push(format!("r_hat[{}] = {:.4} exceeds {:.4}", name, r, thresholds.max_r_hat));
        }
    }
    for (i, &e) in diag.ess_bulk.iter().enumerate() {
        if !e.is_finite() || e < thresholds.min_ess_bulk {
            let name = param_names.get(i).map(|s| s.as_str()).unwrap_or("?");
            failures.push(format!(
                "ess_bulk[{}] = {:.0} below {:.0}",
                name, e, thresholds.min_ess_bulk
            ));
        }
    }
    for (i, &e) in diag.ess_tail.iter().enumerate() {
        if !e.is_finite() || e < thresholds.min_ess_tail {
            let name = param_names.get(i).map(|s| s.as_str()).unwrap_or("?");
            failures.push(format!(
                "ess_tail[{}] = {:.0} below {:.0}",
                name, e, thresholds.min_ess_tail
            ));
        }
    }
    if diag.n_divergent > thresholds.max_divergent {
        failures.push(format!(
            "{} divergent transitions (max allowed {})",
            diag.n_divergent, thresholds.max_divergent
        ));
    }

    ConvergenceVerdict {
        passed: failures.is_empty(),
        failures,
        max_r_hat,
        min_ess_bulk,
        min_ess_tail,
        n_divergent: diag.n_divergent,
    }
}

/// Compute split R-hat for one parameter across multiple chains.
///
/// Each chain is split in half, giving 2*M half-chains.
/// R-hat = sqrt((var_hat+ / W)) where var_hat+ = (N-1)/N * W + B/N.
pub fn r_hat(chains: &[&[f64]]) -> f64 {
    if chains.is_empty() {
        return f64::NAN;
    }

    // Split each chain in half
    let mut half_chains_raw: Vec<&[f64]> = Vec::new();
    for chain in chains {
        let n = chain.len();
        if n < 4 {
            return f64::NAN;
        }
        let mid = n / 2;
        half_chains_raw.push(&chain[..mid]);
        half_chains_raw.push(&chain[mid..]);
    }

    let min_len = half_chains_raw.iter().map(|c| c.len()).min().unwrap_or(0);
    if min_len < 2 {
        return f64::NAN;
    }
    let half_chains: Vec<&[f64]> = half_chains_raw.iter().map(|c| &c[..min_len]).collect();

    let m = half_chains.len() as f64;
    let n = min_len as f64;

    let chain_means: Vec<f64> =
        half_chains.iter().map(|c| c.iter().sum::<f64>() / c.len() as f64).collect();
    let grand_mean: f64 = chain_means.iter().sum::<f64>() / m;

    // Between-chain variance: B = n/(m-1) * sum((chain_mean - grand_mean)^2)
    let b: f64 =
        chain_means.iter().map(|&cm| (cm - grand_mean).powi(2)).sum::<f64>() * n / (m - 1.0);

    // Within-chain variance: W = mean of chain variances
    let w: f64 = half_chains
        .iter()
        .zip(chain_means.iter())
        .map(|(c, &cm)| {
            c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (c.len() as f64 - 1.0)
        })
        .sum::<f64>()
        / m;

    if w < 1e-30 {
        return f64::NAN;
    }

    let var_hat_plus = (n - 1.0) / n * w + b / n;

    (var_hat_plus / w).sqrt()
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let n = sorted.len() as f64;
    let pos = q * (n - 1.0);
    let i0 = pos.floor() as usize;
    let i1 = pos.ceil() as usize;
    if i0 == i1 {
        return sorted[i0];
    }
    let f = pos - i0 as f64;
    sorted[i0] * (1.0 - f) + sorted[i1] * f
}

fn median_all(chains: &[Vec<f64>]) -> f64 {
    let mut all: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
    all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater));
    all.get(all.len() / 2).copied().unwrap_or(f64::NAN)
}

fn rank_normalize(chains: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let normal = Normal::new(0.0, 1.0).expect("Normal(0,1) should be valid");
    let total: usize = chains.iter().map(|c| c.len()).sum();
    if total == 0 {
        return chains.to_vec();
    }

    let mut out: Vec<Vec<f64>> = chains.iter().map(|c| vec![0.0; c.len()]).collect();

    // Flatten draws with back-references.
    let mut flat: Vec<(f64, usize, usize)> = Vec::with_capacity(total);
    for (ci, chain) in chains.iter().enumerate() {
        for (ti, &x) in chain.iter().enumerate() {
            flat.push((x, ci, ti));
        }
    }

    // Sort by value; NaNs go to the end.
    flat.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Greater));

    // Assign average ranks for ties (1-based ranks).
    let n = flat.len();
    let mut i = 0usize;
    while i < n {
        let mut j = i + 1;
        while j < n && flat[j].0 == flat[i].0 {
            j += 1;
        }

        let rank_lo = i as f64 + 1.0;
        let rank_hi = j as f64;
        let rank = 0.5 * (rank_lo + rank_hi);

        // Convert rank to normal quantile. Use (rank - 0.5)/N to avoid 0/1.
        let mut p = (rank - 0.5) / n as f64;
        p = p.clamp(1e-12, 1.0 - 1e-12);
        let z = normal.inverse_cdf(p);

        for k in i..j {
            let (_x, ci, ti) = flat[k];
            out[ci][ti] = z;
        }

        i = j;
    }

    out
}

/// Rank-normalized folded split R-hat (Vehtari et al. 2021).
pub fn r_hat_rank_normalized_folded(chains: &[Vec<f64>]) -> f64 {
    if chains.is_empty() || chains.iter().any(|c| c.len() < 4) {
        return f64::NAN;
    }

    let z = rank_normalize(chains);
    let z_refs: Vec<&[f64]> = z.iter().map(|c| c.as_slice()).collect();
    let r_rank = r_hat(&z_refs);

    let med = median_all(chains);
    let folded: Vec<Vec<f64>> =
        chains.iter().map(|c| c.iter().map(|&x| (x - med).abs()).collect()).collect();
    let z_fold = rank_normalize(&folded);
    let zf_refs: Vec<&[f64]> = z_fold.iter().map(|c| c.as_slice()).collect();
    let r_fold = r_hat(&zf_refs);

    r_rank.max(r_fold)
}

fn ess_bulk_rank_normalized(chains: &[Vec<f64>]) -> f64 {
    let z = rank_normalize(chains);
    let z_refs: Vec<&[f64]> = z.iter().map(|c| c.as_slice()).collect();
    ess_bulk(&z_refs)
}

fn split_chains_for_ess<'a>(chains: &[&'a [f64]]) -> Option<Vec<&'a [f64]>> {
    if chains.is_empty() {
        return None;
    }

    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for c in chains {
        if c.len() < 4 {
            return None;
        }
        let mid = c.len() / 2;
        halves.push(&c[..mid]);
        halves.push(&c[mid..]);
    }

    let min_len = halves.iter().map(|c| c.len()).min().unwrap_or(0);
    if min_len < 4 {
        return None;
    }
    Some(halves.into_iter().map(|c| &c[..min_len]).collect())
}

fn mean_and_var(chain: &[f64]) -> (f64, f64) {
    let n = chain.len() as f64;
    let mean = chain.iter().sum::<f64>() / n;
    let var = chain.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n.max(2.0) - 1.0);
    (mean, var)
}

/// Compute effective sample size (ESS) using a multi-chain initial monotone
/// sequence estimator (Geyer) on autocorrelation estimates derived from the
/// variogram (Vehtari et al. 2021 / Stan-style).
pub fn ess_bulk(chains: &[&[f64]]) -> f64 {
    let split = match split_chains_for_ess(chains) {
        Some(v) => v,
        None => return 0.0,
    };

    let m = split.len();
    let n = split[0].len();
    let total_draws = (m * n) as f64;

    // Marginal posterior variance estimate (var_hat_plus).
    let means_vars: Vec<(f64, f64)> = split.iter().map(|c| mean_and_var(c)).collect();
    let means: Vec<f64> = means_vars.iter().map(|(mu, _)| *mu).collect();
    let vars: Vec<f64> = means_vars.iter().map(|(_, v)| *v).collect();

    let m_f = m as f64;
    let n_f = n as f64;
    let mean_all = means.iter().sum::<f64>() / m_f;
    let b = means.iter().map(|&mu| (mu - mean_all).powi(2)).sum::<f64>() * n_f / (m_f - 1.0);
    let w = vars.iter().sum::<f64>() / m_f;
    let var_hat_plus = (n_f - 1.0) / n_f * w + b / n_f;

    if !var_hat_plus.is_finite() || var_hat_plus < 1e-30 {
        return total_draws;
    }

    // Autocorrelation estimates via variogram:
    // rho_t = 1 - V_t / (2 * var_hat_plus)
    let max_lag = n - 1;
    let mut rho: Vec<f64> = Vec::with_capacity(max_lag);
    for lag in 1..=max_lag {
        let mut sum = 0.0;
        let mut count = 0usize;
        for c in &split {
            for i in 0..(n - lag) {
                let d = c[i] - c[i + lag];
                sum += d * d;
                count += 1;
            }
        }
        if count == 0 {
            break;
        }
        let v = sum / (count as f64);
        let r = (1.0 - v / (2.0 * var_hat_plus)).clamp(-1.0, 1.0);
        rho.push(r);

        // Fast early stop: once the pair sum becomes negative we can stop building rho.
        if rho.len() >= 2 {
            let k = rho.len();
            if k % 2 == 0 {
                let gamma = rho[k - 2] + rho[k - 1];
                if gamma < 0.0 {
                    break;
                }
            }
        }
    }

    // Geyer initial monotone sequence estimator on paired sums.
    let mut gammas: Vec<f64> = Vec::new();
    let mut i = 0usize;
    while i + 1 < rho.len() {
        let g = rho[i] + rho[i + 1];
        if g < 0.0 {
            break;
        }
        gammas.push(g);
        i += 2;
    }

    for k in 1..gammas.len() {
        if gammas[k] > gammas[k - 1] {
            gammas[k] = gammas[k - 1];
        }
    }

    let mut tau = 1.0;
    for g in gammas {
        tau += 2.0 * g;
    }
    if !tau.is_finite() || tau <= 0.0 {
        return total_draws;
    }

    (total_draws / tau).clamp(1.0, total_draws)
}

/// Compute tail ESS as a conservative tail-mixing proxy.
///
/// Follows the Stan/ArviZ convention: compute ESS on indicator chains for the
/// lower and upper tails, then take the minimum:
/// `min(ESS(I[x <= q05]), ESS(I[x >= q95]))`.
pub fn ess_tail(chains: &[&[f64]]) -> f64 {
    if chains.is_empty() {
        return 0.0;
    }

    let mut all: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
    all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater));
    let q05 = quantile_sorted(&all, 0.05);
    let q95 = quantile_sorted(&all, 0.95);

    let lower: Vec<Vec<f64>> = chains
        .iter()
        .map(|c| c.iter().map(|&x| if x <= q05 { 1.0 } else { 0.0 }).collect())
        .collect();
    let upper: Vec<Vec<f64>> = chains
        .iter()
        .map(|c| c.iter().map(|&x| if x >= q95 { 1.0 } else { 0.0 }).collect())
        .collect();

    let lower_refs: Vec<&[f64]> = lower.iter().map(|c| c.as_slice()).collect();
    let upper_refs: Vec<&[f64]> = upper.iter().map(|c| c.as_slice()).collect();

    ess_bulk(&lower_refs).min(ess_bulk(&upper_refs))
}

/// Compute full diagnostics for a [`crate::chain::SamplerResult`].
pub fn compute_diagnostics(result: &crate::chain::SamplerResult) -> DiagnosticsResult {
    let n_params = result.param_names.len();

    let mut r_hat_vals = Vec::with_capacity(n_params);
    let mut ess_bulk_vals = Vec::with_capacity(n_params);
    let mut ess_tail_vals = Vec::with_capacity(n_params);

    for p in 0..n_params {
        let chain_draws: Vec<Vec<f64>> = result.param_draws(p);
        r_hat_vals.push(r_hat_rank_normalized_folded(&chain_draws));
        ess_bulk_vals.push(ess_bulk_rank_normalized(&chain_draws));
        let refs: Vec<&[f64]> = chain_draws.iter().map(|c| c.as_slice()).collect();
        ess_tail_vals.push(ess_tail(&refs));
    }

    let total_samples: usize = result.chains.iter().map(|c| c.divergences.len()).sum();
    let n_divergent: usize =
        result.chains.iter().flat_map(|c| c.divergences.iter()).filter(|&&d| d).count();
    let divergence_rate =
        if total_samples > 0 { n_divergent as f64 / total_samples as f64 } else { 0.0 };

    // Rate of transitions that hit the configured maximum treedepth.
    // `tree_depths` uses 0-based depth, so hitting the cap means depth >= max.
    let n_max_depth: usize = result
        .chains
        .iter()
        .flat_map(|c| c.tree_depths.iter().map(move |&d| (d, c.max_treedepth)))
        .filter(|(d, max_d)| *d >= *max_d)
        .count();
    let max_treedepth_rate =
        if total_samples > 0 { n_max_depth as f64 / total_samples as f64 } else { 0.0 };

    let ebfmi: Vec<f64> = result.chains.iter().map(|c| ebfmi(&c.energies)).collect();

    DiagnosticsResult {
        r_hat: r_hat_vals,
        ess_bulk: ess_bulk_vals,
        ess_tail: ess_tail_vals,
        n_divergent,
        divergence_rate,
        max_treedepth_rate,
        ebfmi,
    }
}

/// Compute E-BFMI (energy Bayesian fraction of missing information) for one chain.
///
/// Definition (Stan): mean((E_t - E_{t-1})^2) / var(E_t).
pub fn ebfmi(energies: &[f64]) -> f64 {
    let n = energies.len();
    if n < 4 {
        return f64::NAN;
    }
    let mean: f64 = energies.iter().sum::<f64>() / n as f64;
    let var: f64 = energies.iter().map(|&e| (e - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    if var < 1e-30 {
        return f64::NAN;
    }

    let mut msd = 0.0;
    for i in 1..n {
        let d = energies[i] - energies[i - 1];
        msd += d * d;
    }
    msd /= n as f64 - 1.0;
    msd / var
}
