//! Per-draw derived-quantity engine.
//!
//! Every metric is computed by transforming each posterior draw and only then
//! summarizing the resulting empirical distribution. Summarizing first and
//! transforming afterward is disallowed: the NNH reciprocal is convex and
//! skew-sensitive, so `1/mean(excess)` and `mean(1/excess)` differ materially.

use ps_core::{Error, Result};
use ps_inference::{ConvergenceVerdict, SamplerResult};
use rayon::prelude::*;
use serde::Serialize;

/// Options controlling summaries and thresholds.
#[derive(Debug, Clone)]
pub struct MetricOptions {
    /// Credible interval mass (e.g. 0.95).
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

/// Empirical summary of one metric's per-draw distribution.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    /// Metric name.
    pub name: String,
    /// Empirical mean.
    pub mean: f64,
    /// Empirical median.
    pub median: f64,
    /// Lower credible bound.
    pub lower: f64,
    /// Upper credible bound.
    pub upper: f64,
    /// Interval mass the bounds correspond to.
    pub interval_mass: f64,
    /// Number of draws the summary is based on.
    pub n_draws: usize,
    /// True when the convergence verdict failed for the run.
    pub convergence_warning: bool,
}

/// NNH summary: defined-draw distribution plus the undefined-draw accounting.
#[derive(Debug, Clone, Serialize)]
pub struct NnhSummary {
    /// Summary over draws where NNH is defined (excess > 0).
    pub summary: MetricSummary,
    /// Draws where NNH is undefined (protective or null draw).
    pub n_undefined: usize,
    /// Total number of draws considered.
    pub n_total: usize,
    /// True when mean/median divergence exceeds the skew threshold.
    pub skew_warning: bool,
}

/// All derived metrics for one run.
#[derive(Debug, Clone, Serialize)]
pub struct DerivedMetrics {
    /// Incidence rate ratio `exp(theta * trial_link)`.
    pub irr: MetricSummary,
    /// Comparator-arm rate per 100,000 person-years.
    pub baseline_per_100k: MetricSummary,
    /// Excess rate per 100,000 person-years.
    pub excess_per_100k: MetricSummary,
    /// Number needed to harm.
    pub nnh: NnhSummary,
    /// Empirical `P(IRR > 1)`.
    pub p_irr_gt_1: f64,
    /// Empirical `P(excess > threshold)`.
    pub p_excess_gt_threshold: f64,
    /// Threshold used for the excess tail probability.
    pub excess_threshold_per_100k: f64,
    /// Posterior probability of causation.
    pub poc: MetricSummary,
    /// The causal-fraction prior PoC is conditioned on.
    pub causal_fraction_prior: f64,
    /// True when the convergence verdict failed.
    pub convergence_warning: bool,
}

/// Compute every derived metric from a sampler result.
///
/// When `verdict.passed` is false the metrics are still computed — they are
/// numerically producible — but every summary carries a convergence warning
/// and a `log::warn!` fires once.
pub fn compute_derived(
    result: &SamplerResult,
    verdict: &ConvergenceVerdict,
    trial_link: f64,
    opts: &MetricOptions,
) -> Result<DerivedMetrics> {
    let theta_idx = result
        .param_index("theta")
        .ok_or_else(|| Error::Computation("sampler result missing parameter theta".to_string()))?;
    let lambda0_idx = result.param_index("lambda0").ok_or_else(|| {
        Error::Computation("sampler result missing parameter lambda0".to_string())
    })?;

    let theta = result.param_draws_flat(theta_idx);
    let lambda0 = result.param_draws_flat(lambda0_idx);
    if theta.is_empty() {
        return Err(Error::Computation("no posterior draws to summarize".to_string()));
    }

    let convergence_warning = !verdict.passed;
    if convergence_warning {
        log::warn!(
            "convergence verdict failed ({} checks); derived metrics are flagged unreliable",
            verdict.failures.len()
        );
    }

    // Per-draw transforms, in draw order. Order never matters downstream:
    // every summary is an order-independent aggregate.
    let per_draw: Vec<(f64, f64, f64, f64)> = theta
        .par_iter()
        .zip(lambda0.par_iter())
        .map(|(&th, &l0)| {
            let irr = (th * trial_link).exp();
            let baseline = l0 * 1e5;
            let excess = baseline * (irr - 1.0);
            let poc = opts.causal_fraction_prior * (1.0 - 1.0 / irr).max(0.0);
            (irr, baseline, excess, poc)
        })
        .collect();

    let irr: Vec<f64> = per_draw.iter().map(|d| d.0).collect();
    let baseline: Vec<f64> = per_draw.iter().map(|d| d.1).collect();
    let excess: Vec<f64> = per_draw.iter().map(|d| d.2).collect();
    let poc: Vec<f64> = per_draw.iter().map(|d| d.3).collect();

    let n_total = excess.len();
    let nnh_defined: Vec<f64> =
        excess.iter().filter(|&&e| e > 0.0).map(|&e| 1e5 / e).collect();
    let n_undefined = n_total - nnh_defined.len();

    let nnh_summary = summarize("nnh", &nnh_defined, opts, convergence_warning);
    let skew_warning = nnh_summary.median > 0.0
        && (nnh_summary.mean / nnh_summary.median).max(nnh_summary.median / nnh_summary.mean)
            > opts.skew_ratio_threshold;
    if skew_warning {
        log::warn!(
            "NNH mean ({:.1}) and median ({:.1}) diverge; distribution is heavily skewed",
            nnh_summary.mean,
            nnh_summary.median
        );
    }

    let p_irr_gt_1 = fraction(&irr, |v| v > 1.0);
    let p_excess_gt_threshold = fraction(&excess, |v| v > opts.excess_threshold_per_100k);

    Ok(DerivedMetrics {
        irr: summarize("irr", &irr, opts, convergence_warning),
        baseline_per_100k: summarize("baseline_per_100k", &baseline, opts, convergence_warning),
        excess_per_100k: summarize("excess_per_100k", &excess, opts, convergence_warning),
        nnh: NnhSummary { summary: nnh_summary, n_undefined, n_total, skew_warning },
        p_irr_gt_1,
        p_excess_gt_threshold,
        excess_threshold_per_100k: opts.excess_threshold_per_100k,
        poc: summarize("probability_of_causation", &poc, opts, convergence_warning),
        causal_fraction_prior: opts.causal_fraction_prior,
        convergence_warning,
    })
}

/// Empirical fraction of draws satisfying a predicate. Never a normal
/// approximation.
fn fraction(draws: &[f64], pred: impl Fn(f64) -> bool) -> f64 {
    if draws.is_empty() {
        return f64::NAN;
    }
    draws.iter().filter(|&&v| pred(v)).count() as f64 / draws.len() as f64
}

fn summarize(
    name: &str,
    draws: &[f64],
    opts: &MetricOptions,
    convergence_warning: bool,
) -> MetricSummary {
    if draws.is_empty() {
        return MetricSummary {
            name: name.to_string(),
            mean: f64::NAN,
            median: f64::NAN,
            lower: f64::NAN,
            upper: f64::NAN,
            interval_mass: opts.interval_mass,
            n_draws: 0,
            convergence_warning,
        };
    }

    let mut sorted = draws.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Greater));

    let mean = draws.iter().sum::<f64>() / draws.len() as f64;
    let median = quantile_sorted(&sorted, 0.5);

    let (lower, upper) = if opts.use_hdi {
        hdi_sorted(&sorted, opts.interval_mass)
    } else {
        let tail = (1.0 - opts.interval_mass) / 2.0;
        (quantile_sorted(&sorted, tail), quantile_sorted(&sorted, 1.0 - tail))
    };

    MetricSummary {
        name: name.to_string(),
        mean,
        median,
        lower,
        upper,
        interval_mass: opts.interval_mass,
        n_draws: draws.len(),
        convergence_warning,
    }
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

/// Highest-density interval: the shortest window covering `mass`.
fn hdi_sorted(sorted: &[f64], mass: f64) -> (f64, f64) {
    let n = sorted.len();
    let window = ((mass * n as f64).ceil() as usize).clamp(1, n);
    if window == n {
        return (sorted[0], sorted[n - 1]);
    }
    let mut best = (sorted[0], sorted[window - 1]);
    let mut best_width = best.1 - best.0;
    for i in 1..=(n - window) {
        let width = sorted[i + window - 1] - sorted[i];
        if width < best_width {
            best_width = width;
            best = (sorted[i], sorted[i + window - 1]);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ps_inference::chain::Chain;

    fn opts() -> MetricOptions {
        MetricOptions {
            interval_mass: 0.95,
            use_hdi: false,
            excess_threshold_per_100k: 1.0,
            causal_fraction_prior: 0.5,
            skew_ratio_threshold: 2.0,
        }
    }

    fn passing_verdict() -> ConvergenceVerdict {
        ConvergenceVerdict {
            passed: true,
            failures: vec![],
            max_r_hat: 1.0,
            min_ess_bulk: 1000.0,
            min_ess_tail: 1000.0,
            n_divergent: 0,
        }
    }

    /// Build a synthetic two-parameter result with given theta/lambda0 draws.
    fn synthetic_result(theta: Vec<f64>, lambda0: Vec<f64>) -> SamplerResult {
        let draws: Vec<Vec<f64>> =
            theta.iter().zip(lambda0.iter()).map(|(&t, &l)| vec![t, l]).collect();
        let n = draws.len();
        SamplerResult {
            chains: vec![Chain {
                draws_unconstrained: vec![],
                draws_constrained: draws,
                divergences: vec![false; n],
                tree_depths: vec![1; n],
                accept_probs: vec![0.9; n],
                energies: vec![0.0; n],
                max_treedepth: 10,
                step_size: 0.1,
                mass_diag: vec![1.0, 1.0],
            }],
            param_names: vec!["theta".to_string(), "lambda0".to_string()],
            n_warmup: 0,
            n_samples: n,
        }
    }

    #[test]
    fn test_per_draw_transform_then_summarize() {
        // Skewed theta: the per-draw NNH mean must differ from NNH computed
        // from the mean excess rate.
        let theta = vec![0.1, 0.2, 0.3, 2.0];
        let lambda0 = vec![1e-4; 4];
        let result = synthetic_result(theta.clone(), lambda0.clone());

        let m = compute_derived(&result, &passing_verdict(), 1.0, &opts()).unwrap();

        // NNH from mean excess (the disallowed order of operations).
        let excess: Vec<f64> =
            theta.iter().map(|&t| 1e-4 * 1e5 * (t.exp() - 1.0)).collect();
        let mean_excess = excess.iter().sum::<f64>() / 4.0;
        let nnh_of_mean = 1e5 / mean_excess;

        assert_eq!(m.nnh.n_undefined, 0);
        assert!(
            (m.nnh.summary.mean - nnh_of_mean).abs() > 1.0,
            "per-draw NNH mean {} should differ from NNH of mean excess {}",
            m.nnh.summary.mean,
            nnh_of_mean
        );
    }

    #[test]
    fn test_nnh_undefined_draws_counted() {
        // Two protective draws, two harmful.
        let theta = vec![-0.5, -0.1, 0.3, 0.6];
        let lambda0 = vec![1e-4; 4];
        let result = synthetic_result(theta, lambda0);

        let m = compute_derived(&result, &passing_verdict(), 1.0, &opts()).unwrap();
        assert_eq!(m.nnh.n_total, 4);
        assert_eq!(m.nnh.n_undefined, 2);
        assert_eq!(m.nnh.summary.n_draws, 2);
        assert!(m.nnh.summary.mean.is_finite());
    }

    #[test]
    fn test_tail_probabilities_empirical() {
        let theta = vec![-0.2, 0.1, 0.4, 0.8];
        let lambda0 = vec![1e-4; 4];
        let result = synthetic_result(theta, lambda0);

        let m = compute_derived(&result, &passing_verdict(), 1.0, &opts()).unwrap();
        assert!((m.p_irr_gt_1 - 0.75).abs() < 1e-12);
        assert!(m.p_excess_gt_threshold >= 0.0 && m.p_excess_gt_threshold <= 1.0);
    }

    #[test]
    fn test_poc_zero_for_protective_draws() {
        let theta = vec![-1.0, -0.5];
        let lambda0 = vec![1e-4; 2];
        let result = synthetic_result(theta, lambda0);

        let m = compute_derived(&result, &passing_verdict(), 1.0, &opts()).unwrap();
        assert_eq!(m.poc.mean, 0.0);
        assert!((m.causal_fraction_prior - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_convergence_warning_propagates() {
        let theta = vec![0.1, 0.2, 0.3, 0.4];
        let lambda0 = vec![1e-4; 4];
        let result = synthetic_result(theta, lambda0);

        let verdict = ConvergenceVerdict {
            passed: false,
            failures: vec!["r_hat[theta] = 1.2000 exceeds 1.0100".to_string()],
            max_r_hat: 1.2,
            min_ess_bulk: 10.0,
            min_ess_tail: 10.0,
            n_divergent: 0,
        };
        let m = compute_derived(&result, &verdict, 1.0, &opts()).unwrap();
        assert!(m.convergence_warning);
        assert!(m.irr.convergence_warning);
        assert!(m.nnh.summary.convergence_warning);
    }

    #[test]
    fn test_equal_tailed_interval() {
        let draws: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let s = summarize("x", &draws, &opts(), false);
        assert!((s.median - 50.5).abs() < 1e-9);
        assert!(s.lower < 5.0 && s.upper > 96.0, "{} {}", s.lower, s.upper);
    }

    #[test]
    fn test_hdi_shorter_than_equal_tailed_on_skew() {
        // Right-skewed draws: HDI should hug the bulk.
        let draws: Vec<f64> =
            (0..1000).map(|i| ((i as f64 + 0.5) / 1000.0_f64).powi(4) * 100.0).collect();
        let mut o = opts();
        let et = summarize("x", &draws, &o, false);
        o.use_hdi = true;
        let hdi = summarize("x", &draws, &o, false);
        assert!(
            hdi.upper - hdi.lower <= et.upper - et.lower + 1e-9,
            "HDI [{}, {}] vs ET [{}, {}]",
            hdi.lower,
            hdi.upper,
            et.lower,
            et.upper
        );
    }

    #[test]
    fn test_skew_warning_on_divergent_mean_median() {
        // Mostly moderate NNH with a few near-null draws whose NNH explodes:
        // the mean is dragged far above the median.
        let mut theta = vec![1.0; 20];
        theta.extend(vec![0.001; 5]);
        let lambda0 = vec![1e-4; 25];
        let result = synthetic_result(theta, lambda0);

        let m = compute_derived(&result, &passing_verdict(), 1.0, &opts()).unwrap();
        assert!(m.nnh.skew_warning, "mean {} median {}", m.nnh.summary.mean, m.nnh.summary.median);
    }
}
