//! Serializable analysis report.

use crate::derived::DerivedMetrics;
use crate::ppc::PpcReport;
use ps_core::Result;
use ps_inference::{ConvergenceVerdict, DiagnosticsResult, SamplerResult};
use serde::Serialize;

/// Per-parameter convergence diagnostics row.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterDiagnostics {
    /// Parameter name.
    pub name: String,
    /// Rank-normalized folded split R-hat.
    pub r_hat: f64,
    /// Bulk effective sample size.
    pub ess_bulk: f64,
    /// Tail effective sample size.
    pub ess_tail: f64,
}

/// Observed-data descriptive statistics surfaced alongside the inference.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedSummary {
    /// Crude incidence rate ratio (`None` when the comparator arm has zero events).
    pub crude_rate_ratio: Option<f64>,
    /// Mean monthly case-report count.
    pub series_mean: f64,
    /// Sample variance of monthly counts.
    pub series_variance: f64,
    /// Log of the observed reporting odds ratio.
    pub log_ror: f64,
    /// Unweighted mean mechanistic effect.
    pub mechanistic_mean: f64,
}

/// One parameter's posterior draws, flattened across chains (column-major
/// export format).
#[derive(Debug, Clone, Serialize)]
pub struct ParameterColumn {
    /// Parameter name.
    pub name: String,
    /// All post-warmup draws, chain-concatenated.
    pub draws: Vec<f64>,
}

/// Full analysis output: verdict, diagnostics, metrics, predictive checks,
/// and columnar posterior draws for external export.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Convergence verdict (pass/fail with per-check failures).
    pub verdict: ConvergenceVerdict,
    /// Per-parameter diagnostics.
    pub parameter_diagnostics: Vec<ParameterDiagnostics>,
    /// Divergence rate across all chains.
    pub divergence_rate: f64,
    /// Max-treedepth rate across all chains.
    pub max_treedepth_rate: f64,
    /// E-BFMI per chain.
    pub ebfmi: Vec<f64>,
    /// Derived decision metrics.
    pub metrics: DerivedMetrics,
    /// Posterior predictive checks (advisory).
    pub ppc: PpcReport,
    /// Observed-data descriptives.
    pub observed: ObservedSummary,
    /// Posterior draws of the scalar parameters, column-major.
    pub columns: Vec<ParameterColumn>,
    /// Number of chains run.
    pub n_chains: usize,
    /// Post-warmup draws per chain.
    pub n_samples_per_chain: usize,
}

impl AnalysisReport {
    /// Serialize the report to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Assemble per-parameter diagnostics rows from a diagnostics result.
pub(crate) fn parameter_diagnostics(
    result: &SamplerResult,
    diag: &DiagnosticsResult,
) -> Vec<ParameterDiagnostics> {
    result
        .param_names
        .iter()
        .enumerate()
        .map(|(i, name)| ParameterDiagnostics {
            name: name.clone(),
            r_hat: diag.r_hat.get(i).copied().unwrap_or(f64::NAN),
            ess_bulk: diag.ess_bulk.get(i).copied().unwrap_or(f64::NAN),
            ess_tail: diag.ess_tail.get(i).copied().unwrap_or(f64::NAN),
        })
        .collect()
}

/// Extract column-major draws for the scalar (non-innovation) parameters.
pub(crate) fn scalar_columns(result: &SamplerResult) -> Vec<ParameterColumn> {
    result
        .param_names
        .iter()
        .enumerate()
        .take(crate::pathway::N_SCALAR_PARAMS)
        .map(|(i, name)| ParameterColumn {
            name: name.clone(),
            draws: result.param_draws_flat(i),
        })
        .collect()
}
