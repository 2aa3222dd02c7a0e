//! End-to-end analysis pipeline.
//!
//! `run_analysis` wires the stages together:
//! validate -> evidence -> model -> sample -> diagnose -> PPC -> derived
//! metrics -> report. Validation and model-specification errors abort before
//! any sampling cost is spent; a failed convergence verdict does not abort,
//! it flags every downstream metric instead.

use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::derived::{MetricOptions, compute_derived};
use crate::evidence::{
    CaseSeriesEvidence, MechanisticEvidence, PharmacovigilanceEvidence, TrialEvidence,
};
use crate::pathway::PathwayModel;
use crate::ppc::run_ppc;
use crate::report::{AnalysisReport, ObservedSummary, parameter_diagnostics, scalar_columns};
use ps_core::Result;
use ps_inference::{
    NutsConfig, VerdictThresholds, compute_diagnostics, convergence_verdict,
    sample_nuts_multichain, sample_nuts_multichain_deadline,
};

/// Run the full four-stream analysis.
pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisReport> {
    config.validate()?;

    let trial = TrialEvidence::new(
        config.trial.exposed_events,
        config.trial.exposed_person_years,
        config.trial.comparator_events,
        config.trial.comparator_person_years,
    )?;
    let series = CaseSeriesEvidence::new(config.case_series.clone())?;
    let pharmacovigilance = PharmacovigilanceEvidence::new(config.ror, config.ror_log_se)?;
    let mechanistic = MechanisticEvidence::new(config.mechanistic_effects.clone())?;

    let observed = ObservedSummary {
        crude_rate_ratio: trial.crude_rate_ratio(),
        series_mean: series.mean(),
        series_variance: series.variance(),
        log_ror: pharmacovigilance.log_ror(),
        mechanistic_mean: mechanistic.mean_effect(),
    };

    let model = PathwayModel::new(
        trial,
        series,
        pharmacovigilance,
        mechanistic,
        config.priors.clone(),
        config.links.clone(),
    )?;
    let trial_link = model.trial_link();

    let s = &config.sampler;
    let nuts = NutsConfig {
        max_treedepth: s.max_treedepth,
        target_accept: s.target_accept,
        init_jitter: s.init_jitter,
    };

    log::info!(
        "sampling {} chains x ({} warmup + {} draws), seed {}",
        s.n_chains,
        s.n_warmup,
        s.n_samples,
        s.seed
    );
    let result = match s.deadline_secs {
        Some(secs) => sample_nuts_multichain_deadline(
            model.clone(),
            s.n_chains,
            s.n_warmup,
            s.n_samples,
            s.seed,
            nuts,
            Duration::from_secs(secs),
        )?,
        None => sample_nuts_multichain(&model, s.n_chains, s.n_warmup, s.n_samples, s.seed, nuts)?,
    };

    let diag = compute_diagnostics(&result);
    let thresholds = VerdictThresholds {
        max_r_hat: config.convergence.max_r_hat,
        min_ess_bulk: config.convergence.min_ess_bulk,
        min_ess_tail: config.convergence.min_ess_tail,
        max_divergent: config.convergence.max_divergent,
    };
    let verdict = convergence_verdict(&diag, &result.param_names, &thresholds);
    if !verdict.passed {
        log::warn!("convergence verdict failed: {:?}", verdict.failures);
    }

    let ppc = run_ppc(&model, &result, s.seed.wrapping_add(0x5050))?;

    let m = &config.metrics;
    let opts = MetricOptions {
        interval_mass: m.interval_mass,
        use_hdi: m.use_hdi,
        excess_threshold_per_100k: m.excess_threshold_per_100k,
        causal_fraction_prior: m.causal_fraction_prior,
        skew_ratio_threshold: m.skew_ratio_threshold,
    };
    let metrics = compute_derived(&result, &verdict, trial_link, &opts)?;

    Ok(AnalysisReport {
        parameter_diagnostics: parameter_diagnostics(&result, &diag),
        divergence_rate: diag.divergence_rate,
        max_treedepth_rate: diag.max_treedepth_rate,
        ebfmi: diag.ebfmi.clone(),
        verdict,
        metrics,
        ppc,
        observed,
        columns: scalar_columns(&result),
        n_chains: s.n_chains,
        n_samples_per_chain: s.n_samples,
    })
}
