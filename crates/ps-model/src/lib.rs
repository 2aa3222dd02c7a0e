//! # ps-model
//!
//! The four-stream pathway evidence-synthesis model.
//!
//! A single latent pathway effect `theta` is informed jointly by:
//! - trial event counts (Poisson, rate-ratio link)
//! - a monthly case-report series (NB2 with a non-centered random walk)
//! - a pharmacovigilance log-ROR (Normal with a reporting-bias offset)
//! - mechanistic per-study effect sizes (partial-pooling meta-analysis)
//!
//! The crate provides validated configuration, evidence adapters, the joint
//! log-density with analytic gradients, posterior predictive checks, a
//! per-draw derived-quantity engine, and an end-to-end pipeline producing a
//! serializable [`report::AnalysisReport`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Analysis configuration: data, priors, links, sampler and metric settings.
pub mod config;
/// Per-draw derived-quantity engine: IRR, excess rate, NNH, tail probabilities.
pub mod derived;
/// Evidence adapters: validated per-stream sufficient statistics.
pub mod evidence;
/// The joint pathway model (log-density + analytic gradient).
pub mod pathway;
/// End-to-end pipeline: config -> report.
pub mod pipeline;
/// Posterior predictive checks per evidence stream.
pub mod ppc;
/// Serializable analysis report.
pub mod report;

pub use config::AnalysisConfig;
pub use pathway::PathwayModel;
pub use pipeline::run_analysis;
pub use report::AnalysisReport;
