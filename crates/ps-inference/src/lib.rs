//! # ps-inference
//!
//! Posterior sampling for pathsynth.
//!
//! This crate provides:
//! - a NUTS sampler (multinomial tree sampling, Stan conventions)
//! - dual-averaging step-size and diagonal mass-matrix warmup
//! - a multi-chain parallel runner with an optional wall-clock deadline
//! - convergence diagnostics (split R-hat, bulk/tail ESS, E-BFMI) and a
//!   convergence verdict gate
//!
//! It depends only on the [`ps_core::traits::LogDensityModel`] trait, not on
//! any concrete model.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Adaptation: step-size dual averaging and diagonal mass matrix (Welford variance).
pub mod adapt;
/// Chain storage, multi-chain parallel runner, wall-clock deadline.
pub mod chain;
/// MCMC diagnostics: split R-hat, bulk/tail ESS, convergence verdict.
pub mod diagnostics;
/// HMC leapfrog integrator.
pub mod hmc;
/// NUTS tree-building and sampling.
pub mod nuts;
/// Posterior API: log-pdf, gradient, unconstrained transforms.
pub mod posterior;

pub use chain::{SamplerResult, sample_nuts_multichain, sample_nuts_multichain_deadline};
pub use diagnostics::{
    ConvergenceVerdict, DiagnosticsResult, VerdictThresholds, compute_diagnostics,
    convergence_verdict,
};
pub use nuts::{NutsConfig, sample_nuts};
pub use posterior::Posterior;
