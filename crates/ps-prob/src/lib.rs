//! Probability building blocks for pathsynth.
//!
//! This crate hosts the reusable probability math shared by the model and
//! inference layers:
//! - scalar log-densities (Normal, Poisson, Negative Binomial NB2)
//! - bijective transforms for constrained parameterizations

pub mod neg_binomial;
pub mod normal;
pub mod poisson;
pub mod transforms;
