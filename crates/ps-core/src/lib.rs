//! # ps-core
//!
//! Core types for pathsynth: the error taxonomy shared by all crates and the
//! [`traits::LogDensityModel`] trait that lets the inference layer stay
//! independent of any concrete model.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;

pub use error::{Error, Result};
