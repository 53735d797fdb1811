//! Atmospheric radiative transfer core
//!
//! Line-by-line gas absorption, DOIT scattering and Jacobians of simulated
//! measurements:
//!
//! - [`species`]: species and isotopologue tables, partition functions
//! - [`catalogue`]: spectral line records and the ARTSCAT-3/ARTSCAT-4 formats
//! - [`lineshape`]: lineshape and normalization functions
//! - [`xsec`]: absorption cross sections of line lists
//! - [`doit`]: the scattering solver for the cloudbox radiation field
//! - [`jacobian`]: retrieval quantities and their Jacobians
//!
//! With the `python` feature the crate also builds a Python extension module.
//! Nothing outside that module uses `pyo3`.

pub mod catalogue;
pub mod doit;
pub(crate) mod error;
pub mod interp;
pub mod jacobian;
pub mod lineshape;
pub(crate) mod parallel;
pub mod physics;
pub mod species;
pub mod xsec;

#[cfg(feature = "python")]
mod python;

pub use error::RtError;
