//! # msc-core
//!
//! Core types for the MuScle momentum-scale calibration engine.
//!
//! This crate provides:
//! - The workspace-wide [`Error`] type and [`Result`] alias.
//! - Muon kinematics ([`Muon`], [`FourMomentum`], [`MuonPair`]) and a few
//!   angular helpers shared by every other crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{FourMomentum, MUON_MASS, Muon, MuonPair, delta_phi, delta_phi_no_fabs, delta_r};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
