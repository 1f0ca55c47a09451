//! # msc-inference
//!
//! Fitting for the MuScle calibration engine.
//!
//! This crate provides:
//! - an argmin L-BFGS adapter with per-parameter finite-difference steps,
//!   minimizing in units of those steps
//! - Hessian-based uncertainties of a `-2 ln L` minimum
//! - the iterative calibration fit with release stages and scale chaining

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Iterative calibration fit controller.
pub mod fit;
/// Numerical Hessian and covariance.
pub mod hessian;
/// Generic numerical optimizer (L-BFGS backend).
pub mod optimizer;

pub use fit::{CalibrationFit, CalibrationResult, IterationResult, StageResult, minimize_staged};
pub use hessian::{Uncertainties, invert_hessian, numerical_hessian, uncertainties};
pub use optimizer::{
    LbfgsOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig, Preconditioned, SubsetObjective,
    stalled_at_start,
};
