//! # msc-calib
//!
//! Calibration engine for muon momentum scale and resolution.
//!
//! - [`functions`]: scale/bias, smearing, resolution and background function families.
//! - [`params`]: parameter sets, the text/JSON parameter formats and frozen evaluation buffers.
//! - [`resonance`] and [`lineshape`]: resonance windows and Breit-Wigner ⊗ Gaussian lookup tables.
//! - [`mass`]: dimuon mass and its propagated resolution.
//! - [`likelihood`]: the negative log-likelihood driven by an external minimizer.
//! - [`corrector`], [`errors_report`], [`selection`], [`config`]: correction objects,
//!   resolution error bands, candidate selection and run configuration.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod corrector;
pub mod errors_report;
pub mod functions;
pub mod likelihood;
pub mod lineshape;
pub mod mass;
pub mod normalize;
pub mod params;
pub mod resonance;
pub mod selection;

pub use config::{FitFunctionSpec, FunctionSpec, MinimizerSpec, ParameterControl, RUN_CONFIG_V0, RunConfig};
pub use corrector::{InputCorrections, MomentumScaleCorrector, ResolutionEstimator};
pub use errors_report::{ErrorsAnalyzer, ErrorsConfig, ErrorsReport, ProfileCurve};
pub use functions::{
    BackgroundFunction, FunctionFamily, ResolutionFunction, ScaleFunction, SmearFunction,
};
pub use likelihood::{
    CalibrationContext, FunctionSelection, LikelihoodDriver, LikelihoodStats, ParameterLayout,
};
pub use lineshape::{CancelFlag, LineshapeTable, LineshapeTables};
pub use mass::{invariant_mass, mass_resolution};
pub use params::{FrozenParams, ParameterBlock, ParameterBuilder, ParameterSet};
pub use resonance::{Resonances, rapidity_bin};
pub use selection::find_best_pair;

/// Read muon pairs from a JSON array of `{"mu1": {...}, "mu2": {...}}` records.
pub fn read_pairs(path: impl AsRef<std::path::Path>) -> msc_core::Result<Vec<msc_core::MuonPair>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let pairs: Vec<msc_core::MuonPair> = serde_json::from_slice(&bytes)?;
    tracing::info!(path = %path.display(), pairs = pairs.len(), "muon pairs loaded");
    Ok(pairs)
}
