//! Function strategy library.
//!
//! Four families of stateless functions, each a closed registry keyed by an
//! integer type code:
//! - [`ScaleFunction`] (also used for biases): corrected `pt` from `(pt, η, φ, charge)`.
//! - [`SmearFunction`]: Gaussian perturbations of `(pt, η, φ)`.
//! - [`ResolutionFunction`]: `σ(pt)/pt`, `σ(cot θ)`, `σ(φ)` as functions of `(pt, η)`.
//! - [`BackgroundFunction`]: normalized mass densities.
//!
//! All functions are pure in their explicit inputs and the supplied parameter
//! block, so they can be shared freely across pairs and threads.

use msc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

mod background;
mod resolution;
mod scale;
mod smear;

pub use background::BackgroundFunction;
pub use resolution::ResolutionFunction;
pub use scale::ScaleFunction;
pub use smear::{GaussianDraws, MAX_SMEAR_DRAWS, SmearFunction, eta_from_cot_theta};

/// Function family tag, used by the parameter store to resolve parameter counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionFamily {
    /// Scale and bias functions
    Scale,
    /// Smear functions
    Smear,
    /// Resolution functions
    Resolution,
    /// Background functions
    Background,
}

impl FunctionFamily {
    /// Number of registered functions in this family.
    pub fn registry_len(self) -> u32 {
        match self {
            FunctionFamily::Scale => ScaleFunction::COUNT,
            FunctionFamily::Smear => SmearFunction::COUNT,
            FunctionFamily::Resolution => ResolutionFunction::COUNT,
            FunctionFamily::Background => BackgroundFunction::COUNT,
        }
    }

    /// Parameter count of function `type_id`; unknown ids are configuration errors.
    pub fn n_params(self, type_id: u32) -> Result<usize> {
        Ok(match self {
            FunctionFamily::Scale => ScaleFunction::from_id(type_id)?.n_params(),
            FunctionFamily::Smear => SmearFunction::from_id(type_id)?.n_params(),
            FunctionFamily::Resolution => ResolutionFunction::from_id(type_id)?.n_params(),
            FunctionFamily::Background => BackgroundFunction::from_id(type_id)?.n_params(),
        })
    }

    /// Lower-case family name.
    pub fn name(self) -> &'static str {
        match self {
            FunctionFamily::Scale => "scale",
            FunctionFamily::Smear => "smear",
            FunctionFamily::Resolution => "resolution",
            FunctionFamily::Background => "background",
        }
    }
}

impl fmt::Display for FunctionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for FunctionFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scale" | "bias" => Ok(FunctionFamily::Scale),
            "smear" => Ok(FunctionFamily::Smear),
            "resolution" => Ok(FunctionFamily::Resolution),
            "background" => Ok(FunctionFamily::Background),
            other => Err(Error::Configuration(format!("unknown function family '{other}'"))),
        }
    }
}
