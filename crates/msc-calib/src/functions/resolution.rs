//! Resolution functions: per-muon uncertainties on `pt`, `cot θ` and `φ`.
//!
//! `sigma_pt` is relative (`σ(pt)/pt`); `sigma_cot_theta` and `sigma_phi` are absolute.

use msc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Resolution function selected by integer type code `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ResolutionFunction {
    /// Type 0: constant resolutions.
    Constant,
    /// Type 1: σpt linear in pt and |η|; σcotθ, σφ with a 1/pt term.
    LinearPtEta,
    /// Type 2: as type 1 with η² terms.
    ParabolicEta,
    /// Type 3: constant and pt-dependent terms added in quadrature.
    Quadrature,
}

impl ResolutionFunction {
    /// Number of registered resolution functions.
    pub const COUNT: u32 = 4;

    const ALL: [ResolutionFunction; 4] = [
        ResolutionFunction::Constant,
        ResolutionFunction::LinearPtEta,
        ResolutionFunction::ParabolicEta,
        ResolutionFunction::Quadrature,
    ];

    /// Look up a resolution function by type code.
    pub fn from_id(id: u32) -> Result<Self> {
        Self::ALL.get(id as usize).copied().ok_or_else(|| {
            Error::Configuration(format!(
                "unknown resolution function type {id} (valid: 0..={})",
                Self::COUNT - 1
            ))
        })
    }

    /// Integer type code.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Number of parameters consumed from the parameter block.
    pub fn n_params(self) -> usize {
        match self {
            ResolutionFunction::Constant => 3,
            ResolutionFunction::LinearPtEta => 7,
            ResolutionFunction::ParabolicEta => 9,
            ResolutionFunction::Quadrature => 7,
        }
    }

    /// Relative transverse-momentum resolution `σ(pt)/pt`.
    #[inline]
    pub fn sigma_pt(self, pt: f64, eta: f64, par: &[f64]) -> f64 {
        match self {
            ResolutionFunction::Constant => par[0],
            ResolutionFunction::LinearPtEta => par[0] + par[1] * pt + par[2] * eta.abs(),
            ResolutionFunction::ParabolicEta => {
                par[0] + par[1] * pt + par[2] * eta.abs() + par[3] * eta * eta
            }
            ResolutionFunction::Quadrature => {
                par[0].hypot(par[1] * pt) * (1.0 + par[2] * eta * eta)
            }
        }
    }

    /// Absolute resolution on `cot θ`.
    #[inline]
    pub fn sigma_cot_theta(self, pt: f64, eta: f64, par: &[f64]) -> f64 {
        match self {
            ResolutionFunction::Constant => par[1],
            ResolutionFunction::LinearPtEta => par[3] + par[4] / pt,
            ResolutionFunction::ParabolicEta => par[4] + par[5] / pt + par[6] * eta * eta,
            ResolutionFunction::Quadrature => par[3].hypot(par[4] / pt),
        }
    }

    /// Absolute resolution on `φ`.
    #[inline]
    pub fn sigma_phi(self, pt: f64, _eta: f64, par: &[f64]) -> f64 {
        match self {
            ResolutionFunction::Constant => par[2],
            ResolutionFunction::LinearPtEta => par[5] + par[6] / pt,
            ResolutionFunction::ParabolicEta => par[7] + par[8] / pt,
            ResolutionFunction::Quadrature => par[5].hypot(par[6] / pt),
        }
    }
}

impl TryFrom<u32> for ResolutionFunction {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        Self::from_id(id)
    }
}

impl From<ResolutionFunction> for u32 {
    fn from(f: ResolutionFunction) -> u32 {
        f.id()
    }
}
