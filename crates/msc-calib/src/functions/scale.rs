//! Momentum scale (and bias) functions.
//!
//! The same family serves two purposes: fitted scale corrections, and known
//! biases injected into simulated muons before a fit. Every variant multiplies
//! `pt` by a polynomial/trigonometric factor of `(pt, |η|, η², sin φ, charge)`.

use msc_core::{Error, Muon, Result};
use serde::{Deserialize, Serialize};

/// Scale function selected by integer type code `0..=13`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScaleFunction {
    /// Type 0: no correction.
    Identity,
    /// Type 1: linear in pt.
    LinearPt,
    /// Type 2: linear in |η|.
    LinearAbsEta,
    /// Type 3: sinusoidal in φ.
    SinPhi,
    /// Type 4: linear in pt and |η|.
    LinearPtAbsEta,
    /// Type 5: linear in pt, sinusoidal in φ.
    LinearPtSinPhi,
    /// Type 6: linear in |η|, sinusoidal in φ.
    AbsEtaSinPhi,
    /// Type 7: linear in pt and |η|, sinusoidal in φ.
    LinearPtAbsEtaSinPhi,
    /// Type 8: linear in pt, parabolic in η.
    LinearPtParabolicEta,
    /// Type 9: exponential in pt.
    ExponentialPt,
    /// Type 10: parabolic in pt.
    ParabolicPt,
    /// Type 11: linear in pt, charge-signed sinusoid in φ with a phase.
    LinearPtChargeSinPhi,
    /// Type 12: linear in pt, parabolic in η, charge-signed sinusoid in φ.
    ParabolicEtaChargeSinPhi,
    /// Type 13: as type 12 with separate amplitude/phase per charge.
    ParabolicEtaSplitChargeSinPhi,
}

impl ScaleFunction {
    /// Number of registered scale functions.
    pub const COUNT: u32 = 14;

    const ALL: [ScaleFunction; 14] = [
        ScaleFunction::Identity,
        ScaleFunction::LinearPt,
        ScaleFunction::LinearAbsEta,
        ScaleFunction::SinPhi,
        ScaleFunction::LinearPtAbsEta,
        ScaleFunction::LinearPtSinPhi,
        ScaleFunction::AbsEtaSinPhi,
        ScaleFunction::LinearPtAbsEtaSinPhi,
        ScaleFunction::LinearPtParabolicEta,
        ScaleFunction::ExponentialPt,
        ScaleFunction::ParabolicPt,
        ScaleFunction::LinearPtChargeSinPhi,
        ScaleFunction::ParabolicEtaChargeSinPhi,
        ScaleFunction::ParabolicEtaSplitChargeSinPhi,
    ];

    /// Look up a scale function by type code.
    pub fn from_id(id: u32) -> Result<Self> {
        Self::ALL.get(id as usize).copied().ok_or_else(|| {
            Error::Configuration(format!(
                "unknown scale function type {id} (valid: 0..={})",
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
            ScaleFunction::Identity => 0,
            ScaleFunction::LinearPt
            | ScaleFunction::LinearAbsEta
            | ScaleFunction::SinPhi
            | ScaleFunction::ExponentialPt => 2,
            ScaleFunction::LinearPtAbsEta
            | ScaleFunction::LinearPtSinPhi
            | ScaleFunction::AbsEtaSinPhi
            | ScaleFunction::ParabolicPt => 3,
            ScaleFunction::LinearPtAbsEtaSinPhi
            | ScaleFunction::LinearPtParabolicEta
            | ScaleFunction::LinearPtChargeSinPhi => 4,
            ScaleFunction::ParabolicEtaChargeSinPhi => 6,
            ScaleFunction::ParabolicEtaSplitChargeSinPhi => 8,
        }
    }

    /// Corrected transverse momentum.
    ///
    /// `par` must hold at least [`n_params`](Self::n_params) values; callers validate the
    /// block length once when the parameter layout is built.
    #[inline]
    pub fn transform(self, pt: f64, eta: f64, phi: f64, charge: i32, par: &[f64]) -> f64 {
        let chg = f64::from(charge);
        match self {
            ScaleFunction::Identity => pt,
            ScaleFunction::LinearPt => (par[0] + par[1] * pt) * pt,
            ScaleFunction::LinearAbsEta => (par[0] + par[1] * eta.abs()) * pt,
            ScaleFunction::SinPhi => (par[0] + par[1] * phi.sin()) * pt,
            ScaleFunction::LinearPtAbsEta => (par[0] + par[1] * pt + par[2] * eta.abs()) * pt,
            ScaleFunction::LinearPtSinPhi => (par[0] + par[1] * pt + par[2] * phi.sin()) * pt,
            ScaleFunction::AbsEtaSinPhi => (par[0] + par[1] * eta.abs() + par[2] * phi.sin()) * pt,
            ScaleFunction::LinearPtAbsEtaSinPhi => {
                (par[0] + par[1] * pt + par[2] * eta.abs() + par[3] * phi.sin()) * pt
            }
            ScaleFunction::LinearPtParabolicEta => {
                (par[0] + par[1] * pt + par[2] * eta.abs() + par[3] * eta * eta) * pt
            }
            ScaleFunction::ExponentialPt => (par[0] + (par[1] * pt).exp()) * pt,
            ScaleFunction::ParabolicPt => (par[0] + par[1] * pt + par[2] * pt * pt) * pt,
            ScaleFunction::LinearPtChargeSinPhi => {
                (par[0] + par[1] * pt + chg * par[2] * (phi + par[3]).sin()) * pt
            }
            ScaleFunction::ParabolicEtaChargeSinPhi => {
                (par[0]
                    + par[1] * pt
                    + par[2] * eta.abs()
                    + par[3] * eta * eta
                    + chg * par[4] * (phi + par[5]).sin())
                    * pt
            }
            ScaleFunction::ParabolicEtaSplitChargeSinPhi => {
                let (amp, phase) = if charge > 0 { (par[4], par[5]) } else { (par[6], par[7]) };
                (par[0]
                    + par[1] * pt
                    + par[2] * eta.abs()
                    + par[3] * eta * eta
                    + amp * (phi + phase).sin())
                    * pt
            }
        }
    }

    /// Checked variant of [`transform`](Self::transform) for callers that hold an
    /// unvalidated parameter block.
    pub fn try_transform(self, pt: f64, eta: f64, phi: f64, charge: i32, par: &[f64]) -> Result<f64> {
        if par.len() < self.n_params() {
            return Err(Error::Configuration(format!(
                "scale function type {} expects {} parameters, got {}",
                self.id(),
                self.n_params(),
                par.len()
            )));
        }
        Ok(self.transform(pt, eta, phi, charge, par))
    }

    /// Apply the correction to a muon, returning a new muon.
    #[inline]
    pub fn apply(self, muon: &Muon, par: &[f64]) -> Muon {
        muon.with_pt(self.transform(muon.pt, muon.eta, muon.phi, muon.charge, par))
    }
}

impl TryFrom<u32> for ScaleFunction {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        Self::from_id(id)
    }
}

impl From<ScaleFunction> for u32 {
    fn from(f: ScaleFunction) -> u32 {
        f.id()
    }
}
