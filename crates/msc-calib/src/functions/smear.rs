//! Smearing functions for resolution studies on simulated muons.
//!
//! Each variant perturbs `pt`, `φ` and `cot θ` with Gaussian draws `y[k]` scaled
//! by the smear parameters. `η` is never perturbed directly: it is rederived from
//! the perturbed `cot θ`, which keeps `η` and `θ` consistent.

use msc_core::{Error, Muon, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Largest number of random draws any smear function consumes.
pub const MAX_SMEAR_DRAWS: usize = 7;

/// Smear function selected by integer type code `0..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SmearFunction {
    /// Type 0: no smearing.
    Identity,
    /// Type 1: pt·pt, φ and cot θ smear.
    PtPhiCotTheta,
    /// Type 2: adds an |η| term to the pt smear.
    PtEtaPhiCotTheta,
    /// Type 3: adds an |η| term to the cot θ smear.
    PtEtaPhiCotThetaEta,
    /// Type 4: adds a pt² term to the pt smear.
    PtSquared,
    /// Type 5: adds a pt term to the φ smear.
    PtSquaredPhiPt,
}

impl SmearFunction {
    /// Number of registered smear functions.
    pub const COUNT: u32 = 6;

    const ALL: [SmearFunction; 6] = [
        SmearFunction::Identity,
        SmearFunction::PtPhiCotTheta,
        SmearFunction::PtEtaPhiCotTheta,
        SmearFunction::PtEtaPhiCotThetaEta,
        SmearFunction::PtSquared,
        SmearFunction::PtSquaredPhiPt,
    ];

    /// Look up a smear function by type code.
    pub fn from_id(id: u32) -> Result<Self> {
        Self::ALL.get(id as usize).copied().ok_or_else(|| {
            Error::Configuration(format!(
                "unknown smear function type {id} (valid: 0..={})",
                Self::COUNT - 1
            ))
        })
    }

    /// Integer type code.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Number of smear parameters (equal to the number of random draws consumed).
    pub fn n_params(self) -> usize {
        match self {
            SmearFunction::Identity => 0,
            SmearFunction::PtPhiCotTheta => 3,
            SmearFunction::PtEtaPhiCotTheta => 4,
            SmearFunction::PtEtaPhiCotThetaEta => 5,
            SmearFunction::PtSquared => 6,
            SmearFunction::PtSquaredPhiPt => 7,
        }
    }

    /// Smeared `(pt, η, φ)`.
    ///
    /// `par` and `y` must each hold at least [`n_params`](Self::n_params) values.
    pub fn smear(self, pt: f64, eta: f64, phi: f64, par: &[f64], y: &[f64]) -> (f64, f64, f64) {
        let abs_eta = eta.abs();
        let (pt_factor, phi_factor, cot_factor) = match self {
            SmearFunction::Identity => return (pt, eta, phi),
            SmearFunction::PtPhiCotTheta => {
                (1.0 + y[0] * par[0] * pt, 1.0 + y[1] * par[1], 1.0 + y[2] * par[2])
            }
            SmearFunction::PtEtaPhiCotTheta => (
                1.0 + y[0] * par[0] * pt + y[1] * par[1] * abs_eta,
                1.0 + y[2] * par[2],
                1.0 + y[3] * par[3],
            ),
            SmearFunction::PtEtaPhiCotThetaEta => (
                1.0 + y[0] * par[0] * pt + y[1] * par[1] * abs_eta,
                1.0 + y[2] * par[2],
                1.0 + y[3] * par[3] + y[4] * par[4] * abs_eta,
            ),
            SmearFunction::PtSquared => (
                1.0 + y[0] * par[0] * pt + y[1] * par[1] * abs_eta + y[5] * par[5] * pt.powi(2),
                1.0 + y[2] * par[2],
                1.0 + y[3] * par[3] + y[4] * par[4] * abs_eta,
            ),
            SmearFunction::PtSquaredPhiPt => (
                1.0 + y[0] * par[0] * pt + y[1] * par[1] * abs_eta + y[5] * par[5] * pt.powi(2),
                1.0 + y[2] * par[2] + y[6] * par[6] * pt,
                1.0 + y[3] * par[3] + y[4] * par[4] * abs_eta,
            ),
        };

        let theta = 2.0 * (-eta).exp().atan();
        let cot_theta = theta.cos() / theta.sin() * cot_factor;
        (pt * pt_factor, eta_from_cot_theta(cot_theta), phi * phi_factor)
    }

    /// Smear a muon, returning a new muon with the same charge.
    pub fn apply(self, muon: &Muon, par: &[f64], y: &[f64]) -> Muon {
        let (pt, eta, phi) = self.smear(muon.pt, muon.eta, muon.phi, par, y);
        Muon { pt, eta, phi, charge: muon.charge }
    }
}

impl TryFrom<u32> for SmearFunction {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        Self::from_id(id)
    }
}

impl From<SmearFunction> for u32 {
    fn from(f: SmearFunction) -> u32 {
        f.id()
    }
}

/// `η = −ln(tan(θ/2))` with `θ = atan(1/cot θ)` folded into `[0, π)`.
pub fn eta_from_cot_theta(cot_theta: f64) -> f64 {
    let mut theta = if cot_theta != 0.0 { (1.0 / cot_theta).atan() } else { PI / 2.0 };
    if theta < 0.0 {
        theta += PI;
    }
    -(theta / 2.0).tan().ln()
}

/// Seeded source of standard-normal draws for smearing.
#[derive(Debug)]
pub struct GaussianDraws {
    rng: StdRng,
}

impl GaussianDraws {
    /// Deterministic draw stream for a seed.
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// One set of draws, enough for any smear function.
    pub fn next_draws(&mut self) -> [f64; MAX_SMEAR_DRAWS] {
        let mut y = [0.0; MAX_SMEAR_DRAWS];
        for v in &mut y {
            *v = StandardNormal.sample(&mut self.rng);
        }
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_draws_leave_kinematics_unchanged() {
        let y = [0.0; MAX_SMEAR_DRAWS];
        let par = [0.01, 0.02, 0.03, 0.04, 0.05, 0.06, 0.07];
        for id in 0..SmearFunction::COUNT {
            let f = SmearFunction::from_id(id).unwrap();
            for &(pt, eta, phi) in &[(45.0, 0.1, 0.5), (12.0, -2.1, -1.7), (7.0, 0.0, 3.0)] {
                let (pt_s, eta_s, phi_s) = f.smear(pt, eta, phi, &par, &y);
                assert_eq!(pt_s, pt);
                assert_eq!(phi_s, phi);
                assert_relative_eq!(eta_s, eta, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_type1_formula() {
        let par = [1e-3, 0.01, 0.02];
        let y = [1.0, -0.5, 2.0];
        let (pt, eta, phi) = SmearFunction::PtPhiCotTheta.smear(40.0, 0.8, 1.2, &par, &y);
        assert_relative_eq!(pt, 40.0 * (1.0 + 1e-3 * 40.0), epsilon = 1e-12);
        assert_relative_eq!(phi, 1.2 * (1.0 - 0.005), epsilon = 1e-12);
        // cot θ = sinh η, scaled by 1.04
        assert_relative_eq!(eta, (0.8f64.sinh() * 1.04).asinh(), epsilon = 1e-9);
    }

    #[test]
    fn test_eta_from_cot_theta_signs() {
        assert_eq!(eta_from_cot_theta(0.0), -(PI / 4.0).tan().ln());
        assert_relative_eq!(eta_from_cot_theta(1.5f64.sinh()), 1.5, epsilon = 1e-12);
        assert_relative_eq!(eta_from_cot_theta((-1.5f64).sinh()), -1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_draws_are_reproducible() {
        let a = GaussianDraws::new(7).next_draws();
        let b = GaussianDraws::new(7).next_draws();
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.is_finite()));
    }
}
