//! Dimuon invariant mass and its propagated resolution.

use crate::functions::ResolutionFunction;
use msc_core::{MUON_MASS, Muon, MuonPair};

/// Invariant mass of two muons.
pub fn invariant_mass(mu1: &Muon, mu2: &Muon) -> f64 {
    MuonPair::new(*mu1, *mu2).mass()
}

/// Mass derivatives with respect to `(pt, cot θ, φ)` of each muon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassDerivatives {
    /// ∂m/∂pt₁, ∂m/∂pt₂
    pub d_pt: [f64; 2],
    /// ∂m/∂cotθ₁, ∂m/∂cotθ₂
    pub d_cot_theta: [f64; 2],
    /// ∂m/∂φ₁, ∂m/∂φ₂
    pub d_phi: [f64; 2],
}

/// First-order derivatives of the dimuon mass, or `None` for a degenerate mass.
pub fn mass_derivatives(mu1: &Muon, mu2: &Muon) -> Option<MassDerivatives> {
    let mass = invariant_mass(mu1, mu2);
    if !(mass.is_finite() && mass > 0.0) {
        return None;
    }
    let m2 = MUON_MASS * MUON_MASS;
    let (pt1, pt2) = (mu1.pt, mu2.pt);
    let (cot1, cot2) = (mu1.cot_theta(), mu2.cot_theta());
    let e1 = (pt1 * pt1 * (1.0 + cot1 * cot1) + m2).sqrt();
    let e2 = (pt2 * pt2 * (1.0 + cot2 * cot2) + m2).sqrt();
    let cos_dphi = (mu1.phi - mu2.phi).cos();
    let sin_dphi = (mu1.phi - mu2.phi).sin();

    let d_pt1 = (e2 / e1 * pt1 * (1.0 + cot1 * cot1) - pt2 * (cos_dphi + cot1 * cot2)) / mass;
    let d_pt2 = (e1 / e2 * pt2 * (1.0 + cot2 * cot2) - pt1 * (cos_dphi + cot1 * cot2)) / mass;
    let d_cot1 = (e2 / e1 * pt1 * pt1 * cot1 - pt1 * pt2 * cot2) / mass;
    let d_cot2 = (e1 / e2 * pt2 * pt2 * cot2 - pt1 * pt2 * cot1) / mass;
    let d_phi1 = pt1 * pt2 * sin_dphi / mass;

    Some(MassDerivatives {
        d_pt: [d_pt1, d_pt2],
        d_cot_theta: [d_cot1, d_cot2],
        d_phi: [d_phi1, -d_phi1],
    })
}

/// Mass resolution from propagating the per-muon `pt`, `cot θ` and `φ`
/// resolutions, treating the two muons as independent.
///
/// Returns NaN when the pair mass is degenerate (non-positive or not finite).
pub fn mass_resolution(mu1: &Muon, mu2: &Muon, function: ResolutionFunction, par: &[f64]) -> f64 {
    let Some(d) = mass_derivatives(mu1, mu2) else {
        return f64::NAN;
    };
    let variance: f64 = [mu1, mu2]
        .iter()
        .enumerate()
        .map(|(i, mu)| {
            let s_pt = function.sigma_pt(mu.pt, mu.eta, par) * mu.pt;
            let s_cot = function.sigma_cot_theta(mu.pt, mu.eta, par);
            let s_phi = function.sigma_phi(mu.pt, mu.eta, par);
            (d.d_pt[i] * s_pt).powi(2) + (d.d_cot_theta[i] * s_cot).powi(2) + (d.d_phi[i] * s_phi).powi(2)
        })
        .sum();
    variance.sqrt()
}
