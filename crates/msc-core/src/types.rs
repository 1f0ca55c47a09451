//! Muon kinematics shared across the calibration engine

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::Add;

/// Muon rest mass in GeV.
pub const MUON_MASS: f64 = 0.105_658_37;

/// Reconstructed muon track in collider coordinates.
///
/// Corrections never mutate a muon in place: every scale, bias or smear step
/// returns a new value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Muon {
    /// Transverse momentum (GeV)
    pub pt: f64,
    /// Pseudorapidity
    pub eta: f64,
    /// Azimuthal angle (rad)
    pub phi: f64,
    /// Electric charge, +1 or -1
    pub charge: i32,
}

impl Muon {
    /// Create a muon from `(pt, eta, phi, charge)`.
    pub fn new(pt: f64, eta: f64, phi: f64, charge: i32) -> Self {
        Self { pt, eta, phi, charge }
    }

    /// Same direction and charge, different transverse momentum.
    #[inline]
    pub fn with_pt(self, pt: f64) -> Self {
        Self { pt, ..self }
    }

    /// `cot(θ) = sinh(η)`
    #[inline]
    pub fn cot_theta(&self) -> f64 {
        self.eta.sinh()
    }

    /// Four-momentum under the muon-mass hypothesis.
    pub fn p4(&self) -> FourMomentum {
        FourMomentum::from_pt_eta_phi_m(self.pt, self.eta, self.phi, MUON_MASS)
    }

    /// True when every kinematic field is a finite number.
    pub fn is_finite(&self) -> bool {
        self.pt.is_finite() && self.eta.is_finite() && self.phi.is_finite()
    }
}

/// Cartesian four-momentum `(px, py, pz, E)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FourMomentum {
    /// x component
    pub px: f64,
    /// y component
    pub py: f64,
    /// z component
    pub pz: f64,
    /// energy
    pub e: f64,
}

impl FourMomentum {
    /// Build from cartesian components.
    pub fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self { px, py, pz, e }
    }

    /// Build from `(pt, eta, phi)` and a mass hypothesis.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, m: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let e = (px * px + py * py + pz * pz + m * m).sqrt();
        Self { px, py, pz, e }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Azimuthal angle in `(-π, π]`.
    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    /// Pseudorapidity. Zero transverse momentum maps to `±inf`.
    pub fn eta(&self) -> f64 {
        let pt = self.pt();
        if pt == 0.0 {
            return if self.pz >= 0.0 { f64::INFINITY } else { f64::NEG_INFINITY };
        }
        (self.pz / pt).asinh()
    }

    /// Rapidity `0.5·ln((E+pz)/(E−pz))`.
    pub fn rapidity(&self) -> f64 {
        0.5 * ((self.e + self.pz) / (self.e - self.pz)).ln()
    }

    /// Invariant mass. Space-like vectors (numerical noise) give `-sqrt(-m²)`.
    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - self.px * self.px - self.py * self.py - self.pz * self.pz;
        if m2 >= 0.0 { m2.sqrt() } else { -(-m2).sqrt() }
    }
}

impl Add for FourMomentum {
    type Output = FourMomentum;

    fn add(self, rhs: FourMomentum) -> FourMomentum {
        FourMomentum {
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
            e: self.e + rhs.e,
        }
    }
}

/// Dimuon candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MuonPair {
    /// First muon (negative charge by convention)
    pub mu1: Muon,
    /// Second muon (positive charge by convention)
    pub mu2: Muon,
}

impl MuonPair {
    /// Create a pair from two muons.
    pub fn new(mu1: Muon, mu2: Muon) -> Self {
        Self { mu1, mu2 }
    }

    /// Dimuon four-momentum.
    pub fn p4(&self) -> FourMomentum {
        self.mu1.p4() + self.mu2.p4()
    }

    /// Dimuon invariant mass.
    pub fn mass(&self) -> f64 {
        self.p4().mass()
    }

    /// Dimuon rapidity.
    pub fn rapidity(&self) -> f64 {
        self.p4().rapidity()
    }

    /// Placeholder pairs written by event loops for events without a candidate.
    pub fn is_empty(&self) -> bool {
        self.mu1.pt == 0.0 && self.mu2.pt == 0.0 && self.mu1.eta == 0.0 && self.mu2.eta == 0.0
    }
}

/// `|Δφ|` folded into `[0, π]`.
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    delta_phi_no_fabs(phi1, phi2).abs()
}

/// `Δφ` folded into `[-π, π)`, sign preserved.
pub fn delta_phi_no_fabs(phi1: f64, phi2: f64) -> f64 {
    let d = phi1 - phi2;
    if !d.is_finite() {
        return d;
    }
    let folded = (d + PI).rem_euclid(2.0 * PI) - PI;
    // rem_euclid may round up to the modulus itself.
    if folded >= PI { folded - 2.0 * PI } else { folded }
}

/// `ΔR = sqrt(Δη² + Δφ²)`.
pub fn delta_r(eta1: f64, eta2: f64, phi1: f64, phi2: f64) -> f64 {
    ((eta1 - eta2).powi(2) + delta_phi(phi1, phi2).powi(2)).sqrt()
}
