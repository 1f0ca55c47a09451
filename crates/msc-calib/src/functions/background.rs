//! Background functions: normalized densities over a resonance mass window.
//!
//! The first parameter of every non-trivial variant is the background fraction
//! mixed with the resonance lineshape.

use msc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Background function selected by integer type code `0..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BackgroundFunction {
    /// Type 0: no background.
    None,
    /// Type 1: flat in mass. Parameters: `[fraction]`.
    Flat,
    /// Type 2: falling exponential. Parameters: `[fraction, slope]`.
    Exponential,
}

impl BackgroundFunction {
    /// Number of registered background functions.
    pub const COUNT: u32 = 3;

    const ALL: [BackgroundFunction; 3] =
        [BackgroundFunction::None, BackgroundFunction::Flat, BackgroundFunction::Exponential];

    /// Look up a background function by type code.
    pub fn from_id(id: u32) -> Result<Self> {
        Self::ALL.get(id as usize).copied().ok_or_else(|| {
            Error::Configuration(format!(
                "unknown background function type {id} (valid: 0..={})",
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
            BackgroundFunction::None => 0,
            BackgroundFunction::Flat => 1,
            BackgroundFunction::Exponential => 2,
        }
    }

    /// Background fraction, clamped to `[0, 1]`.
    #[inline]
    pub fn fraction(self, par: &[f64]) -> f64 {
        match self {
            BackgroundFunction::None => 0.0,
            BackgroundFunction::Flat | BackgroundFunction::Exponential => par[0].clamp(0.0, 1.0),
        }
    }

    /// Density at `mass`, normalized to unit integral over `[lo, hi]`.
    ///
    /// Returns 0 outside the window or for an empty window.
    pub fn density(self, mass: f64, lo: f64, hi: f64, par: &[f64]) -> f64 {
        if !(hi > lo) || mass < lo || mass > hi {
            return 0.0;
        }
        match self {
            BackgroundFunction::None => 0.0,
            BackgroundFunction::Flat => 1.0 / (hi - lo),
            BackgroundFunction::Exponential => {
                let slope = par[1];
                if slope.abs() * (hi - lo) < 1e-9 {
                    return 1.0 / (hi - lo);
                }
                // Shift by `lo` so the exponentials stay in range for large masses.
                let norm = (1.0 - (-slope * (hi - lo)).exp()) / slope;
                (-slope * (mass - lo)).exp() / norm
            }
        }
    }
}

impl TryFrom<u32> for BackgroundFunction {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        Self::from_id(id)
    }
}

impl From<BackgroundFunction> for u32 {
    fn from(f: BackgroundFunction) -> u32 {
        f.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn integrate(f: BackgroundFunction, lo: f64, hi: f64, par: &[f64]) -> f64 {
        let n = 20_000;
        let h = (hi - lo) / n as f64;
        (0..n).map(|i| f.density(lo + (i as f64 + 0.5) * h, lo, hi, par) * h).sum()
    }

    #[test]
    fn test_densities_are_normalized() {
        assert_relative_eq!(integrate(BackgroundFunction::Flat, 71.0, 111.0, &[0.2]), 1.0, epsilon = 1e-9);
        for slope in [-0.05, 0.0, 1e-12, 0.03, 0.5] {
            let total = integrate(BackgroundFunction::Exponential, 71.0, 111.0, &[0.2, slope]);
            assert_relative_eq!(total, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_outside_window_is_zero() {
        assert_eq!(BackgroundFunction::Flat.density(60.0, 71.0, 111.0, &[0.5]), 0.0);
        assert_eq!(BackgroundFunction::Exponential.density(120.0, 71.0, 111.0, &[0.5, 0.1]), 0.0);
        assert_eq!(BackgroundFunction::None.density(91.0, 71.0, 111.0, &[]), 0.0);
    }

    #[test]
    fn test_fraction_is_clamped() {
        assert_eq!(BackgroundFunction::Flat.fraction(&[1.7]), 1.0);
        assert_eq!(BackgroundFunction::Exponential.fraction(&[-0.1, 0.0]), 0.0);
        assert_eq!(BackgroundFunction::None.fraction(&[]), 0.0);
    }
}
