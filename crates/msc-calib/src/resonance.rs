//! Resonance descriptors, mass windows and rapidity binning.

use msc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of known resonances.
pub const N_RESONANCES: usize = 6;

/// Number of dimuon rapidity bins.
pub const N_RAPIDITY_BINS: usize = 3;

/// Upper `|y|` edges of all rapidity bins but the last.
pub const RAPIDITY_EDGES: [f64; N_RAPIDITY_BINS - 1] = [0.8, 1.6];

/// Static description of one resonance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceDescriptor {
    /// Display name.
    pub name: String,
    /// Nominal mass (GeV).
    pub mass: f64,
    /// Natural width Γ (GeV).
    pub width: f64,
    /// Mass-window half-width per rapidity bin (GeV), scaled by the window factors.
    pub window_half_widths: [f64; N_RAPIDITY_BINS],
    /// Largest mass resolution covered by the lineshape table (GeV).
    pub max_sigma: f64,
    /// Half-width of the lineshape table mass axis around `mass` (GeV).
    pub table_half_width: f64,
}

impl ResonanceDescriptor {
    fn new(name: &str, mass: f64, width: f64, windows: [f64; 3], max_sigma: f64, hw: f64) -> Self {
        Self {
            name: name.to_string(),
            mass,
            width,
            window_half_widths: windows,
            max_sigma,
            table_half_width: hw,
        }
    }

    /// The six standard resonances in index order: Z, Υ(3S), Υ(2S), Υ(1S), ψ(2S), J/ψ.
    pub fn standard() -> [ResonanceDescriptor; N_RESONANCES] {
        const UPSILON_WINDOWS: [f64; 3] = [0.5, 0.6, 0.7];
        const PSI_WINDOWS: [f64; 3] = [0.3, 0.35, 0.4];
        [
            Self::new("Z", 91.1876, 2.4952, [20.0, 25.0, 30.0], 50.0, 30.0),
            Self::new("Upsilon(3S)", 10.3552, 2.03e-5, UPSILON_WINDOWS, 5.0, 0.7),
            Self::new("Upsilon(2S)", 10.0233, 3.2e-5, UPSILON_WINDOWS, 5.0, 0.7),
            Self::new("Upsilon(1S)", 9.4603, 5.4e-5, UPSILON_WINDOWS, 5.0, 0.7),
            Self::new("psi(2S)", 3.68609, 3.17e-4, PSI_WINDOWS, 5.0, 0.4),
            Self::new("J/psi", 3.0969, 9.32e-5, PSI_WINDOWS, 5.0, 0.4),
        ]
    }

    fn validate(&self) -> Result<()> {
        let positive = [self.mass, self.width, self.max_sigma, self.table_half_width];
        if positive.iter().any(|v| !v.is_finite() || *v <= 0.0)
            || self.window_half_widths.iter().any(|v| !v.is_finite() || *v <= 0.0)
        {
            return Err(Error::Configuration(format!(
                "resonance {} has a non-positive mass, width, window or table extent",
                self.name
            )));
        }
        Ok(())
    }
}

/// Resonance set with selection flags and asymmetric window factors.
#[derive(Debug, Clone)]
pub struct Resonances {
    descriptors: [ResonanceDescriptor; N_RESONANCES],
    selected: [bool; N_RESONANCES],
    left_window_factor: f64,
    right_window_factor: f64,
}

impl Resonances {
    /// Standard resonances with the given selection and unit window factors.
    pub fn new(selected: [bool; N_RESONANCES]) -> Self {
        Self {
            descriptors: ResonanceDescriptor::standard(),
            selected,
            left_window_factor: 1.0,
            right_window_factor: 1.0,
        }
    }

    /// Custom descriptors (validated).
    pub fn from_descriptors(
        descriptors: [ResonanceDescriptor; N_RESONANCES],
        selected: [bool; N_RESONANCES],
    ) -> Result<Self> {
        for d in &descriptors {
            d.validate()?;
        }
        Ok(Self { descriptors, selected, left_window_factor: 1.0, right_window_factor: 1.0 })
    }

    /// Set the window factors applied below and above the nominal mass.
    pub fn with_window_factors(mut self, left: f64, right: f64) -> Result<Self> {
        if !(left.is_finite() && left > 0.0 && right.is_finite() && right > 0.0) {
            return Err(Error::Configuration(format!(
                "window factors must be positive, got left={left} right={right}"
            )));
        }
        self.left_window_factor = left;
        self.right_window_factor = right;
        Ok(self)
    }

    /// Descriptor of resonance `ires`.
    pub fn descriptor(&self, ires: usize) -> Result<&ResonanceDescriptor> {
        self.descriptors.get(ires).ok_or_else(|| {
            Error::Configuration(format!("resonance index {ires} out of range 0..{N_RESONANCES}"))
        })
    }

    /// All descriptors in index order.
    pub fn descriptors(&self) -> &[ResonanceDescriptor; N_RESONANCES] {
        &self.descriptors
    }

    /// Selection flags in index order.
    pub fn selected(&self) -> [bool; N_RESONANCES] {
        self.selected
    }

    /// True if resonance `ires` takes part in the fit.
    pub fn is_selected(&self, ires: usize) -> bool {
        self.selected.get(ires).copied().unwrap_or(false)
    }

    /// Indices of the selected resonances, ascending.
    pub fn selected_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..N_RESONANCES).filter(|&i| self.selected[i])
    }

    /// True if at least one resonance is selected.
    pub fn any_selected(&self) -> bool {
        self.selected.iter().any(|&s| s)
    }

    /// Window `(lo, hi)` of resonance `ires` in rapidity bin `iy`, or `None`
    /// for an index past the last resonance.
    pub fn window_bounds(&self, ires: usize, iy: usize) -> Option<(f64, f64)> {
        let d = self.descriptors.get(ires)?;
        let hw = d.window_half_widths[iy.min(N_RAPIDITY_BINS - 1)];
        Some((d.mass - hw * self.left_window_factor, d.mass + hw * self.right_window_factor))
    }

    /// Widest window of resonance `ires` over all rapidity bins.
    pub fn widest_window(&self, ires: usize) -> Option<(f64, f64)> {
        let d = self.descriptors.get(ires)?;
        let hw = d.window_half_widths.iter().copied().fold(0.0, f64::max);
        Some((d.mass - hw * self.left_window_factor, d.mass + hw * self.right_window_factor))
    }

    /// True if `mass` lies in the widest window of resonance `ires` (bounds inclusive).
    pub fn check_mass_window(&self, mass: f64, ires: usize) -> bool {
        self.widest_window(ires).is_some_and(|(lo, hi)| mass >= lo && mass <= hi)
    }

    /// True if `mass` lies in the window of resonance `ires` for rapidity bin `iy`.
    pub fn check_mass_window_in_bin(&self, mass: f64, ires: usize, iy: usize) -> bool {
        self.window_bounds(ires, iy).is_some_and(|(lo, hi)| mass >= lo && mass <= hi)
    }

    /// First selected resonance whose window contains `mass`.
    pub fn find_resonance(&self, mass: f64) -> Option<usize> {
        self.selected_indices().find(|&i| self.check_mass_window(mass, i))
    }

    /// Event weight: 1 if `mass` is in the window of any selected resonance, else 0.
    pub fn compute_weight(&self, mass: f64) -> f64 {
        if self.find_resonance(mass).is_some() { 1.0 } else { 0.0 }
    }
}

/// Rapidity bin of a dimuon with rapidity `y`, from `|y|`.
pub fn rapidity_bin(y: f64) -> usize {
    let ay = y.abs();
    RAPIDITY_EDGES.iter().position(|&edge| ay < edge).unwrap_or(N_RAPIDITY_BINS - 1)
}
