//! Resonance lineshapes: relativistic Breit-Wigner convolved with a Gaussian
//! resolution, tabulated per resonance on a (sigma, mass) grid.
//!
//! Grid layout for a resonance with nominal mass `M`, table half-width `HW`,
//! maximum resolution `S` and `n` bins:
//! - sigma row `iy` holds `σ = S·iy/n`,
//! - mass column `ix` holds `m = M − HW + 2·HW·ix/n`,
//!
//! with `ix, iy ∈ 0..=n`. Each row has a normalization `Σ_ix value·(2·HW/n)`.
//! Lookups use the nearest grid point and never extrapolate.

use crate::normalize::GaussLegendre;
use crate::resonance::{N_RESONANCES, ResonanceDescriptor, Resonances};
use msc_core::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Default number of bins per table axis.
pub const DEFAULT_TABLE_BINS: usize = 1000;

/// Integration range of the Gaussian, in units of sigma.
const GAUSS_RANGE: f64 = 8.0;
/// Gauss-Legendre nodes per integration panel.
const NODES_PER_PANEL: usize = 10;
const SIGMA_BREAKS: [f64; 11] = [-4.0, -2.0, -1.0, -0.5, -0.25, 0.0, 0.25, 0.5, 1.0, 2.0, 4.0];
const WIDTH_BREAKS: [f64; 13] =
    [-300.0, -100.0, -30.0, -10.0, -3.0, -1.0, 0.0, 1.0, 3.0, 10.0, 30.0, 100.0, 300.0];

/// Shared cancellation flag for long table builds.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// True once [`cancel`](Self::cancel) was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Relativistic Breit-Wigner density in `x` for mass `mass` and width `width`.
///
/// `k / ((x² − M²)² + M²Γ²)` with `k = 2√2·M·Γ·γ / (π·√(M² + γ))`, `γ = M·√(M² + Γ²)`.
#[inline]
pub fn relativistic_breit_wigner(x: f64, mass: f64, width: f64) -> f64 {
    let m2 = mass * mass;
    let gamma = mass * (m2 + width * width).sqrt();
    let k = 2.0 * std::f64::consts::SQRT_2 * mass * width * gamma
        / (std::f64::consts::PI * (m2 + gamma).sqrt());
    let d = x * x - m2;
    k / (d * d + m2 * width * width)
}

#[inline]
fn gaussian(dx: f64, sigma: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    let z = dx / sigma;
    INV_SQRT_2PI / sigma * (-0.5 * z * z).exp()
}

/// Breit-Wigner ⊗ Gaussian evaluated at `m`.
///
/// The integral over the true mass `x ∈ [max(m − 8σ, 0), m + 8σ]` runs in
/// `u = atan((x − M)/(Γ/2))`, where the Breit-Wigner peak is flat. Panels break
/// at fixed multiples of `σ` around `m` and of `Γ` around `M`. `σ ≤ 0` returns the
/// bare Breit-Wigner.
pub fn convolution(m: f64, sigma: f64, desc: &ResonanceDescriptor, rule: &GaussLegendre) -> f64 {
    let (mass, width) = (desc.mass, desc.width);
    if sigma <= 0.0 {
        return relativistic_breit_wigner(m, mass, width);
    }
    let half_width = 0.5 * width;
    let lo = (m - GAUSS_RANGE * sigma).max(0.0);
    let hi = m + GAUSS_RANGE * sigma;
    if hi <= lo {
        return 0.0;
    }

    let to_u = |x: f64| ((x - mass) / half_width).atan();
    let mut breaks: Vec<f64> = SIGMA_BREAKS
        .iter()
        .map(|k| m + k * sigma)
        .chain(WIDTH_BREAKS.iter().map(|k| mass + k * width))
        .filter(|&x| x > lo && x < hi)
        .chain([lo, hi])
        .map(to_u)
        .collect();
    breaks.sort_by(f64::total_cmp);
    breaks.dedup();

    rule.integrate_panels(&breaks, |u| {
        let t = u.tan();
        let x = mass + half_width * t;
        let jacobian = half_width * (1.0 + t * t);
        relativistic_breit_wigner(x, mass, width) * gaussian(x - m, sigma) * jacobian
    })
}

/// Tabulated lineshape of one resonance.
#[derive(Debug, Clone)]
pub struct LineshapeTable {
    mass: f64,
    half_width: f64,
    max_sigma: f64,
    nbins: usize,
    /// Row-major `[iy][ix]`, `(nbins + 1)²` entries.
    values: Vec<f64>,
    norms: Vec<f64>,
}

impl LineshapeTable {
    /// Fill the grid for one resonance. Checks `cancel` once per sigma row.
    pub fn build(desc: &ResonanceDescriptor, nbins: usize, cancel: &CancelFlag) -> Result<Self> {
        if nbins == 0 {
            return Err(Error::Configuration("lineshape table needs at least one bin".into()));
        }
        let start = Instant::now();
        let rule = GaussLegendre::new(NODES_PER_PANEL);
        let n = nbins as f64;
        let stride = nbins + 1;
        let mass_step = 2.0 * desc.table_half_width / n;
        let mut values = vec![0.0; stride * stride];
        let mut norms = vec![0.0; stride];

        for iy in 0..=nbins {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(format!(
                    "lineshape table for {} cancelled at sigma row {iy}/{nbins}",
                    desc.name
                )));
            }
            let sigma = desc.max_sigma * iy as f64 / n;
            let row = &mut values[iy * stride..(iy + 1) * stride];
            for (ix, cell) in row.iter_mut().enumerate() {
                let m = desc.mass - desc.table_half_width + mass_step * ix as f64;
                *cell = convolution(m, sigma, desc, &rule);
            }
            norms[iy] = row.iter().sum::<f64>() * mass_step;
        }

        tracing::info!(
            resonance = %desc.name,
            nbins,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "lineshape table built"
        );
        Ok(Self {
            mass: desc.mass,
            half_width: desc.table_half_width,
            max_sigma: desc.max_sigma,
            nbins,
            values,
            norms,
        })
    }

    /// Bins per axis.
    pub fn nbins(&self) -> usize {
        self.nbins
    }

    /// Per-row normalizations, indexed by sigma bin.
    pub fn norms(&self) -> &[f64] {
        &self.norms
    }

    /// Nearest-grid indices `(ix, iy)`, or `None` outside the table.
    pub fn bin(&self, mass: f64, sigma: f64) -> Option<(usize, usize)> {
        let n = self.nbins as f64;
        let fy = sigma / self.max_sigma * n;
        let fx = (mass - (self.mass - self.half_width)) / (2.0 * self.half_width) * n;
        if !(0.0..=n).contains(&fy) || !(0.0..=n).contains(&fx) {
            return None;
        }
        let iy = (fy.round() as usize).min(self.nbins);
        let ix = (fx.round() as usize).min(self.nbins);
        Some((ix, iy))
    }

    /// Normalized density `value / norm` at the nearest grid point.
    pub fn lookup(&self, mass: f64, sigma: f64) -> Option<f64> {
        let (ix, iy) = self.bin(mass, sigma)?;
        let norm = self.norms[iy];
        if !(norm > 0.0) {
            return None;
        }
        Some(self.values[iy * (self.nbins + 1) + ix] / norm)
    }
}

/// Lineshape tables for the selected resonances, with their mass windows.
///
/// Built once and read-only afterwards.
#[derive(Debug, Clone)]
pub struct LineshapeTables {
    resonances: Resonances,
    tables: Vec<Option<LineshapeTable>>,
}

impl LineshapeTables {
    /// Build a table for every selected resonance.
    pub fn build(resonances: &Resonances, nbins: usize, cancel: &CancelFlag) -> Result<Self> {
        let start = Instant::now();
        let mut tables = Vec::with_capacity(N_RESONANCES);
        for (ires, desc) in resonances.descriptors().iter().enumerate() {
            tables.push(if resonances.is_selected(ires) {
                Some(LineshapeTable::build(desc, nbins, cancel)?)
            } else {
                None
            });
        }
        tracing::info!(
            tables = tables.iter().flatten().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "lineshape tables ready"
        );
        Ok(Self { resonances: resonances.clone(), tables })
    }

    /// Resonances the tables were built for.
    pub fn resonances(&self) -> &Resonances {
        &self.resonances
    }

    /// Table of resonance `ires`, if it was selected.
    pub fn table(&self, ires: usize) -> Option<&LineshapeTable> {
        self.tables.get(ires).and_then(Option::as_ref)
    }

    /// Lineshape probability density of resonance `ires` for a pair of mass
    /// `mass`, resolution `sigma`, in rapidity bin `iy`.
    ///
    /// Zero when the resonance has no table, the mass is outside the bin's
    /// window, or `(mass, sigma)` falls outside the table.
    pub fn probability(&self, mass: f64, sigma: f64, ires: usize, iy: usize) -> f64 {
        let Some(table) = self.table(ires) else {
            return 0.0;
        };
        if !self.resonances.check_mass_window_in_bin(mass, ires, iy) {
            return 0.0;
        }
        match table.lookup(mass, sigma) {
            Some(p) => p,
            None => {
                tracing::debug!(ires, iy, mass, sigma, "lineshape lookup outside table");
                0.0
            }
        }
    }
}
