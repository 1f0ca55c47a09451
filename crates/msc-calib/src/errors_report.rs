//! Resolution error bands.
//!
//! Evaluates `σ(pt)/pt` of a resolution function at the central parameters and at
//! `value ± factor·error`, profiles the three curves versus pt and η over a set of
//! muon pairs, and turns the shifted curves into asymmetric error bars.

use crate::functions::ResolutionFunction;
use msc_core::{Error, MuonPair, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error-band configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorsConfig {
    /// Resolution function type code.
    pub resolution_type: u32,
    /// Central parameter values.
    pub parameters: Vec<f64>,
    /// Parameter errors.
    pub errors: Vec<f64>,
    /// Integer multiplier of each error.
    pub error_factors: Vec<i32>,
    /// Number of pt bins.
    pub pt_bins: usize,
    /// Lower pt edge.
    pub pt_min: f64,
    /// Upper pt edge.
    pub pt_max: f64,
    /// Number of η bins.
    pub eta_bins: usize,
    /// Lower η edge.
    pub eta_min: f64,
    /// Upper η edge.
    pub eta_max: f64,
    /// Stop after this many pairs.
    #[serde(default)]
    pub max_events: Option<usize>,
}

impl ErrorsConfig {
    /// Read a YAML (or JSON) configuration.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: ErrorsConfig = serde_yaml_ng::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Check vector lengths, function type and binning.
    pub fn validate(&self) -> Result<()> {
        let n = self.parameters.len();
        if self.errors.len() != n || self.error_factors.len() != n {
            return Err(Error::Configuration(format!(
                "parameters ({n}), errors ({}) and error_factors ({}) must have the same length",
                self.errors.len(),
                self.error_factors.len()
            )));
        }
        let function = ResolutionFunction::from_id(self.resolution_type)?;
        if function.n_params() != n {
            return Err(Error::Configuration(format!(
                "resolution function {} expects {} parameters, got {n}",
                self.resolution_type,
                function.n_params()
            )));
        }
        for (name, bins, lo, hi) in
            [("pt", self.pt_bins, self.pt_min, self.pt_max), ("eta", self.eta_bins, self.eta_min, self.eta_max)]
        {
            if bins == 0 || !(hi > lo) {
                return Err(Error::Configuration(format!(
                    "{name} binning needs bins > 0 and max > min (bins={bins}, min={lo}, max={hi})"
                )));
            }
        }
        Ok(())
    }

    /// `value + factor·error` per parameter.
    pub fn plus_values(&self) -> Vec<f64> {
        self.shifted(1.0)
    }

    /// `value − factor·error` per parameter.
    pub fn minus_values(&self) -> Vec<f64> {
        self.shifted(-1.0)
    }

    fn shifted(&self, sign: f64) -> Vec<f64> {
        self.parameters
            .iter()
            .zip(&self.errors)
            .zip(&self.error_factors)
            .map(|((v, e), &k)| v + sign * e * f64::from(k))
            .collect()
    }
}

/// Mean-per-bin accumulator.
#[derive(Debug, Clone)]
struct Profile {
    lo: f64,
    hi: f64,
    sum: Vec<f64>,
    count: Vec<usize>,
}

impl Profile {
    fn new(bins: usize, lo: f64, hi: f64) -> Self {
        Self { lo, hi, sum: vec![0.0; bins], count: vec![0; bins] }
    }

    fn fill(&mut self, x: f64, y: f64) {
        if !(x >= self.lo && x < self.hi) {
            return;
        }
        let n = self.sum.len();
        let i = (((x - self.lo) / (self.hi - self.lo) * n as f64) as usize).min(n - 1);
        self.sum[i] += y;
        self.count[i] += 1;
    }

    fn means(&self) -> Vec<f64> {
        self.sum.iter().zip(&self.count).map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 }).collect()
    }

    fn centers(&self) -> Vec<f64> {
        let n = self.sum.len();
        let w = (self.hi - self.lo) / n as f64;
        (0..n).map(|i| self.lo + (i as f64 + 0.5) * w).collect()
    }
}

/// One profiled resolution curve with its error band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileCurve {
    /// Variable on the x axis (`pt` or `eta`).
    pub axis: String,
    /// Bin centers.
    pub centers: Vec<f64>,
    /// Entries per bin.
    pub entries: Vec<usize>,
    /// Mean `σ(pt)/pt` at the central parameters.
    pub sigma: Vec<f64>,
    /// Mean `σ(pt)/pt` at the plus-shifted parameters.
    pub sigma_plus: Vec<f64>,
    /// Mean `σ(pt)/pt` at the minus-shifted parameters.
    pub sigma_minus: Vec<f64>,
    /// Upward error, `plus − central`.
    pub error_high: Vec<f64>,
    /// Downward error, `central − minus`; the full central value when minus is negative.
    pub error_low: Vec<f64>,
}

impl ProfileCurve {
    fn from_profiles(axis: &str, central: &Profile, plus: &Profile, minus: &Profile) -> Self {
        let sigma = central.means();
        let sigma_plus = plus.means();
        let sigma_minus = minus.means();
        let error_high = sigma.iter().zip(&sigma_plus).map(|(c, p)| p - c).collect();
        let error_low = sigma
            .iter()
            .zip(&sigma_minus)
            .map(|(&c, &m)| if m < 0.0 { c } else { c - m })
            .collect();
        Self {
            axis: axis.to_string(),
            centers: central.centers(),
            entries: central.count.clone(),
            sigma,
            sigma_plus,
            sigma_minus,
            error_high,
            error_low,
        }
    }
}

/// Output of [`ErrorsAnalyzer::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorsReport {
    /// Resolution function type code.
    pub resolution_type: u32,
    /// Central parameters.
    pub parameters: Vec<f64>,
    /// Plus-shifted parameters.
    pub plus_values: Vec<f64>,
    /// Minus-shifted parameters.
    pub minus_values: Vec<f64>,
    /// Pairs that contributed.
    pub pairs_used: usize,
    /// Pairs skipped (empty or non-finite).
    pub pairs_skipped: usize,
    /// `σ(pt)/pt` versus pt.
    pub vs_pt: ProfileCurve,
    /// `σ(pt)/pt` versus η.
    pub vs_eta: ProfileCurve,
}

/// Resolution error-band analyzer. Read-only with respect to the fit.
#[derive(Debug, Clone)]
pub struct ErrorsAnalyzer {
    config: ErrorsConfig,
    function: ResolutionFunction,
    plus: Vec<f64>,
    minus: Vec<f64>,
}

impl ErrorsAnalyzer {
    /// Validate the configuration and precompute the shifted parameter vectors.
    pub fn new(config: ErrorsConfig) -> Result<Self> {
        config.validate()?;
        let function = ResolutionFunction::from_id(config.resolution_type)?;
        let plus = config.plus_values();
        let minus = config.minus_values();
        Ok(Self { config, function, plus, minus })
    }

    /// Profile both muons of every pair.
    pub fn analyze(&self, pairs: &[MuonPair]) -> ErrorsReport {
        let c = &self.config;
        let mut pt = [(); 3].map(|_| Profile::new(c.pt_bins, c.pt_min, c.pt_max));
        let mut eta = [(); 3].map(|_| Profile::new(c.eta_bins, c.eta_min, c.eta_max));
        let param_sets = [c.parameters.as_slice(), self.plus.as_slice(), self.minus.as_slice()];
        let limit = c.max_events.unwrap_or(usize::MAX);
        let (mut used, mut skipped) = (0, 0);

        for pair in pairs.iter().take(limit) {
            if pair.is_empty() {
                skipped += 1;
                continue;
            }
            let muons = [pair.mu1, pair.mu2];
            let sigmas = param_sets
                .map(|par| muons.map(|mu| self.function.sigma_pt(mu.pt, mu.eta, par)));
            let finite = muons.iter().all(|mu| mu.pt.is_finite() && mu.eta.is_finite())
                && sigmas.iter().flatten().all(|s| s.is_finite());
            if !finite {
                skipped += 1;
                continue;
            }
            used += 1;
            for (k, per_muon) in sigmas.iter().enumerate() {
                for (mu, &s) in muons.iter().zip(per_muon) {
                    pt[k].fill(mu.pt, s);
                    eta[k].fill(mu.eta, s);
                }
            }
        }

        tracing::info!(used, skipped, "resolution error bands filled");
        ErrorsReport {
            resolution_type: c.resolution_type,
            parameters: c.parameters.clone(),
            plus_values: self.plus.clone(),
            minus_values: self.minus.clone(),
            pairs_used: used,
            pairs_skipped: skipped,
            vs_pt: ProfileCurve::from_profiles("pt", &pt[0], &pt[1], &pt[2]),
            vs_eta: ProfileCurve::from_profiles("eta", &eta[0], &eta[1], &eta[2]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use msc_core::Muon;

    fn config() -> ErrorsConfig {
        ErrorsConfig {
            resolution_type: 1,
            parameters: vec![0.01, 1e-4, 0.005, 0.001, 0.01, 2e-4, 0.002],
            errors: vec![0.002, 1e-5, 0.001, 0.0, 0.0, 0.0, 0.0],
            error_factors: vec![1, 2, 1, 1, 1, 1, 1],
            pt_bins: 10,
            pt_min: 0.0,
            pt_max: 100.0,
            eta_bins: 6,
            eta_min: -3.0,
            eta_max: 3.0,
            max_events: None,
        }
    }

    #[test]
    fn test_plus_minus_vectors() {
        let c = config();
        assert_relative_eq!(c.plus_values()[0], 0.012, epsilon = 1e-15);
        assert_relative_eq!(c.plus_values()[1], 1.2e-4, epsilon = 1e-15);
        assert_relative_eq!(c.minus_values()[1], 0.8e-4, epsilon = 1e-15);
        assert_eq!(c.minus_values()[6], 0.002);
    }

    #[test]
    fn test_length_mismatch_is_configuration_error() {
        let mut c = config();
        c.error_factors.pop();
        assert!(matches!(ErrorsAnalyzer::new(c), Err(Error::Configuration(_))));
        let mut c = config();
        c.resolution_type = 0;
        assert!(matches!(ErrorsAnalyzer::new(c), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_band_brackets_central_curve() {
        let analyzer = ErrorsAnalyzer::new(config()).unwrap();
        let pairs = vec![
            MuonPair::new(Muon::new(45.0, 0.5, 0.0, -1), Muon::new(42.0, -1.2, 3.0, 1)),
            MuonPair::new(Muon::new(15.0, 2.1, 1.0, -1), Muon::new(88.0, 0.1, -2.0, 1)),
            MuonPair::new(Muon::new(0.0, 0.0, 0.0, -1), Muon::new(0.0, 0.0, 0.0, 1)),
        ];
        let report = analyzer.analyze(&pairs);
        assert_eq!(report.pairs_used, 2);
        assert_eq!(report.pairs_skipped, 1);
        assert_eq!(report.vs_pt.entries.iter().sum::<usize>(), 4);
        let bin = 4; // 40-50 GeV
        assert_eq!(report.vs_pt.entries[bin], 2);
        assert!(report.vs_pt.sigma_plus[bin] > report.vs_pt.sigma[bin]);
        assert!(report.vs_pt.sigma_minus[bin] < report.vs_pt.sigma[bin]);
        assert!(report.vs_pt.error_high[bin] > 0.0 && report.vs_pt.error_low[bin] > 0.0);
        assert_eq!(report.vs_eta.centers.len(), 6);
    }

    #[test]
    fn test_yaml_config_round_trip() {
        let yaml = serde_yaml_ng::to_string(&config()).unwrap();
        let back: ErrorsConfig = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, config());
    }
}
