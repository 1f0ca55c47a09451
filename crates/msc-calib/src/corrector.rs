//! Standalone correction objects built from stored parameter sets, plus the
//! bias and smearing applied to inputs before a fit.

use crate::functions::{
    FunctionFamily, GaussianDraws, ResolutionFunction, ScaleFunction, SmearFunction,
};
use crate::mass::mass_resolution;
use crate::params::{FrozenParams, ParameterSet};
use msc_core::{Error, Muon, MuonPair, Result};
use std::path::Path;

/// Momentum scale corrector applying every iteration block of a scale
/// parameter set in sequence.
#[derive(Debug, Clone)]
pub struct MomentumScaleCorrector {
    steps: Vec<(ScaleFunction, FrozenParams)>,
}

impl MomentumScaleCorrector {
    /// Build from a scale parameter set.
    pub fn new(set: &ParameterSet) -> Result<Self> {
        if set.family != FunctionFamily::Scale {
            return Err(Error::Configuration(format!(
                "momentum scale corrector needs scale parameters, got {}",
                set.family
            )));
        }
        set.validate()?;
        let steps = set
            .blocks
            .iter()
            .map(|b| Ok((ScaleFunction::from_id(b.function_type)?, b.frozen())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    /// Load a scale parameter file (text or JSON).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(&ParameterSet::load(path, FunctionFamily::Scale)?)
    }

    /// Number of chained iterations.
    pub fn n_steps(&self) -> usize {
        self.steps.len()
    }

    /// Corrected pt after all iterations.
    pub fn correct_pt(&self, pt: f64, eta: f64, phi: f64, charge: i32) -> f64 {
        self.steps
            .iter()
            .fold(pt, |pt, (f, par)| f.transform(pt, eta, phi, charge, par.as_slice()))
    }

    /// Corrected muon.
    pub fn correct(&self, muon: &Muon) -> Muon {
        muon.with_pt(self.correct_pt(muon.pt, muon.eta, muon.phi, muon.charge))
    }

    /// Corrected pair.
    pub fn correct_pair(&self, pair: &MuonPair) -> MuonPair {
        MuonPair::new(self.correct(&pair.mu1), self.correct(&pair.mu2))
    }
}

/// Resolution estimator using the last iteration block of a resolution set.
#[derive(Debug, Clone)]
pub struct ResolutionEstimator {
    function: ResolutionFunction,
    params: FrozenParams,
}

impl ResolutionEstimator {
    /// Build from a resolution parameter set with at least one block.
    pub fn new(set: &ParameterSet) -> Result<Self> {
        if set.family != FunctionFamily::Resolution {
            return Err(Error::Configuration(format!(
                "resolution estimator needs resolution parameters, got {}",
                set.family
            )));
        }
        set.validate()?;
        let last = set
            .last()
            .ok_or_else(|| Error::Configuration("resolution parameter set is empty".into()))?;
        Ok(Self { function: ResolutionFunction::from_id(last.function_type)?, params: last.frozen() })
    }

    /// Load a resolution parameter file (text or JSON).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(&ParameterSet::load(path, FunctionFamily::Resolution)?)
    }

    /// Function in use.
    pub fn function(&self) -> ResolutionFunction {
        self.function
    }

    /// Relative pt resolution.
    pub fn sigma_pt(&self, pt: f64, eta: f64) -> f64 {
        self.function.sigma_pt(pt, eta, self.params.as_slice())
    }

    /// Absolute cot θ resolution.
    pub fn sigma_cot_theta(&self, pt: f64, eta: f64) -> f64 {
        self.function.sigma_cot_theta(pt, eta, self.params.as_slice())
    }

    /// Absolute φ resolution.
    pub fn sigma_phi(&self, pt: f64, eta: f64) -> f64 {
        self.function.sigma_phi(pt, eta, self.params.as_slice())
    }

    /// Propagated dimuon mass resolution.
    pub fn mass_resolution(&self, pair: &MuonPair) -> f64 {
        mass_resolution(&pair.mu1, &pair.mu2, self.function, self.params.as_slice())
    }
}

/// Smearing then bias applied once to input muons (simulation studies).
#[derive(Debug)]
pub struct InputCorrections {
    smear: Option<(SmearFunction, Vec<f64>)>,
    bias: Option<(ScaleFunction, Vec<f64>)>,
    draws: GaussianDraws,
}

impl InputCorrections {
    /// Check parameter counts; type 0 functions are dropped.
    pub fn new(
        smear: (SmearFunction, Vec<f64>),
        bias: (ScaleFunction, Vec<f64>),
        seed: u64,
    ) -> Result<Self> {
        if smear.1.len() != smear.0.n_params() {
            return Err(Error::Configuration(format!(
                "smear function {} expects {} parameters, got {}",
                smear.0.id(),
                smear.0.n_params(),
                smear.1.len()
            )));
        }
        if bias.1.len() != bias.0.n_params() {
            return Err(Error::Configuration(format!(
                "bias function {} expects {} parameters, got {}",
                bias.0.id(),
                bias.0.n_params(),
                bias.1.len()
            )));
        }
        Ok(Self {
            smear: (smear.0 != SmearFunction::Identity).then_some(smear),
            bias: (bias.0 != ScaleFunction::Identity).then_some(bias),
            draws: GaussianDraws::new(seed),
        })
    }

    /// True if neither smearing nor bias is configured.
    pub fn is_identity(&self) -> bool {
        self.smear.is_none() && self.bias.is_none()
    }

    /// Smear then bias one muon.
    pub fn apply(&mut self, muon: &Muon) -> Muon {
        let mut out = *muon;
        if let Some((f, par)) = &self.smear {
            let y = self.draws.next_draws();
            out = f.apply(&out, par, &y);
        }
        if let Some((f, par)) = &self.bias {
            out = f.apply(&out, par);
        }
        out
    }

    /// Correct both muons of every pair.
    pub fn apply_all(&mut self, pairs: &[MuonPair]) -> Vec<MuonPair> {
        if self.is_identity() {
            return pairs.to_vec();
        }
        let out: Vec<MuonPair> =
            pairs.iter().map(|p| MuonPair::new(self.apply(&p.mu1), self.apply(&p.mu2))).collect();
        tracing::info!(
            pairs = out.len(),
            smear = self.smear.as_ref().map(|(f, _)| f.id()),
            bias = self.bias.as_ref().map(|(f, _)| f.id()),
            "input corrections applied"
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterBlock;
    use approx::assert_relative_eq;

    fn chained_scale() -> ParameterSet {
        let mut set = ParameterSet::new(FunctionFamily::Scale);
        set.push(ParameterBlock::new(0, 1, vec![1.01, 0.0])).unwrap();
        set.push(ParameterBlock::new(1, 0, vec![])).unwrap();
        set.push(ParameterBlock::new(2, 2, vec![1.0, 0.1])).unwrap();
        set
    }

    #[test]
    fn test_corrector_chains_iterations() {
        let c = MomentumScaleCorrector::new(&chained_scale()).unwrap();
        assert_eq!(c.n_steps(), 3);
        let pt = c.correct_pt(40.0, -0.5, 0.0, 1);
        assert_relative_eq!(pt, 40.0 * 1.01 * 1.05, epsilon = 1e-12);
        let mu = c.correct(&Muon::new(40.0, -0.5, 0.0, 1));
        assert_eq!(mu.eta, -0.5);
    }

    #[test]
    fn test_corrector_rejects_wrong_family() {
        let set = ParameterSet::new(FunctionFamily::Resolution);
        assert!(matches!(MomentumScaleCorrector::new(&set), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_resolution_estimator_uses_last_block() {
        let mut set = ParameterSet::new(FunctionFamily::Resolution);
        set.push(ParameterBlock::new(0, 0, vec![0.05, 0.0, 0.0])).unwrap();
        set.push(ParameterBlock::new(1, 0, vec![0.02, 0.001, 0.0005])).unwrap();
        let r = ResolutionEstimator::new(&set).unwrap();
        assert_eq!(r.sigma_pt(30.0, 1.0), 0.02);
        assert_eq!(r.sigma_phi(30.0, 1.0), 0.0005);
        assert!(ResolutionEstimator::new(&ParameterSet::new(FunctionFamily::Resolution)).is_err());
    }

    #[test]
    fn test_input_corrections_identity_and_bias() {
        let pair = MuonPair::new(Muon::new(45.0, 0.1, 0.5, -1), Muon::new(45.0, -0.2, 3.6, 1));
        let mut none =
            InputCorrections::new((SmearFunction::Identity, vec![]), (ScaleFunction::Identity, vec![]), 1)
                .unwrap();
        assert!(none.is_identity());
        assert_eq!(none.apply_all(&[pair]), vec![pair]);

        let mut bias = InputCorrections::new(
            (SmearFunction::Identity, vec![]),
            (ScaleFunction::LinearPt, vec![1.02, 0.0]),
            1,
        )
        .unwrap();
        let out = bias.apply_all(&[pair]);
        assert_relative_eq!(out[0].mu1.pt, 45.0 * 1.02, epsilon = 1e-12);
    }

    #[test]
    fn test_smearing_is_seeded() {
        let pair = MuonPair::new(Muon::new(45.0, 0.1, 0.5, -1), Muon::new(45.0, -0.2, 3.6, 1));
        let make = || {
            InputCorrections::new(
                (SmearFunction::PtPhiCotTheta, vec![1e-3, 1e-3, 1e-3]),
                (ScaleFunction::Identity, vec![]),
                42,
            )
            .unwrap()
        };
        let a = make().apply_all(&[pair]);
        let b = make().apply_all(&[pair]);
        assert_eq!(a, b);
        assert_ne!(a[0].mu1.pt, 45.0);
        assert!(
            InputCorrections::new((SmearFunction::PtPhiCotTheta, vec![1e-3]), (ScaleFunction::Identity, vec![]), 1)
                .is_err()
        );
    }
}
