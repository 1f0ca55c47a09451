//! Negative log-likelihood over muon pairs for the external minimizer.
//!
//! The flat parameter vector is laid out as `[resolution | scale | background]`,
//! each block sized by the registry parameter count of the selected function.
//! Every evaluation freezes the trial vector, corrects both muons of each
//! retained pair with the scale function, recomputes mass, rapidity and mass
//! resolution, and accumulates `−2·ln(max(P, ε))·w`.

use crate::functions::{BackgroundFunction, ResolutionFunction, ScaleFunction};
use crate::lineshape::LineshapeTables;
use crate::mass::mass_resolution;
use crate::params::{FrozenParams, ParameterBuilder};
use crate::resonance::{Resonances, rapidity_bin};
use msc_core::{Error, MuonPair, Result};
use serde::Serialize;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default probability floor inside the logarithm.
pub const DEFAULT_MIN_PROBABILITY: f64 = 1e-300;

/// Pairs sampled by [`LikelihoodDriver::sensitivities`].
const SENSITIVITY_SAMPLE: usize = 2000;

/// Functions evaluated by the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSelection {
    /// Per-muon resolution model
    pub resolution: ResolutionFunction,
    /// Momentum scale correction
    pub scale: ScaleFunction,
    /// Background shape under the resonances
    pub background: BackgroundFunction,
}

/// Block boundaries of the flat parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterLayout {
    n_resolution: usize,
    n_scale: usize,
    n_background: usize,
}

impl ParameterLayout {
    /// Layout for a function selection.
    pub fn new(functions: &FunctionSelection) -> Self {
        Self {
            n_resolution: functions.resolution.n_params(),
            n_scale: functions.scale.n_params(),
            n_background: functions.background.n_params(),
        }
    }

    /// Total parameter count.
    pub fn len(&self) -> usize {
        self.n_resolution + self.n_scale + self.n_background
    }

    /// True when no function takes parameters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of the resolution block.
    pub fn resolution(&self) -> Range<usize> {
        0..self.n_resolution
    }

    /// Indices of the scale block.
    pub fn scale(&self) -> Range<usize> {
        self.n_resolution..self.n_resolution + self.n_scale
    }

    /// Indices of the background block.
    pub fn background(&self) -> Range<usize> {
        self.n_resolution + self.n_scale..self.len()
    }

    /// Borrow the three blocks of `params`. Errors on a length mismatch.
    pub fn split<'a>(&self, params: &'a [f64]) -> Result<(&'a [f64], &'a [f64], &'a [f64])> {
        self.check_len(params.len())?;
        Ok((&params[self.resolution()], &params[self.scale()], &params[self.background()]))
    }

    /// Concatenate three blocks into a flat vector, checking each length.
    pub fn join(&self, resolution: &[f64], scale: &[f64], background: &[f64]) -> Result<Vec<f64>> {
        for (name, got, want) in [
            ("resolution", resolution.len(), self.n_resolution),
            ("scale", scale.len(), self.n_scale),
            ("background", background.len(), self.n_background),
        ] {
            if got != want {
                return Err(Error::Configuration(format!(
                    "{name} block has {got} parameters, function expects {want}"
                )));
            }
        }
        let mut builder = ParameterBuilder::new();
        builder.extend(resolution).extend(scale).extend(background);
        Ok(builder.into_vec())
    }

    /// Errors unless `len` matches the layout.
    pub fn check_len(&self, len: usize) -> Result<()> {
        if len != self.len() {
            return Err(Error::Configuration(format!(
                "parameter vector has {len} entries, layout [resolution {} | scale {} | background {}] needs {}",
                self.n_resolution,
                self.n_scale,
                self.n_background,
                self.len()
            )));
        }
        Ok(())
    }
}

/// Everything the probability computation needs, passed explicitly.
#[derive(Debug, Clone)]
pub struct CalibrationContext {
    tables: LineshapeTables,
    functions: FunctionSelection,
    layout: ParameterLayout,
    min_probability: f64,
}

impl CalibrationContext {
    /// Bind lineshape tables to a function selection.
    pub fn new(tables: LineshapeTables, functions: FunctionSelection, min_probability: f64) -> Result<Self> {
        if !(min_probability > 0.0 && min_probability < 1.0) {
            return Err(Error::Configuration(format!(
                "min_probability must be in (0, 1), got {min_probability}"
            )));
        }
        if !tables.resonances().any_selected() {
            return Err(Error::Configuration("no resonance selected".into()));
        }
        Ok(Self { tables, functions, layout: ParameterLayout::new(&functions), min_probability })
    }

    /// Lineshape tables.
    pub fn tables(&self) -> &LineshapeTables {
        &self.tables
    }

    /// Resonances the tables cover.
    pub fn resonances(&self) -> &Resonances {
        self.tables.resonances()
    }

    /// Selected functions.
    pub fn functions(&self) -> &FunctionSelection {
        &self.functions
    }

    /// Parameter layout.
    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// Probability floor.
    pub fn min_probability(&self) -> f64 {
        self.min_probability
    }

    /// Signal-plus-background density of a pair with `mass`, `rapidity` and
    /// mass resolution `sigma`.
    ///
    /// Sums `(1 − f)·P_res + f·B_res` over the selected resonances whose
    /// rapidity-bin window contains `mass`.
    pub fn mass_prob(&self, mass: f64, rapidity: f64, sigma: f64, background: &[f64]) -> f64 {
        let iy = rapidity_bin(rapidity);
        let resonances = self.tables.resonances();
        let bkg = self.functions.background;
        let fraction = bkg.fraction(background);
        resonances
            .selected_indices()
            .filter(|&ires| resonances.check_mass_window_in_bin(mass, ires, iy))
            .filter_map(|ires| {
                let (lo, hi) = resonances.window_bounds(ires, iy)?;
                let signal = self.tables.probability(mass, sigma, ires, iy);
                Some((1.0 - fraction) * signal + fraction * bkg.density(mass, lo, hi, background))
            })
            .sum()
    }
}

/// Muon pair with its event weight, fixed from the uncorrected mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPair {
    /// Pair kinematics
    pub pair: MuonPair,
    /// Event weight (0 excludes the pair)
    pub weight: f64,
}

/// Counters since construction (`evaluations`) and for the latest evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LikelihoodStats {
    /// Number of objective evaluations
    pub evaluations: usize,
    /// Pairs with non-zero weight
    pub weighted_pairs: usize,
    /// Pairs contributing a positive probability in the latest evaluation
    pub used: usize,
    /// Pairs skipped as numerically degenerate in the latest evaluation
    pub skipped_degenerate: usize,
    /// Pairs whose probability hit the floor in the latest evaluation
    pub zero_probability: usize,
}

#[derive(Debug, Default)]
struct EvalCounts {
    evaluations: AtomicUsize,
    used: AtomicUsize,
    skipped: AtomicUsize,
    zero: AtomicUsize,
}

/// Objective driver over a fixed set of weighted pairs.
#[derive(Debug)]
pub struct LikelihoodDriver {
    context: CalibrationContext,
    pairs: Vec<WeightedPair>,
    counts: EvalCounts,
    buffer: Mutex<FrozenParams>,
    trace_evaluations: bool,
}

impl LikelihoodDriver {
    /// Weight the pairs and check `initial` against the parameter layout.
    pub fn new(context: CalibrationContext, pairs: &[MuonPair], initial: &[f64]) -> Result<Self> {
        context.layout.check_len(initial.len())?;
        let mut driver = Self {
            context,
            pairs: Vec::new(),
            counts: EvalCounts::default(),
            buffer: Mutex::new(FrozenParams::from_slice(initial)),
            trace_evaluations: false,
        };
        driver.set_pairs(pairs);
        Ok(driver)
    }

    /// Log every evaluation at debug level.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace_evaluations = trace;
        self
    }

    /// Replace the pairs, recomputing weights from their uncorrected masses.
    pub fn set_pairs(&mut self, pairs: &[MuonPair]) {
        let resonances = self.context.resonances();
        self.pairs = pairs
            .iter()
            .map(|&pair| WeightedPair { pair, weight: resonances.compute_weight(pair.mass()) })
            .collect();
        tracing::info!(
            pairs = self.pairs.len(),
            weighted = self.weighted_len(),
            "likelihood pairs set"
        );
    }

    /// Apply a scale correction to the stored pairs and reweight them.
    pub fn apply_scale(&mut self, scale: ScaleFunction, par: &[f64]) -> Result<()> {
        if par.len() != scale.n_params() {
            return Err(Error::Configuration(format!(
                "scale function {} expects {} parameters, got {}",
                scale.id(),
                scale.n_params(),
                par.len()
            )));
        }
        let corrected: Vec<MuonPair> = self
            .pairs
            .iter()
            .map(|wp| MuonPair::new(scale.apply(&wp.pair.mu1, par), scale.apply(&wp.pair.mu2, par)))
            .collect();
        self.set_pairs(&corrected);
        Ok(())
    }

    /// Stored pairs with weights.
    pub fn pairs(&self) -> &[WeightedPair] {
        &self.pairs
    }

    /// Context the driver evaluates against.
    pub fn context(&self) -> &CalibrationContext {
        &self.context
    }

    /// Number of parameters expected by [`evaluate`](Self::evaluate).
    pub fn n_params(&self) -> usize {
        self.context.layout.len()
    }

    fn weighted_len(&self) -> usize {
        self.pairs.iter().filter(|p| p.weight > 0.0).count()
    }

    /// `Σ −2·ln(max(P, ε))·w` over pairs with non-zero weight.
    pub fn evaluate(&self, params: &[f64]) -> Result<f64> {
        let mut frozen =
            self.buffer.lock().map_err(|_| Error::Computation("parameter buffer poisoned".into()))?;
        frozen.refreeze(params);
        let ctx = &self.context;
        let (res_par, scale_par, bkg_par) = ctx.layout.split(frozen.as_slice())?;
        let functions = ctx.functions;
        let eps = ctx.min_probability;

        let (mut total, mut used, mut skipped, mut zero) = (0.0, 0usize, 0usize, 0usize);
        for wp in self.pairs.iter().filter(|p| p.weight > 0.0) {
            let mu1 = functions.scale.apply(&wp.pair.mu1, scale_par);
            let mu2 = functions.scale.apply(&wp.pair.mu2, scale_par);
            let corrected = MuonPair::new(mu1, mu2);
            let mass = corrected.mass();
            let sigma = mass_resolution(&mu1, &mu2, functions.resolution, res_par);
            if !(mass.is_finite() && mass > 0.0 && sigma.is_finite() && sigma > 0.0) {
                skipped += 1;
                continue;
            }
            let prob = ctx.mass_prob(mass, corrected.rapidity(), sigma, bkg_par);
            if !prob.is_finite() {
                skipped += 1;
                continue;
            }
            if prob > 0.0 {
                used += 1;
            } else {
                zero += 1;
            }
            total += -2.0 * prob.max(eps).ln() * wp.weight;
        }

        self.counts.evaluations.fetch_add(1, Ordering::Relaxed);
        self.counts.used.store(used, Ordering::Relaxed);
        self.counts.skipped.store(skipped, Ordering::Relaxed);
        self.counts.zero.store(zero, Ordering::Relaxed);
        if self.trace_evaluations {
            tracing::debug!(value = total, used, skipped, zero, "likelihood evaluated");
        }
        Ok(total)
    }

    /// Mean relative response `|Δm|/m + |Δσ|/σ` per unit change of each
    /// parameter at `params`, over up to 2000 weighted pairs.
    ///
    /// Background parameters move neither mass nor resolution and get zero.
    pub fn sensitivities(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.context.layout.check_len(params.len())?;
        let sample: Vec<&MuonPair> = self
            .pairs
            .iter()
            .filter(|p| p.weight > 0.0)
            .take(SENSITIVITY_SAMPLE)
            .map(|p| &p.pair)
            .collect();
        let base: Vec<Option<(f64, f64)>> = sample.iter().map(|pair| self.mass_and_sigma(pair, params)).collect();

        let mut work = params.to_vec();
        let mut out = Vec::with_capacity(params.len());
        for i in 0..params.len() {
            let h = 1e-6 * params[i].abs().max(1.0);
            work[i] = params[i] + h;
            let (mut sum, mut n) = (0.0, 0usize);
            for (pair, b) in sample.iter().zip(&base) {
                if let (Some((m0, s0)), Some((m1, s1))) = (*b, self.mass_and_sigma(pair, &work)) {
                    sum += ((m1 - m0).abs() / m0 + (s1 - s0).abs() / s0) / h;
                    n += 1;
                }
            }
            work[i] = params[i];
            out.push(if n > 0 { sum / n as f64 } else { 0.0 });
        }
        Ok(out)
    }

    fn mass_and_sigma(&self, pair: &MuonPair, params: &[f64]) -> Option<(f64, f64)> {
        let (res_par, scale_par, _) = self.context.layout.split(params).ok()?;
        let functions = self.context.functions;
        let mu1 = functions.scale.apply(&pair.mu1, scale_par);
        let mu2 = functions.scale.apply(&pair.mu2, scale_par);
        let mass = MuonPair::new(mu1, mu2).mass();
        let sigma = mass_resolution(&mu1, &mu2, functions.resolution, res_par);
        (mass.is_finite() && mass > 0.0 && sigma.is_finite() && sigma > 0.0).then_some((mass, sigma))
    }

    /// Minimizer callback form: `(npar, gradient, value, params, flag)`.
    ///
    /// The gradient buffer and flag are accepted and ignored.
    pub fn fcn(
        &self,
        npar: usize,
        _gradient: Option<&mut [f64]>,
        value: &mut f64,
        params: &[f64],
        _flag: i32,
    ) -> Result<()> {
        if npar > params.len() {
            return Err(Error::Configuration(format!(
                "callback declares {npar} parameters but received {}",
                params.len()
            )));
        }
        *value = self.evaluate(&params[..npar])?;
        Ok(())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> LikelihoodStats {
        LikelihoodStats {
            evaluations: self.counts.evaluations.load(Ordering::Relaxed),
            weighted_pairs: self.weighted_len(),
            used: self.counts.used.load(Ordering::Relaxed),
            skipped_degenerate: self.counts.skipped.load(Ordering::Relaxed),
            zero_probability: self.counts.zero.load(Ordering::Relaxed),
        }
    }

    /// Warn about pairs lost in the latest evaluation.
    pub fn log_summary(&self) {
        let s = self.stats();
        if s.skipped_degenerate > 0 || s.zero_probability > 0 {
            tracing::warn!(
                skipped = s.skipped_degenerate,
                zero_probability = s.zero_probability,
                used = s.used,
                "pairs without a usable probability"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineshape::CancelFlag;
    use msc_core::Muon;
    use std::f64::consts::PI;

    fn z_context(background: BackgroundFunction) -> CalibrationContext {
        let res = Resonances::new([true, false, false, false, false, false]);
        let tables = LineshapeTables::build(&res, 100, &CancelFlag::new()).unwrap();
        let functions = FunctionSelection {
            resolution: ResolutionFunction::Constant,
            scale: ScaleFunction::LinearPt,
            background,
        };
        CalibrationContext::new(tables, functions, DEFAULT_MIN_PROBABILITY).unwrap()
    }

    fn z_pairs() -> Vec<MuonPair> {
        vec![
            MuonPair::new(Muon::new(45.0, 0.1, 0.5, -1), Muon::new(45.0, -0.2, 0.5 + PI, 1)),
            MuonPair::new(Muon::new(44.0, 0.3, 1.5, -1), Muon::new(47.0, 0.4, 1.5 + PI, 1)),
            // Outside every window: weight 0.
            MuonPair::new(Muon::new(5.0, 0.1, 0.5, -1), Muon::new(5.0, -0.2, 0.5 + PI, 1)),
        ]
    }

    #[test]
    fn test_layout_blocks() {
        let functions = FunctionSelection {
            resolution: ResolutionFunction::LinearPtEta,
            scale: ScaleFunction::LinearPtAbsEta,
            background: BackgroundFunction::Exponential,
        };
        let layout = ParameterLayout::new(&functions);
        assert_eq!(layout.len(), 12);
        assert_eq!(layout.scale(), 7..10);
        assert_eq!(layout.background(), 10..12);
        let v: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let (r, s, b) = layout.split(&v).unwrap();
        assert_eq!((r.len(), s, b), (7, &[7.0, 8.0, 9.0][..], &[10.0, 11.0][..]));
        assert!(layout.split(&v[..11]).is_err());
        assert_eq!(layout.join(r, s, b).unwrap(), v);
    }

    #[test]
    fn test_length_mismatch_fails_at_construction() {
        let err = LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &[0.01, 0.0, 0.0])
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_weights_and_finite_value() {
        let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
        let driver = LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &init).unwrap();
        let w: Vec<f64> = driver.pairs().iter().map(|p| p.weight).collect();
        assert_eq!(w, vec![1.0, 1.0, 0.0]);
        let value = driver.evaluate(&init).unwrap();
        assert!(value.is_finite());
        let stats = driver.stats();
        assert_eq!(stats.evaluations, 1);
        assert_eq!(stats.used, 2);
        assert_eq!(stats.skipped_degenerate, 0);
    }

    #[test]
    fn test_miscalibrated_scale_costs_likelihood() {
        let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
        let driver = LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &init).unwrap();
        let nominal = driver.evaluate(&init).unwrap();
        let shifted = driver.evaluate(&[0.01, 1e-3, 1e-3, 1.1, 0.0]).unwrap();
        assert!(shifted > nominal, "{shifted} <= {nominal}");
    }

    #[test]
    fn test_repeated_evaluation_is_stable() {
        let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
        let driver = LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &init).unwrap();
        let first = driver.evaluate(&init).unwrap();
        assert!(driver.evaluate(&init[..4]).is_err());
        driver.evaluate(&[0.01, 1e-3, 1e-3, 1.05, 0.0]).unwrap();
        assert_eq!(driver.evaluate(&init).unwrap(), first);
    }

    #[test]
    fn test_sensitivities_follow_pt_lever_arm() {
        let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
        let driver = LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &init).unwrap();
        let s = driver.sensitivities(&init).unwrap();
        assert_eq!(s.len(), 5);
        // A common scale factor moves mass and resolution alike.
        assert!((s[3] - 2.0).abs() < 1e-3, "{s:?}");
        let ratio = s[4] / s[3];
        assert!(ratio > 40.0 && ratio < 50.0, "{ratio}");
        assert!(s[0] > 0.0);
        assert!(driver.sensitivities(&init[..4]).is_err());
    }

    #[test]
    fn test_zero_resolution_is_skipped() {
        let driver =
            LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &[0.0; 5]).unwrap();
        let value = driver.evaluate(&[0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();
        assert_eq!(value, 0.0);
        assert_eq!(driver.stats().skipped_degenerate, 2);
    }

    #[test]
    fn test_out_of_table_sigma_hits_floor() {
        let init = [2.0, 0.0, 0.0, 1.0, 0.0];
        let driver = LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &init).unwrap();
        let value = driver.evaluate(&init).unwrap();
        assert_eq!(driver.stats().zero_probability, 2);
        assert!((value - 2.0 * -2.0 * DEFAULT_MIN_PROBABILITY.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_background_fraction_mixes_densities() {
        let ctx = z_context(BackgroundFunction::Flat);
        let signal_only = ctx.mass_prob(91.0, 0.1, 2.0, &[0.0]);
        let background_only = ctx.mass_prob(91.0, 0.1, 2.0, &[1.0]);
        assert!(signal_only > 0.0);
        assert!((background_only - 1.0 / 40.0).abs() < 1e-12);
        let half = ctx.mass_prob(91.0, 0.1, 2.0, &[0.5]);
        assert!((half - 0.5 * (signal_only + background_only)).abs() < 1e-12);
    }

    #[test]
    fn test_fcn_writes_value() {
        let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
        let driver = LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &init).unwrap();
        let mut value = f64::NAN;
        driver.fcn(5, None, &mut value, &init, 0).unwrap();
        assert_eq!(value, driver.evaluate(&init).unwrap());
        assert!(driver.fcn(6, None, &mut value, &init, 0).is_err());
    }

    #[test]
    fn test_apply_scale_rewrites_pairs() {
        let init = [0.01, 1e-3, 1e-3, 1.0, 0.0];
        let mut driver =
            LikelihoodDriver::new(z_context(BackgroundFunction::None), &z_pairs(), &init).unwrap();
        let before = driver.pairs()[0].pair.mu1.pt;
        driver.apply_scale(ScaleFunction::LinearPt, &[1.01, 0.0]).unwrap();
        assert!((driver.pairs()[0].pair.mu1.pt - before * 1.01).abs() < 1e-12);
        assert!(driver.apply_scale(ScaleFunction::LinearPt, &[1.0]).is_err());
    }
}
