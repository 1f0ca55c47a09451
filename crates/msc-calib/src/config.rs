//! Run configuration (`muscle_run_v0`), read from YAML or JSON.

use crate::corrector::InputCorrections;
use crate::functions::{BackgroundFunction, ResolutionFunction, ScaleFunction, SmearFunction};
use crate::lineshape::DEFAULT_TABLE_BINS;
use crate::likelihood::{DEFAULT_MIN_PROBABILITY, FunctionSelection, ParameterLayout};
use crate::resonance::{N_RESONANCES, Resonances};
use msc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Schema tag accepted by [`RunConfig::from_path`].
pub const RUN_CONFIG_V0: &str = "muscle_run_v0";

/// Largest accepted lineshape table size per axis.
pub const MAX_TABLE_BINS: usize = 5000;

/// Function applied once to inputs (bias or smear).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSpec {
    /// Function type code.
    #[serde(rename = "type")]
    pub function_type: u32,
    /// Parameters of the function.
    #[serde(default)]
    pub parameters: Vec<f64>,
}

/// Fitted function with its initial values and fit controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FitFunctionSpec {
    /// Function type code.
    #[serde(rename = "type")]
    pub function_type: u32,
    /// Initial parameter values.
    #[serde(default)]
    pub parameters: Vec<f64>,
    /// Parameters held at their current value (empty: all free).
    #[serde(default)]
    pub fix: Vec<bool>,
    /// Release stage per parameter (empty: all stage 0).
    #[serde(default)]
    pub order: Vec<u32>,
    /// Whether this family floats in iteration `i` (empty or short: floats).
    #[serde(default)]
    pub fit_per_iteration: Vec<bool>,
    /// Finite-difference step per parameter (empty: derived from the data,
    /// see [`MinimizerSpec::gradient_step`]).
    #[serde(default)]
    pub steps: Vec<f64>,
}

impl FitFunctionSpec {
    /// True if the family floats in `iteration`.
    pub fn fits_in(&self, iteration: u32) -> bool {
        self.fit_per_iteration.get(iteration as usize).copied().unwrap_or(true)
    }

    fn check(&self, family: &str, n_params: usize) -> Result<()> {
        if self.parameters.len() != n_params {
            return Err(Error::Configuration(format!(
                "{family} function {} expects {n_params} parameters, got {}",
                self.function_type,
                self.parameters.len()
            )));
        }
        for (what, len) in [("fix", self.fix.len()), ("order", self.order.len()), ("steps", self.steps.len())] {
            if len != 0 && len != n_params {
                return Err(Error::Configuration(format!(
                    "{family}.{what} has {len} entries, expected 0 or {n_params}"
                )));
            }
        }
        if self.steps.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(Error::Configuration(format!("{family}.steps must be positive")));
        }
        Ok(())
    }
}

/// Minimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinimizerSpec {
    /// Iteration cap per release stage.
    pub max_iter: u64,
    /// Gradient-norm tolerance.
    pub tol: f64,
    /// L-BFGS history size.
    pub m: usize,
    /// Relative change of the pair mass and mass resolution that a default
    /// finite-difference step produces. A parameter without an explicit step
    /// gets `gradient_step / sensitivity`.
    pub gradient_step: f64,
}

impl Default for MinimizerSpec {
    fn default() -> Self {
        Self { max_iter: 200, tol: 1e-6, m: 10, gradient_step: 1e-3 }
    }
}

/// Controls of one entry of the flat parameter vector for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterControl {
    /// Held constant in this iteration.
    pub fixed: bool,
    /// Release stage.
    pub order: u32,
    /// Finite-difference step; `None` leaves it to the data-driven default.
    pub step: Option<f64>,
}

fn default_resonances() -> [bool; N_RESONANCES] {
    [true, false, false, false, false, false]
}

fn default_factor() -> f64 {
    1.0
}

fn default_table_bins() -> usize {
    DEFAULT_TABLE_BINS
}

fn default_iterations() -> u32 {
    1
}

fn default_min_probability() -> f64 {
    DEFAULT_MIN_PROBABILITY
}

/// Full run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Must equal [`RUN_CONFIG_V0`].
    pub schema_version: String,
    /// Selected resonances: Z, Υ(3S), Υ(2S), Υ(1S), ψ(2S), J/ψ.
    #[serde(default = "default_resonances")]
    pub resonances: [bool; N_RESONANCES],
    /// Scale of the window half-widths below the nominal mass.
    #[serde(default = "default_factor")]
    pub left_window_factor: f64,
    /// Scale of the window half-widths above the nominal mass.
    #[serde(default = "default_factor")]
    pub right_window_factor: f64,
    /// Lineshape table bins per axis.
    #[serde(default = "default_table_bins")]
    pub table_bins: usize,
    /// Bias applied to inputs before fitting.
    #[serde(default)]
    pub bias: FunctionSpec,
    /// Smearing applied to inputs before fitting.
    #[serde(default)]
    pub smear: FunctionSpec,
    /// Momentum scale function.
    pub scale: FitFunctionSpec,
    /// Resolution function.
    pub resolution: FitFunctionSpec,
    /// Background function.
    #[serde(default)]
    pub background: FitFunctionSpec,
    /// Number of fit iterations.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Minimizer settings.
    #[serde(default)]
    pub minimizer: MinimizerSpec,
    /// Seed of the smearing draws.
    #[serde(default)]
    pub seed: u64,
    /// Skip post-fit uncertainty estimation.
    #[serde(default)]
    pub speedup: bool,
    /// Log every likelihood evaluation.
    #[serde(default)]
    pub debug: bool,
    /// Floor of the per-pair probability inside the logarithm.
    #[serde(default = "default_min_probability")]
    pub min_probability: f64,
}

impl RunConfig {
    /// Read, check the schema tag and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let config = Self::from_slice(&bytes)?;
        tracing::info!(path = %path.display(), iterations = config.iterations, "run configuration loaded");
        Ok(config)
    }

    /// Parse YAML or JSON bytes, check the schema tag and validate.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let config: RunConfig = serde_yaml_ng::from_slice(bytes)?;
        if config.schema_version != RUN_CONFIG_V0 {
            return Err(Error::Configuration(format!(
                "unsupported schema_version: {} (expected {RUN_CONFIG_V0})",
                config.schema_version
            )));
        }
        config.validate()?;
        Ok(config)
    }

    /// Check every function id, parameter count and numeric setting.
    pub fn validate(&self) -> Result<()> {
        self.resonances()?;
        if !self.resonances.iter().any(|&s| s) {
            return Err(Error::Configuration("no resonance selected".into()));
        }
        if self.table_bins == 0 || self.table_bins > MAX_TABLE_BINS {
            return Err(Error::Configuration(format!(
                "table_bins must be in 1..={MAX_TABLE_BINS}, got {}",
                self.table_bins
            )));
        }
        if self.iterations == 0 {
            return Err(Error::Configuration("iterations must be at least 1".into()));
        }
        if !(self.min_probability > 0.0 && self.min_probability < 1.0) {
            return Err(Error::Configuration(format!(
                "min_probability must be in (0, 1), got {}",
                self.min_probability
            )));
        }
        let m = &self.minimizer;
        if m.max_iter == 0 || m.m == 0 || !(m.tol > 0.0) || !(m.gradient_step > 0.0) {
            return Err(Error::Configuration(
                "minimizer needs max_iter > 0, m > 0, tol > 0 and gradient_step > 0".into(),
            ));
        }

        let functions = self.function_selection()?;
        self.resolution.check("resolution", functions.resolution.n_params())?;
        self.scale.check("scale", functions.scale.n_params())?;
        self.background.check("background", functions.background.n_params())?;
        self.input_corrections()?;
        Ok(())
    }

    /// Resonance set with selection and window factors.
    pub fn resonances(&self) -> Result<Resonances> {
        Resonances::new(self.resonances).with_window_factors(self.left_window_factor, self.right_window_factor)
    }

    /// Fitted functions.
    pub fn function_selection(&self) -> Result<FunctionSelection> {
        Ok(FunctionSelection {
            resolution: ResolutionFunction::from_id(self.resolution.function_type)?,
            scale: ScaleFunction::from_id(self.scale.function_type)?,
            background: BackgroundFunction::from_id(self.background.function_type)?,
        })
    }

    /// Bias and smearing of the inputs.
    pub fn input_corrections(&self) -> Result<InputCorrections> {
        InputCorrections::new(
            (SmearFunction::from_id(self.smear.function_type)?, self.smear.parameters.clone()),
            (ScaleFunction::from_id(self.bias.function_type)?, self.bias.parameters.clone()),
            self.seed,
        )
    }

    /// Initial flat vector `[resolution | scale | background]`.
    pub fn initial_parameters(&self) -> Result<Vec<f64>> {
        let layout = ParameterLayout::new(&self.function_selection()?);
        layout.join(&self.resolution.parameters, &self.scale.parameters, &self.background.parameters)
    }

    /// Per-entry controls of the flat vector for `iteration`.
    ///
    /// A family that does not float in `iteration` has all its entries fixed.
    pub fn parameter_controls(&self, iteration: u32) -> Vec<ParameterControl> {
        [&self.resolution, &self.scale, &self.background]
            .into_iter()
            .flat_map(|spec| {
                let floats = spec.fits_in(iteration);
                (0..spec.parameters.len()).map(move |i| ParameterControl {
                    fixed: !floats || spec.fix.get(i).copied().unwrap_or(false),
                    order: spec.order.get(i).copied().unwrap_or(0),
                    step: spec.steps.get(i).copied(),
                })
            })
            .collect()
    }
}
