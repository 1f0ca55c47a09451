//! Iterative calibration fit.
//!
//! One run: build the lineshape tables, bias/smear the inputs, then for each
//! iteration minimize `-2 ln L` in release stages, estimate uncertainties and
//! apply the fitted scale to the stored pairs before the next iteration.

use crate::hessian::uncertainties;
use crate::optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizerConfig, Preconditioned, SubsetObjective};
use msc_calib::{
    CalibrationContext, CancelFlag, FunctionFamily, LikelihoodDriver, LikelihoodStats, LineshapeTables,
    ParameterBlock, ParameterControl, ParameterSet, RunConfig,
};
use msc_core::{Error, MuonPair, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

/// One release stage of an iteration.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    /// Highest release order floating in this stage
    pub order: u32,
    /// Indices of the floating parameters
    pub free: Vec<usize>,
    /// Objective value after the stage
    pub fval: f64,
    /// Minimizer iterations
    pub n_iter: u64,
    /// Objective evaluations
    pub n_fev: usize,
    /// Whether the minimizer reported convergence
    pub converged: bool,
    /// Termination message
    pub message: String,
}

/// Outcome of one fit iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationResult {
    /// Iteration index
    pub iteration: u32,
    /// Objective at the starting point
    pub initial_nll: f64,
    /// Objective at the fitted point
    pub nll: f64,
    /// Fitted flat vector `[resolution | scale | background]`
    pub parameters: Vec<f64>,
    /// Uncertainties (zero for fixed parameters or with `speedup`)
    pub errors: Vec<f64>,
    /// Release stages in order
    pub stages: Vec<StageResult>,
    /// Likelihood counters at the fitted point
    pub stats: LikelihoodStats,
}

/// Outcome of a full calibration run.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationResult {
    /// Input pairs
    pub n_pairs: usize,
    /// Per-iteration results
    pub iterations: Vec<IterationResult>,
    /// Fitted scale blocks, one per iteration
    pub scale: ParameterSet,
    /// Fitted resolution blocks, one per iteration
    pub resolution: ParameterSet,
    /// Fitted background blocks, one per iteration
    pub background: ParameterSet,
    /// Wall time of the run
    pub elapsed_ms: u64,
}

impl CalibrationResult {
    /// Flat parameters of the last iteration.
    pub fn final_parameters(&self) -> Option<&[f64]> {
        self.iterations.last().map(|it| it.parameters.as_slice())
    }

    /// Write `scale.txt`, `resolution.txt` and `background.txt` into `dir`.
    pub fn write_parameter_files(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        for set in [&self.scale, &self.resolution, &self.background] {
            set.save_text(dir.join(format!("{}.txt", set.family.name())))?;
        }
        Ok(())
    }
}

/// Minimize `objective` from `init` in stages of increasing release order.
///
/// Stage `k` floats every non-fixed parameter with `order <= k`, minimizing in
/// units of each parameter's step. A control without a step uses the
/// objective's own [`ObjectiveFunction::step`]. A stage whose minimizer fails
/// keeps the previous point and is reported unconverged.
pub fn minimize_staged(
    optimizer: &LbfgsOptimizer,
    objective: &dyn ObjectiveFunction,
    init: &[f64],
    controls: &[ParameterControl],
    cancel: &CancelFlag,
) -> Result<(Vec<f64>, Vec<StageResult>)> {
    if controls.len() != init.len() {
        return Err(Error::Validation(format!(
            "control and parameter length mismatch: {} != {}",
            controls.len(),
            init.len()
        )));
    }
    let steps = control_steps(objective, init, controls);
    let mut orders: Vec<u32> = controls.iter().filter(|c| !c.fixed).map(|c| c.order).collect();
    orders.sort_unstable();
    orders.dedup();

    let mut current = init.to_vec();
    let mut stages = Vec::with_capacity(orders.len());
    for order in orders {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("fit cancelled before release stage {order}")));
        }
        let free: Vec<usize> =
            (0..controls.len()).filter(|&i| !controls[i].fixed && controls[i].order <= order).collect();
        let sub = SubsetObjective::new(objective, &current, free.clone(), &steps)?;
        let pre = Preconditioned::new(&sub, &sub.initial())?;
        let stage = match optimizer.minimize_unbounded(&pre, &pre.initial()) {
            Ok(res) => {
                current = sub.expand(&pre.to_inner(&res.parameters));
                StageResult {
                    order,
                    free,
                    fval: res.fval,
                    n_iter: res.n_iter,
                    n_fev: res.n_fev,
                    converged: res.converged,
                    message: res.message,
                }
            }
            Err(Error::Computation(message)) => {
                tracing::warn!(order, %message, "release stage failed, keeping previous point");
                StageResult {
                    order,
                    free,
                    fval: objective.eval(&current)?,
                    n_iter: 0,
                    n_fev: 0,
                    converged: false,
                    message,
                }
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(order, fval = stage.fval, converged = stage.converged, "release stage done");
        stages.push(stage);
    }
    Ok((current, stages))
}

/// Calibration fit driven by a [`RunConfig`].
#[derive(Debug, Clone)]
pub struct CalibrationFit {
    config: RunConfig,
    cancel: CancelFlag,
}

impl CalibrationFit {
    /// Validate the configuration.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, cancel: CancelFlag::new() })
    }

    /// Share a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Build the lineshape tables of the selected resonances.
    pub fn build_tables(&self) -> Result<LineshapeTables> {
        LineshapeTables::build(&self.config.resonances()?, self.config.table_bins, &self.cancel)
    }

    /// Build tables and fit.
    pub fn run(&self, pairs: &[MuonPair]) -> Result<CalibrationResult> {
        let tables = self.build_tables()?;
        self.run_with_tables(tables, pairs)
    }

    /// Fit with prebuilt tables.
    pub fn run_with_tables(&self, tables: LineshapeTables, pairs: &[MuonPair]) -> Result<CalibrationResult> {
        let start = Instant::now();
        let config = &self.config;
        let functions = config.function_selection()?;
        let inputs = config.input_corrections()?.apply_all(pairs);
        let context = CalibrationContext::new(tables, functions, config.min_probability)?;
        let layout = *context.layout();
        let initial = config.initial_parameters()?;
        let mut driver = LikelihoodDriver::new(context, &inputs, &initial)?.with_trace(config.debug);
        let optimizer = LbfgsOptimizer::new(OptimizerConfig::from(&config.minimizer));

        let mut scale_set = ParameterSet::new(FunctionFamily::Scale);
        let mut resolution_set = ParameterSet::new(FunctionFamily::Resolution);
        let mut background_set = ParameterSet::new(FunctionFamily::Background);
        let mut iterations = Vec::with_capacity(config.iterations as usize);
        let mut params = initial.clone();

        for iteration in 0..config.iterations {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled(format!("fit cancelled before iteration {iteration}")));
            }
            // Earlier scale fits are already applied to the pairs.
            params[layout.scale()].copy_from_slice(&initial[layout.scale()]);
            let controls = default_steps(
                config.parameter_controls(iteration),
                &driver,
                &params,
                config.minimizer.gradient_step,
            )?;
            let initial_nll = driver.evaluate(&params)?;
            let (fitted, stages) = minimize_staged(&optimizer, &driver, &params, &controls, &self.cancel)?;

            let nll = driver.evaluate(&fitted)?;
            driver.log_summary();
            let stats = driver.stats();
            let errors = if config.speedup { vec![0.0; fitted.len()] } else { fit_errors(&driver, &fitted, &controls) };
            tracing::info!(
                iteration,
                initial_nll,
                nll,
                stages = stages.len(),
                used = stats.used,
                "calibration iteration done"
            );

            for (set, range, id) in [
                (&mut resolution_set, layout.resolution(), functions.resolution.id()),
                (&mut scale_set, layout.scale(), functions.scale.id()),
                (&mut background_set, layout.background(), functions.background.id()),
            ] {
                set.push(ParameterBlock::with_errors(
                    iteration,
                    id,
                    fitted[range.clone()].to_vec(),
                    errors[range].to_vec(),
                ))?;
            }

            driver.apply_scale(functions.scale, &fitted[layout.scale()])?;
            params.clone_from(&fitted);
            iterations.push(IterationResult { iteration, initial_nll, nll, parameters: fitted, errors, stages, stats });
        }

        Ok(CalibrationResult {
            n_pairs: pairs.len(),
            iterations,
            scale: scale_set,
            resolution: resolution_set,
            background: background_set,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Fill missing steps with `relative / sensitivity`, so that one step moves the
/// pair mass and mass resolution by about `relative`. Parameters the pairs do
/// not respond to fall back to `relative · max(|x|, 1)`.
fn default_steps(
    mut controls: Vec<ParameterControl>,
    driver: &LikelihoodDriver,
    params: &[f64],
    relative: f64,
) -> Result<Vec<ParameterControl>> {
    if controls.iter().all(|c| c.fixed || c.step.is_some()) {
        return Ok(controls);
    }
    let sensitivities = driver.sensitivities(params)?;
    for ((control, &sensitivity), &x) in controls.iter_mut().zip(&sensitivities).zip(params) {
        if control.step.is_none() {
            let step = if sensitivity.is_finite() && sensitivity > 0.0 {
                relative / sensitivity
            } else {
                relative * x.abs().max(1.0)
            };
            control.step = Some(step);
        }
    }
    tracing::debug!(
        steps = ?controls.iter().map(|c| c.step).collect::<Vec<_>>(),
        "finite-difference steps"
    );
    Ok(controls)
}

fn control_steps(objective: &dyn ObjectiveFunction, params: &[f64], controls: &[ParameterControl]) -> Vec<f64> {
    controls
        .iter()
        .zip(params)
        .enumerate()
        .map(|(i, (c, &x))| c.step.unwrap_or_else(|| objective.step(i, x)))
        .collect()
}

/// Hessian errors over the non-fixed parameters; zero elsewhere or on failure.
fn fit_errors(objective: &dyn ObjectiveFunction, params: &[f64], controls: &[ParameterControl]) -> Vec<f64> {
    let mut errors = vec![0.0; params.len()];
    let free: Vec<usize> = (0..controls.len()).filter(|&i| !controls[i].fixed).collect();
    if free.is_empty() {
        return errors;
    }
    let steps = control_steps(objective, params, controls);
    let sub_steps: Vec<f64> = free.iter().map(|&i| steps[i]).collect();
    let result = SubsetObjective::new(objective, params, free.clone(), &steps)
        .and_then(|sub| uncertainties(&sub, &sub.initial(), &sub_steps));
    match result {
        Ok(u) => {
            for (&i, e) in free.iter().zip(u.errors) {
                errors[i] = e;
            }
        }
        Err(e) => tracing::warn!(error = %e, "uncertainty estimation failed"),
    }
    errors
}
