//! Optimization algorithms
//!
//! Thin wrapper around the argmin L-BFGS solver. Gradients are central finite
//! differences with a per-parameter step, since the likelihood is tabulated on
//! a grid and a step smaller than a table bin sees a flat objective. Callers
//! minimize in units of those steps through [`Preconditioned`].

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use msc_calib::{LikelihoodDriver, MinimizerSpec};
use msc_core::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Configuration for the L-BFGS optimizer
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for gradient norm
    pub tol: f64,
    /// Number of corrections to approximate inverse Hessian
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::from(&MinimizerSpec::default())
    }
}

impl From<&MinimizerSpec> for OptimizerConfig {
    fn from(spec: &MinimizerSpec) -> Self {
        Self { max_iter: spec.max_iter, tol: spec.tol, m: spec.m }
    }
}

/// Result of optimization
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    /// Best-fit parameters
    pub parameters: Vec<f64>,
    /// Function value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status
    pub converged: bool,
    /// Termination message
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// Objective function trait for optimization
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate function at given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Finite-difference step for parameter `i` at value `x`.
    fn step(&self, _i: usize, x: f64) -> f64 {
        1e-8 * x.abs().max(1.0)
    }

    /// Compute gradient at given parameters (central differences if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; params.len()];
        let mut work = params.to_vec();
        for i in 0..params.len() {
            let h = self.step(i, params[i]);
            work[i] = params[i] + h;
            let f_plus = self.eval(&work)?;
            work[i] = params[i] - h;
            let f_minus = self.eval(&work)?;
            work[i] = params[i];
            grad[i] = (f_plus - f_minus) / (2.0 * h);
        }
        Ok(grad)
    }
}

impl ObjectiveFunction for LikelihoodDriver {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.evaluate(params)
    }
}

/// Restriction of an objective to a subset of its parameters; the others are
/// held at `base`.
pub struct SubsetObjective<'a> {
    inner: &'a dyn ObjectiveFunction,
    base: Vec<f64>,
    free: Vec<usize>,
    steps: Vec<f64>,
}

impl<'a> SubsetObjective<'a> {
    /// `steps` holds one finite-difference step per entry of `base`.
    pub fn new(inner: &'a dyn ObjectiveFunction, base: &[f64], free: Vec<usize>, steps: &[f64]) -> Result<Self> {
        if steps.len() != base.len() {
            return Err(Error::Validation(format!(
                "step and parameter length mismatch: {} != {}",
                steps.len(),
                base.len()
            )));
        }
        if let Some(&bad) = free.iter().find(|&&i| i >= base.len()) {
            return Err(Error::Validation(format!("free index {bad} out of range for {} parameters", base.len())));
        }
        let steps = free.iter().map(|&i| steps[i]).collect();
        Ok(Self { inner, base: base.to_vec(), free, steps })
    }

    /// Values of the free parameters in `base`.
    pub fn initial(&self) -> Vec<f64> {
        self.free.iter().map(|&i| self.base[i]).collect()
    }

    /// Full vector with the free entries replaced by `sub`.
    pub fn expand(&self, sub: &[f64]) -> Vec<f64> {
        let mut full = self.base.clone();
        for (&i, &v) in self.free.iter().zip(sub) {
            full[i] = v;
        }
        full
    }

    /// Indices of the free parameters.
    pub fn free(&self) -> &[usize] {
        &self.free
    }
}

impl ObjectiveFunction for SubsetObjective<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.inner.eval(&self.expand(params))
    }

    fn step(&self, i: usize, x: f64) -> f64 {
        self.steps.get(i).copied().unwrap_or_else(|| 1e-8 * x.abs().max(1.0))
    }
}

/// Change of variables `x = origin + scale ⊙ u`, with `scale[i]` the inner
/// objective's finite-difference step at `origin`.
///
/// One unit of `u` is one step of the corresponding parameter, so a pt-slope
/// and a constant scale factor see gradients of comparable size.
pub struct Preconditioned<'a> {
    inner: &'a dyn ObjectiveFunction,
    origin: Vec<f64>,
    scale: Vec<f64>,
}

impl<'a> Preconditioned<'a> {
    /// Precondition `inner` around `origin`.
    pub fn new(inner: &'a dyn ObjectiveFunction, origin: &[f64]) -> Result<Self> {
        let scale: Vec<f64> = origin.iter().enumerate().map(|(i, &x)| inner.step(i, x)).collect();
        if let Some(i) = scale.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(Error::Validation(format!("non-positive step {} for parameter {i}", scale[i])));
        }
        Ok(Self { inner, origin: origin.to_vec(), scale })
    }

    /// Starting point in step units.
    pub fn initial(&self) -> Vec<f64> {
        vec![0.0; self.origin.len()]
    }

    /// Parameters of the inner objective at `u`.
    pub fn to_inner(&self, u: &[f64]) -> Vec<f64> {
        self.origin.iter().zip(&self.scale).zip(u).map(|((&x0, &s), &ui)| x0 + s * ui).collect()
    }
}

impl ObjectiveFunction for Preconditioned<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        self.inner.eval(&self.to_inner(params))
    }

    fn step(&self, _i: usize, _x: f64) -> f64 {
        1.0
    }
}

/// True when a minimizer left `start` untouched although the projected
/// gradient there exceeds `tol`.
pub fn stalled_at_start(
    objective: &dyn ObjectiveFunction,
    start: &[f64],
    result: &[f64],
    bounds: &[(f64, f64)],
    tol: f64,
) -> Result<bool> {
    if start != result {
        return Ok(false);
    }
    let mut grad = objective.gradient(start)?;
    project_gradient(&mut grad, start, bounds);
    Ok(grad.iter().any(|g| g.abs() > tol))
}

/// At a bound, drop gradient components pointing outside.
fn project_gradient(grad: &mut [f64], params: &[f64], bounds: &[(f64, f64)]) {
    const EPS: f64 = 1e-12;
    for ((g, &x), &(lo, hi)) in grad.iter_mut().zip(params).zip(bounds) {
        if (x <= lo + EPS && *g > 0.0) || (x >= hi - EPS && *g < 0.0) {
            *g = 0.0;
        }
    }
}

/// Wrapper to make ObjectiveFunction compatible with argmin
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<FuncCounts>,
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
    best: Mutex<Option<(f64, Vec<f64>)>>,
}

impl FuncCounts {
    fn record(&self, value: f64, params: &[f64]) {
        if !value.is_finite() {
            return;
        }
        if let Ok(mut best) = self.best.lock() {
            if best.as_ref().is_none_or(|(b, _)| value < *b) {
                *best = Some((value, params.to_vec()));
            }
        }
    }

    fn take_best(&self) -> Option<(f64, Vec<f64>)> {
        self.best.lock().ok().and_then(|mut b| b.take())
    }
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let value = self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        self.counts.record(value, &clamped);
        Ok(value)
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g =
            self.objective.gradient(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        project_gradient(&mut g, &clamped, self.bounds);
        Ok(g)
    }
}

/// L-BFGS optimizer with optional box constraints
#[derive(Debug, Clone, Default)]
pub struct LbfgsOptimizer {
    config: OptimizerConfig,
}

impl LbfgsOptimizer {
    /// Create new optimizer with given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimize without bounds.
    pub fn minimize_unbounded(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
    ) -> Result<OptimizationResult> {
        let bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); init_params.len()];
        self.minimize(objective, init_params, &bounds)
    }

    /// Minimize objective function with bounds `(lower, upper)` per parameter.
    ///
    /// If the solver aborts (typically a line search on a flat stretch of the
    /// objective), the best point evaluated so far is returned unconverged. A
    /// run that ends on its starting point with a non-zero gradient there is
    /// reported unconverged too, whatever the solver's termination reason.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }

        let init_clamped = clamp_params(init_params, bounds);
        let counts = Arc::new(FuncCounts::default());
        let problem = ArgminProblem { objective, bounds, counts: counts.clone() };

        // argmin's default cost tolerance is ~EPS; a -2 ln L summed over
        // thousands of pairs never gets there.
        let tol_cost = if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}")))?;

        let res = match Executor::new(problem, solver)
            .configure(|state| state.param(init_clamped.clone()).max_iters(self.config.max_iter))
            .run()
        {
            Ok(res) => res,
            Err(e) => {
                let (fval, parameters) = counts
                    .take_best()
                    .ok_or_else(|| Error::Computation(format!("Optimization failed: {e}")))?;
                tracing::debug!(error = %e, fval, "solver aborted, returning best evaluated point");
                return Ok(OptimizationResult {
                    parameters,
                    fval,
                    n_iter: 0,
                    n_fev: counts.cost.load(Ordering::Relaxed),
                    n_gev: counts.grad.load(Ordering::Relaxed),
                    converged: false,
                    message: format!("aborted: {e}"),
                });
            }
        };

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?;
        let termination = state.get_termination_status();
        let mut converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );
        let mut message = termination.to_string();
        let parameters = clamp_params(best, bounds);
        if converged && stalled_at_start(objective, &init_clamped, &parameters, bounds, self.config.tol)? {
            tracing::debug!(%message, "solver stopped on its starting point with a non-zero gradient");
            converged = false;
            message = format!("no progress from the starting point ({message})");
        }

        Ok(OptimizationResult {
            parameters,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            converged,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)^2 + (y - 3)^2
    struct QuadraticFunction;

    impl ObjectiveFunction for QuadraticFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 2.0).powi(2) + (params[1] - 3.0).powi(2))
        }
    }

    #[test]
    fn test_optimizer_quadratic() {
        let optimizer = LbfgsOptimizer::new(OptimizerConfig { max_iter: 100, tol: 1e-6, m: 10 });
        let result = optimizer.minimize_unbounded(&QuadraticFunction, &[0.0, 0.0]).unwrap();

        assert!(result.converged, "{}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
        assert!(result.n_fev > 0 && result.n_gev > 0);
    }

    #[test]
    fn test_optimizer_with_bounds() {
        let optimizer = LbfgsOptimizer::default();
        let result =
            optimizer.minimize(&QuadraticFunction, &[4.0, 1.5], &[(3.0, 5.0), (1.0, 2.0)]).unwrap();
        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_bounds_length_mismatch() {
        let err = LbfgsOptimizer::default().minimize(&QuadraticFunction, &[0.0, 0.0], &[(0.0, 1.0)]);
        assert!(matches!(err, Err(Error::Validation(_))));
    }

    #[test]
    fn test_subset_objective_holds_fixed_entries() {
        let base = [0.0, 10.0];
        let sub = SubsetObjective::new(&QuadraticFunction, &base, vec![0], &[1e-3, 1e-3]).unwrap();
        assert_eq!(sub.initial(), vec![0.0]);
        assert_eq!(sub.expand(&[1.5]), vec![1.5, 10.0]);

        let result = LbfgsOptimizer::default().minimize_unbounded(&sub, &sub.initial()).unwrap();
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 49.0, epsilon = 1e-6);

        assert!(SubsetObjective::new(&QuadraticFunction, &base, vec![2], &[1e-3, 1e-3]).is_err());
        assert!(SubsetObjective::new(&QuadraticFunction, &base, vec![0], &[1e-3]).is_err());
    }

    #[test]
    fn test_abort_returns_best_evaluated_point() {
        struct FailsAfterInit(AtomicUsize);
        impl ObjectiveFunction for FailsAfterInit {
            fn eval(&self, params: &[f64]) -> Result<f64> {
                if self.0.fetch_add(1, Ordering::Relaxed) > 0 {
                    return Err(Error::Computation("flat".into()));
                }
                Ok(params[0] * params[0])
            }
        }
        let objective = FailsAfterInit(AtomicUsize::new(0));
        let result = LbfgsOptimizer::default().minimize_unbounded(&objective, &[3.0]).unwrap();
        assert!(!result.converged);
        assert_eq!(result.parameters, vec![3.0]);
        assert_eq!(result.fval, 9.0);
    }

    // Two constraints on a scale factor at pt 45 and pt 30.
    struct LinearScale;

    impl ObjectiveFunction for LinearScale {
        fn eval(&self, p: &[f64]) -> Result<f64> {
            Ok(1e6 * ((p[0] + 45.0 * p[1] - 0.98).powi(2) + (p[0] + 30.0 * p[1] - 0.99).powi(2)))
        }
    }

    #[test]
    fn test_preconditioned_recovers_slope_and_offset() {
        let sub = SubsetObjective::new(&LinearScale, &[1.0, 0.0], vec![0, 1], &[1e-3, 2e-5]).unwrap();
        let pre = Preconditioned::new(&sub, &sub.initial()).unwrap();
        let moved = pre.to_inner(&[1.0, -2.0]);
        assert_relative_eq!(moved[0], 1.001, epsilon = 1e-12);
        assert_relative_eq!(moved[1], -4e-5, epsilon = 1e-15);

        let result = LbfgsOptimizer::default().minimize_unbounded(&pre, &pre.initial()).unwrap();
        let x = pre.to_inner(&result.parameters);
        assert_relative_eq!(x[0], 1.01, epsilon = 1e-5);
        assert_relative_eq!(x[1], -0.01 / 15.0, epsilon = 1e-7);
        assert!(result.fval < 1e-6, "{result}");
    }

    #[test]
    fn test_preconditioned_rejects_bad_step() {
        let sub = SubsetObjective::new(&QuadraticFunction, &[0.0, 0.0], vec![0, 1], &[1e-3, 0.0]).unwrap();
        assert!(matches!(Preconditioned::new(&sub, &sub.initial()), Err(Error::Validation(_))));
    }

    #[test]
    fn test_stalled_at_start() {
        let free = [(f64::NEG_INFINITY, f64::INFINITY); 2];
        assert!(stalled_at_start(&QuadraticFunction, &[0.0, 0.0], &[0.0, 0.0], &free, 1e-6).unwrap());
        assert!(!stalled_at_start(&QuadraticFunction, &[0.0, 0.0], &[1.0, 0.0], &free, 1e-6).unwrap());
        // Already at the minimum.
        assert!(!stalled_at_start(&QuadraticFunction, &[2.0, 3.0], &[2.0, 3.0], &free, 1e-6).unwrap());
        // Pinned at bounds that the gradient pushes against.
        let pinned = [(-1.0, 0.0), (-1.0, 0.0)];
        assert!(!stalled_at_start(&QuadraticFunction, &[0.0, 0.0], &[0.0, 0.0], &pinned, 1e-6).unwrap());
    }

    #[test]
    fn test_custom_step_gradient() {
        let sub = SubsetObjective::new(&QuadraticFunction, &[0.0, 0.0], vec![0, 1], &[0.5, 0.25]).unwrap();
        // Central differences are exact on a quadratic for any step.
        let g = sub.gradient(&[1.0, 1.0]).unwrap();
        assert_relative_eq!(g[0], -2.0, epsilon = 1e-12);
        assert_relative_eq!(g[1], -4.0, epsilon = 1e-12);
    }
}
