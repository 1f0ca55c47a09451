//! Post-fit uncertainties from a numerical Hessian of `-2 ln L`.
//!
//! With the objective `-2 ln L`, the covariance of the estimates is `2·H⁻¹`.

use crate::optimizer::ObjectiveFunction;
use msc_core::{Error, Result};
use nalgebra::DMatrix;
use serde::Serialize;

/// Parameter uncertainties and, when the Hessian could be inverted, the covariance.
#[derive(Debug, Clone, Serialize)]
pub struct Uncertainties {
    /// One standard deviation per parameter.
    pub errors: Vec<f64>,
    /// Row-major covariance matrix.
    pub covariance: Option<Vec<Vec<f64>>>,
    /// Errors come from the Hessian diagonal alone.
    pub diagonal_only: bool,
}

/// Symmetric Hessian by central differences of objective values, with step
/// `steps[i]` along parameter `i`.
pub fn numerical_hessian(
    objective: &dyn ObjectiveFunction,
    params: &[f64],
    steps: &[f64],
) -> Result<DMatrix<f64>> {
    let n = params.len();
    if steps.len() != n {
        return Err(Error::Validation(format!("step and parameter length mismatch: {} != {n}", steps.len())));
    }
    let f0 = objective.eval(params)?;
    let mut work = params.to_vec();
    let mut at = |shifts: &[(usize, f64)]| -> Result<f64> {
        for &(i, d) in shifts {
            work[i] += d;
        }
        let value = objective.eval(&work);
        work.copy_from_slice(params);
        value
    };

    let mut hessian = DMatrix::zeros(n, n);
    for i in 0..n {
        let hi = steps[i];
        let plus = at(&[(i, hi)])?;
        let minus = at(&[(i, -hi)])?;
        hessian[(i, i)] = (plus - 2.0 * f0 + minus) / (hi * hi);
        for j in 0..i {
            let hj = steps[j];
            let pp = at(&[(i, hi), (j, hj)])?;
            let pm = at(&[(i, hi), (j, -hj)])?;
            let mp = at(&[(i, -hi), (j, hj)])?;
            let mm = at(&[(i, -hi), (j, -hj)])?;
            let h = (pp - pm - mp + mm) / (4.0 * hi * hj);
            hessian[(i, j)] = h;
            hessian[(j, i)] = h;
        }
    }
    if hessian.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation("non-finite entry in numerical Hessian".into()));
    }
    Ok(hessian)
}

/// Invert via Cholesky, damping the diagonal until it factorizes.
///
/// Returns `None` if no damping up to the attempt cap gives a usable inverse.
pub fn invert_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let identity = DMatrix::identity(n, n);
    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    const MAX_ATTEMPTS: usize = 10;

    for attempt in 0..MAX_ATTEMPTS {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            return Some(chol.solve(&identity));
        }
        if attempt + 1 == MAX_ATTEMPTS {
            break;
        }
        let next = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        for i in 0..n {
            h_damped[(i, i)] += next - damping;
        }
        damping = next;
    }

    let inverse = h_damped.lu().try_inverse()?;
    (0..n).all(|i| inverse[(i, i)].is_finite() && inverse[(i, i)] > 0.0).then_some(inverse)
}

/// Uncertainties of a `-2 ln L` minimum.
pub fn uncertainties(objective: &dyn ObjectiveFunction, params: &[f64], steps: &[f64]) -> Result<Uncertainties> {
    let hessian = numerical_hessian(objective, params, steps)?;
    let n = params.len();
    match invert_hessian(&hessian) {
        Some(inv) => {
            let cov = inv * 2.0;
            Ok(Uncertainties {
                errors: (0..n).map(|i| cov[(i, i)].sqrt()).collect(),
                covariance: Some((0..n).map(|i| cov.row(i).iter().copied().collect()).collect()),
                diagonal_only: false,
            })
        }
        None => {
            tracing::warn!(n, "Hessian not invertible, using diagonal uncertainties");
            Ok(Uncertainties {
                errors: (0..n).map(|i| (2.0 / hessian[(i, i)].abs().max(1e-12)).sqrt()).collect(),
                covariance: None,
                diagonal_only: true,
            })
        }
    }
}
