//! Gauss-Legendre quadrature for the lineshape convolution.
//!
//! A [`GaussLegendre`] rule is computed once on `[-1, 1]` and mapped onto each
//! panel of a piecewise integration. [`GaussLegendre::integrate_panels`] sums the
//! rule over consecutive breakpoints, which keeps sharp peaks resolved as long as
//! the caller places breakpoints around them.

/// Gauss-Legendre nodes and weights on `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct GaussLegendre {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussLegendre {
    /// Rule with `n` nodes, roots of `P_n` found by Newton iteration.
    pub fn new(n: usize) -> Self {
        let mut nodes = vec![0.0; n];
        let mut weights = vec![0.0; n];
        if n == 0 {
            return Self { nodes, weights };
        }

        let nf = n as f64;
        for i in 0..n.div_ceil(2) {
            let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (nf + 0.5)).cos();
            let mut dp = 1.0;
            for _ in 0..100 {
                let (pn, pn1) = legendre_pair(n, x);
                dp = nf * (x * pn - pn1) / (x * x - 1.0);
                let step = pn / dp;
                x -= step;
                if step.abs() < 1e-15 {
                    let (pn, pn1) = legendre_pair(n, x);
                    dp = nf * (x * pn - pn1) / (x * x - 1.0);
                    break;
                }
            }
            // n == 1: the recurrence degenerates, the single node sits at 0 with weight 2.
            let w = if n == 1 { 2.0 } else { 2.0 / ((1.0 - x * x) * dp * dp) };
            let x = if n == 1 { 0.0 } else { x };
            nodes[i] = -x;
            nodes[n - 1 - i] = x;
            weights[i] = w;
            weights[n - 1 - i] = w;
        }
        Self { nodes, weights }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True for the empty rule.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Integral of `f` over `[a, b]`.
    #[inline]
    pub fn integrate<F: FnMut(f64) -> f64>(&self, a: f64, b: f64, mut f: F) -> f64 {
        let half = 0.5 * (b - a);
        let mid = 0.5 * (a + b);
        self.nodes.iter().zip(&self.weights).map(|(&x, &w)| w * f(mid + half * x)).sum::<f64>()
            * half
    }

    /// Sum of [`integrate`](Self::integrate) over consecutive `breaks`.
    ///
    /// `breaks` must be sorted ascending; empty panels are skipped.
    pub fn integrate_panels<F: FnMut(f64) -> f64>(&self, breaks: &[f64], mut f: F) -> f64 {
        breaks
            .windows(2)
            .filter(|w| w[1] > w[0])
            .map(|w| self.integrate(w[0], w[1], &mut f))
            .sum()
    }
}

/// `(P_n(x), P_{n-1}(x))` by the three-term recurrence.
fn legendre_pair(n: usize, x: f64) -> (f64, f64) {
    let mut prev = 1.0;
    let mut cur = x;
    for j in 2..=n {
        let jf = j as f64;
        let next = ((2.0 * jf - 1.0) * x * cur - (jf - 1.0) * prev) / jf;
        prev = cur;
        cur = next;
    }
    (cur, prev)
}
