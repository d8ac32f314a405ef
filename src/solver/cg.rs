//! Conjugate gradient solver for `(K + σI) x = b`
//!
//! The solver runs under a hard iteration cap. Hitting the cap is not an
//! error: the best iterate so far is returned with `converged = false`.

use crate::core::LinearOperator;
use crate::solver::dense::{axpy, dot};
use log::{debug, warn};

/// Outcome of one linear solve
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub solution: Vec<f64>,
    pub iterations: usize,
    /// `‖b − A x‖` of the returned solution
    pub residual_norm: f64,
    pub converged: bool,
}

/// Conjugate gradients for symmetric positive definite operators
#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradient {
    max_iterations: usize,
    tolerance: f64,
}

impl ConjugateGradient {
    /// `tolerance` is relative to `‖b‖`
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Solve `A x = rhs`, optionally starting from `initial`
    ///
    /// A warm start of the wrong length is truncated or padded with zeros, which
    /// is what an incremental update with one more example needs.
    pub fn solve<A>(&self, op: &A, rhs: &[f64], initial: Option<&[f64]>) -> SolveReport
    where
        A: LinearOperator + ?Sized,
    {
        let n = op.rows();
        let mut x = match initial {
            Some(start) => {
                let mut x = start.to_vec();
                x.resize(n, 0.0);
                x
            }
            None => vec![0.0; n],
        };

        let rhs_norm = dot(rhs, rhs).sqrt();
        if rhs_norm == 0.0 {
            return SolveReport {
                solution: vec![0.0; n],
                iterations: 0,
                residual_norm: 0.0,
                converged: true,
            };
        }
        let threshold = self.tolerance * rhs_norm;

        let mut r: Vec<f64> = if x.iter().any(|&v| v != 0.0) {
            let ax = op.multiply(&x);
            rhs.iter().zip(&ax).map(|(b, a)| b - a).collect()
        } else {
            rhs.to_vec()
        };
        let mut p = r.clone();
        let mut rs = dot(&r, &r);
        let mut iterations = 0;

        while rs.sqrt() > threshold && iterations < self.max_iterations {
            let ap = op.multiply(&p);
            let curvature = dot(&p, &ap);
            if !(curvature > 0.0) {
                warn!("conjugate gradients broke down after {iterations} iterations (pᵀAp = {curvature:e})");
                break;
            }
            let step = rs / curvature;
            axpy(step, &p, &mut x);
            axpy(-step, &ap, &mut r);
            let rs_next = dot(&r, &r);
            let beta = rs_next / rs;
            for (pi, ri) in p.iter_mut().zip(&r) {
                *pi = ri + beta * *pi;
            }
            rs = rs_next;
            iterations += 1;
        }

        let residual_norm = rs.sqrt();
        let converged = residual_norm <= threshold;
        if converged {
            debug!("conjugate gradients converged in {iterations} iterations (residual {residual_norm:e})");
        } else {
            warn!(
                "conjugate gradients stopped after {iterations} iterations with residual {residual_norm:e} (target {threshold:e})"
            );
        }

        SolveReport {
            solution: x,
            iterations,
            residual_norm,
            converged,
        }
    }
}
