//! Bounded minimization of the likelihood over kernel parameters
//!
//! Strategies treat the objective as a black box `&[f64] -> f64`. Points are
//! always clamped into the box before evaluation, so the objective never sees
//! parameters outside their bounds.

use crate::core::{OptimizationMethod, MAX_GRID_AXIS_POINTS};
use log::{debug, info, warn};
use std::time::{Duration, Instant};

/// Largest grid that is searched exhaustively; bigger grids are searched one
/// coordinate at a time
const MAX_FULL_GRID: usize = 10_000;

/// Why a search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nothing to search or optimization disabled
    Skipped,
    /// Every grid point was evaluated
    GridExhausted,
    /// Simplex shrank below the parameter tolerance
    Converged,
    MaxIterations,
    TimeLimit,
}

#[derive(Debug, Clone)]
pub struct SearchReport {
    pub best: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
    pub termination: Termination,
}

/// Axis-aligned box of admissible parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl SearchSpace {
    pub fn dims(&self) -> usize {
        self.lower.len()
    }

    pub fn clamp(&self, point: &mut [f64]) {
        for ((x, lo), hi) in point.iter_mut().zip(&self.lower).zip(&self.upper) {
            *x = x.clamp(*lo, *hi);
        }
    }

    /// Number of grid points along dimension `dim`, at most
    /// [`MAX_GRID_AXIS_POINTS`]
    fn axis_len(&self, dim: usize, step: f64) -> usize {
        let intervals = ((self.upper[dim] - self.lower[dim]) / step + 1e-9).floor();
        if intervals < (MAX_GRID_AXIS_POINTS - 1) as f64 {
            intervals.max(0.0) as usize + 1
        } else {
            warn!(
                "grid step {step} is too fine for parameter {dim}, keeping the first {MAX_GRID_AXIS_POINTS} points"
            );
            MAX_GRID_AXIS_POINTS
        }
    }

    /// `i`-th grid coordinate along dimension `dim`
    fn axis_point(&self, dim: usize, step: f64, i: usize) -> f64 {
        (self.lower[dim] + i as f64 * step).min(self.upper[dim])
    }
}

/// Minimize `objective` over `space` starting from `start`
///
/// With [`OptimizationMethod::None`] the start point is returned untouched.
pub fn minimize<F>(
    method: &OptimizationMethod,
    space: &SearchSpace,
    start: &[f64],
    mut objective: F,
) -> SearchReport
where
    F: FnMut(&[f64]) -> f64,
{
    let skipped = SearchReport {
        best: start.to_vec(),
        value: f64::NAN,
        evaluations: 0,
        termination: Termination::Skipped,
    };
    if space.dims() == 0 {
        return skipped;
    }
    let mut start = start.to_vec();
    space.clamp(&mut start);

    let report = match *method {
        OptimizationMethod::None => return skipped,
        OptimizationMethod::Greedy { step_size } => {
            grid_search(space, &start, step_size, &mut objective)
        }
        OptimizationMethod::DownhillSimplex {
            max_iterations,
            time_limit_secs,
            parameter_tolerance,
        } => downhill_simplex(
            space,
            &start,
            SimplexLimits {
                max_iterations,
                time_limit: Duration::try_from_secs_f64(time_limit_secs)
                    .unwrap_or(Duration::MAX),
                tolerance: parameter_tolerance,
            },
            &mut objective,
        ),
    };

    info!(
        "{} search finished after {} evaluations ({:?}): best {:?} with value {:.6}",
        method.name(),
        report.evaluations,
        report.termination,
        report.best,
        report.value
    );
    report
}

fn grid_search<F>(space: &SearchSpace, start: &[f64], step: f64, objective: &mut F) -> SearchReport
where
    F: FnMut(&[f64]) -> f64,
{
    let lengths: Vec<usize> = (0..space.dims()).map(|d| space.axis_len(d, step)).collect();
    let total = lengths
        .iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len));

    let mut best = start.to_vec();
    let mut best_value = f64::INFINITY;
    let mut evaluations = 0;

    match total {
        Some(total) if total <= MAX_FULL_GRID => {
            let mut counters = vec![0usize; lengths.len()];
            let mut point: Vec<f64> = (0..lengths.len()).map(|d| space.lower[d]).collect();
            for _ in 0..total {
                let value = objective(&point);
                evaluations += 1;
                debug!("grid point {point:?}: {value:.6}");
                if value < best_value {
                    best_value = value;
                    best.copy_from_slice(&point);
                }
                for (dim, counter) in counters.iter_mut().enumerate() {
                    *counter += 1;
                    if *counter < lengths[dim] {
                        point[dim] = space.axis_point(dim, step, *counter);
                        break;
                    }
                    *counter = 0;
                    point[dim] = space.lower[dim];
                }
            }
        }
        _ => {
            info!("grid too large for exhaustive search, sweeping one parameter at a time");
            for (dim, &len) in lengths.iter().enumerate() {
                let mut point = best.clone();
                for i in 0..len {
                    point[dim] = space.axis_point(dim, step, i);
                    let value = objective(&point);
                    evaluations += 1;
                    if value < best_value {
                        best_value = value;
                        best.copy_from_slice(&point);
                    }
                }
            }
        }
    }

    SearchReport {
        best,
        value: best_value,
        evaluations,
        termination: Termination::GridExhausted,
    }
}

struct SimplexLimits {
    max_iterations: usize,
    time_limit: Duration,
    tolerance: f64,
}

/// Nelder–Mead with the usual coefficients (1, 2, ½, ½)
fn downhill_simplex<F>(
    space: &SearchSpace,
    start: &[f64],
    limits: SimplexLimits,
    objective: &mut F,
) -> SearchReport
where
    F: FnMut(&[f64]) -> f64,
{
    let started = Instant::now();
    let dims = space.dims();
    let mut evaluations = 0;
    let mut evaluate = |point: &mut Vec<f64>, evaluations: &mut usize| {
        space.clamp(point);
        *evaluations += 1;
        objective(point.as_slice())
    };

    let mut vertices: Vec<Vec<f64>> = vec![start.to_vec()];
    for dim in 0..dims {
        let mut vertex = start.to_vec();
        let width = space.upper[dim] - space.lower[dim];
        let offset = 0.1 * width;
        vertex[dim] = if vertex[dim] + offset <= space.upper[dim] {
            vertex[dim] + offset
        } else {
            vertex[dim] - offset
        };
        vertices.push(vertex);
    }
    let mut values: Vec<f64> = vertices
        .iter_mut()
        .map(|v| evaluate(v, &mut evaluations))
        .collect();

    let mut iterations = 0;
    let termination = loop {
        let mut order: Vec<usize> = (0..vertices.len()).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        vertices = order.iter().map(|&i| vertices[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let spread = vertices[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&vertices[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if spread <= limits.tolerance {
            break Termination::Converged;
        }
        if iterations >= limits.max_iterations {
            break Termination::MaxIterations;
        }
        if started.elapsed() >= limits.time_limit {
            break Termination::TimeLimit;
        }
        iterations += 1;

        let worst = dims;
        let centroid: Vec<f64> = (0..dims)
            .map(|d| vertices[..worst].iter().map(|v| v[d]).sum::<f64>() / dims as f64)
            .collect();
        let toward = |coefficient: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(&vertices[worst])
                .map(|(c, w)| c + coefficient * (c - w))
                .collect()
        };

        let mut reflected = toward(1.0);
        let reflected_value = evaluate(&mut reflected, &mut evaluations);

        if reflected_value < values[0] {
            let mut expanded = toward(2.0);
            let expanded_value = evaluate(&mut expanded, &mut evaluations);
            if expanded_value < reflected_value {
                vertices[worst] = expanded;
                values[worst] = expanded_value;
            } else {
                vertices[worst] = reflected;
                values[worst] = reflected_value;
            }
        } else if reflected_value < values[worst - 1] {
            vertices[worst] = reflected;
            values[worst] = reflected_value;
        } else {
            let (mut contracted, reference) = if reflected_value < values[worst] {
                (toward(0.5), reflected_value)
            } else {
                (toward(-0.5), values[worst])
            };
            let contracted_value = evaluate(&mut contracted, &mut evaluations);
            if contracted_value < reference {
                vertices[worst] = contracted;
                values[worst] = contracted_value;
            } else {
                let best = vertices[0].clone();
                for i in 1..vertices.len() {
                    let mut shrunk: Vec<f64> = vertices[i]
                        .iter()
                        .zip(&best)
                        .map(|(v, b)| b + 0.5 * (v - b))
                        .collect();
                    values[i] = evaluate(&mut shrunk, &mut evaluations);
                    vertices[i] = shrunk;
                }
            }
        }
    };

    debug!("downhill simplex: {iterations} iterations, {:?} elapsed", started.elapsed());

    SearchReport {
        best: vertices[0].clone(),
        value: values[0],
        evaluations,
        termination,
    }
}
