use super::{Objective, OptimizeError, sanitize};
use crate::engine::cancel::CancellationToken;
use crate::engine::config::SimplexConfig;
use nalgebra::DVector;
use std::cmp::Ordering;
use tracing::{debug, trace};

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub position: DVector<f64>,
    pub weight: f64,
}

impl Vertex {
    fn evaluate<O: Objective + ?Sized>(objective: &O, position: DVector<f64>) -> Self {
        let weight = sanitize(objective.weight(&position));
        Self { position, weight }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimplexOutcome {
    pub position: DVector<f64>,
    pub weight: f64,
    pub iterations: usize,
    pub size: f64,
}

/// Downhill simplex minimizer with the standard reflection, expansion,
/// contraction and shrink coefficients (1, 2, 0.5, 0.5).
#[derive(Debug, Clone)]
pub struct NelderMead {
    threshold: f64,
    step: f64,
    max_iterations: usize,
    cancel: Option<CancellationToken>,
}

impl NelderMead {
    pub fn new(config: &SimplexConfig) -> Self {
        Self {
            threshold: config.threshold,
            step: config.step,
            max_iterations: config.max_iterations,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Builds the starting simplex by walking one step along each axis in
    /// turn, so vertex `k + 1` differs from vertex `k` only in coordinates
    /// `k - 1` and `k`.
    fn initial_simplex<O: Objective + ?Sized>(
        &self,
        objective: &O,
        start: &DVector<f64>,
    ) -> Vec<Vertex> {
        let n = start.len();
        let mut simplex = Vec::with_capacity(n + 1);
        let mut position = start.clone();
        simplex.push(Vertex::evaluate(objective, position.clone()));
        for k in 0..n {
            position[k] += self.step;
            if k > 0 {
                position[k - 1] -= self.step;
            }
            simplex.push(Vertex::evaluate(objective, position.clone()));
        }
        simplex
    }

    pub fn minimize<O: Objective + ?Sized>(
        &self,
        objective: &O,
        start: &DVector<f64>,
    ) -> Result<SimplexOutcome, OptimizeError> {
        let n = start.len();
        if n == 0 {
            return Err(OptimizeError::EmptyParameters);
        }
        if let Some(i) = start.iter().position(|v| !v.is_finite()) {
            return Err(OptimizeError::InvalidStart(format!(
                "component {} is not finite",
                i
            )));
        }

        let mut simplex = self.initial_simplex(objective, start);
        let mut size = f64::INFINITY;

        for iteration in 0..self.max_iterations {
            if self.is_cancelled() {
                debug!(iteration, "Simplex search cancelled");
                return Err(OptimizeError::Cancelled {
                    iterations: iteration,
                });
            }

            sort_vertices(&mut simplex);
            size = simplex_size(&simplex);
            if size < self.threshold {
                let best = simplex.swap_remove(0);
                trace!(iteration, size, weight = best.weight, "Simplex converged");
                return Ok(SimplexOutcome {
                    position: best.position,
                    weight: best.weight,
                    iterations: iteration,
                    size,
                });
            }

            let centroid = simplex[..n]
                .iter()
                .fold(DVector::<f64>::zeros(n), |acc, v| acc + &v.position)
                / n as f64;
            let worst = &simplex[n];

            let reflected = Vertex::evaluate(
                objective,
                &centroid + (&centroid - &worst.position) * REFLECTION,
            );

            if reflected.weight < simplex[n - 1].weight && reflected.weight > simplex[0].weight {
                simplex[n] = reflected;
            } else if reflected.weight < simplex[0].weight {
                let expanded = Vertex::evaluate(
                    objective,
                    &centroid + (&reflected.position - &centroid) * EXPANSION,
                );
                simplex[n] = if expanded.weight < reflected.weight {
                    expanded
                } else {
                    reflected
                };
            } else {
                let contracted = Vertex::evaluate(
                    objective,
                    &centroid + (&worst.position - &centroid) * CONTRACTION,
                );
                if contracted.weight < worst.weight {
                    simplex[n] = contracted;
                } else {
                    let best = simplex[0].position.clone();
                    for vertex in simplex.iter_mut().skip(1) {
                        let position = &best + (&vertex.position - &best) * SHRINK;
                        *vertex = Vertex::evaluate(objective, position);
                    }
                }
            }
        }

        debug!(
            iterations = self.max_iterations,
            size, "Simplex reached the iteration limit"
        );
        Err(OptimizeError::NotConverged {
            iterations: self.max_iterations,
            size,
        })
    }
}

fn sort_vertices(simplex: &mut [Vertex]) {
    simplex.sort_by(|a, b| a.weight.partial_cmp(&b.weight).unwrap_or(Ordering::Equal));
}

/// Mean per-axis spread of the vertices, normalized by the vertex count.
fn simplex_size(simplex: &[Vertex]) -> f64 {
    let Some(first) = simplex.first() else {
        return 0.0;
    };
    let n = first.position.len();
    let total: f64 = (0..n)
        .map(|axis| {
            let (lo, hi) = simplex.iter().fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(lo, hi), v| (lo.min(v.position[axis]), hi.max(v.position[axis])),
            );
            hi - lo
        })
        .sum();
    total / simplex.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: f64, step: f64) -> SimplexConfig {
        SimplexConfig::new(threshold, step).unwrap()
    }

    #[test]
    fn minimizes_a_shifted_quadratic() {
        let objective = |x: &DVector<f64>| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2);
        let start = DVector::from_vec(vec![0.0, 0.0]);
        let outcome = NelderMead::new(&config(1e-8, 1.0))
            .minimize(&objective, &start)
            .unwrap();
        assert!((outcome.position[0] - 3.0).abs() < 1e-4);
        assert!((outcome.position[1] + 1.0).abs() < 1e-4);
        assert!(outcome.weight < 1e-8);
        assert!(outcome.size < 1e-8);
    }

    fn ten_dimensional_bowl(x: &DVector<f64>) -> f64 {
        x.iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * (v - 0.5 * i as f64).powi(2))
            .sum()
    }

    #[test]
    fn converges_on_a_ten_dimensional_quadratic() {
        let start = DVector::zeros(10);
        let cfg = config(1e-9, 1.0).with_max_iterations(50_000).unwrap();
        let outcome = NelderMead::new(&cfg)
            .minimize(&ten_dimensional_bowl, &start)
            .unwrap();
        assert!(outcome.size < 1e-9);
        for (i, v) in outcome.position.iter().enumerate() {
            assert!((v - 0.5 * i as f64).abs() < 1e-3, "x[{i}] = {v}");
        }
    }

    #[test]
    fn identical_inputs_give_identical_outcomes() {
        let start = DVector::from_fn(10, |i, _| (i as f64).sin());
        let cfg = config(1e-8, 0.5).with_max_iterations(50_000).unwrap();
        let first = NelderMead::new(&cfg).minimize(&ten_dimensional_bowl, &start);
        let second = NelderMead::new(&cfg).minimize(&ten_dimensional_bowl, &start);
        assert!(first.is_ok());
        assert_eq!(first, second);
    }

    #[test]
    fn minimizes_rosenbrock() {
        let objective = |x: &DVector<f64>| {
            (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
        };
        let start = DVector::from_vec(vec![-1.2, 1.0]);
        let outcome = NelderMead::new(&config(1e-10, 0.5))
            .minimize(&objective, &start)
            .unwrap();
        assert!((outcome.position[0] - 1.0).abs() < 1e-3);
        assert!((outcome.position[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn one_dimensional_search_works() {
        let objective = |x: &DVector<f64>| (x[0] - 0.25).abs();
        let start = DVector::from_vec(vec![5.0]);
        let outcome = NelderMead::new(&config(1e-9, 1.0))
            .minimize(&objective, &start)
            .unwrap();
        assert!((outcome.position[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn nan_weights_are_treated_as_infeasible() {
        let objective = |x: &DVector<f64>| {
            if x[0] < 0.0 {
                f64::NAN
            } else {
                (x[0] - 1.0).powi(2)
            }
        };
        let start = DVector::from_vec(vec![0.5]);
        let outcome = NelderMead::new(&config(1e-9, 1.0))
            .minimize(&objective, &start)
            .unwrap();
        assert!((outcome.position[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn iteration_limit_reports_not_converged() {
        let objective = |x: &DVector<f64>| x.norm_squared();
        let start = DVector::from_vec(vec![10.0, -10.0, 4.0]);
        let cfg = config(1e-30, 1.0).with_max_iterations(5).unwrap();
        let result = NelderMead::new(&cfg).minimize(&objective, &start);
        assert!(matches!(
            result,
            Err(OptimizeError::NotConverged { iterations: 5, .. })
        ));
    }

    #[test]
    fn empty_and_non_finite_starts_are_rejected() {
        let objective = |x: &DVector<f64>| x.norm_squared();
        let nm = NelderMead::new(&config(1e-6, 1.0));
        assert_eq!(
            nm.minimize(&objective, &DVector::zeros(0)),
            Err(OptimizeError::EmptyParameters)
        );
        assert!(matches!(
            nm.minimize(&objective, &DVector::from_vec(vec![f64::NAN])),
            Err(OptimizeError::InvalidStart(_))
        ));
    }

    #[test]
    fn cancelled_token_stops_the_search() {
        let token = CancellationToken::new();
        token.cancel();
        let objective = |x: &DVector<f64>| x.norm_squared();
        let result = NelderMead::new(&config(1e-6, 1.0))
            .with_cancellation(token)
            .minimize(&objective, &DVector::from_vec(vec![1.0, 2.0]));
        assert_eq!(result, Err(OptimizeError::Cancelled { iterations: 0 }));
    }

    #[test]
    fn initial_simplex_walks_one_axis_at_a_time() {
        let objective = |x: &DVector<f64>| x.sum();
        let nm = NelderMead::new(&config(1e-6, 2.0));
        let simplex = nm.initial_simplex(&objective, &DVector::from_vec(vec![0.0, 0.0, 0.0]));
        let positions: Vec<Vec<f64>> = simplex
            .iter()
            .map(|v| v.position.iter().copied().collect())
            .collect();
        assert_eq!(
            positions,
            vec![
                vec![0.0, 0.0, 0.0],
                vec![2.0, 0.0, 0.0],
                vec![0.0, 2.0, 0.0],
                vec![0.0, 0.0, 2.0],
            ]
        );
        assert!((simplex_size(&simplex) - 6.0 / 4.0).abs() < 1e-12);
    }
}
