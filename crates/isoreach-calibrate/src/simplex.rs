//! Bounded Nelder-Mead minimisation.
//!
//! Derivative-free downhill simplex with box bounds: every candidate point is
//! clipped into the bounds before evaluation, and the initial simplex is
//! reflected back inside when a perturbed vertex leaves them. The objective is
//! asynchronous because each evaluation queries the routing engine.

use async_trait::async_trait;
use isoreach_core::{Error, Result};
use tracing::debug;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;
const INITIAL_STEP: f64 = 0.05;
const ZERO_STEP: f64 = 0.00025;

/// Function to minimise.
#[async_trait]
pub trait Objective: Send {
    async fn evaluate(&mut self, x: &[f64]) -> Result<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NelderMead {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub max_evaluations: usize,
    /// Convergence tolerance on vertex spread.
    pub x_tolerance: f64,
    /// Convergence tolerance on objective spread.
    pub f_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
    pub converged: bool,
}

struct Budget<'a, O: Objective + ?Sized> {
    objective: &'a mut O,
    used: usize,
    max: usize,
}

impl<O: Objective + ?Sized> Budget<'_, O> {
    /// `None` once the evaluation budget is spent.
    async fn eval(&mut self, x: &[f64]) -> Result<Option<f64>> {
        if self.used >= self.max {
            return Ok(None);
        }
        self.used += 1;
        let value = self.objective.evaluate(x).await?;
        if value.is_nan() {
            return Err(Error::Calibration(format!("objective is NaN at {:?}", x)));
        }
        Ok(Some(value))
    }
}

impl NelderMead {
    /// Same bounds on every dimension.
    pub fn uniform(dim: usize, lower: f64, upper: f64) -> Self {
        Self {
            lower: vec![lower; dim],
            upper: vec![upper; dim],
            max_evaluations: 200 * dim,
            x_tolerance: 1e-4,
            f_tolerance: 1e-4,
        }
    }

    pub fn with_max_evaluations(mut self, max_evaluations: usize) -> Self {
        self.max_evaluations = max_evaluations;
        self
    }

    /// Set both tolerances.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.x_tolerance = tolerance;
        self.f_tolerance = tolerance;
        self
    }

    fn clip(&self, x: &mut [f64]) {
        for (i, v) in x.iter_mut().enumerate() {
            *v = v.clamp(self.lower[i], self.upper[i]);
        }
    }

    fn initial_simplex(&self, start: &[f64]) -> Vec<Vec<f64>> {
        let mut x0 = start.to_vec();
        self.clip(&mut x0);

        let mut simplex = vec![x0.clone()];
        for k in 0..x0.len() {
            let mut y = x0.clone();
            y[k] = if y[k] != 0.0 {
                (1.0 + INITIAL_STEP) * y[k]
            } else {
                ZERO_STEP
            };
            if y[k] > self.upper[k] {
                y[k] = 2.0 * self.upper[k] - y[k];
            }
            self.clip(&mut y);
            simplex.push(y);
        }
        simplex
    }

    fn converged(&self, simplex: &[Vec<f64>], values: &[f64]) -> bool {
        let best = &simplex[0];
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let f_spread = values[1..]
            .iter()
            .map(|f| (f - values[0]).abs())
            .fold(0.0, f64::max);
        x_spread <= self.x_tolerance && f_spread <= self.f_tolerance
    }

    /// `(1 + t) * centroid - t * worst`, clipped.
    fn along(&self, centroid: &[f64], worst: &[f64], t: f64) -> Vec<f64> {
        let mut x: Vec<f64> = centroid
            .iter()
            .zip(worst)
            .map(|(c, w)| (1.0 + t) * c - t * w)
            .collect();
        self.clip(&mut x);
        x
    }

    pub async fn minimize<O: Objective + ?Sized>(
        &self,
        objective: &mut O,
        start: &[f64],
    ) -> Result<Minimum> {
        let n = start.len();
        if n == 0 || self.lower.len() != n || self.upper.len() != n {
            return Err(Error::Calibration(format!(
                "dimension mismatch: start {}, bounds {}/{}",
                n,
                self.lower.len(),
                self.upper.len()
            )));
        }
        if self.lower.iter().zip(&self.upper).any(|(l, u)| l > u) {
            return Err(Error::Calibration("lower bound above upper bound".to_string()));
        }

        let mut budget = Budget {
            objective,
            used: 0,
            max: self.max_evaluations,
        };

        let mut simplex = self.initial_simplex(start);
        let mut values = Vec::with_capacity(n + 1);
        for vertex in &simplex {
            match budget.eval(vertex).await? {
                Some(f) => values.push(f),
                None => break,
            }
        }
        if values.is_empty() {
            return Err(Error::Calibration("no evaluations allowed".to_string()));
        }
        if values.len() < simplex.len() {
            simplex.truncate(values.len());
            return Ok(Self::best(simplex, values, budget.used, false));
        }

        let mut converged = false;
        let mut iterations = 0usize;
        'search: loop {
            sort_simplex(&mut simplex, &mut values);
            if self.converged(&simplex, &values) {
                converged = true;
                break;
            }
            iterations += 1;

            let centroid: Vec<f64> = (0..n)
                .map(|i| simplex[..n].iter().map(|v| v[i]).sum::<f64>() / n as f64)
                .collect();
            let worst = simplex[n].clone();

            let xr = self.along(&centroid, &worst, REFLECTION);
            let Some(fr) = budget.eval(&xr).await? else {
                break;
            };

            if fr < values[0] {
                let xe = self.along(&centroid, &worst, REFLECTION * EXPANSION);
                let Some(fe) = budget.eval(&xe).await? else {
                    simplex[n] = xr;
                    values[n] = fr;
                    break;
                };
                if fe < fr {
                    simplex[n] = xe;
                    values[n] = fe;
                } else {
                    simplex[n] = xr;
                    values[n] = fr;
                }
                continue;
            }

            if fr < values[n - 1] {
                simplex[n] = xr;
                values[n] = fr;
                continue;
            }

            let accepted = if fr < values[n] {
                let xc = self.along(&centroid, &worst, CONTRACTION * REFLECTION);
                let Some(fc) = budget.eval(&xc).await? else {
                    break;
                };
                (fc <= fr).then_some((xc, fc))
            } else {
                let xcc = self.along(&centroid, &worst, -CONTRACTION);
                let Some(fcc) = budget.eval(&xcc).await? else {
                    break;
                };
                (fcc < values[n]).then_some((xcc, fcc))
            };

            match accepted {
                Some((x, f)) => {
                    simplex[n] = x;
                    values[n] = f;
                }
                None => {
                    for j in 1..=n {
                        let mut x: Vec<f64> = simplex[0]
                            .iter()
                            .zip(&simplex[j])
                            .map(|(b, v)| b + SHRINK * (v - b))
                            .collect();
                        self.clip(&mut x);
                        let Some(f) = budget.eval(&x).await? else {
                            break 'search;
                        };
                        simplex[j] = x;
                        values[j] = f;
                    }
                }
            }
        }

        debug!(
            evaluations = budget.used,
            iterations, converged, "Nelder-Mead finished"
        );
        Ok(Self::best(simplex, values, budget.used, converged))
    }

    fn best(mut simplex: Vec<Vec<f64>>, mut values: Vec<f64>, evaluations: usize, converged: bool) -> Minimum {
        sort_simplex(&mut simplex, &mut values);
        Minimum {
            x: simplex.swap_remove(0),
            value: values[0],
            evaluations,
            converged,
        }
    }
}

fn sort_simplex(simplex: &mut Vec<Vec<f64>>, values: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    *simplex = order.iter().map(|&i| simplex[i].clone()).collect();
    *values = order.iter().map(|&i| values[i]).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic {
        target: Vec<f64>,
        calls: usize,
    }

    #[async_trait]
    impl Objective for Quadratic {
        async fn evaluate(&mut self, x: &[f64]) -> Result<f64> {
            self.calls += 1;
            Ok(x.iter().zip(&self.target).map(|(a, b)| (a - b).powi(2)).sum())
        }
    }

    #[tokio::test]
    async fn test_finds_interior_minimum() {
        let mut f = Quadratic {
            target: vec![0.6, 0.7],
            calls: 0,
        };
        let nm = NelderMead::uniform(2, 0.5, 1.0).with_tolerance(1e-8);
        let min = nm.minimize(&mut f, &[0.8, 0.8]).await.unwrap();
        assert!((min.x[0] - 0.6).abs() < 1e-3);
        assert!((min.x[1] - 0.7).abs() < 1e-3);
        assert_eq!(min.evaluations, f.calls);
    }

    #[tokio::test]
    async fn test_respects_bounds() {
        let mut f = Quadratic {
            target: vec![0.1, 2.0, 0.75],
            calls: 0,
        };
        let nm = NelderMead::uniform(3, 0.5, 1.0).with_tolerance(1e-8);
        let min = nm.minimize(&mut f, &[0.8, 0.8, 0.8]).await.unwrap();
        assert!(min.x.iter().all(|v| (0.5..=1.0).contains(v)));
        assert!((min.x[0] - 0.5).abs() < 1e-2);
        assert!((min.x[1] - 1.0).abs() < 1e-2);
    }

    #[tokio::test]
    async fn test_evaluation_budget_is_hard() {
        let mut f = Quadratic {
            target: vec![0.55; 5],
            calls: 0,
        };
        let nm = NelderMead::uniform(5, 0.5, 1.0)
            .with_max_evaluations(40)
            .with_tolerance(1e-12);
        let min = nm.minimize(&mut f, &[0.8; 5]).await.unwrap();
        assert!(f.calls <= 40);
        assert_eq!(min.evaluations, f.calls);
        assert!(!min.converged);
    }

    #[tokio::test]
    async fn test_loose_tolerance_stops_early() {
        let mut f = Quadratic {
            target: vec![0.6; 5],
            calls: 0,
        };
        let nm = NelderMead::uniform(5, 0.5, 1.0)
            .with_max_evaluations(40)
            .with_tolerance(5.0);
        let min = nm.minimize(&mut f, &[0.8; 5]).await.unwrap();
        assert!(min.converged);
        assert_eq!(f.calls, 6);
    }

    #[test]
    fn test_initial_simplex_reflects_into_bounds() {
        let nm = NelderMead::uniform(2, 0.5, 1.0);
        let simplex = nm.initial_simplex(&[1.0, 0.8]);
        assert!((simplex[1][0] - 0.95).abs() < 1e-12);
        assert_eq!(simplex[1][1], 0.8);
        assert!((simplex[2][1] - 0.84).abs() < 1e-12);
    }
}
