//! Single-level comparison engines.
//!
//! An engine takes the pairwise judgments of one vertex over its immediate
//! children and returns a normalized priority per child. The graph layer only
//! talks to engines through [`ComparisonEngine`]; two reference engines ship
//! with the crate:
//! - [`EigenvectorEngine`]: principal eigenvector of the reciprocal matrix
//!   (classic AHP), with Harker completion for missing pairs
//! - [`LogLeastSquaresEngine`]: log-ratio least squares, gauge pinned on the
//!   first child

use std::collections::{BTreeMap, HashMap, VecDeque};

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::pairwise::PairwiseJudgments;

/// Normalized local priorities of one vertex's children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityVector {
    pub name: String,
    pub weights: BTreeMap<String, f64>,
}

impl PriorityVector {
    pub fn get(&self, child: &str) -> Option<f64> {
        self.weights.get(child).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn into_weights(self) -> BTreeMap<String, f64> {
        self.weights
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("context {name} has no pairwise judgments")]
    EmptyJudgments { name: String },
    #[error("invalid ratio in context {name} for ({a}, {b}): {ratio}")]
    InvalidRatio {
        name: String,
        a: String,
        b: String,
        ratio: f64,
    },
    #[error("judgments in context {name} never connect {unreached} to the other children")]
    Disconnected { name: String, unreached: String },
    #[error("power iteration for context {name} did not converge after {iterations} iterations (l1 delta {l1_delta})")]
    NotConverged {
        name: String,
        iterations: usize,
        l1_delta: f64,
    },
    #[error("singular system while fitting context {name}")]
    SingularSystem { name: String },
}

/// Pairwise judgments for one vertex in, normalized child priorities out.
pub trait ComparisonEngine {
    fn compare(
        &self,
        name: &str,
        judgments: &PairwiseJudgments,
    ) -> Result<PriorityVector, EngineError>;
}

#[derive(Clone, Copy)]
struct Row {
    i: usize,
    j: usize,
    ratio: f64,
}

/// Validated judgments indexed by child position.
struct Prepared {
    nodes: Vec<String>,
    rows: Vec<Row>,
}

impl Prepared {
    fn priority_vector(&self, name: &str, priorities: &[f64]) -> PriorityVector {
        PriorityVector {
            name: name.to_string(),
            weights: self
                .nodes
                .iter()
                .cloned()
                .zip(priorities.iter().copied())
                .collect(),
        }
    }
}

fn prepare(name: &str, judgments: &PairwiseJudgments) -> Result<Prepared, EngineError> {
    if judgments.is_empty() {
        return Err(EngineError::EmptyJudgments {
            name: name.to_string(),
        });
    }

    let nodes: Vec<String> = judgments.names().into_iter().collect();
    let node_index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(idx, n)| (n.as_str(), idx))
        .collect();

    let mut rows = Vec::with_capacity(judgments.len());
    for (a, b, ratio) in judgments.iter() {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(EngineError::InvalidRatio {
                name: name.to_string(),
                a: a.to_string(),
                b: b.to_string(),
                ratio,
            });
        }
        let i = node_index[a];
        let j = node_index[b];
        if i == j {
            continue;
        }
        rows.push(Row { i, j, ratio });
    }

    let n = nodes.len();
    let mut adjacency = vec![Vec::new(); n];
    for row in &rows {
        adjacency[row.i].push(row.j);
        adjacency[row.j].push(row.i);
    }
    let mut seen = vec![false; n];
    let mut queue = VecDeque::from([0]);
    seen[0] = true;
    while let Some(idx) = queue.pop_front() {
        for &next in &adjacency[idx] {
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    if let Some(unreached) = seen.iter().position(|s| !s) {
        return Err(EngineError::Disconnected {
            name: name.to_string(),
            unreached: nodes[unreached].clone(),
        });
    }

    Ok(Prepared { nodes, rows })
}

/// Principal eigenvector of the reciprocal comparison matrix via power iteration.
///
/// Missing pairs follow Harker's method: the entry stays 0 and the diagonal of
/// its row is raised by one, which keeps consistent partial input exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EigenvectorEngine {
    /// L1 delta threshold for convergence.
    pub tolerance: f64,
    /// Iteration cap.
    pub max_iterations: usize,
}

impl Default for EigenvectorEngine {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 10_000,
        }
    }
}

impl ComparisonEngine for EigenvectorEngine {
    fn compare(
        &self,
        name: &str,
        judgments: &PairwiseJudgments,
    ) -> Result<PriorityVector, EngineError> {
        let prepared = prepare(name, judgments)?;
        let n = prepared.nodes.len();
        if n == 1 {
            return Ok(prepared.priority_vector(name, &[1.0]));
        }

        let mut matrix = DMatrix::<f64>::zeros(n, n);
        let mut compared = vec![0usize; n];
        for row in &prepared.rows {
            matrix[(row.i, row.j)] = row.ratio;
            matrix[(row.j, row.i)] = 1.0 / row.ratio;
            compared[row.i] += 1;
            compared[row.j] += 1;
        }
        for (idx, count) in compared.iter().enumerate() {
            let missing = (n - 1).saturating_sub(*count);
            matrix[(idx, idx)] = 1.0 + missing as f64;
        }

        let mut v = DVector::from_element(n, 1.0 / n as f64);
        let mut l1_delta = f64::INFINITY;
        for iter in 1..=self.max_iterations {
            let mut next = &matrix * &v;
            let next_sum: f64 = next.iter().sum();
            next /= next_sum;

            l1_delta = (0..n).map(|i| (next[i] - v[i]).abs()).sum();
            v = next;
            if l1_delta <= self.tolerance {
                debug!(context = %name, iterations = iter, l1_delta, "eigenvector converged");
                let priorities: Vec<f64> = v.iter().copied().collect();
                return Ok(prepared.priority_vector(name, &priorities));
            }
        }

        Err(EngineError::NotConverged {
            name: name.to_string(),
            iterations: self.max_iterations,
            l1_delta,
        })
    }
}

/// Log-ratio least squares over the supplied pairs.
///
/// Gauge convention: the first child (by name) is pinned to zero in log-space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLeastSquaresEngine {
    /// Tikhonov regularization on reduced normal equations.
    pub ridge_lambda: f64,
}

impl Default for LogLeastSquaresEngine {
    fn default() -> Self {
        Self { ridge_lambda: 1e-9 }
    }
}

impl ComparisonEngine for LogLeastSquaresEngine {
    fn compare(
        &self,
        name: &str,
        judgments: &PairwiseJudgments,
    ) -> Result<PriorityVector, EngineError> {
        let prepared = prepare(name, judgments)?;
        let n = prepared.nodes.len();
        if n == 1 {
            return Ok(prepared.priority_vector(name, &[1.0]));
        }

        let reduced_n = n - 1;
        let mut h = DMatrix::<f64>::zeros(reduced_n, reduced_n);
        let mut b = DVector::<f64>::zeros(reduced_n);

        for row in &prepared.rows {
            let y = row.ratio.ln();
            let mut add_coeff = |idx: usize, coeff: f64| {
                if idx == 0 {
                    return;
                }
                let ridx = idx - 1;
                b[ridx] += y * coeff;
                h[(ridx, ridx)] += coeff * coeff;
            };

            add_coeff(row.i, 1.0);
            add_coeff(row.j, -1.0);

            if row.i != 0 && row.j != 0 {
                let ri = row.i - 1;
                let rj = row.j - 1;
                h[(ri, rj)] -= 1.0;
                h[(rj, ri)] -= 1.0;
            }
        }

        for d in 0..reduced_n {
            h[(d, d)] += self.ridge_lambda;
        }

        let solved = h
            .clone()
            .cholesky()
            .map(|chol| chol.solve(&b))
            .or_else(|| h.clone().lu().solve(&b))
            .ok_or_else(|| EngineError::SingularSystem {
                name: name.to_string(),
            })?;

        let mut ln_scores = vec![0.0; n];
        for idx in 1..n {
            ln_scores[idx] = solved[idx - 1];
        }

        let sq_sum: f64 = prepared
            .rows
            .iter()
            .map(|row| {
                let res = row.ratio.ln() - (ln_scores[row.i] - ln_scores[row.j]);
                res * res
            })
            .sum();
        let rmse = (sq_sum / prepared.rows.len() as f64).sqrt();
        debug!(context = %name, rmse, judgments = prepared.rows.len(), "log least squares fit");

        let max_ln = ln_scores
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, |a, b| a.max(b));
        let mut priorities: Vec<f64> = ln_scores.iter().map(|s| (s - max_ln).exp()).collect();
        let z: f64 = priorities.iter().sum();
        for p in &mut priorities {
            *p /= z;
        }

        Ok(prepared.priority_vector(name, &priorities))
    }
}

/// Serde-configurable choice between the reference engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Engine {
    Eigenvector(EigenvectorEngine),
    LogLeastSquares(LogLeastSquaresEngine),
}

impl Default for Engine {
    fn default() -> Self {
        Engine::Eigenvector(EigenvectorEngine::default())
    }
}

impl ComparisonEngine for Engine {
    fn compare(
        &self,
        name: &str,
        judgments: &PairwiseJudgments,
    ) -> Result<PriorityVector, EngineError> {
        match self {
            Engine::Eigenvector(engine) => engine.compare(name, judgments),
            Engine::LogLeastSquares(engine) => engine.compare(name, judgments),
        }
    }
}
