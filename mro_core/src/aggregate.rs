//! Sums of sweep results over repetitions
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use thiserror::Error;

use crate::sweep::ExperimentResult;

/// Element wise sums over repetitions, one entry per (K, ε) or per K
///
/// Only cells with a solution and an evaluation contribute, the number of contributing
/// repetitions is kept per cell and the `mean_*` accessors divide by it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedResult {
    k_values: Vec<usize>,
    epsilons: Vec<f64>,
    objective: DMatrix<f64>,
    strict_satisfied: DMatrix<f64>,
    expected_satisfied: DMatrix<f64>,
    strict_statistic: DMatrix<f64>,
    expected_statistic: DMatrix<f64>,
    solve_time_secs: DMatrix<f64>,
    counts: DMatrix<usize>,
    // row major over (K, ε)
    decisions: Vec<Option<DVector<f64>>>,
    reduction_time_secs: DVector<f64>,
    build_time_secs: DVector<f64>,
    timing_counts: Vec<usize>,
}

/// Sum `results`, which must share the same K and ε grids
pub fn aggregate(results: &[ExperimentResult]) -> Result<AggregatedResult, AggregationError> {
    let first = results.first().ok_or(AggregationError::Empty)?;
    let k_values = first.k_values().to_vec();
    let epsilons = first.epsilons().to_vec();
    if let Some(other) = results
        .iter()
        .find(|r| r.k_values() != k_values.as_slice() || r.epsilons() != epsilons.as_slice())
    {
        return Err(AggregationError::GridMismatch {
            expected_k: k_values.len(),
            expected_epsilons: epsilons.len(),
            found_k: other.k_values().len(),
            found_epsilons: other.epsilons().len(),
        });
    }

    let (n_k, n_eps) = (k_values.len(), epsilons.len());
    let mut aggregated = AggregatedResult {
        objective: DMatrix::zeros(n_k, n_eps),
        strict_satisfied: DMatrix::zeros(n_k, n_eps),
        expected_satisfied: DMatrix::zeros(n_k, n_eps),
        strict_statistic: DMatrix::zeros(n_k, n_eps),
        expected_statistic: DMatrix::zeros(n_k, n_eps),
        solve_time_secs: DMatrix::zeros(n_k, n_eps),
        counts: DMatrix::zeros(n_k, n_eps),
        decisions: vec![None; n_k * n_eps],
        reduction_time_secs: DVector::zeros(n_k),
        build_time_secs: DVector::zeros(n_k),
        timing_counts: vec![0; n_k],
        k_values,
        epsilons,
    };

    for result in results {
        for r in 0..result.repetitions() {
            for k in 0..n_k {
                if let (Some(reduction), Some(build)) =
                    (result.reduction_time(r, k), result.build_time(r, k))
                {
                    aggregated.reduction_time_secs[k] += reduction.as_secs_f64();
                    aggregated.build_time_secs[k] += build.as_secs_f64();
                    aggregated.timing_counts[k] += 1;
                }
                for e in 0..n_eps {
                    let record = match result.record(r, k, e) {
                        Some(record) => record,
                        None => continue,
                    };
                    let (objective, evaluation, decision) =
                        match (record.objective, record.evaluation, &record.decision) {
                            (Some(objective), Some(evaluation), Some(decision)) => {
                                (objective, evaluation, decision)
                            }
                            _ => continue,
                        };
                    let sum = aggregated.decisions[k * n_eps + e]
                        .get_or_insert_with(|| DVector::zeros(decision.len()));
                    if sum.len() != decision.len() {
                        return Err(AggregationError::DecisionLengthMismatch {
                            expected: sum.len(),
                            found: decision.len(),
                        });
                    }
                    *sum += DVector::from_column_slice(decision);
                    let cell = (k, e);
                    aggregated.objective[cell] += objective;
                    aggregated.strict_satisfied[cell] += indicator(evaluation.strict.satisfied);
                    aggregated.expected_satisfied[cell] +=
                        indicator(evaluation.expected.satisfied);
                    aggregated.strict_statistic[cell] += evaluation.strict.statistic;
                    aggregated.expected_statistic[cell] += evaluation.expected.statistic;
                    aggregated.solve_time_secs[cell] += record.solve_time.as_secs_f64();
                    aggregated.counts[cell] += 1;
                }
            }
        }
    }
    Ok(aggregated)
}

fn indicator(value: bool) -> f64 {
    if value {
        1.
    } else {
        0.
    }
}

impl AggregatedResult {
    /// Cluster counts of the grid
    pub fn k_values(&self) -> &[usize] {
        &self.k_values
    }

    /// Radii of the grid
    pub fn epsilons(&self) -> &[f64] {
        &self.epsilons
    }

    /// Sum of in sample optima, K × ε
    pub fn objective_sum(&self) -> &DMatrix<f64> {
        &self.objective
    }

    /// Number of strictly satisfied repetitions, K × ε
    pub fn strict_satisfied_sum(&self) -> &DMatrix<f64> {
        &self.strict_satisfied
    }

    /// Number of repetitions satisfied in expectation, K × ε
    pub fn expected_satisfied_sum(&self) -> &DMatrix<f64> {
        &self.expected_satisfied
    }

    /// Sum of strict statistics, K × ε
    pub fn strict_statistic_sum(&self) -> &DMatrix<f64> {
        &self.strict_statistic
    }

    /// Sum of expected statistics, K × ε
    pub fn expected_statistic_sum(&self) -> &DMatrix<f64> {
        &self.expected_statistic
    }

    /// Sum of solve times in seconds, K × ε
    pub fn solve_time_sum(&self) -> &DMatrix<f64> {
        &self.solve_time_secs
    }

    /// Number of repetitions that contributed to each cell, K × ε
    pub fn counts(&self) -> &DMatrix<usize> {
        &self.counts
    }

    /// Sum of decisions, `None` when no repetition contributed to the cell
    pub fn decision_sum(&self, k_index: usize, epsilon_index: usize) -> Option<&DVector<f64>> {
        if epsilon_index >= self.epsilons.len() {
            return None;
        }
        self.decisions
            .get(k_index * self.epsilons.len() + epsilon_index)?
            .as_ref()
    }

    /// Sum of reduction times in seconds, per K
    pub fn reduction_time_sum(&self) -> &DVector<f64> {
        &self.reduction_time_secs
    }

    /// Sum of build times in seconds, per K
    pub fn build_time_sum(&self) -> &DVector<f64> {
        &self.build_time_secs
    }

    fn cell_mean(&self, sums: &DMatrix<f64>, k_index: usize, epsilon_index: usize) -> Option<f64> {
        let count = *self.counts.get((k_index, epsilon_index))?;
        (count > 0).then(|| sums[(k_index, epsilon_index)] / count as f64)
    }

    /// Mean in sample optimum
    pub fn mean_objective(&self, k_index: usize, epsilon_index: usize) -> Option<f64> {
        self.cell_mean(&self.objective, k_index, epsilon_index)
    }

    /// Fraction of repetitions strictly satisfied
    pub fn mean_strict_satisfaction(&self, k_index: usize, epsilon_index: usize) -> Option<f64> {
        self.cell_mean(&self.strict_satisfied, k_index, epsilon_index)
    }

    /// Fraction of repetitions satisfied in expectation
    pub fn mean_expected_satisfaction(&self, k_index: usize, epsilon_index: usize) -> Option<f64> {
        self.cell_mean(&self.expected_satisfied, k_index, epsilon_index)
    }

    /// Mean strict statistic
    pub fn mean_strict_statistic(&self, k_index: usize, epsilon_index: usize) -> Option<f64> {
        self.cell_mean(&self.strict_statistic, k_index, epsilon_index)
    }

    /// Mean expected statistic
    pub fn mean_expected_statistic(&self, k_index: usize, epsilon_index: usize) -> Option<f64> {
        self.cell_mean(&self.expected_statistic, k_index, epsilon_index)
    }

    /// Mean solve time in seconds
    pub fn mean_solve_time(&self, k_index: usize, epsilon_index: usize) -> Option<f64> {
        self.cell_mean(&self.solve_time_secs, k_index, epsilon_index)
    }

    /// Element wise mean decision
    pub fn mean_decision(&self, k_index: usize, epsilon_index: usize) -> Option<DVector<f64>> {
        let sum = self.decision_sum(k_index, epsilon_index)?;
        let count = self.counts[(k_index, epsilon_index)];
        Some(sum / count as f64)
    }

    /// Mean reduction time in seconds
    pub fn mean_reduction_time(&self, k_index: usize) -> Option<f64> {
        let count = *self.timing_counts.get(k_index)?;
        (count > 0).then(|| self.reduction_time_secs[k_index] / count as f64)
    }

    /// Mean build time in seconds
    pub fn mean_build_time(&self, k_index: usize) -> Option<f64> {
        let count = *self.timing_counts.get(k_index)?;
        (count > 0).then(|| self.build_time_secs[k_index] / count as f64)
    }
}

/// Errors associated with aggregating results
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    /// Error when there is nothing to aggregate
    #[error("Tried to aggregate no results")]
    Empty,
    /// Error when results were produced on different grids
    #[error(
        "Grid mismatch: expected {expected_k} K × {expected_epsilons} ε, \
         found {found_k} × {found_epsilons}"
    )]
    GridMismatch {
        /// Number of K values of the first result
        expected_k: usize,
        /// Number of radii of the first result
        expected_epsilons: usize,
        /// Number of K values of the mismatched result
        found_k: usize,
        /// Number of radii of the mismatched result
        found_epsilons: usize,
    },
    /// Error when cells of the same grid point carry decisions of different lengths
    #[error("Decision length mismatch: expected {expected}, found {found}")]
    DecisionLengthMismatch {
        /// Length of the first decision seen at the cell
        expected: usize,
        /// Length of the mismatched decision
        found: usize,
    },
}
