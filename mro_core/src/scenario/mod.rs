//! Scenario data: empirical samples, their reduction, and per repetition experiment data
pub mod reduce;

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// An empirical sample of N scenarios of dimension m, one scenario per row
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSet {
    data: DMatrix<f64>,
}

impl ScenarioSet {
    /// Create a scenario set from an N×m matrix
    pub fn new(data: DMatrix<f64>) -> Result<Self, DimensionError> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(DimensionError::Empty);
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(DimensionError::NonFinite);
        }
        Ok(Self { data })
    }

    /// Create a scenario set from a slice of rows, which must all have the same length
    ///
    /// # Examples
    /// ```rust
    /// use mro_core::scenario::ScenarioSet;
    /// let set = ScenarioSet::from_rows(&[vec![1., 2.], vec![3., 4.]]).unwrap();
    /// assert_eq!(set.num_scenarios(), 2);
    /// assert_eq!(set.mean()[1], 3.);
    /// ```
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, DimensionError> {
        let m = rows.first().map_or(0, |r| r.len());
        if let Some(bad) = rows.iter().find(|r| r.len() != m) {
            return Err(DimensionError::Mismatch {
                expected: m,
                found: bad.len(),
            });
        }
        Self::new(DMatrix::from_fn(rows.len(), m, |i, j| rows[i][j]))
    }

    /// Number of scenarios N
    pub fn num_scenarios(&self) -> usize {
        self.data.nrows()
    }

    /// Dimension m of each scenario
    pub fn dimension(&self) -> usize {
        self.data.ncols()
    }

    /// The underlying N×m matrix
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Scenario `i` as a vector
    pub fn scenario(&self, i: usize) -> DVector<f64> {
        self.data.row(i).transpose()
    }

    /// Mean scenario
    pub fn mean(&self) -> DVector<f64> {
        self.data.row_mean().transpose()
    }
}

/// A reduced distribution: K points with nonnegative weights summing to one
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedDistribution {
    pub(crate) points: DMatrix<f64>,
    pub(crate) weights: DVector<f64>,
    pub(crate) inertia: f64,
    pub(crate) assignment: Vec<usize>,
}

impl ReducedDistribution {
    /// The identity reduction, every scenario its own point with weight 1/N
    pub fn identity(scenarios: &ScenarioSet) -> Self {
        let n = scenarios.num_scenarios();
        Self {
            points: scenarios.data().clone(),
            weights: DVector::from_element(n, 1. / n as f64),
            inertia: 0.,
            assignment: (0..n).collect(),
        }
    }

    /// Number of points K
    pub fn num_points(&self) -> usize {
        self.points.nrows()
    }

    /// Dimension m of each point
    pub fn dimension(&self) -> usize {
        self.points.ncols()
    }

    /// K×m matrix of points, one per row
    pub fn points(&self) -> &DMatrix<f64> {
        &self.points
    }

    /// Point `k` as a vector
    pub fn point(&self, k: usize) -> DVector<f64> {
        self.points.row(k).transpose()
    }

    /// Probability weight of each point
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// Sum of squared distances from each scenario to the point it was assigned to
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Index of the point each original scenario was assigned to
    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }
}

/// Training and evaluation samples for every repetition of an experiment
#[derive(Debug, Clone)]
pub struct ExperimentData {
    training: Vec<ScenarioSet>,
    evaluation: Vec<ScenarioSet>,
}

impl ExperimentData {
    /// Pair the training and evaluation samples of each repetition
    ///
    /// Both lists must have the same length, and each repetition's samples the same
    /// dimension.
    pub fn new(
        training: Vec<ScenarioSet>,
        evaluation: Vec<ScenarioSet>,
    ) -> Result<Self, DimensionError> {
        if training.len() != evaluation.len() {
            return Err(DimensionError::RepetitionCount {
                training: training.len(),
                evaluation: evaluation.len(),
            });
        }
        if training.is_empty() {
            return Err(DimensionError::Empty);
        }
        let m = training[0].dimension();
        for set in training.iter().chain(evaluation.iter()) {
            if set.dimension() != m {
                return Err(DimensionError::Mismatch {
                    expected: m,
                    found: set.dimension(),
                });
            }
        }
        Ok(Self {
            training,
            evaluation,
        })
    }

    /// Number of repetitions
    pub fn repetitions(&self) -> usize {
        self.training.len()
    }

    /// Scenario dimension shared by every sample
    pub fn dimension(&self) -> usize {
        self.training[0].dimension()
    }

    /// Training sample of repetition `r`
    pub fn training(&self, r: usize) -> Option<&ScenarioSet> {
        self.training.get(r)
    }

    /// Evaluation sample of repetition `r`
    pub fn evaluation(&self, r: usize) -> Option<&ScenarioSet> {
        self.evaluation.get(r)
    }
}

/// Errors associated with the shape of scenario data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DimensionError {
    /// Error when a sample has no scenarios or zero dimension
    #[error("Tried to create an empty scenario set")]
    Empty,
    /// Error when a sample contains NaN or infinite values
    #[error("Tried to create a scenario set with non-finite values")]
    NonFinite,
    /// Error when dimensions disagree
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    Mismatch {
        /// Expected dimension
        expected: usize,
        /// Dimension found
        found: usize,
    },
    /// Error when training and evaluation samples have different numbers of repetitions
    #[error("Got {training} training samples and {evaluation} evaluation samples")]
    RepetitionCount {
        /// Number of training samples
        training: usize,
        /// Number of evaluation samples
        evaluation: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_bad_sets() {
        assert_eq!(ScenarioSet::from_rows(&[]), Err(DimensionError::Empty));
        assert_eq!(
            ScenarioSet::from_rows(&[vec![1., 2.], vec![1.]]),
            Err(DimensionError::Mismatch {
                expected: 2,
                found: 1
            })
        );
        assert_eq!(ScenarioSet::from_rows(&[vec![f64::NAN]]), Err(DimensionError::NonFinite));
    }

    #[test]
    fn identity_reduction() {
        let set = ScenarioSet::from_rows(&[vec![1.], vec![2.], vec![3.], vec![4.]]).unwrap();
        let reduced = ReducedDistribution::identity(&set);
        assert_eq!(reduced.num_points(), 4);
        assert_eq!(reduced.weights().sum(), 1.);
        assert_eq!(reduced.point(2)[0], 3.);
        assert_eq!(reduced.inertia(), 0.);
    }

    #[test]
    fn experiment_data_shapes() {
        let a = ScenarioSet::from_rows(&[vec![1., 2.]]).unwrap();
        let b = ScenarioSet::from_rows(&[vec![1., 2., 3.]]).unwrap();
        match ExperimentData::new(vec![a.clone()], vec![]) {
            Err(DimensionError::RepetitionCount { .. }) => {}
            _ => panic!("Repetition count mismatch not caught"),
        }
        match ExperimentData::new(vec![a.clone()], vec![b]) {
            Err(DimensionError::Mismatch { .. }) => {}
            _ => panic!("Dimension mismatch not caught"),
        }
        let data = ExperimentData::new(vec![a.clone()], vec![a]).unwrap();
        assert_eq!(data.repetitions(), 1);
        assert_eq!(data.dimension(), 2);
    }
}
