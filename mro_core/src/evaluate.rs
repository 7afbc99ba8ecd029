//! Out of sample checks of a decision against held out scenarios
use serde::Serialize;

use crate::robust::LossFunction;
use crate::scenario::{DimensionError, ScenarioSet};

/// A statistic and whether it is within tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModeOutcome {
    /// Value of the statistic, nonpositive when the constraints hold
    pub statistic: f64,
    /// Whether the statistic is at most the tolerance
    pub satisfied: bool,
}

/// Outcome of both evaluation modes for one decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationRecord {
    /// Worst excess at the mean evaluation scenario
    pub strict: ModeOutcome,
    /// Mean over evaluation scenarios of the worst excess
    pub expected: ModeOutcome,
}

/// Checks the uncertain constraints of a template on an evaluation sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutOfSampleEvaluator {
    tolerance: f64,
}

impl Default for OutOfSampleEvaluator {
    fn default() -> Self {
        Self { tolerance: 1e-3 }
    }
}

impl OutOfSampleEvaluator {
    /// Create an evaluator accepting statistics up to `tolerance`
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Tolerance in use
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Evaluate `decision` on `evaluation`
    ///
    /// # Parameters
    /// - `losses`: Losses of the template, as returned when it was formulated
    /// - `decision`: Values of the template's decision variables
    /// - `evaluation`: Held out scenarios
    ///
    /// # Returns
    /// The strict statistic `maxᵢ [lossᵢ(x, mean) − budgetᵢ(x)]` and the expected
    /// statistic `mean over ξ of maxᵢ [lossᵢ(x, ξ) − budgetᵢ(x)]`
    pub fn evaluate(
        &self,
        losses: &[LossFunction],
        decision: &[f64],
        evaluation: &ScenarioSet,
    ) -> Result<EvaluationRecord, DimensionError> {
        if losses.is_empty() {
            return Err(DimensionError::Empty);
        }
        for loss in losses {
            if loss.dimension() != evaluation.dimension() {
                return Err(DimensionError::Mismatch {
                    expected: evaluation.dimension(),
                    found: loss.dimension(),
                });
            }
            if let Some(variable) = loss.max_variable() {
                if variable >= decision.len() {
                    return Err(DimensionError::Mismatch {
                        expected: variable + 1,
                        found: decision.len(),
                    });
                }
            }
        }

        let worst = |scenario: &[f64]| {
            losses
                .iter()
                .map(|loss| loss.excess(decision, scenario))
                .fold(f64::NEG_INFINITY, f64::max)
        };

        let mean = evaluation.mean();
        let strict = worst(mean.as_slice());
        let n = evaluation.num_scenarios();
        let expected = (0..n)
            .map(|i| worst(evaluation.scenario(i).as_slice()))
            .sum::<f64>()
            / n as f64;

        Ok(EvaluationRecord {
            strict: self.outcome(strict),
            expected: self.outcome(expected),
        })
    }

    fn outcome(&self, statistic: f64) -> ModeOutcome {
        ModeOutcome {
            statistic,
            satisfied: statistic <= self.tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::expression::AffineExpr;
    use approx::assert_abs_diff_eq;

    /// loss₀ = −x₀ + ξ₀ x₁, loss₁ = ξ₁ − 2 with budget x₀
    fn losses() -> Vec<LossFunction> {
        vec![
            LossFunction::new(
                AffineExpr::term(0, -1.),
                vec![AffineExpr::term(1, 1.), AffineExpr::zero()],
            ),
            LossFunction::new(
                AffineExpr::constant(-2.),
                vec![AffineExpr::zero(), AffineExpr::constant(1.)],
            )
            .with_budget(AffineExpr::term(0, 1.)),
        ]
    }

    #[test]
    fn strict_and_expected() {
        let set = ScenarioSet::from_rows(&[vec![0., 1.], vec![4., 5.]]).unwrap();
        let decision = [1., 1.];
        let record = OutOfSampleEvaluator::default()
            .evaluate(&losses(), &decision, &set)
            .unwrap();
        // mean (2, 3): loss₀ = 1, loss₁ − budget = 0
        assert_abs_diff_eq!(record.strict.statistic, 1.);
        assert!(!record.strict.satisfied);
        // scenario 0: max(−1, −2) = −1, scenario 1: max(3, 2) = 3
        assert_abs_diff_eq!(record.expected.statistic, 1.);
        assert!(!record.expected.satisfied);

        let safe = [3., 0.5];
        let record = OutOfSampleEvaluator::new(0.)
            .evaluate(&losses(), &safe, &set)
            .unwrap();
        // mean: max(−2, −2) = −2
        assert_abs_diff_eq!(record.strict.statistic, -2.);
        assert!(record.strict.satisfied);
        // scenario 0: max(−3, −4) = −3, scenario 1: max(−1, 0) = 0
        assert_abs_diff_eq!(record.expected.statistic, -1.5);
        assert!(record.expected.satisfied);
    }

    #[test]
    fn tolerance_is_inclusive() {
        let set = ScenarioSet::from_rows(&[vec![1., 0.]]).unwrap();
        let loss = vec![LossFunction::new(
            AffineExpr::constant(-1.),
            vec![AffineExpr::constant(1.001), AffineExpr::zero()],
        )];
        let record = OutOfSampleEvaluator::new(0.5)
            .evaluate(&loss, &[], &set)
            .unwrap();
        assert!(record.strict.satisfied && record.expected.satisfied);
        let record = OutOfSampleEvaluator::new(1e-4)
            .evaluate(&loss, &[], &set)
            .unwrap();
        assert!(!record.strict.satisfied);
        // −1 + 1.5 · 1 is exactly 0.5
        let loss = vec![LossFunction::new(
            AffineExpr::constant(-1.),
            vec![AffineExpr::constant(1.5), AffineExpr::zero()],
        )];
        let record = OutOfSampleEvaluator::new(0.5)
            .evaluate(&loss, &[], &set)
            .unwrap();
        assert_eq!(record.strict.statistic, 0.5);
        assert_eq!(record.expected.statistic, 0.5);
        assert!(record.strict.satisfied && record.expected.satisfied);
        let record = OutOfSampleEvaluator::new(0.4999)
            .evaluate(&loss, &[], &set)
            .unwrap();
        assert!(!record.strict.satisfied && !record.expected.satisfied);
    }

    #[test]
    fn reject_mismatched_inputs() {
        let set = ScenarioSet::from_rows(&[vec![1., 2., 3.]]).unwrap();
        match OutOfSampleEvaluator::default().evaluate(&losses(), &[1., 1.], &set) {
            Err(DimensionError::Mismatch { .. }) => {}
            _ => panic!("Scenario dimension mismatch not caught"),
        }
        let set = ScenarioSet::from_rows(&[vec![1., 2.]]).unwrap();
        match OutOfSampleEvaluator::default().evaluate(&losses(), &[1.], &set) {
            Err(DimensionError::Mismatch { expected: 2, found: 1 }) => {}
            _ => panic!("Short decision not caught"),
        }
        assert_eq!(
            OutOfSampleEvaluator::default().evaluate(&[], &[1.], &set),
            Err(DimensionError::Empty)
        );
    }
}
