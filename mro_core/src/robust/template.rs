//! Problem templates and the losses they expose to the robust counterpart
use nalgebra::{DMatrix, SymmetricEigen};
use thiserror::Error;

use crate::optimize::expression::AffineExpr;
use crate::optimize::problem::{Problem, ProblemError};

/// A family of decision problems with an uncertain constraint
///
/// A template adds its decision variables, nominal objective and deterministic
/// constraints to an empty problem, and returns the losses whose expectation must stay
/// below their budgets. Variables added by the template come first in the problem, so
/// the template's decision is the prefix of the solution vector.
pub trait ProblemTemplate: Send + Sync {
    /// Name of the template, for logging
    fn name(&self) -> &str;

    /// Dimension m of the scenarios the losses are evaluated on
    fn scenario_dimension(&self) -> usize;

    /// Add the template to `problem`, returning one loss per constraint index
    fn formulate(&self, problem: &mut Problem) -> Result<Vec<LossFunction>, TemplateError>;
}

/// Quadratic form `xᵀQx` over a subset of the variables
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticForm {
    /// Indices of the variables the form is over
    pub variables: Vec<usize>,
    /// Symmetric positive semidefinite matrix, `variables.len()` square
    pub matrix: DMatrix<f64>,
}

impl QuadraticForm {
    /// Value of the form at `x`
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let n = self.variables.len();
        let mut total = 0.;
        for i in 0..n {
            for j in 0..n {
                total += self.matrix[(i, j)] * x[self.variables[i]] * x[self.variables[j]];
            }
        }
        total
    }

    /// Factor the form as `‖Lᵀx‖²`, returning the rows of `Lᵀx`
    ///
    /// None when the matrix has a negative eigenvalue beyond round off.
    pub fn factor(&self) -> Option<Vec<AffineExpr>> {
        let symmetric = (&self.matrix + self.matrix.transpose()) * 0.5;
        let scale = symmetric.amax().max(1.);
        let eigen = SymmetricEigen::new(symmetric);
        let mut rows = Vec::new();
        for (k, &value) in eigen.eigenvalues.iter().enumerate() {
            if value < -1e-9 * scale {
                return None;
            }
            if value <= 1e-12 * scale {
                continue;
            }
            let root = value.sqrt();
            let column = eigen.eigenvectors.column(k);
            let mut row = AffineExpr::zero();
            for (position, &variable) in self.variables.iter().enumerate() {
                let coefficient = root * column[position];
                if coefficient != 0. {
                    row.add_term(variable, coefficient);
                }
            }
            rows.push(row);
        }
        Some(rows)
    }
}

/// A loss `offset(x) + xᵀQx + Σⱼ ξⱼ vⱼ(x)` and its budget `budget(x)`
///
/// The robust counterpart bounds the worst case expected loss over the ambiguity set
/// by the budget. `offset`, every `vⱼ` and `budget` are affine in the decision `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct LossFunction {
    /// Part of the loss not multiplied by the scenario
    pub offset: AffineExpr,
    /// Coefficient of each scenario component, one per scenario dimension
    pub coefficients: Vec<AffineExpr>,
    /// Optional convex quadratic part
    pub quadratic: Option<QuadraticForm>,
    /// Upper bound on the expected loss
    pub budget: AffineExpr,
}

impl LossFunction {
    /// Create a loss with a zero budget and no quadratic part
    pub fn new(offset: AffineExpr, coefficients: Vec<AffineExpr>) -> Self {
        Self {
            offset,
            coefficients,
            quadratic: None,
            budget: AffineExpr::zero(),
        }
    }

    /// Set the budget of the loss
    pub fn with_budget(mut self, budget: AffineExpr) -> Self {
        self.budget = budget;
        self
    }

    /// Add the quadratic part `xᵀQx` over `variables`
    pub fn with_quadratic(mut self, variables: Vec<usize>, matrix: DMatrix<f64>) -> Self {
        self.quadratic = Some(QuadraticForm { variables, matrix });
        self
    }

    /// Number of scenario components the loss expects
    pub fn dimension(&self) -> usize {
        self.coefficients.len()
    }

    /// Loss at decision `x` and scenario `scenario`
    pub fn evaluate(&self, x: &[f64], scenario: &[f64]) -> f64 {
        let linear = self
            .coefficients
            .iter()
            .zip(scenario)
            .map(|(v, xi)| xi * v.evaluate(x))
            .sum::<f64>();
        let quadratic = self.quadratic.as_ref().map_or(0., |q| q.evaluate(x));
        self.offset.evaluate(x) + quadratic + linear
    }

    /// Loss minus budget at decision `x` and scenario `scenario`, positive when violated
    pub fn excess(&self, x: &[f64], scenario: &[f64]) -> f64 {
        self.evaluate(x, scenario) - self.budget.evaluate(x)
    }

    /// Largest variable index the loss references
    pub(crate) fn max_variable(&self) -> Option<usize> {
        std::iter::once(&self.offset)
            .chain(self.coefficients.iter())
            .chain(std::iter::once(&self.budget))
            .filter_map(|e| e.max_variable())
            .chain(
                self.quadratic
                    .iter()
                    .flat_map(|q| q.variables.iter().copied()),
            )
            .max()
    }

    /// Whether every coefficient of the loss is finite
    pub(crate) fn is_finite(&self) -> bool {
        self.offset.is_finite()
            && self.budget.is_finite()
            && self.coefficients.iter().all(|v| v.is_finite())
            && self
                .quadratic
                .as_ref()
                .map_or(true, |q| q.matrix.iter().all(|v| v.is_finite()))
    }
}

/// Errors associated with problem templates and their losses
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    /// Error when a template returns no losses
    #[error("Template {0} returned no losses")]
    NoLosses(String),
    /// Error when a loss references a variable the template did not add
    #[error("Loss {loss} references variable {variable} which is not a template decision")]
    UnknownVariable {
        /// Index of the loss
        loss: usize,
        /// Index of the variable
        variable: usize,
    },
    /// Error when a loss has a NaN or infinite coefficient
    #[error("Loss {0} has a non-finite coefficient")]
    NonFiniteCoefficient(usize),
    /// Error when the quadratic part of a loss is not square or does not match its variables
    #[error("Loss {0} has a malformed quadratic form")]
    InvalidQuadraticForm(usize),
    /// Error when the quadratic part of a loss is not positive semidefinite
    #[error("Loss {0} is not convex in the decision")]
    NonConvexLoss(usize),
    /// Error when the template parameters are inconsistent
    #[error("Invalid template parameters: {0}")]
    InvalidParameters(String),
    /// Error from the modeling layer while formulating
    #[error(transparent)]
    Problem(#[from] ProblemError),
}
