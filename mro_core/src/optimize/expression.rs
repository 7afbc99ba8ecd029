//! Affine expressions over problem variables
use std::fmt::{Display, Formatter};

/// A single `coefficient * variable` term, the variable referenced by its index in the problem
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearTerm {
    /// Index of the variable in the problem
    pub variable: usize,
    /// Coefficient multiplying the variable
    pub coefficient: f64,
}

/// An affine expression `constant + Σ coefficient * variable`
///
/// Terms referencing the same variable are allowed, they are summed when the expression is
/// evaluated or assembled into a solver matrix.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AffineExpr {
    /// Constant offset of the expression
    pub constant: f64,
    /// Linear terms of the expression
    pub terms: Vec<LinearTerm>,
}

impl AffineExpr {
    /// Create an expression with no terms
    pub fn zero() -> Self {
        Self::default()
    }

    /// Create a constant expression
    pub fn constant(value: f64) -> Self {
        Self {
            constant: value,
            terms: Vec::new(),
        }
    }

    /// Create the expression `coefficient * variable`
    pub fn term(variable: usize, coefficient: f64) -> Self {
        Self {
            constant: 0.,
            terms: vec![LinearTerm {
                variable,
                coefficient,
            }],
        }
    }

    /// Zip a slice of variable indices with a slice of coefficients into an expression
    ///
    /// # Examples
    /// ```rust
    /// use mro_core::optimize::expression::AffineExpr;
    /// // 3*x0 + 2*x1 + 1
    /// let expr = AffineExpr::from_terms(&[0, 1], &[3., 2.]).plus_constant(1.);
    /// assert_eq!(expr.evaluate(&[1., 1.]), 6.);
    /// ```
    pub fn from_terms(variables: &[usize], coefficients: &[f64]) -> Self {
        Self {
            constant: 0.,
            terms: variables
                .iter()
                .zip(coefficients)
                .map(|(&variable, &coefficient)| LinearTerm {
                    variable,
                    coefficient,
                })
                .collect(),
        }
    }

    /// Add a term to the expression
    pub fn add_term(&mut self, variable: usize, coefficient: f64) {
        self.terms.push(LinearTerm {
            variable,
            coefficient,
        });
    }

    /// Return the expression with a term added
    pub fn with_term(mut self, variable: usize, coefficient: f64) -> Self {
        self.add_term(variable, coefficient);
        self
    }

    /// Return the expression with `value` added to the constant
    pub fn plus_constant(mut self, value: f64) -> Self {
        self.constant += value;
        self
    }

    /// Return the sum of this expression and `other`
    pub fn plus(mut self, other: &AffineExpr) -> Self {
        self.constant += other.constant;
        self.terms.extend_from_slice(&other.terms);
        self
    }

    /// Return the expression multiplied by `factor`
    pub fn scaled(mut self, factor: f64) -> Self {
        self.constant *= factor;
        self.terms
            .iter_mut()
            .for_each(|t| t.coefficient *= factor);
        self
    }

    /// Evaluate the expression at the given variable values
    ///
    /// # Panics
    /// If a term references a variable outside of `values`
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .fold(self.constant, |acc, t| acc + t.coefficient * values[t.variable])
    }

    /// Largest variable index referenced by the expression
    pub fn max_variable(&self) -> Option<usize> {
        self.terms.iter().map(|t| t.variable).max()
    }

    /// Whether the constant and every coefficient are finite
    pub fn is_finite(&self) -> bool {
        self.constant.is_finite() && self.terms.iter().all(|t| t.coefficient.is_finite())
    }
}

impl Display for AffineExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for t in &self.terms {
            write!(f, "{}*x{} + ", t.coefficient, t.variable)?;
        }
        write!(f, "{}", self.constant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_sums_repeated_terms() {
        let expr = AffineExpr::term(0, 2.).with_term(0, 3.).with_term(1, -1.);
        assert_eq!(expr.evaluate(&[1., 4.]), 1.);
    }

    #[test]
    fn scale_and_add() {
        let a = AffineExpr::term(0, 1.).plus_constant(2.);
        let b = AffineExpr::term(1, 1.);
        let c = a.plus(&b).scaled(-2.);
        assert_eq!(c.evaluate(&[1., 1.]), -8.);
        assert_eq!(c.max_variable(), Some(1));
        assert_eq!(AffineExpr::constant(4.).max_variable(), None);
    }
}
