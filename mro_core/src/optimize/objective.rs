//! Provides struct for representing an optimization problem's objective

use crate::optimize::expression::AffineExpr;

/// Represents the Objective of an optimization problem
#[derive(Debug, Clone)]
pub struct Objective {
    /// Terms included in the objective (See [`ObjectiveTerm`])
    terms: Vec<ObjectiveTerm>,
    /// Constant offset added to the objective value
    constant: f64,
    /// Sense of the objective (maximize, or minimize), see [`ObjectiveSense`]
    sense: ObjectiveSense,
}

impl Objective {
    /// Create a new empty objective, with a given sense
    pub fn new(sense: ObjectiveSense) -> Self {
        Self {
            terms: Vec::new(),
            constant: 0.,
            sense,
        }
    }

    /// Get the sense of the objective
    pub fn sense(&self) -> ObjectiveSense {
        self.sense
    }

    /// Get the terms of the objective
    pub fn terms(&self) -> &[ObjectiveTerm] {
        &self.terms
    }

    /// Get the constant offset of the objective
    pub fn constant(&self) -> f64 {
        self.constant
    }

    /// Add a new term to the objective
    pub fn add_term(&mut self, term: ObjectiveTerm) {
        self.terms.push(term);
    }

    /// Add an affine expression to the objective, its constant is added to the offset
    pub fn add_affine(&mut self, expression: &AffineExpr) {
        self.constant += expression.constant;
        self.terms.extend(
            expression
                .terms
                .iter()
                .map(|t| ObjectiveTerm::new_linear(t.variable, t.coefficient)),
        );
    }
}

/// Represents the sense of the objective, whether it should be maximized or minimized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveSense {
    /// The objective should be minimized
    Minimize,
    /// The objective should be maximized
    Maximize,
}

// region Objective Terms
/// A term in the objective
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectiveTerm {
    /// A quadratic term in the objective, `coef * var1 * var2`
    Quadratic {
        /// Index of the first variable in the objective term
        var1: usize,
        /// Index of the second variable in the objective term
        var2: usize,
        /// Coefficient for quadratic term
        coef: f64,
    },
    /// A linear term in the objective, `coef * var`
    Linear {
        /// Index of the variable in objective term
        var: usize,
        /// Coefficient for linear term
        coef: f64,
    },
}

impl ObjectiveTerm {
    /// Create a new quadratic objective term
    pub fn new_quadratic(var1: usize, var2: usize, coef: f64) -> Self {
        ObjectiveTerm::Quadratic { var1, var2, coef }
    }

    /// Create a new linear objective term
    pub fn new_linear(var: usize, coef: f64) -> Self {
        ObjectiveTerm::Linear { var, coef }
    }

    /// Largest variable index referenced by the term
    pub fn max_variable(&self) -> usize {
        match *self {
            ObjectiveTerm::Quadratic { var1, var2, .. } => var1.max(var2),
            ObjectiveTerm::Linear { var, .. } => var,
        }
    }
}

// endregion Objective Terms

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_terms_and_offset() {
        let mut objective = Objective::new(ObjectiveSense::Minimize);
        objective.add_term(ObjectiveTerm::new_quadratic(0, 1, 3.));
        objective.add_affine(&AffineExpr::term(1, 2.).plus_constant(4.));
        assert_eq!(objective.constant(), 4.);
        assert_eq!(
            objective.terms(),
            &[
                ObjectiveTerm::new_quadratic(0, 1, 3.),
                ObjectiveTerm::new_linear(1, 2.)
            ]
        );
        assert_eq!(objective.terms()[0].max_variable(), 1);
    }
}
