//! Provides struct for representing a constraint in an optimization problem
use std::fmt::{Display, Formatter};

use crate::optimize::expression::AffineExpr;
use crate::optimize::problem::ProblemError;

/// Represents a constraint in an optimization problem
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Represents an equality constraint, where `terms` = `equals`
    Equality {
        /// Identifier of the constraint
        id: String,
        /// Linear terms which are added together, see [`ConstraintTerm`] for more
        terms: Vec<ConstraintTerm>,
        /// The right hand side of the equality constraint
        equals: f64,
    },
    /// Represents an inequality constraint, `lower_bound` <= `terms` <= `upper_bound`
    Inequality {
        /// Identifier of the constraint
        id: String,
        /// Linear terms which are added together, see [`ConstraintTerm`] for more
        terms: Vec<ConstraintTerm>,
        /// The lowest value the sum of the terms can take, may be `f64::NEG_INFINITY`
        lower_bound: f64,
        /// The highest value the sum of the terms can take, may be `f64::INFINITY`
        upper_bound: f64,
    },
    /// Represents a second order cone constraint, `‖tail‖₂ <= head`
    SecondOrderCone {
        /// Identifier of the constraint
        id: String,
        /// Affine expression bounding the norm
        head: AffineExpr,
        /// Affine expressions whose euclidean norm is bounded
        tail: Vec<AffineExpr>,
    },
}

impl Constraint {
    /// Create a new equality constraint
    ///
    /// # Parameters
    /// - `id`: Identifier of the constraint
    /// - `variables`: A slice of variable indices
    /// - `coefficients`: A slice of coefficients for the variables
    /// - `equals`: The right hand side of the equality
    ///
    /// # Examples
    /// ```rust
    /// use mro_core::optimize::constraint::Constraint;
    /// // Create a constraint representing 3*x0 + 2*x1 = 6
    /// let new_constraint = Constraint::new_equality("demand", &[0, 1], &[3.0, 2.0], 6.);
    /// ```
    pub fn new_equality(id: &str, variables: &[usize], coefficients: &[f64], equals: f64) -> Self {
        Constraint::Equality {
            id: id.to_string(),
            terms: Constraint::zip_into_terms(variables, coefficients),
            equals,
        }
    }

    /// Create a new inequality constraint
    ///
    /// # Parameters
    /// - `id`: Identifier of the constraint
    /// - `variables`: A slice of variable indices
    /// - `coefficients`: A slice of coefficients for the variables
    /// - `lower_bound`: The lowest value the constraint can take
    /// - `upper_bound`: The highest value the constraint can take
    ///
    /// # Examples
    /// ```rust
    /// use mro_core::optimize::constraint::Constraint;
    /// // represents the inequality 2 <= 3*x0 + 2*x1 <= 6
    /// let new_constraint = Constraint::new_inequality("capacity", &[0, 1], &[3.0, 2.0], 2., 6.);
    /// ```
    pub fn new_inequality(
        id: &str,
        variables: &[usize],
        coefficients: &[f64],
        lower_bound: f64,
        upper_bound: f64,
    ) -> Self {
        Constraint::Inequality {
            id: id.to_string(),
            terms: Constraint::zip_into_terms(variables, coefficients),
            lower_bound,
            upper_bound,
        }
    }

    /// Create the inequality `expression <= upper_bound`, moving the constant of the
    /// expression to the right hand side
    pub fn new_affine_upper(id: &str, expression: &AffineExpr, upper_bound: f64) -> Self {
        Constraint::Inequality {
            id: id.to_string(),
            terms: expression
                .terms
                .iter()
                .map(|t| ConstraintTerm::new(t.variable, t.coefficient))
                .collect(),
            lower_bound: f64::NEG_INFINITY,
            upper_bound: upper_bound - expression.constant,
        }
    }

    /// Create the second order cone constraint `‖tail‖₂ <= head`
    pub fn new_second_order_cone(id: &str, head: AffineExpr, tail: Vec<AffineExpr>) -> Self {
        Constraint::SecondOrderCone {
            id: id.to_string(),
            head,
            tail,
        }
    }

    /// Create the constraint `‖numerator‖₂² / denominator <= epigraph`
    ///
    /// The quadratic-over-linear function is encoded exactly as the second order cone
    /// `‖(2 * numerator, denominator - epigraph)‖₂ <= denominator + epigraph`, which also
    /// forces `denominator >= 0` and `epigraph >= 0`.
    pub fn new_quad_over_lin(
        id: &str,
        numerator: &[AffineExpr],
        denominator: &AffineExpr,
        epigraph: &AffineExpr,
    ) -> Self {
        let head = denominator.clone().plus(epigraph);
        let mut tail: Vec<AffineExpr> = numerator.iter().map(|v| v.clone().scaled(2.)).collect();
        tail.push(denominator.clone().plus(&epigraph.clone().scaled(-1.)));
        Constraint::new_second_order_cone(id, head, tail)
    }

    /// Add a term whose coefficient is `scale` times the current value of a named
    /// problem parameter
    ///
    /// Parameters are only supported in linear constraints, second order cone constraints
    /// return [`ProblemError::ParameterInCone`].
    pub fn with_parametric_term(
        mut self,
        variable: usize,
        scale: f64,
        parameter: &str,
    ) -> Result<Self, ProblemError> {
        match &mut self {
            Constraint::Equality { terms, .. } | Constraint::Inequality { terms, .. } => {
                terms.push(ConstraintTerm {
                    variable,
                    coefficient: scale,
                    parameter: Some(parameter.to_string()),
                });
            }
            Constraint::SecondOrderCone { .. } => return Err(ProblemError::ParameterInCone),
        }
        Ok(self)
    }

    /// Get the id of the constraint
    pub fn get_id(&self) -> &str {
        match self {
            Constraint::Equality { id, .. }
            | Constraint::Inequality { id, .. }
            | Constraint::SecondOrderCone { id, .. } => id,
        }
    }

    /// Get the indices of all variables referenced by the constraint
    pub fn get_variables(&self) -> Vec<usize> {
        match self {
            Constraint::Equality { terms, .. } | Constraint::Inequality { terms, .. } => {
                terms.iter().map(|t| t.variable).collect()
            }
            Constraint::SecondOrderCone { head, tail, .. } => std::iter::once(head)
                .chain(tail.iter())
                .flat_map(|e| e.terms.iter().map(|t| t.variable))
                .collect(),
        }
    }

    /// Get the names of all parameters referenced by the constraint
    pub fn get_parameters(&self) -> Vec<&str> {
        match self {
            Constraint::Equality { terms, .. } | Constraint::Inequality { terms, .. } => terms
                .iter()
                .filter_map(|t| t.parameter.as_deref())
                .collect(),
            Constraint::SecondOrderCone { .. } => Vec::new(),
        }
    }

    /// Take a slice of variable indices, and a slice of coefficients and zip
    /// them together into a vec of ConstraintTerms
    fn zip_into_terms(variables: &[usize], coefficients: &[f64]) -> Vec<ConstraintTerm> {
        variables
            .iter()
            .zip(coefficients)
            .map(|(&var, &coef)| ConstraintTerm::new(var, coef))
            .collect()
    }

    /// Convert a slice of terms into a String representation
    fn terms_to_string(terms: &[ConstraintTerm]) -> String {
        if terms.is_empty() {
            return "0".to_string();
        }
        terms
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::Equality { terms, equals, .. } => {
                write!(f, "{} = {}", Self::terms_to_string(terms), equals)
            }
            Constraint::Inequality {
                terms,
                lower_bound,
                upper_bound,
                ..
            } => write!(
                f,
                "{} <= {} <= {}",
                lower_bound,
                Self::terms_to_string(terms),
                upper_bound
            ),
            Constraint::SecondOrderCone { head, tail, .. } => {
                let tail = tail
                    .iter()
                    .map(|e| format!("({})", e))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "||{}|| <= {}", tail, head)
            }
        }
    }
}

/// Represents a single term in a linear constraint, specifically
/// represents the multiplication of the `variable` by the `coefficient`
///
/// If `parameter` is set, the effective coefficient is `coefficient` times the current
/// value of that parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintTerm {
    /// Index of the variable
    pub(crate) variable: usize,
    /// The coefficient for the variable
    pub(crate) coefficient: f64,
    /// Name of the parameter scaling the coefficient
    pub(crate) parameter: Option<String>,
}

impl ConstraintTerm {
    /// Create a new term with a fixed coefficient
    pub fn new(variable: usize, coefficient: f64) -> Self {
        Self {
            variable,
            coefficient,
            parameter: None,
        }
    }
}

impl Display for ConstraintTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.parameter {
            Some(p) => write!(f, "{}*{}*x{}", self.coefficient, p, self.variable),
            None => write!(f, "{}*x{}", self.coefficient, self.variable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_upper_moves_constant() {
        let expr = AffineExpr::term(0, 2.).plus_constant(3.);
        match Constraint::new_affine_upper("c", &expr, 5.) {
            Constraint::Inequality {
                upper_bound,
                lower_bound,
                terms,
                ..
            } => {
                assert_eq!(upper_bound, 2.);
                assert!(lower_bound.is_infinite());
                assert_eq!(terms.len(), 1);
            }
            _ => panic!("Incorrect constraint type created"),
        }
    }

    #[test]
    fn quad_over_lin_cone_shape() {
        let v = vec![AffineExpr::term(0, 1.), AffineExpr::term(1, 1.)];
        let cons = Constraint::new_quad_over_lin(
            "qol",
            &v,
            &AffineExpr::term(2, 4.),
            &AffineExpr::term(3, 1.),
        );
        match &cons {
            Constraint::SecondOrderCone { head, tail, .. } => {
                assert_eq!(tail.len(), 3);
                // at v = (1, 1), lambda = 1/2, u = 1 the cone is tight: ‖v‖² = 4 * lambda * u
                let values = [1., 1., 0.5, 1.];
                let norm = tail
                    .iter()
                    .map(|e| e.evaluate(&values).powi(2))
                    .sum::<f64>()
                    .sqrt();
                assert!((norm - head.evaluate(&values)).abs() < 1e-12);
            }
            _ => panic!("Incorrect constraint type created"),
        }
        assert_eq!(cons.get_variables(), vec![2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn parametric_terms() {
        let cons = Constraint::new_inequality("budget", &[0], &[1.], f64::NEG_INFINITY, 0.)
            .with_parametric_term(1, 1., "epsilon")
            .unwrap();
        assert_eq!(cons.get_parameters(), vec!["epsilon"]);
        assert_eq!(format!("{}", cons), "-inf <= 1*x0 + 1*epsilon*x1 <= 0");

        let cone = Constraint::new_second_order_cone(
            "cone",
            AffineExpr::term(0, 1.),
            vec![AffineExpr::term(1, 1.)],
        );
        assert_eq!(
            cone.with_parametric_term(0, 1., "epsilon"),
            Err(ProblemError::ParameterInCone)
        );
    }
}
