//! Provides struct representing an optimization problem
use crate::optimize::constraint::Constraint;
use crate::optimize::expression::AffineExpr;
use crate::optimize::objective::{Objective, ObjectiveSense, ObjectiveTerm};
use crate::optimize::variable::{Variable, VariableBuilder, VariableType};
use indexmap::IndexMap;
use thiserror::Error;

/// An optimization problem
///
/// Variables are referenced by their index (the order they were added in), constraints
/// and parameters by their id.
#[derive(Debug, Clone)]
pub struct Problem {
    /// Objective to optimize
    objective: Objective,
    /// Variables of the optimization problem
    variables: IndexMap<String, Variable>,
    /// Constraints of the optimization problem
    constraints: IndexMap<String, Constraint>,
    /// Named scalar parameters, which scale coefficients of linear constraint terms
    parameters: IndexMap<String, f64>,
    /// Type of problem
    problem_type: ProblemType,
}

impl Problem {
    // region Creation Functions
    /// Create a new optimization problem
    pub fn new(objective_sense: ObjectiveSense) -> Self {
        Self {
            objective: Objective::new(objective_sense),
            variables: IndexMap::new(),
            constraints: IndexMap::new(),
            parameters: IndexMap::new(),
            problem_type: ProblemType::LinearContinuous,
        }
    }

    /// Create a new maximization problem
    pub fn new_maximization() -> Self {
        Self::new(ObjectiveSense::Maximize)
    }

    /// Create a new minimization problem
    pub fn new_minimization() -> Self {
        Self::new(ObjectiveSense::Minimize)
    }

    // endregion Creation Functions

    // region Accessors
    /// The objective of the problem
    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    /// Number of variables in the problem
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Number of constraints in the problem
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Iterate over the variables, in index order
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    /// Get a variable by its index
    pub fn variable(&self, index: usize) -> Option<&Variable> {
        self.variables.get_index(index).map(|(_, v)| v)
    }

    /// Get the index of a variable from its id
    pub fn variable_index(&self, id: &str) -> Option<usize> {
        self.variables.get_index_of(id)
    }

    /// Iterate over the constraints, in insertion order
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    /// Get a constraint by id
    pub fn constraint(&self, id: &str) -> Option<&Constraint> {
        self.constraints.get(id)
    }

    /// Current value of a parameter
    pub fn parameter(&self, id: &str) -> Option<f64> {
        self.parameters.get(id).copied()
    }

    /// Type of the problem, see [`ProblemType`]
    pub fn problem_type(&self) -> ProblemType {
        self.problem_type
    }
    // endregion Accessors

    // region Adding Variables
    /// Add a variable to the optimization problem
    ///
    /// # Returns
    /// The index of the new variable
    pub fn add_variable(&mut self, mut variable: Variable) -> Result<usize, ProblemError> {
        // Validate that the variable can in fact be added to the problem
        self.validate_variable(&variable)?;
        // Update the index of the variable to reflect the current variable count
        let index = self.variables.len();
        variable.index = index;
        let integral = variable.is_integral();
        self.variables.insert(variable.id.clone(), variable);
        // Update the type of the model if needed
        if integral {
            self.problem_type = self.problem_type.with_integers();
        }
        Ok(index)
    }

    /// Create a new variable and add it to the optimization problem
    ///
    /// # Returns
    /// The index of the new variable
    pub fn add_new_variable(
        &mut self,
        id: &str,
        variable_type: VariableType,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<usize, ProblemError> {
        let new_var = VariableBuilder::default()
            .id(id)
            .variable_type(variable_type)
            .lower_bound(lower_bound)
            .upper_bound(upper_bound)
            .build()
            .map_err(|_| ProblemError::InvalidVariableBounds)?;
        self.add_variable(new_var)
    }

    /// Create a block of variables `{prefix}[i]` sharing the same type and bounds
    ///
    /// # Returns
    /// The indices of the new variables
    pub fn add_new_variables(
        &mut self,
        prefix: &str,
        count: usize,
        variable_type: VariableType,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<Vec<usize>, ProblemError> {
        (0..count)
            .map(|i| {
                self.add_new_variable(
                    &format!("{}[{}]", prefix, i),
                    variable_type,
                    lower_bound,
                    upper_bound,
                )
            })
            .collect()
    }
    // endregion Adding Variables

    // region Adding Parameters
    /// Add a named parameter with an initial value
    pub fn add_new_parameter(&mut self, id: &str, value: f64) -> Result<(), ProblemError> {
        if self.parameters.contains_key(id) {
            return Err(ProblemError::ParameterAlreadyExists);
        }
        if !value.is_finite() {
            return Err(ProblemError::InvalidParameterValue);
        }
        self.parameters.insert(id.to_string(), value);
        Ok(())
    }

    /// Update the value of an existing parameter
    pub fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), ProblemError> {
        if !value.is_finite() {
            return Err(ProblemError::InvalidParameterValue);
        }
        match self.parameters.get_mut(id) {
            Some(v) => *v = value,
            None => return Err(ProblemError::NonExistentParameter),
        }
        Ok(())
    }

    /// Iterate over the parameters and their values
    pub fn parameters(&self) -> impl Iterator<Item = (&str, f64)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), *v))
    }
    // endregion Adding Parameters

    // region Adding Constraints
    /// Add a constraint to the problem
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<(), ProblemError> {
        self.validate_constraint(&constraint)?;
        if let Constraint::SecondOrderCone { .. } = constraint {
            self.problem_type = self.problem_type.with_cones();
        }
        self.constraints
            .insert(constraint.get_id().to_string(), constraint);
        Ok(())
    }

    /// Create a new equality constraint and add it to the model
    pub fn add_new_equality_constraint(
        &mut self,
        id: &str,
        variables: &[usize],
        coefficients: &[f64],
        equals: f64,
    ) -> Result<(), ProblemError> {
        self.add_constraint(Constraint::new_equality(
            id,
            variables,
            coefficients,
            equals,
        ))
    }

    /// Create a new inequality constraint and add it to the model
    pub fn add_new_inequality_constraint(
        &mut self,
        id: &str,
        variables: &[usize],
        coefficients: &[f64],
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        self.add_constraint(Constraint::new_inequality(
            id,
            variables,
            coefficients,
            lower_bound,
            upper_bound,
        ))
    }

    /// Add the constraint `expression <= upper_bound`
    pub fn add_affine_upper_constraint(
        &mut self,
        id: &str,
        expression: &AffineExpr,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        self.add_constraint(Constraint::new_affine_upper(id, expression, upper_bound))
    }

    /// Add the constraint `‖numerator‖₂² / denominator <= epigraph`
    pub fn add_quad_over_lin_constraint(
        &mut self,
        id: &str,
        numerator: &[AffineExpr],
        denominator: &AffineExpr,
        epigraph: &AffineExpr,
    ) -> Result<(), ProblemError> {
        self.add_constraint(Constraint::new_quad_over_lin(
            id,
            numerator,
            denominator,
            epigraph,
        ))
    }

    // endregion Adding Constraints

    // region Adding Objective Terms
    /// Add a new term to the objective
    pub fn add_objective_term(
        &mut self,
        objective_term: ObjectiveTerm,
    ) -> Result<(), ProblemError> {
        self.validate_objective_term(&objective_term)?;
        if let ObjectiveTerm::Quadratic { .. } = &objective_term {
            self.problem_type = self.problem_type.with_quadratic();
        }
        self.objective.add_term(objective_term);
        Ok(())
    }

    /// Add a new linear term to the objective
    pub fn add_new_linear_objective_term(
        &mut self,
        variable: usize,
        coefficient: f64,
    ) -> Result<(), ProblemError> {
        self.add_objective_term(ObjectiveTerm::new_linear(variable, coefficient))
    }

    /// Add a new quadratic term to the objective
    pub fn add_new_quadratic_objective_term(
        &mut self,
        variable1: usize,
        variable2: usize,
        coefficient: f64,
    ) -> Result<(), ProblemError> {
        self.add_objective_term(ObjectiveTerm::new_quadratic(
            variable1,
            variable2,
            coefficient,
        ))
    }

    /// Add an affine expression to the objective
    pub fn add_objective_expression(
        &mut self,
        expression: &AffineExpr,
    ) -> Result<(), ProblemError> {
        if let Some(max) = expression.max_variable() {
            if max >= self.variables.len() {
                return Err(ProblemError::NonExistentVariablesInObjective);
            }
        }
        self.objective.add_affine(expression);
        Ok(())
    }

    // endregion Adding Objective Terms

    // region Validation Functions
    /// Check that a variable to be added is valid to add to this problem
    fn validate_variable(&self, variable: &Variable) -> Result<(), ProblemError> {
        // Check if there is already a variable with this id
        if self.variables.contains_key(&variable.id) {
            return Err(ProblemError::VariableIdAlreadyExists);
        };
        // Check if the variable bounds are valid
        if variable.lower_bound > variable.upper_bound
            || variable.lower_bound.is_nan()
            || variable.upper_bound.is_nan()
        {
            return Err(ProblemError::InvalidVariableBounds);
        }
        // Branching needs a finite box for every integral variable
        if variable.is_integral()
            && !(variable.lower_bound.is_finite() && variable.upper_bound.is_finite())
        {
            return Err(ProblemError::UnboundedIntegerVariable);
        }
        Ok(())
    }

    /// Check that a constraint to be added is valid to add to this Problem
    fn validate_constraint(&self, constraint: &Constraint) -> Result<(), ProblemError> {
        // Check that a constraint with the same id doesn't already exist
        if self.constraints.contains_key(constraint.get_id()) {
            return Err(ProblemError::ConstraintAlreadyExists);
        }
        // Check that for inequality constraints the bounds make sense
        match constraint {
            Constraint::Equality { equals, .. } => {
                if !equals.is_finite() {
                    return Err(ProblemError::InvalidConstraintBounds);
                }
            }
            Constraint::Inequality {
                lower_bound,
                upper_bound,
                ..
            } => {
                if lower_bound > upper_bound || lower_bound.is_nan() || upper_bound.is_nan() {
                    return Err(ProblemError::InvalidConstraintBounds);
                }
            }
            Constraint::SecondOrderCone { head, tail, .. } => {
                if tail.is_empty() {
                    return Err(ProblemError::EmptyCone);
                }
                if !head.is_finite() || tail.iter().any(|e| !e.is_finite()) {
                    return Err(ProblemError::NonFiniteCoefficient);
                }
            }
        }
        // Check that the variables in this constraint are in the model
        if constraint
            .get_variables()
            .iter()
            .any(|&v| v >= self.variables.len())
        {
            return Err(ProblemError::NonExistentVariablesInConstraint);
        }
        // And that any referenced parameters exist
        if constraint
            .get_parameters()
            .iter()
            .any(|p| !self.parameters.contains_key(*p))
        {
            return Err(ProblemError::NonExistentParameter);
        }
        // All checks have passed
        Ok(())
    }

    /// Check that an objective term to be added is valid to add to this Problem
    fn validate_objective_term(&self, objective_term: &ObjectiveTerm) -> Result<(), ProblemError> {
        // make sure the variables in the objective are in the model
        if objective_term.max_variable() >= self.variables.len() {
            return Err(ProblemError::NonExistentVariablesInObjective);
        }
        Ok(())
    }

    // endregion Validation Functions

    // region Check Problem
    /// Whether any variable is integer or binary
    pub fn has_integer_variables(&self) -> bool {
        self.variables.values().any(|v| v.is_integral())
    }

    // endregion Check Problem
}

/// Types of optimization problems
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProblemType {
    /// Problem with linear objectives and constraints, and continuous variables
    LinearContinuous,
    /// Problem with quadratic objective, linear constraints, and continuous variables
    QuadraticContinuous,
    /// Problem with second order cone constraints and continuous variables
    ConicContinuous,
    /// Problem with linear objective and constraints, with integer and continuous variables
    LinearMixedInteger,
    /// Problem with a quadratic objective function, and some integer variables
    QuadraticMixedInteger,
    /// Problem with second order cone constraints, and some integer variables
    ConicMixedInteger,
    /// Problem with a quadratic objective, second order cone constraints, and continuous
    /// variables
    QuadraticConicContinuous,
    /// Problem with a quadratic objective, second order cone constraints, and some integer
    /// variables
    QuadraticConicMixedInteger,
}

impl ProblemType {
    /// Whether the problem type includes integer variables
    pub fn is_mixed_integer(&self) -> bool {
        matches!(
            self,
            ProblemType::LinearMixedInteger
                | ProblemType::QuadraticMixedInteger
                | ProblemType::ConicMixedInteger
                | ProblemType::QuadraticConicMixedInteger
        )
    }

    fn with_integers(self) -> Self {
        match self {
            ProblemType::LinearContinuous => ProblemType::LinearMixedInteger,
            ProblemType::QuadraticContinuous => ProblemType::QuadraticMixedInteger,
            ProblemType::ConicContinuous => ProblemType::ConicMixedInteger,
            ProblemType::QuadraticConicContinuous => ProblemType::QuadraticConicMixedInteger,
            other => other,
        }
    }

    fn with_quadratic(self) -> Self {
        match self {
            ProblemType::LinearContinuous => ProblemType::QuadraticContinuous,
            ProblemType::LinearMixedInteger => ProblemType::QuadraticMixedInteger,
            ProblemType::ConicContinuous => ProblemType::QuadraticConicContinuous,
            ProblemType::ConicMixedInteger => ProblemType::QuadraticConicMixedInteger,
            other => other,
        }
    }

    fn with_cones(self) -> Self {
        match self {
            ProblemType::LinearContinuous => ProblemType::ConicContinuous,
            ProblemType::LinearMixedInteger => ProblemType::ConicMixedInteger,
            ProblemType::QuadraticContinuous => ProblemType::QuadraticConicContinuous,
            ProblemType::QuadraticMixedInteger => ProblemType::QuadraticConicMixedInteger,
            other => other,
        }
    }
}

/// Errors associated with the Problem
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProblemError {
    /// Error when trying to add a variable with the same id as an existing variable
    #[error("Tried to add a variable with the same id as an existing variable")]
    VariableIdAlreadyExists,
    /// Error when trying to add variable with invalid bounds
    #[error("Tried to add a variable with lower_bound>upper_bound")]
    InvalidVariableBounds,
    /// Error when an integer or binary variable is given an infinite bound
    #[error("Integer and binary variables must have finite bounds")]
    UnboundedIntegerVariable,
    /// Error when trying to add a constraint with the same id as an existing constraint
    #[error("Tried to add a constraint with the same id as an existing constraint")]
    ConstraintAlreadyExists,
    /// Error when trying to add a constraint with invalid bounds
    #[error("Tried to add an inequality constraint with lower_bound > upper_bound")]
    InvalidConstraintBounds,
    /// Error when trying to add a cone constraint without any terms under the norm
    #[error("Tried to add a second order cone constraint with an empty tail")]
    EmptyCone,
    /// Error when a constraint has a NaN or infinite coefficient
    #[error("Tried to add a constraint with a non-finite coefficient")]
    NonFiniteCoefficient,
    /// Error when trying to add a constraint that contains variables not in the model
    #[error("Tried to add a constraint with variables not in the model")]
    NonExistentVariablesInConstraint,
    /// Error when trying to add an objective term which includes variables not in the model
    #[error("Tried adding an objective term with variables not in the model")]
    NonExistentVariablesInObjective,
    /// Error when trying to perform an update or drop on a variable that doesn't exist
    #[error("Tried to access a variable that doesn't exist")]
    NonExistentVariable,
    /// Error when trying to add a parameter with the same id as an existing parameter
    #[error("Tried to add a parameter with the same id as an existing parameter")]
    ParameterAlreadyExists,
    /// Error when referencing a parameter that doesn't exist
    #[error("Tried to access a parameter that doesn't exist")]
    NonExistentParameter,
    /// Error when setting a parameter to NaN or infinity
    #[error("Parameter values must be finite")]
    InvalidParameterValue,
    /// Error when attaching a parameter to a second order cone constraint
    #[error("Parameters are only supported in linear constraints")]
    ParameterInCone,
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn new_problem() {
        // Check that the specific creation functions work
        let max_problem = Problem::new_maximization();
        assert_eq!(max_problem.objective.sense(), ObjectiveSense::Maximize);

        let min_problem = Problem::new_minimization();
        assert_eq!(min_problem.objective.sense(), ObjectiveSense::Minimize);
    }

    #[test]
    fn add_variables() {
        let mut problem = Problem::new(ObjectiveSense::Maximize);

        // Add a single variable
        let x = problem
            .add_new_variable("x", VariableType::Continuous, 64., 100.)
            .unwrap();
        assert_eq!(x, 0);
        let var = problem.variable(x).unwrap();
        assert_eq!(var.variable_type, VariableType::Continuous);
        assert_eq!(var.index(), 0);
        assert!(
            (var.lower_bound - 64.0).abs() < 1e-25,
            "Variable added with incorrect lower bound"
        );
        assert!(
            (var.upper_bound - 100.0).abs() < 1e-25,
            "Variable added with incorrect upper bound"
        );
        // Check that the problem has the correct type
        assert_eq!(problem.problem_type(), ProblemType::LinearContinuous);

        // Add another variable, this time an integer variable
        let y = problem
            .add_new_variable("y", VariableType::Integer, 64., 100.)
            .unwrap();
        assert_eq!(y, 1);
        assert_eq!(problem.variable_index("y"), Some(1));
        // Check that the problem has updated its type
        assert_eq!(problem.problem_type(), ProblemType::LinearMixedInteger);
    }

    #[test]
    fn add_bad_variable() {
        let mut problem = Problem::new(ObjectiveSense::Maximize);

        // Add a variable with bad bounds
        let res = problem.add_new_variable("x", VariableType::Continuous, 100., 64.);
        assert_eq!(res, Err(ProblemError::InvalidVariableBounds));

        // Integer variables need finite bounds
        let res = problem.add_new_variable("z", VariableType::Integer, 0., f64::INFINITY);
        assert_eq!(res, Err(ProblemError::UnboundedIntegerVariable));

        // Duplicate ids are rejected
        problem
            .add_new_variable("x", VariableType::Continuous, 0., 1.)
            .unwrap();
        let res = problem.add_new_variable("x", VariableType::Continuous, 0., 1.);
        assert_eq!(res, Err(ProblemError::VariableIdAlreadyExists));
    }

    #[test]
    fn add_constraint() {
        let mut problem = Problem::new(ObjectiveSense::Maximize);

        // Add some variables
        let x = problem
            .add_new_variable("x", VariableType::Continuous, 64., 100.)
            .unwrap();
        let y = problem
            .add_new_variable("y", VariableType::Continuous, 64., 100.)
            .unwrap();

        // Add an equality constraint
        problem
            .add_new_equality_constraint("test_equality", &[x, y], &[2., 3.], 200.)
            .unwrap();

        // Check that the constraint was correctly added
        match problem.constraint("test_equality").unwrap() {
            Constraint::Equality { equals, .. } => {
                assert!((equals - 200.).abs() < 1e-25)
            }
            _ => panic!("Incorrect constraint type added"),
        }

        // Add an inequality constraint
        problem
            .add_new_inequality_constraint("test_inequality", &[x, y], &[2., 3.], 100., 200.)
            .unwrap();

        // Check that the constraint was correctly added
        match problem.constraint("test_inequality").unwrap() {
            Constraint::Inequality {
                lower_bound,
                upper_bound,
                ..
            } => {
                assert!((lower_bound - 100.).abs() < 1e-25);
                assert!((upper_bound - 200.).abs() < 1e-25);
            }
            _ => panic!("Incorrect constraint type added"),
        }
        assert_eq!(problem.num_constraints(), 2);
    }

    #[test]
    fn add_bad_constraint() {
        let mut problem = Problem::new(ObjectiveSense::Maximize);

        // Add some variables
        problem
            .add_new_variable("x", VariableType::Continuous, 64., 100.)
            .unwrap();
        problem
            .add_new_variable("y", VariableType::Continuous, 64., 100.)
            .unwrap();

        // Inverted bounds
        let res =
            problem.add_new_inequality_constraint("bad_constraint", &[0, 1], &[2., 3.], 200., 100.);
        assert_eq!(res, Err(ProblemError::InvalidConstraintBounds));

        // Unknown variable
        let res = problem.add_new_equality_constraint("bad_variable", &[0, 7], &[1., 1.], 1.);
        assert_eq!(res, Err(ProblemError::NonExistentVariablesInConstraint));

        // Unknown parameter
        let cons = Constraint::new_inequality("bad_parameter", &[0], &[1.], 0., 1.)
            .with_parametric_term(1, 1., "epsilon")
            .unwrap();
        assert_eq!(
            problem.add_constraint(cons),
            Err(ProblemError::NonExistentParameter)
        );
    }

    #[test]
    fn quadratic_then_cone() {
        let mut problem = Problem::new_minimization();
        let x = problem
            .add_new_variables("x", 3, VariableType::Continuous, 0., f64::INFINITY)
            .unwrap();
        problem.add_new_quadratic_objective_term(x[0], x[1], 2.).unwrap();
        assert_eq!(problem.problem_type(), ProblemType::QuadraticContinuous);
        problem
            .add_constraint(Constraint::new_second_order_cone(
                "cone",
                AffineExpr::term(x[2], 1.),
                vec![AffineExpr::term(x[0], 1.)],
            ))
            .unwrap();
        assert_eq!(problem.problem_type(), ProblemType::QuadraticConicContinuous);
        assert!(!problem.problem_type().is_mixed_integer());
        problem
            .add_new_variable("open", VariableType::Binary, 0., 1.)
            .unwrap();
        assert_eq!(problem.problem_type(), ProblemType::QuadraticConicMixedInteger);
    }

    #[test]
    fn cones_and_parameters() {
        let mut problem = Problem::new_minimization();
        let x = problem
            .add_new_variables("x", 2, VariableType::Continuous, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        let b = problem
            .add_new_variable("open", VariableType::Binary, 0., 1.)
            .unwrap();
        assert_eq!(problem.problem_type(), ProblemType::LinearMixedInteger);
        problem
            .add_quad_over_lin_constraint(
                "qol",
                &[AffineExpr::term(x[0], 1.)],
                &AffineExpr::term(x[1], 1.),
                &AffineExpr::term(b, 1.),
            )
            .unwrap();
        assert_eq!(problem.problem_type(), ProblemType::ConicMixedInteger);
        problem.add_new_quadratic_objective_term(x[0], x[0], 1.).unwrap();
        assert_eq!(problem.problem_type(), ProblemType::QuadraticConicMixedInteger);
        assert!(problem.problem_type().is_mixed_integer());

        problem.add_new_parameter("epsilon", 0.5).unwrap();
        assert_eq!(problem.parameter("epsilon"), Some(0.5));
        problem.set_parameter("epsilon", 2.).unwrap();
        assert_eq!(problem.parameter("epsilon"), Some(2.));
        assert_eq!(
            problem.set_parameter("rho", 2.),
            Err(ProblemError::NonExistentParameter)
        );
        assert_eq!(
            problem.set_parameter("epsilon", f64::NAN),
            Err(ProblemError::InvalidParameterValue)
        );
    }
}
