//! Builds the Wasserstein robust counterpart of a template over a reduced distribution
//!
//! For a loss `ℓ(x, ξ) = offset(x) + xᵀQx + ξ·v(x)` with budget `b(x)`, reduced points
//! `ξₖ` with weights `wₖ`, and a type-2 Wasserstein ball of radius ε, the worst case
//! expectation is bounded by the budget through
//!
//! ```text
//! ε·λ + Σₖ wₖ sₖ − b(x) ≤ 0
//! offset(x) + ξₖ·v(x) + u + q − sₖ ≤ 0     for every k
//! u ≥ ‖v(x)‖² / (4λ),  q ≥ xᵀQx,  λ ≥ 0
//! ```
//!
//! The [`Formulation::Separate`] variant emits these rows for every loss with its own
//! λ and slacks. [`Formulation::Pooled`] shares one λ and one slack vector, moving each
//! budget into the per scenario rows. ε is a named problem parameter scaling λ in the
//! ambiguity rows, so changing it only patches those matrix entries.
use std::time::Duration;

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::debug;

use crate::optimize::conic::ConicForm;
use crate::optimize::constraint::Constraint;
use crate::optimize::expression::AffineExpr;
use crate::optimize::problem::Problem;
use crate::optimize::variable::VariableType;
use crate::optimize::{OptimizationStatus, ProblemSolution};
use crate::robust::template::{LossFunction, ProblemTemplate, TemplateError};
use crate::robust::{BuildError, Formulation};
use crate::scenario::{DimensionError, ReducedDistribution};

/// Name of the radius parameter in the built problem
pub const EPSILON_PARAMETER: &str = "epsilon";

/// Builds [`RobustProgram`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RobustCounterpartBuilder {
    formulation: Formulation,
}

impl RobustCounterpartBuilder {
    /// Create a builder for the given formulation
    pub fn new(formulation: Formulation) -> Self {
        Self { formulation }
    }

    /// Formulation the builder emits
    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    /// Build the robust program with radius 0
    pub fn build(
        &self,
        template: &dyn ProblemTemplate,
        reduced: &ReducedDistribution,
    ) -> Result<RobustProgram, BuildError> {
        self.build_with_epsilon(template, reduced, 0.)
    }

    /// Build the robust program with the given radius
    ///
    /// # Parameters
    /// - `template`: Problem family supplying decisions, cost, deterministic constraints
    ///   and losses
    /// - `reduced`: Center of the ambiguity set
    /// - `epsilon`: Radius of the ambiguity set, nonnegative
    pub fn build_with_epsilon(
        &self,
        template: &dyn ProblemTemplate,
        reduced: &ReducedDistribution,
        epsilon: f64,
    ) -> Result<RobustProgram, BuildError> {
        validate_radius(epsilon)?;
        let m = template.scenario_dimension();
        if reduced.dimension() != m {
            return Err(DimensionError::Mismatch {
                expected: m,
                found: reduced.dimension(),
            }
            .into());
        }

        let mut problem = Problem::new_minimization();
        let losses = template.formulate(&mut problem)?;
        let num_template_variables = problem.num_variables();
        let factors = validate_losses(template, &losses, num_template_variables, m)?;
        problem.add_new_parameter(EPSILON_PARAMETER, epsilon)?;

        let k_points = reduced.num_points();
        let groups = match self.formulation {
            Formulation::Separate => losses.len(),
            Formulation::Pooled => 1,
        };

        // region Auxiliary variables
        let lambdas = problem.add_new_variables(
            "lambda",
            groups,
            VariableType::Continuous,
            0.,
            f64::INFINITY,
        )?;
        let mut slacks = Vec::with_capacity(groups);
        for g in 0..groups {
            slacks.push(problem.add_new_variables(
                &format!("slack[{}]", g),
                k_points,
                VariableType::Continuous,
                f64::NEG_INFINITY,
                f64::INFINITY,
            )?);
        }
        let dual_norms = problem.add_new_variables(
            "dual_norm",
            losses.len(),
            VariableType::Continuous,
            f64::NEG_INFINITY,
            f64::INFINITY,
        )?;
        // endregion Auxiliary variables

        // region Loss rows
        for (i, loss) in losses.iter().enumerate() {
            let g = match self.formulation {
                Formulation::Separate => i,
                Formulation::Pooled => 0,
            };
            problem.add_quad_over_lin_constraint(
                &format!("dual_norm[{}]", i),
                &loss.coefficients,
                &AffineExpr::term(lambdas[g], 4.),
                &AffineExpr::term(dual_norms[i], 1.),
            )?;

            let mut base = loss.offset.clone().with_term(dual_norms[i], 1.);
            if let Some(rows) = &factors[i] {
                let q = problem.add_new_variable(
                    &format!("quadratic[{}]", i),
                    VariableType::Continuous,
                    f64::NEG_INFINITY,
                    f64::INFINITY,
                )?;
                problem.add_quad_over_lin_constraint(
                    &format!("quadratic[{}]", i),
                    rows,
                    &AffineExpr::constant(1.),
                    &AffineExpr::term(q, 1.),
                )?;
                base.add_term(q, 1.);
            }
            if self.formulation == Formulation::Pooled {
                base = base.plus(&loss.budget.clone().scaled(-1.));
            }

            for k in 0..k_points {
                let mut row = base.clone();
                for (j, v) in loss.coefficients.iter().enumerate() {
                    row = row.plus(&v.clone().scaled(reduced.points()[(k, j)]));
                }
                row.add_term(slacks[g][k], -1.);
                problem.add_affine_upper_constraint(&format!("loss[{}][{}]", i, k), &row, 0.)?;
            }
        }
        // endregion Loss rows

        // region Ambiguity rows
        for (g, group_slacks) in slacks.iter().enumerate() {
            let mut ambiguity = AffineExpr::from_terms(group_slacks, reduced.weights().as_slice());
            if self.formulation == Formulation::Separate {
                ambiguity = ambiguity.plus(&losses[g].budget.clone().scaled(-1.));
            }
            problem.add_constraint(
                Constraint::new_affine_upper(&format!("ambiguity[{}]", g), &ambiguity, 0.)
                    .with_parametric_term(lambdas[g], 1., EPSILON_PARAMETER)?,
            )?;
        }
        // endregion Ambiguity rows

        let form = ConicForm::assemble(&problem);
        debug!(
            template = template.name(),
            k = k_points,
            formulation = ?self.formulation,
            problem_type = ?problem.problem_type(),
            variables = problem.num_variables(),
            constraints = problem.num_constraints(),
            "built robust program"
        );
        Ok(RobustProgram {
            problem,
            form,
            epsilon,
            losses,
            formulation: self.formulation,
            num_template_variables,
            lambdas,
            slacks,
        })
    }
}

fn validate_radius(epsilon: f64) -> Result<(), BuildError> {
    if epsilon.is_finite() && epsilon >= 0. {
        Ok(())
    } else {
        Err(BuildError::InvalidRadius(epsilon))
    }
}

/// Check the losses, returning the factored quadratic part of each
fn validate_losses(
    template: &dyn ProblemTemplate,
    losses: &[LossFunction],
    num_template_variables: usize,
    dimension: usize,
) -> Result<Vec<Option<Vec<AffineExpr>>>, BuildError> {
    if losses.is_empty() {
        return Err(TemplateError::NoLosses(template.name().to_string()).into());
    }
    let mut factors = Vec::with_capacity(losses.len());
    for (i, loss) in losses.iter().enumerate() {
        if loss.dimension() != dimension {
            return Err(DimensionError::Mismatch {
                expected: dimension,
                found: loss.dimension(),
            }
            .into());
        }
        if let Some(variable) = loss.max_variable() {
            if variable >= num_template_variables {
                return Err(TemplateError::UnknownVariable { loss: i, variable }.into());
            }
        }
        if !loss.is_finite() {
            return Err(TemplateError::NonFiniteCoefficient(i).into());
        }
        let factor = match &loss.quadratic {
            None => None,
            Some(q) => {
                let n = q.variables.len();
                if q.matrix.nrows() != n || q.matrix.ncols() != n {
                    return Err(TemplateError::InvalidQuadraticForm(i).into());
                }
                let rows = q.factor().ok_or(TemplateError::NonConvexLoss(i))?;
                Some(rows).filter(|r| !r.is_empty())
            }
        };
        factors.push(factor);
    }
    Ok(factors)
}

/// The robust program of one template over one reduced distribution
///
/// The structure is fixed by the template, the reduced distribution and the
/// formulation. Only the radius can change, through [`RobustProgram::update`].
#[derive(Debug, Clone)]
pub struct RobustProgram {
    problem: Problem,
    form: ConicForm,
    epsilon: f64,
    losses: Vec<LossFunction>,
    formulation: Formulation,
    num_template_variables: usize,
    lambdas: Vec<usize>,
    slacks: Vec<Vec<usize>>,
}

impl RobustProgram {
    /// Return the program with its radius changed to `epsilon`
    pub fn update(mut self, epsilon: f64) -> Result<Self, BuildError> {
        validate_radius(epsilon)?;
        self.problem.set_parameter(EPSILON_PARAMETER, epsilon)?;
        self.form.set_parameter(EPSILON_PARAMETER, epsilon)?;
        self.epsilon = epsilon;
        Ok(self)
    }

    /// Current radius
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// The modeling problem
    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    /// The assembled conic form
    pub fn form(&self) -> &ConicForm {
        &self.form
    }

    /// Losses returned by the template
    pub fn losses(&self) -> &[LossFunction] {
        &self.losses
    }

    /// Formulation the program was built with
    pub fn formulation(&self) -> Formulation {
        self.formulation
    }

    /// Number of reduced points K
    pub fn num_points(&self) -> usize {
        self.slacks.first().map_or(0, |s| s.len())
    }

    /// Number of variables the template added, its decision
    pub fn num_template_variables(&self) -> usize {
        self.num_template_variables
    }

    /// Split a solution of the program into decision, slacks and multipliers
    pub fn extract(&self, solution: ProblemSolution) -> SolveResult {
        let ProblemSolution {
            status,
            objective_value,
            variable_values,
            nodes_explored,
            solve_time,
        } = solution;
        let (decision, slacks, lambdas) = match variable_values {
            Some(values) => {
                let slacks = DMatrix::from_fn(self.slacks.len(), self.num_points(), |g, k| {
                    values[self.slacks[g][k]]
                });
                let lambdas = self.lambdas.iter().map(|&l| values[l]).collect();
                let decision = values[..self.num_template_variables].to_vec();
                (Some(decision), Some(slacks), Some(lambdas))
            }
            None => (None, None, None),
        };
        SolveResult {
            status,
            objective: objective_value,
            decision,
            slacks,
            lambdas,
            solve_time,
            nodes_explored,
        }
    }
}

/// Outcome of solving a [`RobustProgram`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveResult {
    /// Classified solver outcome
    pub status: OptimizationStatus,
    /// Objective value, when a solution is available
    pub objective: Option<f64>,
    /// Values of the template's decision variables
    pub decision: Option<Vec<f64>>,
    /// Slack values, one row per multiplier group and one column per reduced point
    pub slacks: Option<DMatrix<f64>>,
    /// Value of each dual multiplier λ
    pub lambdas: Option<Vec<f64>>,
    /// Wall clock solve time
    pub solve_time: Duration,
    /// Branch and bound nodes solved
    pub nodes_explored: usize,
}

impl SolveResult {
    /// Whether the result carries a decision
    pub fn has_solution(&self) -> bool {
        self.decision.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::SolverSettings;
    use crate::optimize::solvers::SolverAdapter;
    use crate::scenario::reduce::ScenarioReducer;
    use crate::scenario::ScenarioSet;
    use crate::templates::FacilityLocation;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;

    /// minimize Σᵢ tᵢ subject to sup E[ξ·cᵢ] <= tᵢ for every row cᵢ
    struct WorstCaseMean {
        c: Vec<Vec<f64>>,
    }

    impl ProblemTemplate for WorstCaseMean {
        fn name(&self) -> &str {
            "worst_case_mean"
        }

        fn scenario_dimension(&self) -> usize {
            self.c[0].len()
        }

        fn formulate(&self, problem: &mut Problem) -> Result<Vec<LossFunction>, TemplateError> {
            let t = problem.add_new_variables(
                "t",
                self.c.len(),
                VariableType::Continuous,
                f64::NEG_INFINITY,
                f64::INFINITY,
            )?;
            let mut losses = Vec::new();
            for (row, &ti) in self.c.iter().zip(&t) {
                problem.add_new_linear_objective_term(ti, 1.)?;
                let coefficients = row.iter().map(|&c| AffineExpr::constant(c)).collect();
                losses.push(
                    LossFunction::new(AffineExpr::zero(), coefficients)
                        .with_budget(AffineExpr::term(ti, 1.)),
                );
            }
            Ok(losses)
        }
    }

    fn three_points() -> ReducedDistribution {
        let set = ScenarioSet::from_rows(&[vec![1., 0.], vec![2., 2.], vec![3., 1.]]).unwrap();
        ReducedDistribution::identity(&set)
    }

    #[test]
    fn worst_case_mean_closed_form() {
        // sup over the type-2 ball of E[ξ·c] is mean·c + sqrt(ε) ‖c‖
        let template = WorstCaseMean { c: vec![vec![3., 4.]] };
        let reduced = three_points();
        let adapter = SolverAdapter::new(SolverSettings::default()).unwrap();
        let mut program = RobustCounterpartBuilder::default()
            .build_with_epsilon(&template, &reduced, 0.04)
            .unwrap();
        for epsilon in [0.04, 0.25, 1.] {
            program = program.update(epsilon).unwrap();
            let result = adapter.solve(&program, None).unwrap();
            assert!(result.status.has_solution(), "status {}", result.status);
            // mean (2, 1)
            let expected = 2. * 3. + 4. + epsilon.sqrt() * 5.;
            assert_abs_diff_eq!(result.objective.unwrap(), expected, epsilon = 1e-4);
            // λ = ‖c‖ / (2 sqrt(ε))
            let lambda = result.lambdas.as_ref().unwrap()[0];
            assert_abs_diff_eq!(lambda * 2. * epsilon.sqrt() / 5., 1., epsilon = 1e-2);
            assert_eq!(result.slacks.as_ref().unwrap().shape(), (1, 3));
        }
    }

    #[test]
    fn update_matches_fresh_build() {
        let template = WorstCaseMean { c: vec![vec![1., -2.]] };
        let reduced = three_points();
        let builder = RobustCounterpartBuilder::default();
        let adapter = SolverAdapter::new(SolverSettings::default()).unwrap();
        let updated = builder
            .build_with_epsilon(&template, &reduced, 0.1)
            .unwrap()
            .update(0.5)
            .unwrap();
        let fresh = builder.build_with_epsilon(&template, &reduced, 0.5).unwrap();
        assert_eq!(updated.form().a, fresh.form().a);
        assert_eq!(updated.epsilon(), 0.5);
        let a = adapter.solve(&updated, None).unwrap().objective.unwrap();
        let b = adapter.solve(&fresh, None).unwrap().objective.unwrap();
        assert_abs_diff_eq!(a, b, epsilon = 1e-8);
    }

    #[test]
    fn reject_invalid_inputs() {
        let template = WorstCaseMean { c: vec![vec![1., 1.]] };
        let builder = RobustCounterpartBuilder::default();
        match builder.build_with_epsilon(&template, &three_points(), -1.) {
            Err(BuildError::InvalidRadius(_)) => {}
            _ => panic!("Negative radius not caught"),
        }
        match builder
            .build(&template, &three_points())
            .unwrap()
            .update(f64::NAN)
        {
            Err(BuildError::InvalidRadius(_)) => {}
            _ => panic!("NaN radius not caught"),
        }
        let wrong_dimension = WorstCaseMean { c: vec![vec![1., 1., 1.]] };
        match builder.build(&wrong_dimension, &three_points()) {
            Err(BuildError::Dimension(_)) => {}
            _ => panic!("Dimension mismatch not caught"),
        }
    }

    struct Concave;

    impl ProblemTemplate for Concave {
        fn name(&self) -> &str {
            "concave"
        }

        fn scenario_dimension(&self) -> usize {
            1
        }

        fn formulate(&self, problem: &mut Problem) -> Result<Vec<LossFunction>, TemplateError> {
            let x = problem.add_new_variable("x", VariableType::Continuous, -1., 1.)?;
            Ok(vec![
                LossFunction::new(AffineExpr::zero(), vec![AffineExpr::term(x, 1.)])
                    .with_quadratic(vec![x], DMatrix::from_element(1, 1, -1.)),
                LossFunction::new(AffineExpr::term(x + 1, 1.), vec![AffineExpr::zero()]),
            ])
        }
    }

    #[test]
    fn reject_bad_losses() {
        let set = ScenarioSet::from_rows(&[vec![1.], vec![2.]]).unwrap();
        let reduced = ReducedDistribution::identity(&set);
        match RobustCounterpartBuilder::default().build(&Concave, &reduced) {
            Err(BuildError::Template(TemplateError::NonConvexLoss(0))) => {}
            other => panic!("Concave loss not caught, got {:?}", other.err()),
        }
    }

    #[test]
    fn pooled_is_more_conservative() {
        let template = WorstCaseMean {
            c: vec![vec![1., 0.], vec![-1., 2.]],
        };
        let reduced = three_points();
        let adapter = SolverAdapter::new(SolverSettings::default()).unwrap();
        for epsilon in [0.01, 0.3] {
            let separate = RobustCounterpartBuilder::new(Formulation::Separate)
                .build_with_epsilon(&template, &reduced, epsilon)
                .unwrap();
            let pooled = RobustCounterpartBuilder::new(Formulation::Pooled)
                .build_with_epsilon(&template, &reduced, epsilon)
                .unwrap();
            assert_eq!(separate.losses().len(), 2);
            let separate = adapter.solve(&separate, None).unwrap();
            let pooled = adapter.solve(&pooled, None).unwrap();
            assert!(separate.status.has_solution() && pooled.status.has_solution());
            assert_eq!(separate.lambdas.as_ref().unwrap().len(), 2);
            assert_eq!(pooled.lambdas.as_ref().unwrap().len(), 1);
            // each loss on its own: mean·cᵢ + sqrt(ε) ‖cᵢ‖ with mean (2, 1)
            let expected = 2. + 0. + epsilon.sqrt() * (1. + 5f64.sqrt());
            assert_abs_diff_eq!(separate.objective.unwrap(), expected, epsilon = 1e-4);
            assert!(pooled.objective.unwrap() >= separate.objective.unwrap() - 1e-6);
        }
    }

    #[test]
    fn toy_facility_location() {
        // opening facility 0 alone serves the mean demand of 6 within capacity 8,
        // costing 10 to open plus 3 to ship
        let template = FacilityLocation::new(
            DVector::from_vec(vec![10., 15.]),
            DVector::from_vec(vec![8., 4.]),
            DMatrix::from_row_slice(2, 3, &[1., 1., 1., 2., 2., 2.]),
        )
        .unwrap();
        let demands = ScenarioSet::from_rows(&[
            vec![1., 2., 3.],
            vec![3., 2., 1.],
            vec![2., 2., 2.],
        ])
        .unwrap();
        let reduced = ScenarioReducer::default().reduce(&demands, 3, 0).unwrap();
        let program = RobustCounterpartBuilder::default()
            .build(&template, &reduced)
            .unwrap();
        let adapter = SolverAdapter::new(SolverSettings::default()).unwrap();
        let result = adapter.solve(&program, None).unwrap();
        assert!(matches!(
            result.status,
            OptimizationStatus::Optimal | OptimizationStatus::AlmostOptimal
        ));
        assert_abs_diff_eq!(result.objective.unwrap(), 13., epsilon = 1e-3);
        let decision = result.decision.unwrap();
        let open = template.open_values(&decision);
        assert_eq!(open, vec![1., 0.]);
    }
}
