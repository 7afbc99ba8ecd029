//! Module for constructing and solving optimization problems

pub mod conic;
pub mod constraint;
pub mod expression;
pub mod objective;
pub mod problem;
pub mod solvers;
pub mod variable;

use std::time::Duration;

/// Struct representing the solution to an optimization problem
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemSolution {
    /// The status of the optimization problem, representing if the optimization was
    /// completed successfully
    pub status: OptimizationStatus,
    /// Optimized value of the objective
    ///
    /// Some(f64) if a solution is available (see [`OptimizationStatus::has_solution`]),
    /// None otherwise
    pub objective_value: Option<f64>,
    /// Values of the variables at the optimum, indexed by variable index
    ///
    /// Some(Vec) if a solution is available, None otherwise. Integer and binary
    /// variables hold exactly integral values.
    pub variable_values: Option<Vec<f64>>,
    /// Number of branch and bound nodes whose relaxation was solved, 1 for continuous problems
    pub nodes_explored: usize,
    /// Wall clock time spent solving
    pub solve_time: Duration,
}

impl ProblemSolution {
    /// A solution without values
    pub(crate) fn without_values(
        status: OptimizationStatus,
        nodes_explored: usize,
        solve_time: Duration,
    ) -> Self {
        Self {
            status,
            objective_value: None,
            variable_values: None,
            nodes_explored,
            solve_time,
        }
    }
}

/// Status of an optimization problem
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OptimizationStatus {
    /// Problem has been optimized
    Optimal,
    /// An approximate solution has been found (reduced accuracy, or some branch and
    /// bound nodes could not be solved)
    AlmostOptimal,
    /// Problem can't be solved because it is infeasible (conflicting constraints)
    Infeasible,
    /// Problem can't be optimized because objective value is not bounded
    Unbounded,
    /// The time limit was reached, the best solution found so far (if any) is reported
    TimeLimit,
    /// The solver hit the maximum allowed iterations or branch and bound nodes
    SolverHalted,
    /// A numerical error occurred during solving
    NumericalError,
}

impl OptimizationStatus {
    /// Whether the status is [`OptimizationStatus::Optimal`]
    pub fn is_optimal(&self) -> bool {
        matches!(self, OptimizationStatus::Optimal)
    }

    /// Whether a solution with this status may carry variable values
    pub fn has_solution(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::Optimal
                | OptimizationStatus::AlmostOptimal
                | OptimizationStatus::TimeLimit
                | OptimizationStatus::SolverHalted
        )
    }
}

impl std::fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OptimizationStatus::Optimal => "optimal",
            OptimizationStatus::AlmostOptimal => "almost_optimal",
            OptimizationStatus::Infeasible => "infeasible",
            OptimizationStatus::Unbounded => "unbounded",
            OptimizationStatus::TimeLimit => "time_limit",
            OptimizationStatus::SolverHalted => "solver_halted",
            OptimizationStatus::NumericalError => "numerical_error",
        };
        write!(f, "{}", s)
    }
}
