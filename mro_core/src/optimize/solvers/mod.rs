//! Solver interfaces
//!
//! A [`ConicSolver`] solves a single continuous [`ConicForm`]. The [`SolverAdapter`]
//! drives a backend, adding branch and bound when the form has integer variables,
//! and classifies the outcome into an [`OptimizationStatus`].
pub mod branch_bound;
pub mod clarabel;

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::configuration::SolverSettings;
use crate::optimize::conic::ConicForm;
use crate::optimize::{OptimizationStatus, ProblemSolution};
use crate::robust::{RobustProgram, SolveResult};

/// Outcome of solving one continuous relaxation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxationStatus {
    /// Solved to the requested tolerances
    Solved,
    /// Solved to reduced tolerances
    AlmostSolved,
    /// Primal infeasible
    Infeasible,
    /// Dual infeasible, objective unbounded
    Unbounded,
    /// Iteration limit reached
    MaxIterations,
    /// Time limit reached
    MaxTime,
    /// Numerical trouble or insufficient progress
    NumericalError,
}

/// Solution of one continuous relaxation
#[derive(Debug, Clone)]
pub struct RelaxationSolution {
    /// Status of the solve
    pub status: RelaxationStatus,
    /// Primal values, meaningful when `status` is solved or almost solved
    pub x: Vec<f64>,
    /// Value of `½ xᵀPx + qᵀx`
    pub objective: f64,
    /// Interior point iterations
    pub iterations: u32,
}

impl RelaxationSolution {
    /// Whether the relaxation produced usable primal values
    pub fn is_solved(&self) -> bool {
        matches!(
            self.status,
            RelaxationStatus::Solved | RelaxationStatus::AlmostSolved
        )
    }
}

/// Backend capable of solving a continuous conic program
pub trait ConicSolver: Send + Sync {
    /// Name of the backend, for logging
    fn name(&self) -> &'static str;

    /// Solve `form` with right hand side `b` in place of `form.b`
    ///
    /// # Parameters
    /// - `form`: The conic program
    /// - `b`: Right hand side to use, same length as `form.b`
    /// - `time_limit`: Wall clock limit for this solve
    fn solve_relaxation(
        &self,
        form: &ConicForm,
        b: &[f64],
        time_limit: Option<Duration>,
    ) -> Result<RelaxationSolution, SolverError>;
}

/// Drives a [`ConicSolver`] backend, with branch and bound for integer variables
pub struct SolverAdapter {
    settings: SolverSettings,
    backend: Box<dyn ConicSolver>,
}

impl SolverAdapter {
    /// Create an adapter backed by Clarabel
    pub fn new(settings: SolverSettings) -> Result<Self, SolverError> {
        settings
            .validate()
            .map_err(|e| SolverError::Misconfigured(e.to_string()))?;
        let backend = clarabel::ClarabelSolver::new(&settings)?;
        Self::with_backend(settings, Box::new(backend))
    }

    /// Create an adapter with a custom backend
    pub fn with_backend(
        settings: SolverSettings,
        backend: Box<dyn ConicSolver>,
    ) -> Result<Self, SolverError> {
        settings
            .validate()
            .map_err(|e| SolverError::Misconfigured(e.to_string()))?;
        Ok(Self { settings, backend })
    }

    /// Settings in use
    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Solve a conic form
    ///
    /// # Parameters
    /// - `form`: The assembled problem
    /// - `time_limit`: Wall clock limit for the whole solve, including branch and bound
    /// - `lower_bound`: Known lower bound on the optimum of a minimization, branch
    ///   and bound stops as soon as an incumbent reaches it
    pub fn solve_form(
        &self,
        form: &ConicForm,
        time_limit: Option<Duration>,
        lower_bound: Option<f64>,
    ) -> Result<ProblemSolution, SolverError> {
        let start = Instant::now();
        if form.has_integer_variables() {
            let deadline = time_limit.map(|limit| start + limit);
            return branch_bound::BranchAndBound::new(
                self.backend.as_ref(),
                form,
                &self.settings,
                deadline,
            )
            .with_lower_bound(lower_bound)
            .run();
        }

        let relaxation = self.backend.solve_relaxation(form, &form.b, time_limit)?;
        let status = match relaxation.status {
            RelaxationStatus::Solved => OptimizationStatus::Optimal,
            RelaxationStatus::AlmostSolved => OptimizationStatus::AlmostOptimal,
            RelaxationStatus::Infeasible => OptimizationStatus::Infeasible,
            RelaxationStatus::Unbounded => OptimizationStatus::Unbounded,
            RelaxationStatus::MaxIterations => OptimizationStatus::SolverHalted,
            RelaxationStatus::MaxTime => OptimizationStatus::TimeLimit,
            RelaxationStatus::NumericalError => OptimizationStatus::NumericalError,
        };
        debug!(
            backend = self.backend.name(),
            status = %status,
            iterations = relaxation.iterations,
            "continuous solve finished"
        );
        if !relaxation.is_solved() {
            return Ok(ProblemSolution::without_values(status, 1, start.elapsed()));
        }
        Ok(ProblemSolution {
            status,
            objective_value: Some(form.problem_objective(relaxation.objective)),
            variable_values: Some(relaxation.x),
            nodes_explored: 1,
            solve_time: start.elapsed(),
        })
    }

    /// Solve a robust program
    pub fn solve(
        &self,
        program: &RobustProgram,
        time_limit: Option<Duration>,
    ) -> Result<SolveResult, SolverError> {
        self.solve_with_bound(program, time_limit, None)
    }

    /// Solve a robust program given a known lower bound on its optimum
    ///
    /// Programs at a larger radius are at least as conservative, so the optimum at a
    /// smaller radius is a valid bound.
    pub fn solve_with_bound(
        &self,
        program: &RobustProgram,
        time_limit: Option<Duration>,
        lower_bound: Option<f64>,
    ) -> Result<SolveResult, SolverError> {
        let solution = self.solve_form(program.form(), time_limit, lower_bound)?;
        Ok(program.extract(solution))
    }
}

impl std::fmt::Debug for SolverAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverAdapter")
            .field("settings", &self.settings)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Errors associated with solving
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The solver settings were rejected, no solve can succeed with them
    #[error("Solver misconfigured: {0}")]
    Misconfigured(String),
    /// The backend rejected the problem data
    #[error("Solver rejected the problem: {0}")]
    InvalidProblem(String),
}
