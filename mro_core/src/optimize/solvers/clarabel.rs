//! Implements a solver interface for Clarabel

use std::time::Duration;

use clarabel::algebra::CscMatrix;
use clarabel::solver::*;

use crate::configuration::SolverSettings;
use crate::optimize::conic::{Cone, ConicForm, SparseMatrix};
use crate::optimize::solvers::{ConicSolver, RelaxationSolution, RelaxationStatus, SolverError};

/// Interior point conic solver backend using Clarabel
#[derive(Debug, Clone)]
pub struct ClarabelSolver {
    max_iterations: u32,
    tolerance_gap_abs: f64,
    tolerance_gap_rel: f64,
    tolerance_feasibility: f64,
    verbose: bool,
}

impl ClarabelSolver {
    /// Create a new Clarabel backend, checking that Clarabel accepts the settings
    pub fn new(settings: &SolverSettings) -> Result<Self, SolverError> {
        let solver = Self {
            max_iterations: settings.max_iterations,
            tolerance_gap_abs: settings.tolerance_gap_abs,
            tolerance_gap_rel: settings.tolerance_gap_rel,
            tolerance_feasibility: settings.tolerance_feasibility,
            verbose: settings.verbose,
        };
        solver.settings(None)?;
        Ok(solver)
    }

    fn settings(&self, time_limit: Option<Duration>) -> Result<DefaultSettings<f64>, SolverError> {
        DefaultSettingsBuilder::default()
            .verbose(self.verbose)
            .max_iter(self.max_iterations)
            .tol_gap_abs(self.tolerance_gap_abs)
            .tol_gap_rel(self.tolerance_gap_rel)
            .tol_feas(self.tolerance_feasibility)
            .time_limit(time_limit.map_or(f64::INFINITY, |t| t.as_secs_f64()))
            .build()
            .map_err(|e| SolverError::Misconfigured(e.to_string()))
    }
}

fn to_csc(matrix: &SparseMatrix) -> CscMatrix<f64> {
    CscMatrix::new(
        matrix.nrows,
        matrix.ncols,
        matrix.colptr.clone(),
        matrix.rowval.clone(),
        matrix.nzval.clone(),
    )
}

fn to_cones(cones: &[Cone]) -> Vec<SupportedConeT<f64>> {
    cones
        .iter()
        .map(|cone| match *cone {
            Cone::Zero(n) => ZeroConeT(n),
            Cone::Nonnegative(n) => NonnegativeConeT(n),
            Cone::SecondOrder(n) => SecondOrderConeT(n),
        })
        .collect()
}

impl ConicSolver for ClarabelSolver {
    fn name(&self) -> &'static str {
        "clarabel"
    }

    fn solve_relaxation(
        &self,
        form: &ConicForm,
        b: &[f64],
        time_limit: Option<Duration>,
    ) -> Result<RelaxationSolution, SolverError> {
        if b.len() != form.a.nrows {
            return Err(SolverError::InvalidProblem(format!(
                "right hand side has length {}, expected {}",
                b.len(),
                form.a.nrows
            )));
        }
        if time_limit.is_some_and(|t| t.is_zero()) {
            return Ok(RelaxationSolution {
                status: RelaxationStatus::MaxTime,
                x: Vec::new(),
                objective: f64::NAN,
                iterations: 0,
            });
        }
        let p = to_csc(&form.p);
        let a = to_csc(&form.a);
        let cones = to_cones(&form.cones);
        let settings = self.settings(time_limit)?;

        let mut solver = DefaultSolver::new(&p, &form.q, &a, b, &cones, settings);
        solver.solve();

        let status = match solver.solution.status {
            SolverStatus::Solved => RelaxationStatus::Solved,
            SolverStatus::AlmostSolved => RelaxationStatus::AlmostSolved,
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                RelaxationStatus::Infeasible
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                RelaxationStatus::Unbounded
            }
            SolverStatus::MaxIterations => RelaxationStatus::MaxIterations,
            SolverStatus::MaxTime => RelaxationStatus::MaxTime,
            _ => RelaxationStatus::NumericalError,
        };
        Ok(RelaxationSolution {
            status,
            objective: form.conic_objective(&solver.solution.x),
            x: solver.solution.x.clone(),
            iterations: solver.solution.iterations,
        })
    }
}
