//! Depth first branch and bound over continuous conic relaxations
//!
//! Integer variables are branched on by tightening the rows of `b` that hold their
//! bounds, the matrix `A` is shared by every node.
use std::time::Instant;

use tracing::{debug, warn};

use crate::configuration::SolverSettings;
use crate::optimize::conic::ConicForm;
use crate::optimize::objective::ObjectiveSense;
use crate::optimize::solvers::{ConicSolver, RelaxationStatus, SolverError};
use crate::optimize::{OptimizationStatus, ProblemSolution};

/// Largest scaled constraint violation for accepting a point the backend could not
/// certify
const UNRELIABLE_VIOLATION: f64 = 1e-5;

/// A node of the search tree, the bounds of every integer variable
#[derive(Debug, Clone)]
struct Node {
    bounds: Vec<(f64, f64)>,
    /// Relaxation objective of the parent, a lower bound for this node
    parent_objective: f64,
    depth: usize,
}

/// Best integer feasible point found so far
#[derive(Debug, Clone)]
struct Incumbent {
    x: Vec<f64>,
    objective: f64,
}

/// Branch and bound search over one conic form
pub struct BranchAndBound<'a> {
    backend: &'a dyn ConicSolver,
    form: &'a ConicForm,
    settings: &'a SolverSettings,
    deadline: Option<Instant>,
    /// Known lower bound on the conic objective
    lower_bound: Option<f64>,
}

impl<'a> BranchAndBound<'a> {
    /// Create a new search
    pub fn new(
        backend: &'a dyn ConicSolver,
        form: &'a ConicForm,
        settings: &'a SolverSettings,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            backend,
            form,
            settings,
            deadline,
            lower_bound: None,
        }
    }

    /// Provide a known lower bound on the optimal objective of a minimization problem
    ///
    /// The search stops once the incumbent is within the gap tolerances of the bound.
    /// Ignored for maximization problems.
    pub fn with_lower_bound(mut self, lower_bound: Option<f64>) -> Self {
        self.lower_bound = match self.form.sense() {
            ObjectiveSense::Minimize => lower_bound
                .filter(|v| v.is_finite())
                .map(|v| self.form.conic_value_of(v)),
            ObjectiveSense::Maximize => None,
        };
        self
    }

    fn gap(&self, incumbent: f64) -> f64 {
        self.settings.mip_gap(incumbent)
    }

    fn rhs_for(&self, node: &Node) -> Vec<f64> {
        let mut b = self.form.b.clone();
        for (bound, &(lower, upper)) in self.form.integer_bounds().iter().zip(&node.bounds) {
            b[bound.upper_row] = upper;
            b[bound.lower_row] = -lower;
        }
        b
    }

    /// Move the integer variables of `x` back inside the node's bounds
    fn clamp_to(&self, x: &mut [f64], bounds: &[(f64, f64)]) {
        for (bound, &(lower, upper)) in self.form.integer_bounds().iter().zip(bounds) {
            x[bound.variable] = x[bound.variable].max(lower).min(upper);
        }
    }

    /// Integer variable with the value farthest from an integer, as (position, value)
    ///
    /// Variables the node has already fixed are never chosen.
    fn most_fractional(&self, x: &[f64], bounds: &[(f64, f64)]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for (position, bound) in self.form.integer_bounds().iter().enumerate() {
            let (lower, upper) = bounds[position];
            if lower >= upper {
                continue;
            }
            let value = x[bound.variable];
            let frac = value - value.floor();
            let distance = frac.min(1. - frac);
            if distance > self.settings.integrality_tolerance
                && best.map_or(true, |(_, _, d)| distance > d)
            {
                best = Some((position, value, distance));
            }
        }
        best.map(|(position, value, _)| (position, value))
    }

    /// Run the search
    pub fn run(self) -> Result<ProblemSolution, SolverError> {
        let start = Instant::now();
        let root = Node {
            bounds: self
                .form
                .integer_bounds()
                .iter()
                .map(|b| (b.lower, b.upper))
                .collect(),
            parent_objective: f64::NEG_INFINITY,
            depth: 0,
        };
        let mut stack = vec![root];
        let mut incumbent: Option<Incumbent> = None;
        let mut nodes_explored = 0usize;
        let mut skipped = 0usize;
        let mut inexact = false;
        let mut timed_out = false;
        let mut halted = false;
        let mut root_status: Option<RelaxationStatus> = None;

        while let Some(node) = stack.pop() {
            if let Some(inc) = &incumbent {
                if node.parent_objective >= inc.objective - self.gap(inc.objective) {
                    continue;
                }
            }
            let remaining = match self.deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = true;
                        break;
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if nodes_explored >= self.settings.max_nodes {
                halted = true;
                break;
            }

            let b = self.rhs_for(&node);
            let relaxation = self.backend.solve_relaxation(self.form, &b, remaining)?;
            nodes_explored += 1;
            if node.depth == 0 {
                root_status = Some(relaxation.status);
            }

            // an unreliable relaxation still guides branching but gives no bound, and its
            // point is only accepted after checking it against the node's constraints
            let mut unreliable = false;
            match relaxation.status {
                RelaxationStatus::Solved => {}
                RelaxationStatus::AlmostSolved => inexact = true,
                RelaxationStatus::Infeasible => continue,
                RelaxationStatus::MaxTime => {
                    timed_out = true;
                    break;
                }
                RelaxationStatus::MaxIterations | RelaxationStatus::NumericalError
                    if !relaxation.x.is_empty() && relaxation.x.iter().all(|v| v.is_finite()) =>
                {
                    warn!(
                        depth = node.depth,
                        status = ?relaxation.status,
                        "branching on an unreliable relaxation"
                    );
                    unreliable = true;
                    inexact = true;
                }
                RelaxationStatus::Unbounded
                | RelaxationStatus::MaxIterations
                | RelaxationStatus::NumericalError => {
                    if node.depth == 0 {
                        break;
                    }
                    warn!(
                        depth = node.depth,
                        status = ?relaxation.status,
                        "skipping branch and bound node"
                    );
                    skipped += 1;
                    continue;
                }
            }

            let objective = if unreliable {
                node.parent_objective
            } else {
                relaxation.objective
            };
            if let Some(inc) = &incumbent {
                if objective >= inc.objective - self.gap(inc.objective) {
                    continue;
                }
            }

            let mut x = relaxation.x;
            self.clamp_to(&mut x, &node.bounds);
            let (position, value) = match self.most_fractional(&x, &node.bounds) {
                Some(branch) => branch,
                None => {
                    for bound in self.form.integer_bounds() {
                        x[bound.variable] = x[bound.variable].round();
                    }
                    let violation = if unreliable {
                        self.form.max_violation(&x, &b)
                    } else {
                        0.
                    };
                    if violation <= UNRELIABLE_VIOLATION {
                        let objective = self.form.conic_objective(&x);
                        if incumbent.as_ref().is_some_and(|inc| objective >= inc.objective) {
                            continue;
                        }
                        let reached_bound = self
                            .lower_bound
                            .is_some_and(|lb| objective <= lb + self.gap(objective));
                        incumbent = Some(Incumbent { x, objective });
                        if reached_bound {
                            debug!(
                                nodes = nodes_explored,
                                "incumbent reached the known lower bound"
                            );
                            break;
                        }
                        continue;
                    }
                    match first_unfixed(&node.bounds) {
                        Some(branch) => {
                            warn!(
                                depth = node.depth,
                                violation,
                                "splitting a node whose unreliable point is infeasible"
                            );
                            branch
                        }
                        None => {
                            warn!(
                                depth = node.depth,
                                violation,
                                "rejecting an unreliable integral point"
                            );
                            skipped += 1;
                            continue;
                        }
                    }
                }
            };
            let (lower, upper) = node.bounds[position];
            let mut down = node.bounds.clone();
            down[position] = (lower, value.floor());
            let mut up = node.bounds;
            up[position] = (value.ceil(), upper);
            let down = Node {
                bounds: down,
                parent_objective: objective,
                depth: node.depth + 1,
            };
            let up = Node {
                bounds: up,
                parent_objective: objective,
                depth: node.depth + 1,
            };
            // the child nearest to the relaxed value is explored first
            if value - value.floor() > 0.5 {
                stack.push(down);
                stack.push(up);
            } else {
                stack.push(up);
                stack.push(down);
            }
        }

        let status = match (&incumbent, root_status) {
            (Some(_), _) if timed_out => OptimizationStatus::TimeLimit,
            (Some(_), _) if halted => OptimizationStatus::SolverHalted,
            (Some(_), _) if skipped > 0 || inexact => OptimizationStatus::AlmostOptimal,
            (Some(_), _) => OptimizationStatus::Optimal,
            (None, _) if timed_out => OptimizationStatus::TimeLimit,
            (None, _) if halted => OptimizationStatus::SolverHalted,
            (None, Some(RelaxationStatus::Unbounded)) => OptimizationStatus::Unbounded,
            (None, Some(RelaxationStatus::MaxIterations)) => OptimizationStatus::SolverHalted,
            (None, Some(RelaxationStatus::NumericalError)) => OptimizationStatus::NumericalError,
            (None, _) if skipped > 0 => OptimizationStatus::NumericalError,
            (None, _) => OptimizationStatus::Infeasible,
        };
        debug!(
            nodes = nodes_explored,
            skipped,
            status = %status,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "branch and bound finished"
        );

        Ok(match incumbent {
            Some(inc) => ProblemSolution {
                status,
                objective_value: Some(self.form.problem_objective(inc.objective)),
                variable_values: Some(inc.x),
                nodes_explored,
                solve_time: start.elapsed(),
            },
            None => ProblemSolution::without_values(status, nodes_explored, start.elapsed()),
        })
    }
}

/// First integer variable with finite bounds that a node has not fixed, with a
/// midpoint splitting its range, as (position, value)
fn first_unfixed(bounds: &[(f64, f64)]) -> Option<(usize, f64)> {
    bounds
        .iter()
        .position(|&(lower, upper)| lower < upper && lower.is_finite() && upper.is_finite())
        .map(|position| {
            let (lower, upper) = bounds[position];
            (position, ((lower + upper) / 2.).floor() + 0.5)
        })
}
