//! Assembly of a [`Problem`] into the standard conic form
//!
//! ```text
//! minimize    ½ xᵀPx + qᵀx
//! subject to  Ax + s = b,  s ∈ K
//! ```
//!
//! where `K` is a product of a zero cone, a nonnegative cone and any number of second
//! order cones, in that order. Maximization problems are negated. Coefficients scaled by
//! a named parameter are recorded so that the parameter can later be changed by
//! patching the stored matrix values, without reassembling the problem.
use indexmap::IndexMap;
use nalgebra_sparse::{CooMatrix, CscMatrix};

use crate::optimize::constraint::{Constraint, ConstraintTerm};
use crate::optimize::objective::{ObjectiveSense, ObjectiveTerm};
use crate::optimize::problem::{Problem, ProblemError};

/// Cone making up part of the product cone `K`, with its dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cone {
    /// `s = 0`
    Zero(usize),
    /// `s >= 0`
    Nonnegative(usize),
    /// `‖s[1..]‖₂ <= s[0]`
    SecondOrder(usize),
}

impl Cone {
    /// Number of rows of the cone
    pub fn dim(&self) -> usize {
        match *self {
            Cone::Zero(n) | Cone::Nonnegative(n) | Cone::SecondOrder(n) => n,
        }
    }
}

/// Sparse matrix in compressed sparse column format
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    /// Number of rows
    pub nrows: usize,
    /// Number of columns
    pub ncols: usize,
    /// Column offsets into `rowval` / `nzval`, length `ncols + 1`
    pub colptr: Vec<usize>,
    /// Row index of each stored entry
    pub rowval: Vec<usize>,
    /// Value of each stored entry
    pub nzval: Vec<f64>,
}

impl SparseMatrix {
    fn from_coo(coo: &CooMatrix<f64>) -> Self {
        let (nrows, ncols) = (coo.nrows(), coo.ncols());
        let (colptr, rowval, nzval) = CscMatrix::from(coo).disassemble();
        Self {
            nrows,
            ncols,
            colptr,
            rowval,
            nzval,
        }
    }

    /// Position in `nzval` of the stored entry `(row, col)`
    fn position(&self, row: usize, col: usize) -> Option<usize> {
        let start = self.colptr[col];
        let end = self.colptr[col + 1];
        self.rowval[start..end]
            .binary_search(&row)
            .ok()
            .map(|offset| start + offset)
    }

    /// Compute `self * x`
    pub fn multiply(&self, x: &[f64]) -> Vec<f64> {
        let mut out = vec![0.; self.nrows];
        for (col, &xc) in x.iter().enumerate().take(self.ncols) {
            for nz in self.colptr[col]..self.colptr[col + 1] {
                out[self.rowval[nz]] += self.nzval[nz] * xc;
            }
        }
        out
    }
}

/// Stored matrix entry whose value depends on problem parameters
#[derive(Debug, Clone, PartialEq)]
struct ParameterSlot {
    /// Index into the `nzval` of `A`
    position: usize,
    /// Part of the value not scaled by any parameter
    base: f64,
    /// `(parameter, scale)` pairs adding `scale * value(parameter)`
    terms: Vec<(String, f64)>,
}

/// Rows of `A` holding the bounds of an integer variable, changed while branching
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegerBound {
    /// Index of the variable
    pub variable: usize,
    /// Row encoding `-x <= -lower`
    pub lower_row: usize,
    /// Row encoding `x <= upper`
    pub upper_row: usize,
    /// Lower bound of the variable in the problem
    pub lower: f64,
    /// Upper bound of the variable in the problem
    pub upper: f64,
}

/// A [`Problem`] assembled into standard conic form
#[derive(Debug, Clone)]
pub struct ConicForm {
    /// Upper triangle of the quadratic objective matrix
    pub p: SparseMatrix,
    /// Linear objective coefficients
    pub q: Vec<f64>,
    /// Constraint matrix
    pub a: SparseMatrix,
    /// Constraint right hand side
    pub b: Vec<f64>,
    /// Cones, in row order
    pub cones: Vec<Cone>,
    /// Constant added to the objective
    objective_constant: f64,
    /// Sense of the original objective
    sense: ObjectiveSense,
    /// Current values of named parameters
    parameters: IndexMap<String, f64>,
    /// Parametric entries of `A`
    slots: Vec<ParameterSlot>,
    /// Bound rows of the integer and binary variables
    integer_bounds: Vec<IntegerBound>,
}

/// A row of `A` before it is placed, `Σ coef * x + s = rhs`
#[derive(Default)]
struct PendingRow {
    entries: Vec<(usize, f64)>,
    parametric: Vec<(usize, f64, String)>,
    rhs: f64,
}

impl PendingRow {
    /// Row for `sign * Σ terms <= sign * bound`
    fn from_terms(terms: &[ConstraintTerm], sign: f64, bound: f64) -> Self {
        let mut row = PendingRow {
            rhs: sign * bound,
            ..Default::default()
        };
        for t in terms {
            match &t.parameter {
                Some(p) => row
                    .parametric
                    .push((t.variable, sign * t.coefficient, p.clone())),
                None => row.entries.push((t.variable, sign * t.coefficient)),
            }
        }
        row
    }
}

impl ConicForm {
    /// Assemble a problem into conic form
    pub fn assemble(problem: &Problem) -> Self {
        let n = problem.num_variables();
        let mut zero_rows: Vec<PendingRow> = Vec::new();
        let mut nonneg_rows: Vec<PendingRow> = Vec::new();
        let mut soc_blocks: Vec<Vec<PendingRow>> = Vec::new();

        // region Constraint rows
        for constraint in problem.constraints() {
            match constraint {
                Constraint::Equality { terms, equals, .. } => {
                    zero_rows.push(PendingRow::from_terms(terms, 1., *equals));
                }
                Constraint::Inequality {
                    terms,
                    lower_bound,
                    upper_bound,
                    ..
                } => {
                    if upper_bound.is_finite() {
                        nonneg_rows.push(PendingRow::from_terms(terms, 1., *upper_bound));
                    }
                    if lower_bound.is_finite() {
                        nonneg_rows.push(PendingRow::from_terms(terms, -1., *lower_bound));
                    }
                }
                Constraint::SecondOrderCone { head, tail, .. } => {
                    // s = b - Ax, so every expression e becomes the row (-coefs, constant)
                    let block = std::iter::once(head)
                        .chain(tail.iter())
                        .map(|e| PendingRow {
                            entries: e
                                .terms
                                .iter()
                                .map(|t| (t.variable, -t.coefficient))
                                .collect(),
                            parametric: Vec::new(),
                            rhs: e.constant,
                        })
                        .collect();
                    soc_blocks.push(block);
                }
            }
        }
        // endregion Constraint rows

        // region Variable bound rows
        let mut integer_bounds = Vec::new();
        for var in problem.variables() {
            let mut lower_row = None;
            let mut upper_row = None;
            if var.upper_bound.is_finite() {
                upper_row = Some(nonneg_rows.len());
                nonneg_rows.push(PendingRow {
                    entries: vec![(var.index(), 1.)],
                    parametric: Vec::new(),
                    rhs: var.upper_bound,
                });
            }
            if var.lower_bound.is_finite() {
                lower_row = Some(nonneg_rows.len());
                nonneg_rows.push(PendingRow {
                    entries: vec![(var.index(), -1.)],
                    parametric: Vec::new(),
                    rhs: -var.lower_bound,
                });
            }
            if var.is_integral() {
                if let (Some(lower_row), Some(upper_row)) = (lower_row, upper_row) {
                    integer_bounds.push(IntegerBound {
                        variable: var.index(),
                        // shifted past the zero cone below
                        lower_row,
                        upper_row,
                        lower: var.lower_bound,
                        upper: var.upper_bound,
                    });
                }
            }
        }
        let zero_offset = zero_rows.len();
        for bound in integer_bounds.iter_mut() {
            bound.lower_row += zero_offset;
            bound.upper_row += zero_offset;
        }
        // endregion Variable bound rows

        // region Stack rows
        let mut cones = Vec::new();
        if !zero_rows.is_empty() {
            cones.push(Cone::Zero(zero_rows.len()));
        }
        if !nonneg_rows.is_empty() {
            cones.push(Cone::Nonnegative(nonneg_rows.len()));
        }
        cones.extend(soc_blocks.iter().map(|block| Cone::SecondOrder(block.len())));
        let rows: Vec<PendingRow> = zero_rows
            .into_iter()
            .chain(nonneg_rows)
            .chain(soc_blocks.into_iter().flatten())
            .collect();
        let m = rows.len();

        let mut coo = CooMatrix::new(m, n);
        let mut b = Vec::with_capacity(m);
        let mut parametric = Vec::new();
        for (i, row) in rows.into_iter().enumerate() {
            for (j, v) in row.entries {
                coo.push(i, j, v);
            }
            for (j, scale, param) in row.parametric {
                // unit placeholder keeps the entry in the sparsity pattern
                coo.push(i, j, 1.);
                parametric.push((i, j, scale, param));
            }
            b.push(row.rhs);
        }
        let a = SparseMatrix::from_coo(&coo);
        // endregion Stack rows

        // region Parameter slots
        let mut slots: Vec<ParameterSlot> = Vec::new();
        for (i, j, scale, param) in parametric {
            // Entries exist by construction
            let Some(position) = a.position(i, j) else {
                continue;
            };
            match slots.iter_mut().find(|s| s.position == position) {
                Some(slot) => {
                    slot.base -= 1.;
                    slot.terms.push((param, scale));
                }
                None => slots.push(ParameterSlot {
                    position,
                    base: a.nzval[position] - 1.,
                    terms: vec![(param, scale)],
                }),
            }
        }
        // endregion Parameter slots

        // region Objective
        let sign = match problem.objective().sense() {
            ObjectiveSense::Minimize => 1.,
            ObjectiveSense::Maximize => -1.,
        };
        let mut q = vec![0.; n];
        let mut p_coo = CooMatrix::new(n, n);
        for term in problem.objective().terms() {
            match *term {
                ObjectiveTerm::Linear { var, coef } => q[var] += sign * coef,
                ObjectiveTerm::Quadratic { var1, var2, coef } => {
                    if var1 == var2 {
                        p_coo.push(var1, var1, 2. * sign * coef);
                    } else {
                        p_coo.push(var1.min(var2), var1.max(var2), sign * coef);
                    }
                }
            }
        }
        let p = SparseMatrix::from_coo(&p_coo);
        // endregion Objective

        let mut form = ConicForm {
            p,
            q,
            a,
            b,
            cones,
            objective_constant: problem.objective().constant(),
            sense: problem.objective().sense(),
            parameters: problem
                .parameters()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            slots,
            integer_bounds,
        };
        form.refresh_parameters();
        form
    }

    /// Change the value of a named parameter, patching every entry it scales
    pub fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), ProblemError> {
        if !value.is_finite() {
            return Err(ProblemError::InvalidParameterValue);
        }
        match self.parameters.get_mut(id) {
            Some(v) => *v = value,
            None => return Err(ProblemError::NonExistentParameter),
        }
        self.refresh_parameters();
        Ok(())
    }

    /// Current value of a parameter
    pub fn parameter(&self, id: &str) -> Option<f64> {
        self.parameters.get(id).copied()
    }

    fn refresh_parameters(&mut self) {
        for slot in &self.slots {
            let value = slot.terms.iter().fold(slot.base, |acc, (param, scale)| {
                acc + scale * self.parameters.get(param).copied().unwrap_or(0.)
            });
            self.a.nzval[slot.position] = value;
        }
    }

    /// Number of variables
    pub fn num_variables(&self) -> usize {
        self.q.len()
    }

    /// Sense of the original objective
    pub fn sense(&self) -> ObjectiveSense {
        self.sense
    }

    /// Bound rows of the integer and binary variables
    pub fn integer_bounds(&self) -> &[IntegerBound] {
        &self.integer_bounds
    }

    /// Whether branching is needed
    pub fn has_integer_variables(&self) -> bool {
        !self.integer_bounds.is_empty()
    }

    /// Value of `½ xᵀPx + qᵀx` at `x`
    pub fn conic_objective(&self, x: &[f64]) -> f64 {
        let px = self.p.multiply(x);
        // P holds only the upper triangle, so add the strictly lower part back
        let mut quad = 0.;
        for col in 0..self.p.ncols {
            for nz in self.p.colptr[col]..self.p.colptr[col + 1] {
                let row = self.p.rowval[nz];
                if row != col {
                    quad += self.p.nzval[nz] * x[col] * x[row];
                }
            }
        }
        let diag_and_upper: f64 = px.iter().zip(x).map(|(a, b)| a * b).sum();
        0.5 * (diag_and_upper + quad) + self.q.iter().zip(x).map(|(a, b)| a * b).sum::<f64>()
    }

    /// Largest scaled violation of `Ax + s = b, s ∈ K` at `x`
    ///
    /// Zero and nonnegative rows are scaled by `1 + |bᵢ|`, second order blocks by one
    /// plus the larger of their head and the norm of their part of `b`. Returns zero
    /// for a feasible point.
    pub fn max_violation(&self, x: &[f64], b: &[f64]) -> f64 {
        let ax = self.a.multiply(x);
        let s: Vec<f64> = b.iter().zip(&ax).map(|(bi, axi)| bi - axi).collect();
        let mut worst = 0f64;
        let mut start = 0;
        for cone in &self.cones {
            let rows = start..start + cone.dim();
            match cone {
                Cone::Zero(_) => {
                    for i in rows.clone() {
                        worst = worst.max(s[i].abs() / (1. + b[i].abs()));
                    }
                }
                Cone::Nonnegative(_) => {
                    for i in rows.clone() {
                        worst = worst.max(-s[i] / (1. + b[i].abs()));
                    }
                }
                Cone::SecondOrder(_) => {
                    let head = s[start];
                    let tail = s[start + 1..rows.end].iter().map(|v| v * v).sum::<f64>().sqrt();
                    let b_norm = b[rows.clone()].iter().map(|v| v * v).sum::<f64>().sqrt();
                    worst = worst.max((tail - head) / (1. + head.abs().max(b_norm)));
                }
            }
            start = rows.end;
        }
        worst
    }

    /// Convert a conic objective value back into the original problem's objective
    pub fn problem_objective(&self, conic_objective: f64) -> f64 {
        match self.sense {
            ObjectiveSense::Minimize => conic_objective + self.objective_constant,
            ObjectiveSense::Maximize => -conic_objective + self.objective_constant,
        }
    }

    /// Convert a value of the original objective into a conic objective value
    pub fn conic_value_of(&self, problem_objective: f64) -> f64 {
        match self.sense {
            ObjectiveSense::Minimize => problem_objective - self.objective_constant,
            ObjectiveSense::Maximize => -(problem_objective - self.objective_constant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::expression::AffineExpr;
    use crate::optimize::variable::VariableType;
    use approx::assert_relative_eq;

    #[test]
    fn cone_ordering_and_bounds() {
        let mut problem = Problem::new_minimization();
        let x = problem
            .add_new_variable("x", VariableType::Continuous, 0., f64::INFINITY)
            .unwrap();
        let y = problem
            .add_new_variable("y", VariableType::Binary, 0., 1.)
            .unwrap();
        problem
            .add_constraint(Constraint::new_second_order_cone(
                "soc",
                AffineExpr::term(x, 1.),
                vec![AffineExpr::term(y, 1.)],
            ))
            .unwrap();
        problem
            .add_new_equality_constraint("eq", &[x, y], &[1., 1.], 1.)
            .unwrap();
        problem
            .add_new_inequality_constraint("ineq", &[x], &[1.], -2., 3.)
            .unwrap();
        problem.add_new_linear_objective_term(x, 1.).unwrap();

        let form = ConicForm::assemble(&problem);
        // 1 equality, 2 inequality rows, 3 bound rows, 1 cone of dimension 2
        assert_eq!(
            form.cones,
            vec![Cone::Zero(1), Cone::Nonnegative(5), Cone::SecondOrder(2)]
        );
        assert_eq!(form.a.nrows, 8);
        assert_eq!(form.b[1], 3.);
        assert_eq!(form.b[2], 2.);

        let bound = form.integer_bounds()[0];
        assert_eq!(bound.variable, y);
        assert_eq!(form.b[bound.upper_row], 1.);
        assert_eq!(form.b[bound.lower_row], 0.);

        assert_eq!(form.max_violation(&[0.5, 0.5], &form.b), 0.);
        assert_eq!(form.max_violation(&[1., 0.], &form.b), 0.);
        // x + y = 0.8 misses the equality by 0.2, scaled by 1 + |1|
        assert_relative_eq!(form.max_violation(&[0.4, 0.4], &form.b), 0.1);
        // y > x leaves the cone
        assert!(form.max_violation(&[0.2, 0.8], &form.b) > 0.1);
    }

    #[test]
    fn parameter_patching() {
        let mut problem = Problem::new_maximization();
        let x = problem
            .add_new_variable("x", VariableType::Continuous, 0., 10.)
            .unwrap();
        let lambda = problem
            .add_new_variable("lambda", VariableType::Continuous, 0., 10.)
            .unwrap();
        problem.add_new_parameter("epsilon", 0.).unwrap();
        problem
            .add_constraint(
                Constraint::new_inequality("amb", &[x, lambda], &[1., 2.], f64::NEG_INFINITY, 4.)
                    .with_parametric_term(lambda, 3., "epsilon")
                    .unwrap(),
            )
            .unwrap();
        problem.add_new_linear_objective_term(x, 2.).unwrap();

        let mut form = ConicForm::assemble(&problem);
        let row = form.a.multiply(&[0., 1.]);
        assert_relative_eq!(row[0], 2.);

        form.set_parameter("epsilon", 0.5).unwrap();
        let row = form.a.multiply(&[0., 1.]);
        assert_relative_eq!(row[0], 3.5);
        assert!(form.set_parameter("rho", 1.).is_err());

        // maximization is negated in conic form
        assert_relative_eq!(form.q[x], -2.);
        assert_relative_eq!(form.problem_objective(form.conic_objective(&[1., 0.])), 2.);
    }

    #[test]
    fn quadratic_objective() {
        let mut problem = Problem::new_minimization();
        let x = problem
            .add_new_variables("x", 2, VariableType::Continuous, f64::NEG_INFINITY, f64::INFINITY)
            .unwrap();
        problem.add_new_quadratic_objective_term(x[0], x[0], 1.).unwrap();
        problem.add_new_quadratic_objective_term(x[1], x[0], 3.).unwrap();
        problem
            .add_objective_expression(&AffineExpr::term(x[1], 1.).plus_constant(2.))
            .unwrap();
        let form = ConicForm::assemble(&problem);
        // x0² + 3 x0 x1 + x1 + 2 at (1, 2) = 1 + 6 + 2 + 2
        assert_relative_eq!(form.problem_objective(form.conic_objective(&[1., 2.])), 11.);
    }
}
