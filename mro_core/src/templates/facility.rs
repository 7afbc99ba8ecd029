//! Capacitated facility location with uncertain demand
use nalgebra::{DMatrix, DVector};

use crate::optimize::expression::AffineExpr;
use crate::optimize::problem::Problem;
use crate::optimize::variable::VariableType;
use crate::robust::{LossFunction, ProblemTemplate, TemplateError};
use crate::templates::{check_finite_matrix, check_finite_vector};

/// Open facilities and route the demand of every location
///
/// Decisions are `open[i]` (binary) and `ship[i][j]`, the fraction of location `j`'s
/// demand served by facility `i`. The cost is `Σ cᵢ openᵢ + Σ Cᵢⱼ shipᵢⱼ`, every
/// location is fully served, and for each facility the expected demand routed to it
/// must stay below its capacity: `E[Σⱼ ξⱼ shipᵢⱼ] − pᵢ openᵢ ≤ 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityLocation {
    opening_cost: DVector<f64>,
    capacity: DVector<f64>,
    shipping_cost: DMatrix<f64>,
}

impl FacilityLocation {
    /// Create an instance
    ///
    /// # Parameters
    /// - `opening_cost`: Cost of opening each of the n facilities
    /// - `capacity`: Capacity of each facility
    /// - `shipping_cost`: n×m cost of serving each location from each facility
    pub fn new(
        opening_cost: DVector<f64>,
        capacity: DVector<f64>,
        shipping_cost: DMatrix<f64>,
    ) -> Result<Self, TemplateError> {
        check_finite_vector("opening_cost", &opening_cost)?;
        check_finite_vector("capacity", &capacity)?;
        check_finite_matrix("shipping_cost", &shipping_cost)?;
        if capacity.len() != opening_cost.len() || shipping_cost.nrows() != opening_cost.len() {
            return Err(TemplateError::InvalidParameters(format!(
                "{} opening costs, {} capacities and {} shipping cost rows",
                opening_cost.len(),
                capacity.len(),
                shipping_cost.nrows()
            )));
        }
        Ok(Self {
            opening_cost,
            capacity,
            shipping_cost,
        })
    }

    /// Number of facilities n
    pub fn num_facilities(&self) -> usize {
        self.opening_cost.len()
    }

    /// Number of locations m
    pub fn num_locations(&self) -> usize {
        self.shipping_cost.ncols()
    }

    /// Which facilities are open in a decision
    pub fn open_values(&self, decision: &[f64]) -> Vec<f64> {
        decision[..self.num_facilities()].to_vec()
    }

    /// n×m routing fractions in a decision
    pub fn shipments(&self, decision: &[f64]) -> DMatrix<f64> {
        let (n, m) = (self.num_facilities(), self.num_locations());
        DMatrix::from_fn(n, m, |i, j| decision[n + i * m + j])
    }
}

impl ProblemTemplate for FacilityLocation {
    fn name(&self) -> &str {
        "facility_location"
    }

    fn scenario_dimension(&self) -> usize {
        self.num_locations()
    }

    fn formulate(&self, problem: &mut Problem) -> Result<Vec<LossFunction>, TemplateError> {
        let (n, m) = (self.num_facilities(), self.num_locations());
        let open = problem.add_new_variables("open", n, VariableType::Binary, 0., 1.)?;
        let mut ship = Vec::with_capacity(n);
        for i in 0..n {
            ship.push(problem.add_new_variables(
                &format!("ship[{}]", i),
                m,
                VariableType::Continuous,
                0.,
                f64::INFINITY,
            )?);
        }

        for i in 0..n {
            problem.add_new_linear_objective_term(open[i], self.opening_cost[i])?;
            for j in 0..m {
                problem.add_new_linear_objective_term(ship[i][j], self.shipping_cost[(i, j)])?;
            }
        }
        for j in 0..m {
            let served: Vec<usize> = ship.iter().map(|row| row[j]).collect();
            problem.add_new_equality_constraint(
                &format!("serve[{}]", j),
                &served,
                &vec![1.; n],
                1.,
            )?;
        }

        Ok((0..n)
            .map(|i| {
                LossFunction::new(
                    AffineExpr::term(open[i], -self.capacity[i]),
                    ship[i].iter().map(|&v| AffineExpr::term(v, 1.)).collect(),
                )
            })
            .collect())
    }
}
