//! Multi product newsvendor with a CVaR style objective
use nalgebra::DVector;

use crate::optimize::expression::AffineExpr;
use crate::optimize::problem::Problem;
use crate::optimize::variable::VariableType;
use crate::robust::{LossFunction, ProblemTemplate, TemplateError};
use crate::templates::check_finite_vector;

/// Weight of the ordering cost and uncertain revenue in the loss
const LOSS_SCALE: f64 = 50.;
/// Weight of the auxiliary level `tao` in the loss
const LEVEL_WEIGHT: f64 = -40.;
/// Bound on the weighted ordering cost `a·q + ½ a·y`
const ORDER_BUDGET: f64 = 20.;

/// Order quantities of m products under uncertain price multipliers
///
/// Decisions are the order `q ∈ [0, 5b]`, the overage `y ≥ max(q − b, 0)`, the level
/// `tao` and the epigraph `t`, which is minimized. The uncertain loss is
/// `−t + 50 (a·q + ½ a·y) − 40 tao − 50 Σⱼ ξⱼ pⱼ` with budget 0.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsvendorCvar {
    cost: DVector<f64>,
    base_order: DVector<f64>,
    price: DVector<f64>,
}

impl NewsvendorCvar {
    /// Create an instance
    ///
    /// # Parameters
    /// - `cost`: Unit cost `a` of each product
    /// - `base_order`: Order `b` above which overage is paid, and a fifth of the
    ///   maximum order
    /// - `price`: Nominal price `p` of each product, scaled by the scenario
    pub fn new(
        cost: DVector<f64>,
        base_order: DVector<f64>,
        price: DVector<f64>,
    ) -> Result<Self, TemplateError> {
        check_finite_vector("cost", &cost)?;
        check_finite_vector("base_order", &base_order)?;
        check_finite_vector("price", &price)?;
        if base_order.len() != cost.len() || price.len() != cost.len() {
            return Err(TemplateError::InvalidParameters(format!(
                "{} costs, {} base orders and {} prices",
                cost.len(),
                base_order.len(),
                price.len()
            )));
        }
        if base_order.iter().any(|&b| b < 0.) {
            return Err(TemplateError::InvalidParameters(
                "base_order has negative entries".to_string(),
            ));
        }
        Ok(Self {
            cost,
            base_order,
            price,
        })
    }

    /// Number of products m
    pub fn num_products(&self) -> usize {
        self.cost.len()
    }

    /// Order quantities in a decision
    pub fn order_values(&self, decision: &[f64]) -> Vec<f64> {
        decision[..self.num_products()].to_vec()
    }
}

impl ProblemTemplate for NewsvendorCvar {
    fn name(&self) -> &str {
        "newsvendor_cvar"
    }

    fn scenario_dimension(&self) -> usize {
        self.num_products()
    }

    fn formulate(&self, problem: &mut Problem) -> Result<Vec<LossFunction>, TemplateError> {
        let m = self.num_products();
        let mut order = Vec::with_capacity(m);
        for j in 0..m {
            order.push(problem.add_new_variable(
                &format!("order[{}]", j),
                VariableType::Continuous,
                0.,
                5. * self.base_order[j],
            )?);
        }
        let overage =
            problem.add_new_variables("overage", m, VariableType::Continuous, 0., f64::INFINITY)?;
        let tao = problem.add_new_variable(
            "tao",
            VariableType::Continuous,
            f64::NEG_INFINITY,
            f64::INFINITY,
        )?;
        let t = problem.add_new_variable(
            "t",
            VariableType::Continuous,
            f64::NEG_INFINITY,
            f64::INFINITY,
        )?;
        problem.add_new_linear_objective_term(t, 1.)?;

        // a·q + ½ a·y
        let mut spend = AffineExpr::zero();
        for j in 0..m {
            spend.add_term(order[j], self.cost[j]);
            spend.add_term(overage[j], 0.5 * self.cost[j]);
        }

        let mut nominal = spend.clone().scaled(LOSS_SCALE).with_term(tao, LEVEL_WEIGHT);
        for j in 0..m {
            nominal.add_term(order[j], -LOSS_SCALE * self.price[j]);
        }
        problem.add_affine_upper_constraint("nominal", &nominal.with_term(t, -1.), 0.)?;
        problem.add_new_inequality_constraint(
            "level",
            &[tao, t],
            &[10., -1.],
            f64::NEG_INFINITY,
            0.,
        )?;
        for j in 0..m {
            problem.add_new_inequality_constraint(
                &format!("overage[{}]", j),
                &[order[j], overage[j]],
                &[1., -1.],
                f64::NEG_INFINITY,
                self.base_order[j],
            )?;
        }
        problem.add_affine_upper_constraint("spend", &spend, ORDER_BUDGET)?;

        let offset = spend
            .scaled(LOSS_SCALE)
            .with_term(tao, LEVEL_WEIGHT)
            .with_term(t, -1.);
        let coefficients = self
            .price
            .iter()
            .map(|&p| AffineExpr::constant(-LOSS_SCALE * p))
            .collect();
        Ok(vec![LossFunction::new(offset, coefficients)])
    }
}
