//! Cardinality constrained portfolio with a CVaR style objective
use crate::optimize::expression::AffineExpr;
use crate::optimize::problem::Problem;
use crate::optimize::variable::VariableType;
use crate::robust::{LossFunction, ProblemTemplate, TemplateError};

/// Weight of the uncertain return in the loss
const RETURN_WEIGHT: f64 = -50.;
/// Weight of the auxiliary level `tao` in the loss
const LEVEL_WEIGHT: f64 = -40.;

/// Allocate a budget over m assets, holding at most a fixed number of them
///
/// Decisions are the weights `x ∈ [0, 1]` summing to one, the holding indicators `z`
/// (binary, `x ≤ z`, `Σ z ≤ max_assets`), the level `tao` and the epigraph `t`, which
/// is minimized with `10 tao ≤ t`. The uncertain loss is `−40 tao − 50 Σⱼ ξⱼ xⱼ`
/// with budget `t`, ξ being the asset returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortfolioMip {
    num_assets: usize,
    max_assets: usize,
}

impl PortfolioMip {
    /// Create an instance over `num_assets` assets holding at most `max_assets`
    pub fn new(num_assets: usize, max_assets: usize) -> Result<Self, TemplateError> {
        if num_assets == 0 || max_assets == 0 {
            return Err(TemplateError::InvalidParameters(format!(
                "portfolio of {} assets holding at most {}",
                num_assets, max_assets
            )));
        }
        Ok(Self {
            num_assets,
            max_assets,
        })
    }

    /// Number of assets m
    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    /// Maximum number of assets held
    pub fn max_assets(&self) -> usize {
        self.max_assets
    }

    /// Asset weights in a decision
    pub fn weights(&self, decision: &[f64]) -> Vec<f64> {
        decision[..self.num_assets].to_vec()
    }
}

impl ProblemTemplate for PortfolioMip {
    fn name(&self) -> &str {
        "portfolio_mip"
    }

    fn scenario_dimension(&self) -> usize {
        self.num_assets
    }

    fn formulate(&self, problem: &mut Problem) -> Result<Vec<LossFunction>, TemplateError> {
        let m = self.num_assets;
        let weights = problem.add_new_variables("weight", m, VariableType::Continuous, 0., 1.)?;
        let held = problem.add_new_variables("held", m, VariableType::Binary, 0., 1.)?;
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

        problem.add_new_inequality_constraint(
            "level",
            &[tao, t],
            &[10., -1.],
            f64::NEG_INFINITY,
            0.,
        )?;
        problem.add_new_equality_constraint("allocation", &weights, &vec![1.; m], 1.)?;
        for (j, (&w, &z)) in weights.iter().zip(&held).enumerate() {
            problem.add_new_inequality_constraint(
                &format!("holding[{}]", j),
                &[w, z],
                &[1., -1.],
                f64::NEG_INFINITY,
                0.,
            )?;
        }
        problem.add_new_inequality_constraint(
            "cardinality",
            &held,
            &vec![1.; m],
            f64::NEG_INFINITY,
            self.max_assets as f64,
        )?;

        let coefficients = weights
            .iter()
            .map(|&w| AffineExpr::term(w, RETURN_WEIGHT))
            .collect();
        Ok(vec![LossFunction::new(AffineExpr::term(tao, LEVEL_WEIGHT), coefficients)
            .with_budget(AffineExpr::term(t, 1.))])
    }
}
