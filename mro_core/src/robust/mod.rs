//! Wasserstein robust counterparts of problem templates over reduced distributions
pub mod counterpart;
pub mod template;

pub use counterpart::{RobustCounterpartBuilder, RobustProgram, SolveResult};
pub use template::{LossFunction, ProblemTemplate, QuadraticForm, TemplateError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::optimize::problem::ProblemError;
use crate::scenario::DimensionError;

/// How the dual multiplier and slacks are shared between the losses of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formulation {
    /// One multiplier and one slack vector per loss, each loss is robust on its own
    #[default]
    Separate,
    /// One multiplier and one slack vector shared by all losses, the worst loss per
    /// scenario is robust, more conservative than [`Formulation::Separate`]
    Pooled,
}

/// Errors associated with building a robust program
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The template or one of its losses is invalid
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// The reduced distribution or a loss does not match the template's scenario dimension
    #[error(transparent)]
    Dimension(#[from] DimensionError),
    /// The modeling layer rejected part of the program
    #[error(transparent)]
    Problem(#[from] ProblemError),
    /// Error when the radius is negative or not finite
    #[error("Tried to use a negative or non-finite radius {0}")]
    InvalidRadius(f64),
}
