//! Module providing representation of optimization problem variables
use std::fmt::{Display, Formatter};

use derive_builder::Builder;

/// A decision variable of an optimization problem
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(setter(into))]
pub struct Variable {
    /// Used to identify the variable, must be unique within a problem
    pub id: String,
    /// Domain of the variable, see [`VariableType`]
    #[builder(default = "VariableType::Continuous")]
    pub variable_type: VariableType,
    /// Lowest value the variable can take, may be `f64::NEG_INFINITY`
    #[builder(default = "f64::NEG_INFINITY")]
    pub lower_bound: f64,
    /// Highest value the variable can take, may be `f64::INFINITY`
    #[builder(default = "f64::INFINITY")]
    pub upper_bound: f64,
    /// Position of the variable in the problem, set when it is added
    #[builder(default = "0")]
    pub(crate) index: usize,
}

impl Variable {
    /// Index of the variable within the problem it belongs to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the variable must take an integral value
    pub fn is_integral(&self) -> bool {
        matches!(
            self.variable_type,
            VariableType::Integer | VariableType::Binary
        )
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.variable_type)
    }
}

/// Represents the type of variable in an optimization problem
///
/// # Notes:
/// Integer and Binary variables are never relaxed away, the solver adapter handles
/// them with branch and bound over the continuous relaxation
#[derive(Debug, PartialEq, Clone, Copy, Hash, Eq)]
pub enum VariableType {
    /// Continuous variable
    Continuous,
    /// Integer variable
    Integer,
    /// Binary Variable
    Binary,
}

impl Display for VariableType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableType::Continuous => write!(f, "CONTINUOUS"),
            VariableType::Integer => write!(f, "INTEGER"),
            VariableType::Binary => write!(f, "BINARY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let var = VariableBuilder::default().id("x").build().unwrap();
        assert_eq!(var.variable_type, VariableType::Continuous);
        assert!(var.lower_bound.is_infinite() && var.lower_bound < 0.);
        assert!(var.upper_bound.is_infinite() && var.upper_bound > 0.);
        assert!(!var.is_integral());
    }

    #[test]
    fn display() {
        let var = VariableBuilder::default()
            .id("open[0]")
            .variable_type(VariableType::Binary)
            .lower_bound(0.)
            .upper_bound(1.)
            .build()
            .unwrap();
        assert_eq!(format!("{}", var), "open[0]:BINARY");
        assert!(var.is_integral());
    }
}
