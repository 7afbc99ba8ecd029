//! Problem families used in the experiments
//!
//! Each family is a [`ProblemTemplate`](crate::robust::ProblemTemplate) holding its
//! instance parameters. The decision variables are added first, so accessors such as
//! [`FacilityLocation::open_values`] read them from the front of a solution.
pub mod facility;
pub mod newsvendor;
pub mod portfolio;

pub use facility::FacilityLocation;
pub use newsvendor::NewsvendorCvar;
pub use portfolio::PortfolioMip;

use nalgebra::{DMatrix, DVector};

use crate::robust::TemplateError;

fn check_finite_vector(name: &str, values: &DVector<f64>) -> Result<(), TemplateError> {
    if values.is_empty() {
        return Err(TemplateError::InvalidParameters(format!("{} is empty", name)));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(TemplateError::InvalidParameters(format!(
            "{} has non-finite entries",
            name
        )));
    }
    Ok(())
}

fn check_finite_matrix(name: &str, values: &DMatrix<f64>) -> Result<(), TemplateError> {
    if values.is_empty() {
        return Err(TemplateError::InvalidParameters(format!("{} is empty", name)));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(TemplateError::InvalidParameters(format!(
            "{} has non-finite entries",
            name
        )));
    }
    Ok(())
}
