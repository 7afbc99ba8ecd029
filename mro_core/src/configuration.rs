//! Configuration of the sweep, the scenario reducer and the solver
//!
//! Every section can be deserialized from JSON, missing fields take their default
//! values. Configuration is always passed explicitly, nothing is stored globally.
use std::path::Path;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::robust::Formulation;

/// Complete configuration for an experiment
#[derive(Builder, Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct Configuration {
    /// Grid, repetitions and parallelism of the sweep
    pub sweep: SweepConfig,
    /// Settings of the k-means reduction
    pub reducer: ReducerConfig,
    /// Tolerances and limits of the solver
    pub solver: SolverSettings,
}

impl Configuration {
    /// Parse a configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let config: Configuration = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check every section of the configuration
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.sweep.validate()?;
        self.reducer.validate()?;
        self.solver.validate()?;
        Ok(())
    }
}

// region Sweep
/// Configuration of the K × ε sweep
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct SweepConfig {
    /// Numbers of reduced scenarios to try
    pub k_values: Vec<usize>,
    /// Wasserstein radii to try, solved in the order given
    pub epsilons: Vec<f64>,
    /// Number of independent repetitions
    pub repetitions: usize,
    /// Repetition `r` seeds its reduction with `seed_base + r`
    pub seed_base: u64,
    /// Upper bound on the number of worker threads
    pub max_parallelism: usize,
    /// How the dual multipliers of the losses are shared
    pub formulation: Formulation,
    /// Out of sample statistics at or below this value count as satisfied
    pub evaluation_tolerance: f64,
    /// Wall clock limit of each solve, in seconds
    pub time_limit_secs: f64,
    /// Bound each integer solve by the optimum at the previous, smaller radius
    pub warm_start: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            k_values: vec![1, 5, 10, 50, 100],
            epsilons: vec![0., 0.01, 0.05, 0.1, 0.5, 1.],
            repetitions: 10,
            seed_base: 0,
            max_parallelism: 1,
            formulation: Formulation::Separate,
            evaluation_tolerance: 1e-3,
            time_limit_secs: 300.,
            warm_start: true,
        }
    }
}

impl SweepConfig {
    /// Check the grid and the limits of the sweep
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.k_values.is_empty() {
            return Err(ConfigurationError::EmptyGrid("k_values"));
        }
        if self.epsilons.is_empty() {
            return Err(ConfigurationError::EmptyGrid("epsilons"));
        }
        if self.k_values.contains(&0) {
            return Err(ConfigurationError::ZeroClusterCount);
        }
        if let Some(&eps) = self.epsilons.iter().find(|e| !e.is_finite() || **e < 0.) {
            return Err(ConfigurationError::InvalidRadius(eps));
        }
        if self.repetitions == 0 {
            return Err(ConfigurationError::ZeroRepetitions);
        }
        if self.max_parallelism == 0 {
            return Err(ConfigurationError::ZeroParallelism);
        }
        validate_positive("evaluation_tolerance", self.evaluation_tolerance)?;
        validate_positive("time_limit_secs", self.time_limit_secs)?;
        Ok(())
    }
}
// endregion Sweep

// region Reducer
/// Configuration of the k-means scenario reduction
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct ReducerConfig {
    /// Maximum Lloyd iterations per restart
    pub max_iterations: usize,
    /// Number of independent k-means++ seedings, the lowest inertia is kept
    pub restarts: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            restarts: 4,
        }
    }
}

impl ReducerConfig {
    /// Check the iteration limits
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_iterations == 0 {
            return Err(ConfigurationError::ZeroIterations("max_iterations"));
        }
        if self.restarts == 0 {
            return Err(ConfigurationError::ZeroIterations("restarts"));
        }
        Ok(())
    }
}
// endregion Reducer

// region Solver
/// Tolerances and limits of the conic solver and of branch and bound
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct SolverSettings {
    /// Maximum interior point iterations per relaxation
    pub max_iterations: u32,
    /// Absolute duality gap tolerance of each relaxation
    pub tolerance_gap_abs: f64,
    /// Relative duality gap tolerance of each relaxation
    pub tolerance_gap_rel: f64,
    /// Feasibility tolerance of each relaxation
    pub tolerance_feasibility: f64,
    /// Absolute gap under which a branch and bound node is pruned
    pub mip_gap_abs: f64,
    /// Relative gap under which a branch and bound node is pruned
    pub mip_gap_rel: f64,
    /// Distance from an integer under which a value counts as integral
    pub integrality_tolerance: f64,
    /// Maximum branch and bound nodes per solve
    pub max_nodes: usize,
    /// Print solver progress
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance_gap_abs: 1e-8,
            tolerance_gap_rel: 1e-8,
            tolerance_feasibility: 1e-8,
            mip_gap_abs: 1e-6,
            mip_gap_rel: 1e-4,
            integrality_tolerance: 1e-6,
            max_nodes: 10_000,
            verbose: false,
        }
    }
}

impl SolverSettings {
    /// Check that every tolerance is positive and the limits are nonzero
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_positive("tolerance_gap_abs", self.tolerance_gap_abs)?;
        validate_positive("tolerance_gap_rel", self.tolerance_gap_rel)?;
        validate_positive("tolerance_feasibility", self.tolerance_feasibility)?;
        validate_positive("mip_gap_abs", self.mip_gap_abs)?;
        validate_positive("mip_gap_rel", self.mip_gap_rel)?;
        validate_positive("integrality_tolerance", self.integrality_tolerance)?;
        if self.integrality_tolerance >= 0.5 {
            return Err(ConfigurationError::NonPositiveValue("integrality_tolerance"));
        }
        if self.max_iterations == 0 {
            return Err(ConfigurationError::ZeroIterations("max_iterations"));
        }
        if self.max_nodes == 0 {
            return Err(ConfigurationError::ZeroIterations("max_nodes"));
        }
        Ok(())
    }

    /// Branch and bound optimality gap around an objective value
    pub fn mip_gap(&self, objective: f64) -> f64 {
        self.mip_gap_abs.max(self.mip_gap_rel * objective.abs())
    }
}
// endregion Solver

fn validate_positive(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0. {
        Ok(())
    } else {
        Err(ConfigurationError::NonPositiveValue(name))
    }
}

/// Number of worker threads to use, at most `max`
///
/// Uses `SLURM_CPUS_PER_TASK` when it is set to a positive integer, the available
/// parallelism of the machine otherwise. Always at least 1.
pub fn detect_parallelism(max: usize) -> usize {
    let detected = std::env::var("SLURM_CPUS_PER_TASK")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);
    detected.clamp(1, max.max(1))
}

/// Errors associated with reading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// Error when a sweep grid has no values
    #[error("Tried to configure a sweep with an empty {0} grid")]
    EmptyGrid(&'static str),
    /// Error when a sweep includes K = 0
    #[error("Tried to configure a sweep with K = 0 reduced scenarios")]
    ZeroClusterCount,
    /// Error when a radius is negative or not finite
    #[error("Tried to configure a negative or non-finite radius {0}")]
    InvalidRadius(f64),
    /// Error when a sweep has no repetitions
    #[error("Tried to configure a sweep with zero repetitions")]
    ZeroRepetitions,
    /// Error when no worker threads are allowed
    #[error("Tried to configure a sweep with zero worker threads")]
    ZeroParallelism,
    /// Error when a tolerance or time limit is not positive
    #[error("Configured value {0} must be positive and finite")]
    NonPositiveValue(&'static str),
    /// Error when an iteration, restart or node limit is zero
    #[error("Configured limit {0} must be nonzero")]
    ZeroIterations(&'static str),
    /// Error reading a configuration file
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    /// Error parsing configuration JSON
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
