//! Sweeps the robust program over cluster counts, radii and repetitions
//!
//! Every repetition reduces its own training sample for each K, builds the robust
//! program once per K, then updates the radius and solves for each ε in order.
//! Repetitions are independent and run on a rayon pool, each filling only its own
//! slice of the [`ExperimentResult`], so the outcome does not depend on the number
//! of workers.
use std::time::{Duration, Instant};

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::configuration::{Configuration, ConfigurationError, SweepConfig};
use crate::evaluate::{EvaluationRecord, OutOfSampleEvaluator};
use crate::optimize::solvers::{SolverAdapter, SolverError};
use crate::optimize::OptimizationStatus;
use crate::robust::{ProblemTemplate, RobustCounterpartBuilder, SolveResult};
use crate::scenario::reduce::ScenarioReducer;
use crate::scenario::{DimensionError, ExperimentData};

/// Outcome of one solve of the sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellRecord {
    /// Classified solver outcome
    pub status: OptimizationStatus,
    /// In sample optimum, when a solution is available
    pub objective: Option<f64>,
    /// Values of the template's decision variables
    pub decision: Option<Vec<f64>>,
    /// Dual multipliers λ, one per multiplier group
    pub lambdas: Option<Vec<f64>>,
    /// Slacks, one row per multiplier group and one column per reduced point
    pub slacks: Option<DMatrix<f64>>,
    /// Wall clock solve time
    pub solve_time: Duration,
    /// Branch and bound nodes solved
    pub nodes_explored: usize,
    /// Out of sample checks, when a solution is available
    pub evaluation: Option<EvaluationRecord>,
}

impl CellRecord {
    /// Whether the record carries a solution
    pub fn has_solution(&self) -> bool {
        self.objective.is_some()
    }
}

impl From<SolveResult> for CellRecord {
    fn from(result: SolveResult) -> Self {
        Self {
            status: result.status,
            objective: result.objective,
            decision: result.decision,
            lambdas: result.lambdas,
            slacks: result.slacks,
            solve_time: result.solve_time,
            nodes_explored: result.nodes_explored,
            evaluation: None,
        }
    }
}

/// State of one (repetition, K, ε) cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CellOutcome {
    /// Not yet run
    Pending,
    /// Reduction, build or solve failed with the given reason
    Failed(String),
    /// The solver ran, see the record's status
    Complete(CellRecord),
}

/// Results of a sweep, one cell per (repetition, K, ε) plus per (repetition, K) timings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentResult {
    k_values: Vec<usize>,
    epsilons: Vec<f64>,
    repetitions: usize,
    /// Repetition major, then K, then ε
    cells: Vec<CellOutcome>,
    /// Repetition major, then K
    reduction_times: Vec<Option<Duration>>,
    build_times: Vec<Option<Duration>>,
    inertia: Vec<Option<f64>>,
}

impl ExperimentResult {
    /// Allocate a result with every cell pending
    pub fn new(k_values: Vec<usize>, epsilons: Vec<f64>, repetitions: usize) -> Self {
        let blocks = repetitions * k_values.len();
        Self {
            cells: vec![CellOutcome::Pending; blocks * epsilons.len()],
            reduction_times: vec![None; blocks],
            build_times: vec![None; blocks],
            inertia: vec![None; blocks],
            k_values,
            epsilons,
            repetitions,
        }
    }

    /// Cluster counts of the grid
    pub fn k_values(&self) -> &[usize] {
        &self.k_values
    }

    /// Radii of the grid
    pub fn epsilons(&self) -> &[f64] {
        &self.epsilons
    }

    /// Number of repetitions
    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    fn block(&self, repetition: usize, k_index: usize) -> Option<usize> {
        (repetition < self.repetitions && k_index < self.k_values.len())
            .then(|| repetition * self.k_values.len() + k_index)
    }

    fn position(&self, repetition: usize, k_index: usize, epsilon_index: usize) -> Option<usize> {
        if epsilon_index >= self.epsilons.len() {
            return None;
        }
        self.block(repetition, k_index)
            .map(|b| b * self.epsilons.len() + epsilon_index)
    }

    /// State of a cell
    pub fn cell(
        &self,
        repetition: usize,
        k_index: usize,
        epsilon_index: usize,
    ) -> Option<&CellOutcome> {
        self.position(repetition, k_index, epsilon_index)
            .map(|p| &self.cells[p])
    }

    /// Record of a cell, when the solver ran for it
    pub fn record(
        &self,
        repetition: usize,
        k_index: usize,
        epsilon_index: usize,
    ) -> Option<&CellRecord> {
        match self.cell(repetition, k_index, epsilon_index) {
            Some(CellOutcome::Complete(record)) => Some(record),
            _ => None,
        }
    }

    /// Time spent reducing the training sample of a repetition to K points
    pub fn reduction_time(&self, repetition: usize, k_index: usize) -> Option<Duration> {
        self.block(repetition, k_index)
            .and_then(|b| self.reduction_times[b])
    }

    /// Time spent building the robust program of a repetition for K points
    pub fn build_time(&self, repetition: usize, k_index: usize) -> Option<Duration> {
        self.block(repetition, k_index).and_then(|b| self.build_times[b])
    }

    /// Clustering inertia of a repetition for K points
    pub fn inertia(&self, repetition: usize, k_index: usize) -> Option<f64> {
        self.block(repetition, k_index).and_then(|b| self.inertia[b])
    }

    /// Number of cells that failed
    pub fn num_failed(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| matches!(c, CellOutcome::Failed(_)))
            .count()
    }

    /// Number of cells not yet run
    pub fn num_pending(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| matches!(c, CellOutcome::Pending))
            .count()
    }

    /// Set a pending cell, returning false if it was already set or out of range
    pub(crate) fn set_cell(
        &mut self,
        repetition: usize,
        k_index: usize,
        epsilon_index: usize,
        outcome: CellOutcome,
    ) -> bool {
        match self.position(repetition, k_index, epsilon_index) {
            Some(p) if self.cells[p] == CellOutcome::Pending => {
                self.cells[p] = outcome;
                true
            }
            _ => false,
        }
    }

    fn fill_repetition(&mut self, repetition: usize, block: RepetitionBlock) {
        let n_k = self.k_values.len();
        let n_eps = self.epsilons.len();
        let start = repetition * n_k;
        self.reduction_times[start..start + n_k].copy_from_slice(&block.reduction_times);
        self.build_times[start..start + n_k].copy_from_slice(&block.build_times);
        self.inertia[start..start + n_k].copy_from_slice(&block.inertia);
        let start = start * n_eps;
        for (slot, cell) in self.cells[start..start + n_k * n_eps]
            .iter_mut()
            .zip(block.cells)
        {
            *slot = cell;
        }
    }
}

/// Outcomes of one repetition, in the layout of its slice of [`ExperimentResult`]
struct RepetitionBlock {
    cells: Vec<CellOutcome>,
    reduction_times: Vec<Option<Duration>>,
    build_times: Vec<Option<Duration>>,
    inertia: Vec<Option<f64>>,
}

/// Runs the K × ε × repetition experiment for one template
#[derive(Debug)]
pub struct SweepOrchestrator {
    config: SweepConfig,
    reducer: ScenarioReducer,
    adapter: SolverAdapter,
}

impl SweepOrchestrator {
    /// Create an orchestrator
    pub fn new(config: SweepConfig, reducer: ScenarioReducer, adapter: SolverAdapter) -> Self {
        Self {
            config,
            reducer,
            adapter,
        }
    }

    /// Create an orchestrator from a full configuration, with a Clarabel backend
    pub fn from_configuration(configuration: &Configuration) -> Result<Self, SweepError> {
        configuration.validate()?;
        let adapter = SolverAdapter::new(configuration.solver.clone()).map_err(|e| match e {
            SolverError::Misconfigured(reason) | SolverError::InvalidProblem(reason) => {
                SweepError::SolverUnavailable(reason)
            }
        })?;
        Ok(Self::new(
            configuration.sweep.clone(),
            ScenarioReducer::new(configuration.reducer.clone()),
            adapter,
        ))
    }

    /// Sweep configuration in use
    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run the sweep
    ///
    /// # Parameters
    /// - `template`: Problem family to robustify
    /// - `data`: Training and evaluation samples, one pair per repetition
    ///
    /// # Returns
    /// The filled result. Reduction, build and solver failures are recorded in the
    /// affected cells, only invalid inputs and an unusable solver abort the run.
    pub fn run(
        &self,
        template: &dyn ProblemTemplate,
        data: &ExperimentData,
    ) -> Result<ExperimentResult, SweepError> {
        self.config.validate()?;
        if data.repetitions() != self.config.repetitions {
            return Err(SweepError::RepetitionMismatch {
                expected: self.config.repetitions,
                found: data.repetitions(),
            });
        }
        if data.dimension() != template.scenario_dimension() {
            return Err(DimensionError::Mismatch {
                expected: template.scenario_dimension(),
                found: data.dimension(),
            }
            .into());
        }

        let workers = self.config.max_parallelism.min(self.config.repetitions);
        info!(
            template = template.name(),
            repetitions = self.config.repetitions,
            k_values = ?self.config.k_values,
            epsilons = ?self.config.epsilons,
            workers,
            "starting sweep"
        );
        let start = Instant::now();

        let blocks: Vec<RepetitionBlock> = if workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()?;
            pool.install(|| {
                (0..self.config.repetitions)
                    .into_par_iter()
                    .map(|r| self.run_repetition(template, data, r))
                    .collect::<Result<Vec<_>, _>>()
            })?
        } else {
            (0..self.config.repetitions)
                .map(|r| self.run_repetition(template, data, r))
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut result = ExperimentResult::new(
            self.config.k_values.clone(),
            self.config.epsilons.clone(),
            self.config.repetitions,
        );
        for (r, block) in blocks.into_iter().enumerate() {
            result.fill_repetition(r, block);
        }
        info!(
            failed = result.num_failed(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "sweep finished"
        );
        Ok(result)
    }

    fn run_repetition(
        &self,
        template: &dyn ProblemTemplate,
        data: &ExperimentData,
        repetition: usize,
    ) -> Result<RepetitionBlock, SweepError> {
        let pair = (data.training(repetition), data.evaluation(repetition));
        let (training, evaluation) = match pair {
            (Some(t), Some(e)) => (t, e),
            _ => {
                return Err(SweepError::RepetitionMismatch {
                    expected: self.config.repetitions,
                    found: data.repetitions(),
                })
            }
        };
        let n_k = self.config.k_values.len();
        let n_eps = self.config.epsilons.len();
        let mut block = RepetitionBlock {
            cells: Vec::with_capacity(n_k * n_eps),
            reduction_times: vec![None; n_k],
            build_times: vec![None; n_k],
            inertia: vec![None; n_k],
        };
        let seed = self.config.seed_base.wrapping_add(repetition as u64);
        let builder = RobustCounterpartBuilder::new(self.config.formulation);
        let evaluator = OutOfSampleEvaluator::new(self.config.evaluation_tolerance);
        let time_limit = Duration::from_secs_f64(self.config.time_limit_secs);
        let settings = self.adapter.settings();

        for (k_index, &k) in self.config.k_values.iter().enumerate() {
            let start = Instant::now();
            let reduced = match self.reducer.reduce(training, k, seed) {
                Ok(reduced) => reduced,
                Err(e) => {
                    warn!(repetition, k, error = %e, "reduction failed");
                    block.cells.extend(vec![CellOutcome::Failed(e.to_string()); n_eps]);
                    continue;
                }
            };
            block.reduction_times[k_index] = Some(start.elapsed());
            block.inertia[k_index] = Some(reduced.inertia());

            let start = Instant::now();
            let mut program = match builder.build(template, &reduced) {
                Ok(program) => program,
                Err(e) => {
                    warn!(repetition, k, error = %e, "build failed");
                    block.cells.extend(vec![CellOutcome::Failed(e.to_string()); n_eps]);
                    continue;
                }
            };
            block.build_times[k_index] = Some(start.elapsed());
            let warm_start = self.config.warm_start && program.form().has_integer_variables();

            // (epsilon, optimum) of the last optimal solve at this K
            let mut previous: Option<(f64, f64)> = None;
            for (epsilon_index, &epsilon) in self.config.epsilons.iter().enumerate() {
                program = match program.update(epsilon) {
                    Ok(program) => program,
                    Err(e) => {
                        // the program is consumed, nothing further can run at this K
                        warn!(repetition, k, epsilon, error = %e, "radius update failed");
                        let remaining = n_eps - epsilon_index;
                        block.cells.extend(vec![CellOutcome::Failed(e.to_string()); remaining]);
                        break;
                    }
                };
                // the optimum is nondecreasing in the radius, and an optimal branch and
                // bound objective is within the gap of its true optimum
                let lower_bound = previous
                    .filter(|&(previous_epsilon, _)| warm_start && epsilon >= previous_epsilon)
                    .map(|(_, objective)| objective - settings.mip_gap(objective));
                let solved = self
                    .adapter
                    .solve_with_bound(&program, Some(time_limit), lower_bound);
                let solved = match solved {
                    Ok(solved) => solved,
                    Err(SolverError::Misconfigured(reason)) => {
                        return Err(SweepError::SolverUnavailable(reason))
                    }
                    Err(e) => {
                        warn!(repetition, k, epsilon, error = %e, "solve failed");
                        block.cells.push(CellOutcome::Failed(e.to_string()));
                        continue;
                    }
                };
                previous = solved
                    .objective
                    .filter(|_| solved.status.is_optimal())
                    .map(|objective| (epsilon, objective));

                let evaluation = match solved.decision.as_deref() {
                    Some(decision) => {
                        match evaluator.evaluate(program.losses(), decision, evaluation) {
                            Ok(record) => Some(record),
                            Err(e) => {
                                warn!(repetition, k, epsilon, error = %e, "evaluation failed");
                                None
                            }
                        }
                    }
                    None => None,
                };
                debug!(
                    repetition,
                    k,
                    epsilon,
                    status = %solved.status,
                    objective = ?solved.objective,
                    "cell finished"
                );
                block.cells.push(CellOutcome::Complete(CellRecord {
                    evaluation,
                    ..solved.into()
                }));
            }
        }
        Ok(block)
    }
}

/// Errors that abort a sweep
#[derive(Error, Debug)]
pub enum SweepError {
    /// The sweep configuration is invalid
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The data does not match the template
    #[error(transparent)]
    Dimension(#[from] DimensionError),
    /// The data has a different number of repetitions than configured
    #[error("Configured {expected} repetitions but the data has {found}")]
    RepetitionMismatch {
        /// Configured repetitions
        expected: usize,
        /// Repetitions in the data
        found: usize,
    },
    /// The solver can not run with the given settings
    #[error("Solver unavailable: {0}")]
    SolverUnavailable(String),
    /// The worker pool could not be created
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::SolverSettings;
    use crate::robust::Formulation;
    use crate::scenario::ScenarioSet;
    use crate::templates::{NewsvendorCvar, PortfolioMip};
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;

    fn template() -> NewsvendorCvar {
        NewsvendorCvar::new(
            DVector::from_vec(vec![0.5, 0.6]),
            DVector::from_vec(vec![0.4, 0.3]),
            DVector::from_vec(vec![1.1, 0.9]),
        )
        .unwrap()
    }

    fn sample(n: usize, shift: f64) -> ScenarioSet {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let s = i as f64 / n as f64 + shift;
                vec![0.7 + 0.5 * (3. * s).sin().abs(), 1.2 - 0.4 * s.cos().abs()]
            })
            .collect();
        ScenarioSet::from_rows(&rows).unwrap()
    }

    fn data(repetitions: usize) -> ExperimentData {
        ExperimentData::new(
            (0..repetitions).map(|r| sample(12, r as f64 * 0.1)).collect(),
            (0..repetitions).map(|r| sample(30, r as f64 * 0.1 + 0.05)).collect(),
        )
        .unwrap()
    }

    fn config(max_parallelism: usize) -> SweepConfig {
        SweepConfig {
            k_values: vec![2, 4, 12, 20],
            epsilons: vec![0.01, 0.1, 0.5],
            repetitions: 3,
            max_parallelism,
            time_limit_secs: 60.,
            ..Default::default()
        }
    }

    fn orchestrator(max_parallelism: usize) -> SweepOrchestrator {
        SweepOrchestrator::new(
            config(max_parallelism),
            ScenarioReducer::default(),
            SolverAdapter::new(SolverSettings::default()).unwrap(),
        )
    }

    #[test]
    fn parallel_matches_sequential() {
        let data = data(3);
        let sequential = orchestrator(1).run(&template(), &data).unwrap();
        let parallel = orchestrator(2).run(&template(), &data).unwrap();
        assert_eq!(sequential.num_pending(), 0);
        for r in 0..3 {
            for k in 0..4 {
                assert_eq!(sequential.inertia(r, k), parallel.inertia(r, k));
                for e in 0..3 {
                    match (sequential.cell(r, k, e), parallel.cell(r, k, e)) {
                        (Some(CellOutcome::Complete(a)), Some(CellOutcome::Complete(b))) => {
                            assert_eq!(a.status, b.status);
                            assert_eq!(a.objective, b.objective);
                            assert_eq!(a.evaluation, b.evaluation);
                        }
                        (Some(CellOutcome::Failed(a)), Some(CellOutcome::Failed(b))) => {
                            assert_eq!(a, b)
                        }
                        (a, b) => panic!("Cells differ: {:?} and {:?}", a, b),
                    }
                }
            }
        }
    }

    #[test]
    fn cells_match_direct_solves() {
        let data = data(1);
        let config = SweepConfig {
            k_values: vec![2, 12],
            epsilons: vec![0.01, 0.1],
            repetitions: 1,
            seed_base: 5,
            ..config(1)
        };
        let adapter = SolverAdapter::new(SolverSettings::default()).unwrap();
        let result = SweepOrchestrator::new(
            config,
            ScenarioReducer::default(),
            SolverAdapter::new(SolverSettings::default()).unwrap(),
        )
        .run(&template(), &data)
        .unwrap();
        let training = data.training(0).unwrap();
        for (k_index, k) in [2, 12].into_iter().enumerate() {
            let reduced = ScenarioReducer::default().reduce(training, k, 5).unwrap();
            for (e, epsilon) in [0.01, 0.1].into_iter().enumerate() {
                let program = RobustCounterpartBuilder::new(Formulation::Separate)
                    .build_with_epsilon(&template(), &reduced, epsilon)
                    .unwrap();
                let direct = adapter.solve(&program, None).unwrap();
                let cell = result.record(0, k_index, e).unwrap();
                assert_eq!(cell.status, direct.status);
                let (swept, solved) = (cell.decision.as_ref().unwrap(), direct.decision.unwrap());
                assert_eq!(swept.len(), program.num_template_variables());
                for (a, b) in swept.iter().zip(&solved) {
                    assert_abs_diff_eq!(a, b, epsilon = 1e-6);
                }
                let (swept, solved) = (cell.lambdas.as_ref().unwrap(), direct.lambdas.unwrap());
                assert_eq!(swept.len(), solved.len());
                for (a, b) in swept.iter().zip(&solved) {
                    assert_abs_diff_eq!(a, b, epsilon = 1e-6);
                }
                let slacks = cell.slacks.as_ref().unwrap();
                assert_eq!(slacks.ncols(), k);
                assert_eq!(slacks.shape(), direct.slacks.unwrap().shape());
            }
        }
    }

    #[test]
    fn warm_start_agrees_with_cold() {
        let returns = |n: usize, shift: usize| {
            let rows: Vec<Vec<f64>> = (0..n)
                .map(|i| {
                    (0..3)
                        .map(|j| 0.01 + 0.01 * ((3 * (i + shift) + 5 * j) % 9) as f64)
                        .collect()
                })
                .collect();
            ScenarioSet::from_rows(&rows).unwrap()
        };
        let data = ExperimentData::new(vec![returns(8, 0)], vec![returns(20, 1)]).unwrap();
        let template = PortfolioMip::new(3, 1).unwrap();
        let sweep = |warm_start: bool| {
            SweepOrchestrator::new(
                SweepConfig {
                    k_values: vec![2, 8],
                    epsilons: vec![0.001, 0.01, 0.05],
                    repetitions: 1,
                    warm_start,
                    ..config(1)
                },
                ScenarioReducer::default(),
                SolverAdapter::new(SolverSettings::default()).unwrap(),
            )
            .run(&template, &data)
            .unwrap()
        };
        let (warm, cold) = (sweep(true), sweep(false));
        let settings = SolverSettings::default();
        let mut compared = 0;
        for k in 0..2 {
            for e in 0..3 {
                let (a, b) = (warm.record(0, k, e).unwrap(), cold.record(0, k, e).unwrap());
                if let (Some(x), Some(y)) = (a.objective, b.objective) {
                    if a.status.is_optimal() && b.status.is_optimal() {
                        let gap = settings.mip_gap(x) + settings.mip_gap(y);
                        assert!((x - y).abs() <= gap + 1e-6, "{} and {} differ", x, y);
                        compared += 1;
                    }
                }
            }
        }
        assert!(compared > 0);
    }

    #[test]
    fn oversized_k_fails_only_its_cells() {
        let result = orchestrator(1).run(&template(), &data(3)).unwrap();
        // K = 20 exceeds the 12 training scenarios
        for r in 0..3 {
            for e in 0..3 {
                assert!(matches!(result.cell(r, 3, e), Some(CellOutcome::Failed(_))));
                assert!(result.record(r, 2, e).is_some_and(|c| c.has_solution()));
            }
            assert!(result.reduction_time(r, 3).is_none());
            assert!(result.build_time(r, 2).is_some());
            assert_eq!(result.inertia(r, 2), Some(0.));
        }
        assert_eq!(result.num_failed(), 9);
    }

    #[test]
    fn reject_bad_inputs() {
        let orchestrator = orchestrator(1);
        match orchestrator.run(&template(), &data(2)) {
            Err(SweepError::RepetitionMismatch { expected: 3, found: 2 }) => {}
            other => panic!("Repetition mismatch not caught: {:?}", other.err()),
        }
        let wide = ExperimentData::new(
            vec![ScenarioSet::from_rows(&[vec![1., 1., 1.]]).unwrap(); 3],
            vec![ScenarioSet::from_rows(&[vec![1., 1., 1.]]).unwrap(); 3],
        )
        .unwrap();
        match orchestrator.run(&template(), &wide) {
            Err(SweepError::Dimension(_)) => {}
            other => panic!("Dimension mismatch not caught: {:?}", other.err()),
        }
        let empty_grid = SweepOrchestrator::new(
            SweepConfig {
                epsilons: vec![],
                ..config(1)
            },
            ScenarioReducer::default(),
            SolverAdapter::new(SolverSettings::default()).unwrap(),
        );
        match empty_grid.run(&template(), &data(3)) {
            Err(SweepError::Configuration(ConfigurationError::EmptyGrid(_))) => {}
            other => panic!("Empty grid not caught: {:?}", other.err()),
        }
    }

    #[test]
    fn misconfigured_solver_is_unavailable() {
        let configuration = Configuration {
            solver: SolverSettings {
                max_nodes: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        match SweepOrchestrator::from_configuration(&configuration) {
            Err(SweepError::Configuration(ConfigurationError::ZeroIterations("max_nodes"))) => {}
            other => panic!("Bad solver settings not caught: {:?}", other.err()),
        }
    }
}
