//! Core rust implementation of Wasserstein robust optimization over clustered scenarios.
//!
//! A [`ProblemTemplate`](robust::ProblemTemplate) describes a family of decision
//! problems with uncertain constraints. Its training scenarios are reduced to K
//! weighted points with [`ScenarioReducer`](scenario::reduce::ScenarioReducer), the
//! robust counterpart over a Wasserstein ball of radius ε is built with
//! [`RobustCounterpartBuilder`](robust::RobustCounterpartBuilder) and solved through a
//! [`SolverAdapter`](optimize::solvers::SolverAdapter). The
//! [`SweepOrchestrator`](sweep::SweepOrchestrator) repeats this over a grid of K and ε
//! for many independent samples, and [`aggregate`](aggregate::aggregate) sums the
//! results.
pub mod aggregate;
pub mod configuration;
pub mod evaluate;
pub mod optimize;
pub mod robust;
pub mod scenario;
pub mod sweep;
pub mod templates;
