//! Incremental LP/MILP model of energy flowing through a network of nodes, storages,
//! schedulable loads and composite connections.
//!
//! Elements declare their constraints, costs and outputs once; a reactive cache records
//! which parameters every computation read, so a parameter change only re-evaluates the
//! computations that depend on it and only the affected solver rows are edited before the
//! next warm re-solve.

pub mod config;
pub mod element;
pub mod elements;
pub mod error;
pub mod horizon;
pub mod network;
pub mod output;
pub mod reactive;
pub mod segments;
pub mod solver;
pub mod telemetry;

pub use element::{Element, ElementKind};
pub use elements::ElementConfig;
pub use error::{Error, ModelError, Result, SolveError};
pub use horizon::{Horizon, Series};
pub use network::{Network, NetworkOutputs};
pub use output::{Direction, OutputData, OutputType, Shape};
pub use segments::SegmentConfig;
pub use solver::{SolverOptions, SolverStats};
