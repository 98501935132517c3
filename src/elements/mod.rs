//! Concrete network elements and their configuration.

mod connection;
mod energy_storage;
mod node;
mod schedulable_load;

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementKind, ModelElement};
use crate::error::ModelError;
use crate::horizon::Horizon;
use crate::solver::Solver;

pub use connection::{CompositeConnection, ConnectionConfig, PowerConnectionConfig};
pub use energy_storage::{EnergyStorage, EnergyStorageConfig};
pub use node::{Node, NodeConfig};
pub use schedulable_load::{
    candidates, realized_start, Candidate, IntegralityPolicy, SchedulableLoad,
    SchedulableLoadConfig,
};

/// Configuration of one element, tagged by `element_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element_type", rename_all = "snake_case")]
pub enum ElementConfig {
    Node(NodeConfig),
    EnergyStorage(EnergyStorageConfig),
    SchedulableLoad(SchedulableLoadConfig),
    Connection(ConnectionConfig),
    PowerConnection(PowerConnectionConfig),
}

impl ElementConfig {
    pub fn name(&self) -> &str {
        match self {
            ElementConfig::Node(config) => &config.name,
            ElementConfig::EnergyStorage(config) => &config.name,
            ElementConfig::SchedulableLoad(config) => &config.name,
            ElementConfig::Connection(config) => &config.name,
            ElementConfig::PowerConnection(config) => &config.name,
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            ElementConfig::Node(_) => ElementKind::Node,
            ElementConfig::EnergyStorage(_) => ElementKind::EnergyStorage,
            ElementConfig::SchedulableLoad(_) => ElementKind::SchedulableLoad,
            ElementConfig::Connection(_) | ElementConfig::PowerConnection(_) => {
                ElementKind::Connection
            }
        }
    }

    pub fn is_connection(&self) -> bool {
        self.kind() == ElementKind::Connection
    }

    /// `(source, target)` for connections.
    pub fn endpoints(&self) -> Option<(&str, &str)> {
        match self {
            ElementConfig::Connection(config) => Some((config.source.as_str(), config.target.as_str())),
            ElementConfig::PowerConnection(config) => Some((config.source.as_str(), config.target.as_str())),
            _ => None,
        }
    }

    /// Allocates the element's columns for `horizon`.
    pub fn build(
        &self,
        solver: &mut Solver,
        horizon: &Horizon,
    ) -> Result<Box<dyn Element>, ModelError> {
        let periods = horizon.periods.as_slice();
        let element: Box<dyn Element> = match self {
            ElementConfig::Node(config) => {
                Box::new(ModelElement::new(&config.name, Node::new(config, periods)))
            }
            ElementConfig::EnergyStorage(config) => Box::new(ModelElement::new(
                &config.name,
                EnergyStorage::new(solver, config, periods),
            )),
            ElementConfig::SchedulableLoad(config) => Box::new(ModelElement::new(
                &config.name,
                SchedulableLoad::new(solver, config, periods),
            )),
            ElementConfig::Connection(config) => Box::new(CompositeConnection::new(
                solver,
                &config.name,
                &config.source,
                &config.target,
                &config.segments,
                periods,
                horizon.start_offset(),
            )?),
            ElementConfig::PowerConnection(config) => {
                config.validate(periods.len())?;
                Box::new(CompositeConnection::new(
                    solver,
                    &config.name,
                    &config.source,
                    &config.target,
                    &config.segments(),
                    periods,
                    horizon.start_offset(),
                )?)
            }
        };
        Ok(element)
    }
}
