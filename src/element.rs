//! Element abstraction.
//!
//! An element owns decision variables allocated once at construction and exposes its
//! constraints, costs and outputs through the declaration table of its [`Model`]. The
//! network drives every element through the object-safe [`Element`] trait; concrete
//! endpoint types implement [`ElementModel`] and are wrapped in [`ModelElement`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::ModelError;
use crate::output::OutputData;
use crate::reactive::{Model, Param, Reactive};
use crate::solver::{Col, LinExpr, RowId, Solver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ElementKind {
    Node,
    EnergyStorage,
    SchedulableLoad,
    Connection,
}

/// Columns a connection contributes to one of its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTap {
    pub connection: String,
    /// Power delivered into the endpoint, per period.
    pub inflow: Vec<Col>,
    /// Power drawn from the endpoint, per period.
    pub outflow: Vec<Col>,
}

/// Net power flowing into an endpoint during period `t` over all attached connections.
pub fn net_inflow(taps: &[ConnectionTap], t: usize) -> LinExpr {
    let mut expr = LinExpr::new();
    for tap in taps {
        if let Some(col) = tap.inflow.get(t) {
            expr.add_term(*col, 1.0);
        }
        if let Some(col) = tap.outflow.get(t) {
            expr.add_term(*col, -1.0);
        }
    }
    expr
}

/// What a connection segment may learn about an endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EndpointView {
    pub name: String,
    /// Stored energy per boundary, for storage endpoints.
    pub stored_energy: Option<Vec<LinExpr>>,
    /// Usable capacity per boundary, for storage endpoints.
    pub capacity: Option<Vec<f64>>,
}

impl EndpointView {
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Object-safe interface the network uses to drive every element.
pub trait Element {
    fn name(&self) -> &str;

    fn kind(&self) -> ElementKind;

    /// `(source, target)` for connections.
    fn endpoints(&self) -> Option<(&str, &str)> {
        None
    }

    /// Taps a connection hands to its `(source, target)` endpoints.
    fn taps(&self) -> Option<(ConnectionTap, ConnectionTap)> {
        None
    }

    fn attach_connection(&mut self, tap: ConnectionTap) -> Result<bool, ModelError>;

    fn endpoint_view(&self) -> Result<EndpointView, ModelError> {
        Ok(EndpointView::plain(self.name()))
    }

    /// Re-reads endpoint-derived parameters; only connections care.
    fn bind_endpoints(
        &mut self,
        _source: &EndpointView,
        _target: &EndpointView,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// Hook run before constraints on every optimization.
    fn prepare(&mut self, _solver: &mut Solver) -> Result<(), ModelError> {
        Ok(())
    }

    fn constraints(
        &mut self,
        solver: &mut Solver,
    ) -> Result<BTreeMap<String, Vec<RowId>>, ModelError>;

    fn cost(&mut self) -> Result<Option<LinExpr>, ModelError>;

    fn outputs(&self, solver: &Solver) -> Result<BTreeMap<&'static str, OutputData>, ModelError>;

    fn set_periods(&mut self, periods: &[f64]) -> bool;

    fn set_start_offset(&mut self, hours: f64) -> bool;

    /// Writes one configuration leaf. Unknown paths are skipped and report no change.
    fn apply(&mut self, path: &str, value: &Value) -> Result<bool, ModelError>;
}

/// A declaration-table model that can stand as a network endpoint.
pub trait ElementModel: Model {
    const KIND: ElementKind;

    fn connections(&self) -> &Param<Vec<ConnectionTap>>;

    fn connections_mut(&mut self) -> &mut Param<Vec<ConnectionTap>>;

    fn endpoint_view(&self, name: &str) -> Result<EndpointView, ModelError> {
        Ok(EndpointView::plain(name))
    }

    fn prepare(_reactive: &mut Reactive<Self>, _solver: &mut Solver) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Adapter from an [`ElementModel`] to the [`Element`] trait object.
#[derive(Debug)]
pub struct ModelElement<S: ElementModel> {
    name: String,
    reactive: Reactive<S>,
}

impl<S: ElementModel> ModelElement<S> {
    pub fn new(name: impl Into<String>, model: S) -> Self {
        Self {
            name: name.into(),
            reactive: Reactive::new(model),
        }
    }

    pub fn reactive(&self) -> &Reactive<S> {
        &self.reactive
    }

    pub fn reactive_mut(&mut self) -> &mut Reactive<S> {
        &mut self.reactive
    }
}

impl<S: ElementModel> Element for ModelElement<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ElementKind {
        S::KIND
    }

    fn attach_connection(&mut self, tap: ConnectionTap) -> Result<bool, ModelError> {
        debug!(element = %self.name, connection = %tap.connection, "attaching connection");
        let mut taps = self
            .reactive
            .model()
            .connections()
            .peek()
            .cloned()
            .unwrap_or_default();
        taps.retain(|existing| existing.connection != tap.connection);
        taps.push(tap);
        Ok(self.reactive.set(|model| model.connections_mut(), taps))
    }

    fn endpoint_view(&self) -> Result<EndpointView, ModelError> {
        self.reactive.model().endpoint_view(&self.name)
    }

    fn prepare(&mut self, solver: &mut Solver) -> Result<(), ModelError> {
        S::prepare(&mut self.reactive, solver)
    }

    fn constraints(
        &mut self,
        solver: &mut Solver,
    ) -> Result<BTreeMap<String, Vec<RowId>>, ModelError> {
        let rows = self.reactive.constraints(&self.name, solver)?;
        Ok(rows
            .into_iter()
            .map(|(name, rows)| (name.to_string(), rows))
            .collect())
    }

    fn cost(&mut self) -> Result<Option<LinExpr>, ModelError> {
        self.reactive.cost(&self.name)
    }

    fn outputs(&self, solver: &Solver) -> Result<BTreeMap<&'static str, OutputData>, ModelError> {
        Ok(self.reactive.outputs(&self.name, solver)?.into_iter().collect())
    }

    fn set_periods(&mut self, periods: &[f64]) -> bool {
        self.reactive.set_periods(periods)
    }

    fn set_start_offset(&mut self, hours: f64) -> bool {
        self.reactive.set_start_offset(hours)
    }

    fn apply(&mut self, path: &str, value: &Value) -> Result<bool, ModelError> {
        match self.reactive.set_json(path, value)? {
            Some(changed) => Ok(changed),
            None => {
                debug!(element = %self.name, path, "skipping unknown parameter");
                Ok(false)
            }
        }
    }
}
