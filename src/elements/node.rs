use serde::{Deserialize, Serialize};

use crate::element::{net_inflow, ConnectionTap, ElementKind, ElementModel};
use crate::error::ModelError;
use crate::reactive::{ConfigParam, Declaration, Model, Param, Scope, ShadowPrice};
use crate::solver::RowSpec;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// May inject power into the network.
    #[serde(default)]
    pub is_source: bool,
    /// May absorb power from the network.
    #[serde(default)]
    pub is_sink: bool,
}

/// Junction, source or sink. The dual of its balance row is the nodal price.
#[derive(Debug)]
pub struct Node {
    periods: Param<Vec<f64>>,
    is_source: Param<bool>,
    is_sink: Param<bool>,
    connections: Param<Vec<ConnectionTap>>,
}

impl Node {
    pub fn new(config: &NodeConfig, periods: &[f64]) -> Self {
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            is_source: Param::with_value("is_source", config.is_source),
            is_sink: Param::with_value("is_sink", config.is_sink),
            connections: Param::with_value("connections", Vec::new()),
        }
    }

    fn balance(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let is_source = *self.is_source.get(scope)?;
        let is_sink = *self.is_sink.get(scope)?;
        let taps = self.connections.get(scope)?;
        if (is_source && is_sink) || taps.is_empty() {
            return Ok(None);
        }
        let periods = self.periods.get(scope)?;

        let rows = periods
            .iter()
            .enumerate()
            .map(|(t, hours)| {
                let energy = net_inflow(taps, t) * *hours;
                match (is_source, is_sink) {
                    (true, _) => energy.leq(0.0),
                    (_, true) => energy.geq(0.0),
                    _ => energy.equals(0.0),
                }
            })
            .collect();
        Ok(Some(rows))
    }
}

impl Model for Node {
    const DECLARATIONS: &'static [Declaration<Self>] = &[Declaration::priced_constraint(
        "node_balance",
        Self::balance,
        ShadowPrice::interval("$/kWh"),
    )];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "is_source" => Some(&mut self.is_source),
            "is_sink" => Some(&mut self.is_sink),
            _ => None,
        }
    }
}

impl ElementModel for Node {
    const KIND: ElementKind = ElementKind::Node;

    fn connections(&self) -> &Param<Vec<ConnectionTap>> {
        &self.connections
    }

    fn connections_mut(&mut self) -> &mut Param<Vec<ConnectionTap>> {
        &mut self.connections
    }
}
