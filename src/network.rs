//! Network orchestrator.
//!
//! The [`Network`] owns the solver, the shared horizon and the element registry. Elements
//! are added once; afterwards only their parameters change, and every
//! [`Network::optimize`] call pushes the resulting row edits into the solver before
//! re-solving.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use tracing::{debug, info};

use crate::element::{Element, ElementKind, EndpointView};
use crate::elements::ElementConfig;
use crate::error::{ModelError, Result};
use crate::horizon::{validate_periods, Horizon};
use crate::output::OutputData;
use crate::solver::{LinExpr, Solver, SolverOptions, SolverStats};

/// Configuration keys that identify an element rather than parameterize it.
const IDENTITY_KEYS: [&str; 4] = ["element_type", "name", "source", "target"];

pub type NetworkOutputs = BTreeMap<String, BTreeMap<&'static str, OutputData>>;

pub struct Network {
    solver: Solver,
    horizon: Horizon,
    elements: Vec<Box<dyn Element>>,
    index: HashMap<String, usize>,
}

impl Network {
    pub fn new(horizon: Horizon, options: SolverOptions) -> Self {
        Self {
            solver: Solver::new(options),
            horizon,
            elements: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn stats(&self) -> &SolverStats {
        self.solver.stats()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Element names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.elements.iter().map(|element| element.name())
    }

    pub fn element(&self, name: &str) -> Option<&dyn Element> {
        self.index.get(name).map(|&i| self.elements[i].as_ref())
    }

    fn position(&self, name: &str) -> Result<usize, ModelError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownElement(name.to_string()))
    }

    /// Builds an element and registers it. Connections need both endpoints in place.
    pub fn add(&mut self, config: ElementConfig) -> Result<(), ModelError> {
        let name = config.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ModelError::DuplicateElement(name));
        }

        let endpoints = match config.endpoints() {
            Some((source, target)) => Some((
                self.endpoint(&name, source)?,
                self.endpoint(&name, target)?,
            )),
            None => None,
        };
        if let Some((source, target)) = endpoints {
            if source == target {
                return Err(ModelError::invalid(
                    name,
                    "a connection needs two distinct endpoints",
                ));
            }
        }

        // Nothing is attached to the endpoints until every fallible step has passed; on
        // failure the columns the build allocated are dropped again.
        let columns = self.solver.num_columns();
        let element = match self.build_bound(&config, endpoints) {
            Ok(element) => element,
            Err(error) => {
                self.solver.truncate_columns(columns);
                debug!(element = %name, %error, "rejected element");
                return Err(error);
            }
        };
        if let (Some((source, target)), Some((source_tap, target_tap))) =
            (endpoints, element.taps())
        {
            self.elements[source].attach_connection(source_tap)?;
            self.elements[target].attach_connection(target_tap)?;
        }

        info!(element = %name, kind = %config.kind(), "added element");
        self.index.insert(name, self.elements.len());
        self.elements.push(element);
        Ok(())
    }

    fn build_bound(
        &mut self,
        config: &ElementConfig,
        endpoints: Option<(usize, usize)>,
    ) -> Result<Box<dyn Element>, ModelError> {
        let mut element = config.build(&mut self.solver, &self.horizon)?;
        if let Some((source, target)) = endpoints {
            let source_view = self.elements[source].endpoint_view()?;
            let target_view = self.elements[target].endpoint_view()?;
            element.bind_endpoints(&source_view, &target_view)?;
        }
        Ok(element)
    }

    fn endpoint(&self, connection: &str, endpoint: &str) -> Result<usize, ModelError> {
        let Some(&position) = self.index.get(endpoint) else {
            return Err(ModelError::MissingEndpoint {
                connection: connection.to_string(),
                endpoint: endpoint.to_string(),
            });
        };
        if self.elements[position].kind() == ElementKind::Connection {
            return Err(ModelError::invalid(
                connection,
                format!("endpoint '{endpoint}' is a connection"),
            ));
        }
        Ok(position)
    }

    /// Adds every config, endpoints before connections, otherwise in the given order.
    pub fn add_all<I>(&mut self, configs: I) -> Result<(), ModelError>
    where
        I: IntoIterator<Item = ElementConfig>,
    {
        let mut configs: Vec<ElementConfig> = configs.into_iter().collect();
        configs.sort_by_key(ElementConfig::is_connection);
        for config in configs {
            self.add(config)?;
        }
        Ok(())
    }

    /// Writes every parameter leaf of `config` into the existing element of the same name.
    ///
    /// Returns how many parameters actually changed.
    pub fn update(&mut self, config: &ElementConfig) -> Result<usize, ModelError> {
        let position = self.position(config.name())?;
        let kind = self.elements[position].kind();
        if kind != config.kind() {
            return Err(ModelError::invalid(
                config.name(),
                format!("cannot update a {kind} with a {} configuration", config.kind()),
            ));
        }
        let patch = serde_json::to_value(config)
            .map_err(|e| ModelError::invalid(config.name(), e.to_string()))?;
        self.apply_patch(position, &patch)
    }

    /// Like [`Network::update`] but from a partial JSON object; `null` clears a parameter.
    pub fn update_json(&mut self, name: &str, patch: &Value) -> Result<usize, ModelError> {
        let position = self.position(name)?;
        self.apply_patch(position, patch)
    }

    fn apply_patch(&mut self, position: usize, patch: &Value) -> Result<usize, ModelError> {
        let mut leaves = Vec::new();
        collect_leaves("", patch, &mut leaves);

        let element = &mut self.elements[position];
        let mut changed = 0;
        for (path, value) in leaves {
            if IDENTITY_KEYS.contains(&path.as_str()) {
                continue;
            }
            if element.apply(&path, value)? {
                changed += 1;
            }
        }
        debug!(element = %element.name(), changed, "applied update");

        self.bind_connections()?;
        Ok(changed)
    }

    /// Refreshes endpoint-derived parameters of every connection.
    fn bind_connections(&mut self) -> Result<(), ModelError> {
        let mut bindings: Vec<(usize, EndpointView, EndpointView)> = Vec::new();
        for (position, element) in self.elements.iter().enumerate() {
            if let Some((source, target)) = element.endpoints() {
                let source = self.elements[self.position(source)?].endpoint_view()?;
                let target = self.elements[self.position(target)?].endpoint_view()?;
                bindings.push((position, source, target));
            }
        }
        for (position, source, target) in bindings {
            self.elements[position].bind_endpoints(&source, &target)?;
        }
        Ok(())
    }

    /// Replaces the period durations everywhere. The number of periods is fixed at
    /// construction because every element's columns were sized for it.
    pub fn update_periods(&mut self, periods: Vec<f64>) -> Result<(), ModelError> {
        validate_periods(&periods)?;
        if periods.len() != self.horizon.len() {
            return Err(ModelError::LengthMismatch {
                name: "periods",
                expected: self.horizon.len(),
                actual: periods.len(),
            });
        }
        let mut changed = 0;
        for element in &mut self.elements {
            if element.set_periods(&periods) {
                changed += 1;
            }
        }
        self.horizon.periods = periods;
        debug!(changed, "updated periods");
        self.bind_connections()
    }

    pub fn update_horizon_start(&mut self, start: DateTime<FixedOffset>) {
        self.horizon.start = start;
        let offset = self.horizon.start_offset();
        for element in &mut self.elements {
            element.set_start_offset(offset);
        }
        debug!(%start, offset, "updated horizon start");
    }

    /// Rebuilds the objective, applies constraint deltas and solves.
    pub fn optimize(&mut self) -> Result<f64> {
        let mut objective = LinExpr::new();
        let mut rows = 0;
        for element in &mut self.elements {
            element.prepare(&mut self.solver)?;
            rows += element
                .constraints(&mut self.solver)?
                .values()
                .map(Vec::len)
                .sum::<usize>();
            if let Some(cost) = element.cost()? {
                objective += cost;
            }
        }
        self.solver.set_objective(objective);

        let value = self.solver.run()?;
        info!(
            objective = value,
            elements = self.elements.len(),
            rows,
            "network optimized"
        );
        Ok(value)
    }

    /// Outputs of every element keyed by element name. Empty until a solve succeeded.
    pub fn outputs(&self) -> Result<NetworkOutputs, ModelError> {
        if self.solver.solution().is_none() {
            return Ok(NetworkOutputs::new());
        }
        self.elements
            .iter()
            .map(|element| Ok((element.name().to_string(), element.outputs(&self.solver)?)))
            .collect()
    }
}

/// Flattens a JSON object into dotted leaf paths. Arrays of objects are indexed; any
/// other array is a leaf value.
fn collect_leaves<'a>(prefix: &str, value: &'a Value, out: &mut Vec<(String, &'a Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                collect_leaves(&join(prefix, key), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            for (index, child) in items.iter().enumerate() {
                collect_leaves(&join(prefix, &index.to_string()), child, out);
            }
        }
        _ => out.push((prefix.to_string(), value)),
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
