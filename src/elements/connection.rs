//! Composite connections.
//!
//! A connection is an ordered chain of segments between a source and a target endpoint.
//! Forward links tie `segment[i].out_st` to `segment[i+1].in_st`, reverse links tie
//! `segment[i].out_ts` to `segment[i-1].in_ts`. The source sees `segment[0]`, the target
//! sees the last segment.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::element::{ConnectionTap, Element, ElementKind, EndpointView};
use crate::error::ModelError;
use crate::horizon::Series;
use crate::output::{Direction, OutputData, OutputType, Shape};
use crate::reactive::{ConfigParam, Declaration, Model, Param, Reactive, Scope};
use crate::segments::{Ports, Segment, SegmentConfig};
use crate::solver::{Col, LinExpr, RowId, RowSpec, Solution, Solver};

/// Connection with an explicit segment chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub source: String,
    pub target: String,
    /// Empty means a single passthrough stage.
    #[serde(default)]
    pub segments: Vec<SegmentConfig>,
}

/// Connection assembled from flat modifier fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PowerConnectionConfig {
    pub name: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency_source_target: Option<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency_target_source: Option<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power_source_target: Option<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_power_target_source: Option<Series>,
    /// Pin both configured flows to their limits.
    #[serde(default)]
    pub fixed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_source_target: Option<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_target_source: Option<Series>,
}

impl PowerConnectionConfig {
    /// A fixed connection cannot pin both directions in one period: the time-slice stage
    /// would need twice its capacity.
    pub fn validate(&self, periods: usize) -> Result<(), ModelError> {
        let (true, Some(forward), Some(reverse)) = (
            self.fixed,
            &self.max_power_source_target,
            &self.max_power_target_source,
        ) else {
            return Ok(());
        };
        let forward = forward.resolve("max_power_source_target", periods)?;
        let reverse = reverse.resolve("max_power_target_source", periods)?;
        match forward.iter().zip(&reverse).position(|(st, ts)| *st > 0.0 && *ts > 0.0) {
            Some(t) => Err(ModelError::invalid(
                self.name.as_str(),
                format!("fixed flow in both directions during period {t}"),
            )),
            None => Ok(()),
        }
    }

    /// Efficiency, power limit, pricing, then time-slice when both limits are given.
    pub fn segments(&self) -> Vec<SegmentConfig> {
        let mut segments = Vec::new();
        if self.efficiency_source_target.is_some() || self.efficiency_target_source.is_some() {
            segments.push(SegmentConfig::Efficiency {
                efficiency_source_target: self.efficiency_source_target.clone(),
                efficiency_target_source: self.efficiency_target_source.clone(),
            });
        }
        if self.max_power_source_target.is_some() || self.max_power_target_source.is_some() {
            segments.push(SegmentConfig::PowerLimit {
                max_power_source_target: self.max_power_source_target.clone(),
                max_power_target_source: self.max_power_target_source.clone(),
                fixed: self.fixed,
            });
        }
        if self.price_source_target.is_some() || self.price_target_source.is_some() {
            segments.push(SegmentConfig::Pricing {
                price_source_target: self.price_source_target.clone(),
                price_target_source: self.price_target_source.clone(),
            });
        }
        if self.max_power_source_target.is_some() && self.max_power_target_source.is_some() {
            segments.push(SegmentConfig::TimeSlice {
                max_power_source_target: self.max_power_source_target.clone(),
                max_power_target_source: self.max_power_target_source.clone(),
            });
        }
        if segments.is_empty() {
            segments.push(SegmentConfig::Passthrough);
        }
        segments
    }
}

/// Link constraints and external flow outputs of a segment chain.
#[derive(Debug)]
struct SegmentLinks {
    periods: Param<Vec<f64>>,
    chain: Vec<Ports>,
}

impl SegmentLinks {
    fn forward(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let n = self.periods.get(scope)?.len();
        if self.chain.len() < 2 {
            return Ok(None);
        }
        let rows = self
            .chain
            .iter()
            .tuple_windows()
            .flat_map(|(upstream, downstream)| {
                (0..n).map(move |t| LinExpr::from(upstream.out_st[t]).equals(downstream.in_st[t]))
            })
            .collect();
        Ok(Some(rows))
    }

    fn reverse(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let n = self.periods.get(scope)?.len();
        if self.chain.len() < 2 {
            return Ok(None);
        }
        let rows = self
            .chain
            .iter()
            .tuple_windows()
            .flat_map(|(upstream, downstream)| {
                (0..n).map(move |t| LinExpr::from(downstream.out_ts[t]).equals(upstream.in_ts[t]))
            })
            .collect();
        Ok(Some(rows))
    }

    fn first(&self) -> Option<&Ports> {
        self.chain.first()
    }

    fn last(&self) -> Option<&Ports> {
        self.chain.last()
    }

    fn flow_output(
        &self,
        name: &'static str,
        solution: &Solution,
        ports: Option<&Ports>,
        direction: Direction,
        pick: fn(&Ports) -> &[Col],
    ) -> Result<OutputData, ModelError> {
        let values = ports.map(|ports| solution.values(pick(ports))).unwrap_or_default();
        Ok(OutputData::new(name, OutputType::PowerFlow, Shape::Interval, values, self.period_count())?
            .with_direction(direction))
    }

    fn source_target_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        self.flow_output(
            "power_source_target",
            solution,
            self.first(),
            Direction::Positive,
            |ports| ports.in_st.as_slice(),
        )
    }

    fn target_source_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        self.flow_output(
            "power_target_source",
            solution,
            self.last(),
            Direction::Negative,
            |ports| ports.in_ts.as_slice(),
        )
    }
}

impl Model for SegmentLinks {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::constraint("forward_links", Self::forward),
        Declaration::constraint("reverse_links", Self::reverse),
        Declaration::output("power_source_target", Self::source_target_output),
        Declaration::output("power_target_source", Self::target_source_output),
    ];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, _name: &str) -> Option<&mut dyn ConfigParam> {
        None
    }
}

/// A chain of segments between two endpoints.
pub struct CompositeConnection {
    name: String,
    source: String,
    target: String,
    segments: Vec<Box<dyn Segment>>,
    links: Reactive<SegmentLinks>,
}

impl CompositeConnection {
    pub fn new(
        solver: &mut Solver,
        name: &str,
        source: &str,
        target: &str,
        configs: &[SegmentConfig],
        periods: &[f64],
        start_offset: f64,
    ) -> Result<Self, ModelError> {
        let passthrough = [SegmentConfig::Passthrough];
        let configs = if configs.is_empty() { &passthrough[..] } else { configs };
        let segments = configs
            .iter()
            .enumerate()
            .map(|(i, config)| {
                let label = format!("{name}.{i}.{}", config.kind());
                config.build(solver, &label, periods, start_offset)
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            connection = name,
            source,
            target,
            segments = ?segments.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            "assembled connection"
        );

        let links = Reactive::new(SegmentLinks {
            periods: Param::with_value("periods", periods.to_vec()),
            chain: segments.iter().map(|segment| segment.ports().clone()).collect(),
        });
        Ok(Self {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            segments,
            links,
        })
    }

    pub fn segments(&self) -> &[Box<dyn Segment>] {
        &self.segments
    }

    fn segment_owner(&self, index: usize) -> String {
        format!("{}.segments.{index}", self.name)
    }
}

impl Element for CompositeConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ElementKind {
        ElementKind::Connection
    }

    fn endpoints(&self) -> Option<(&str, &str)> {
        Some((self.source.as_str(), self.target.as_str()))
    }

    fn taps(&self) -> Option<(ConnectionTap, ConnectionTap)> {
        let first = self.segments.first()?.ports();
        let last = self.segments.last()?.ports();
        Some((
            ConnectionTap {
                connection: self.name.clone(),
                inflow: first.out_ts.clone(),
                outflow: first.in_st.clone(),
            },
            ConnectionTap {
                connection: self.name.clone(),
                inflow: last.out_st.clone(),
                outflow: last.in_ts.clone(),
            },
        ))
    }

    fn attach_connection(&mut self, tap: ConnectionTap) -> Result<bool, ModelError> {
        Err(ModelError::invalid(
            tap.connection,
            format!("'{}' is a connection and cannot be an endpoint", self.name),
        ))
    }

    fn bind_endpoints(
        &mut self,
        source: &EndpointView,
        target: &EndpointView,
    ) -> Result<(), ModelError> {
        for segment in &mut self.segments {
            segment.bind_endpoints(source, target)?;
        }
        Ok(())
    }

    fn constraints(
        &mut self,
        solver: &mut Solver,
    ) -> Result<BTreeMap<String, Vec<RowId>>, ModelError> {
        let mut rows: BTreeMap<String, Vec<RowId>> = self
            .links
            .constraints(&self.name, solver)?
            .into_iter()
            .map(|(name, rows)| (name.to_string(), rows))
            .collect();
        for index in 0..self.segments.len() {
            let owner = self.segment_owner(index);
            for (name, ids) in self.segments[index].constraints(&owner, solver)? {
                rows.insert(format!("segments.{index}.{name}"), ids);
            }
        }
        Ok(rows)
    }

    fn cost(&mut self) -> Result<Option<LinExpr>, ModelError> {
        let mut total: Option<LinExpr> = None;
        for index in 0..self.segments.len() {
            let owner = self.segment_owner(index);
            if let Some(cost) = self.segments[index].cost(&owner)? {
                total = Some(total.unwrap_or_default() + cost);
            }
        }
        Ok(total)
    }

    fn outputs(&self, solver: &Solver) -> Result<BTreeMap<&'static str, OutputData>, ModelError> {
        let mut outputs: BTreeMap<&'static str, OutputData> =
            self.links.outputs(&self.name, solver)?.into_iter().collect();
        for (index, segment) in self.segments.iter().enumerate() {
            outputs.extend(segment.outputs(&self.segment_owner(index), solver)?);
        }
        Ok(outputs)
    }

    fn set_periods(&mut self, periods: &[f64]) -> bool {
        let mut changed = self.links.set_periods(periods);
        for segment in &mut self.segments {
            changed |= segment.set_periods(periods);
        }
        changed
    }

    fn set_start_offset(&mut self, hours: f64) -> bool {
        let mut changed = false;
        for segment in &mut self.segments {
            changed |= segment.set_start_offset(hours);
        }
        changed
    }

    /// `segments.<i>.<param>` targets one stage; a bare name reaches every stage that has it.
    fn apply(&mut self, path: &str, value: &Value) -> Result<bool, ModelError> {
        if let Some(rest) = path.strip_prefix("segments.") {
            let target = rest
                .split_once('.')
                .and_then(|(index, param)| Some((index.parse::<usize>().ok()?, param)));
            let Some((index, param)) = target else {
                debug!(connection = %self.name, path, "skipping unknown parameter");
                return Ok(false);
            };
            return match self.segments.get_mut(index) {
                Some(segment) => Ok(segment.apply(param, value)?.unwrap_or(false)),
                None => {
                    debug!(connection = %self.name, path, "skipping unknown segment");
                    Ok(false)
                }
            };
        }

        let mut known = false;
        let mut changed = false;
        for segment in &mut self.segments {
            if let Some(result) = segment.apply(path, value)? {
                known = true;
                changed |= result;
            }
        }
        if !known {
            debug!(connection = %self.name, path, "skipping unknown parameter");
        }
        Ok(changed)
    }
}
