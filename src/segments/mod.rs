//! Connection segments.
//!
//! A segment is one stage of a composite connection. It owns the four power views of its
//! stage (`in_st`, `out_st`, `in_ts`, `out_ts`) plus whatever extra columns its behavior
//! needs; adjacent segments are tied together by the connection's link constraints.

mod battery_balance;
mod demand_pricing;
mod efficiency;
mod passthrough;
mod power_limit;
mod pricing;
mod soc_pricing;
mod time_slice;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::debug;

use crate::element::EndpointView;
use crate::error::ModelError;
use crate::horizon::Series;
use crate::output::OutputData;
use crate::reactive::{Model, Reactive};
use crate::solver::{Col, LinExpr, RowId, Solver};

pub use battery_balance::{BatteryBalance, BALANCE_PENALTY, TRANSFER_COST};
pub use demand_pricing::DemandPricing;
pub use efficiency::Efficiency;
pub use passthrough::Passthrough;
pub use power_limit::PowerLimit;
pub use pricing::Pricing;
pub use soc_pricing::SocPricing;
pub use time_slice::TimeSlice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SegmentKind {
    Passthrough,
    Efficiency,
    PowerLimit,
    TimeSlice,
    Pricing,
    DemandPricing,
    SocPricing,
    BatteryBalance,
}

/// Which endpoint of the connection a segment refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    #[default]
    Target,
}

/// Power columns of one stage, per period.
#[derive(Debug, Clone, PartialEq)]
pub struct Ports {
    pub in_st: Vec<Col>,
    pub out_st: Vec<Col>,
    pub in_ts: Vec<Col>,
    pub out_ts: Vec<Col>,
}

impl Ports {
    /// Stage whose outputs are its inputs.
    pub fn lossless(solver: &mut Solver, label: &str, periods: usize) -> Self {
        let in_st = solver.add_columns(&format!("{label}.in_st"), periods, 0.0, f64::INFINITY);
        let in_ts = solver.add_columns(&format!("{label}.in_ts"), periods, 0.0, f64::INFINITY);
        Self {
            out_st: in_st.clone(),
            out_ts: in_ts.clone(),
            in_st,
            in_ts,
        }
    }

    /// Stage with separate output columns.
    pub fn separate(solver: &mut Solver, label: &str, periods: usize) -> Self {
        Self {
            in_st: solver.add_columns(&format!("{label}.in_st"), periods, 0.0, f64::INFINITY),
            out_st: solver.add_columns(&format!("{label}.out_st"), periods, 0.0, f64::INFINITY),
            in_ts: solver.add_columns(&format!("{label}.in_ts"), periods, 0.0, f64::INFINITY),
            out_ts: solver.add_columns(&format!("{label}.out_ts"), periods, 0.0, f64::INFINITY),
        }
    }

    pub fn len(&self) -> usize {
        self.in_st.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_st.is_empty()
    }
}

/// Object-safe interface a composite connection uses to drive its stages.
pub trait Segment {
    fn kind(&self) -> SegmentKind;

    fn ports(&self) -> &Ports;

    fn constraints(
        &mut self,
        owner: &str,
        solver: &mut Solver,
    ) -> Result<BTreeMap<&'static str, Vec<RowId>>, ModelError>;

    fn cost(&mut self, owner: &str) -> Result<Option<LinExpr>, ModelError>;

    fn outputs(
        &self,
        owner: &str,
        solver: &Solver,
    ) -> Result<Vec<(&'static str, OutputData)>, ModelError>;

    fn set_periods(&mut self, periods: &[f64]) -> bool;

    fn set_start_offset(&mut self, hours: f64) -> bool;

    /// Writes one parameter by name. `Ok(None)` when this stage has no such parameter.
    fn apply(&mut self, name: &str, value: &Value) -> Result<Option<bool>, ModelError>;

    fn bind_endpoints(
        &mut self,
        source: &EndpointView,
        target: &EndpointView,
    ) -> Result<(), ModelError>;
}

/// A declaration-table model that can act as a connection stage.
pub trait SegmentModel: Model {
    const KIND: SegmentKind;

    fn ports(&self) -> &Ports;

    fn bind_endpoints(
        _reactive: &mut Reactive<Self>,
        _source: &EndpointView,
        _target: &EndpointView,
    ) -> Result<(), ModelError> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct ModelSegment<S: SegmentModel> {
    reactive: Reactive<S>,
}

impl<S: SegmentModel> ModelSegment<S> {
    pub fn new(model: S) -> Self {
        Self {
            reactive: Reactive::new(model),
        }
    }

    pub fn reactive(&self) -> &Reactive<S> {
        &self.reactive
    }
}

impl<S: SegmentModel> Segment for ModelSegment<S> {
    fn kind(&self) -> SegmentKind {
        S::KIND
    }

    fn ports(&self) -> &Ports {
        self.reactive.model().ports()
    }

    fn constraints(
        &mut self,
        owner: &str,
        solver: &mut Solver,
    ) -> Result<BTreeMap<&'static str, Vec<RowId>>, ModelError> {
        self.reactive.constraints(owner, solver)
    }

    fn cost(&mut self, owner: &str) -> Result<Option<LinExpr>, ModelError> {
        self.reactive.cost(owner)
    }

    fn outputs(
        &self,
        owner: &str,
        solver: &Solver,
    ) -> Result<Vec<(&'static str, OutputData)>, ModelError> {
        self.reactive.outputs(owner, solver)
    }

    fn set_periods(&mut self, periods: &[f64]) -> bool {
        self.reactive.set_periods(periods)
    }

    fn set_start_offset(&mut self, hours: f64) -> bool {
        self.reactive.set_start_offset(hours)
    }

    fn apply(&mut self, name: &str, value: &Value) -> Result<Option<bool>, ModelError> {
        self.reactive.set_json(name, value)
    }

    fn bind_endpoints(
        &mut self,
        source: &EndpointView,
        target: &EndpointView,
    ) -> Result<(), ModelError> {
        S::bind_endpoints(&mut self.reactive, source, target)
    }
}

/// Configuration of one stage, tagged by `segment_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "segment_type", rename_all = "snake_case")]
pub enum SegmentConfig {
    Passthrough,
    Efficiency {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        efficiency_source_target: Option<Series>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        efficiency_target_source: Option<Series>,
    },
    PowerLimit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_power_source_target: Option<Series>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_power_target_source: Option<Series>,
        /// Pin the flow to the limit instead of capping it.
        #[serde(default)]
        fixed: bool,
    },
    TimeSlice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_power_source_target: Option<Series>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_power_target_source: Option<Series>,
    },
    Pricing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price_source_target: Option<Series>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        price_target_source: Option<Series>,
    },
    DemandPricing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        demand_price_source_target: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        demand_price_target_source: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        demand_current_peak_source_target: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        demand_current_peak_target_source: Option<f64>,
        #[serde(default = "default_block_hours")]
        demand_block_hours: f64,
        #[serde(default = "default_billing_days")]
        demand_days: f64,
    },
    SocPricing {
        #[serde(default)]
        battery: Side,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        undercharge_threshold: Option<Series>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        undercharge_price: Option<Series>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overcharge_threshold: Option<Series>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overcharge_price: Option<Series>,
    },
    BatteryBalance,
}

fn default_block_hours() -> f64 {
    0.5
}

fn default_billing_days() -> f64 {
    1.0
}

impl SegmentConfig {
    pub fn kind(&self) -> SegmentKind {
        match self {
            SegmentConfig::Passthrough => SegmentKind::Passthrough,
            SegmentConfig::Efficiency { .. } => SegmentKind::Efficiency,
            SegmentConfig::PowerLimit { .. } => SegmentKind::PowerLimit,
            SegmentConfig::TimeSlice { .. } => SegmentKind::TimeSlice,
            SegmentConfig::Pricing { .. } => SegmentKind::Pricing,
            SegmentConfig::DemandPricing { .. } => SegmentKind::DemandPricing,
            SegmentConfig::SocPricing { .. } => SegmentKind::SocPricing,
            SegmentConfig::BatteryBalance => SegmentKind::BatteryBalance,
        }
    }

    /// Allocates the stage's columns and wraps it for a connection.
    pub fn build(
        &self,
        solver: &mut Solver,
        label: &str,
        periods: &[f64],
        start_offset: f64,
    ) -> Result<Box<dyn Segment>, ModelError> {
        debug!(label, kind = %self.kind(), "building segment");
        let segment: Box<dyn Segment> = match self.clone() {
            SegmentConfig::Passthrough => {
                Box::new(ModelSegment::new(Passthrough::new(solver, label, periods)))
            }
            SegmentConfig::Efficiency {
                efficiency_source_target,
                efficiency_target_source,
            } => Box::new(ModelSegment::new(Efficiency::new(
                solver,
                label,
                periods,
                efficiency_source_target,
                efficiency_target_source,
            ))),
            SegmentConfig::PowerLimit {
                max_power_source_target,
                max_power_target_source,
                fixed,
            } => Box::new(ModelSegment::new(PowerLimit::new(
                solver,
                label,
                periods,
                max_power_source_target,
                max_power_target_source,
                fixed,
            ))),
            SegmentConfig::TimeSlice {
                max_power_source_target,
                max_power_target_source,
            } => Box::new(ModelSegment::new(TimeSlice::new(
                solver,
                label,
                periods,
                max_power_source_target,
                max_power_target_source,
            ))),
            SegmentConfig::Pricing {
                price_source_target,
                price_target_source,
            } => Box::new(ModelSegment::new(Pricing::new(
                solver,
                label,
                periods,
                price_source_target,
                price_target_source,
            ))),
            SegmentConfig::DemandPricing {
                demand_price_source_target,
                demand_price_target_source,
                demand_current_peak_source_target,
                demand_current_peak_target_source,
                demand_block_hours,
                demand_days,
            } => {
                if demand_block_hours.is_nan() || demand_block_hours <= 0.0 {
                    return Err(ModelError::invalid(
                        "demand_block_hours",
                        "block duration must be positive",
                    ));
                }
                Box::new(ModelSegment::new(DemandPricing::new(
                    solver,
                    label,
                    periods,
                    start_offset,
                    demand_pricing::DemandTariff {
                        price_source_target: demand_price_source_target,
                        price_target_source: demand_price_target_source,
                        current_peak_source_target: demand_current_peak_source_target,
                        current_peak_target_source: demand_current_peak_target_source,
                        block_hours: demand_block_hours,
                        billing_days: demand_days,
                    },
                )))
            }
            SegmentConfig::SocPricing {
                battery,
                undercharge_threshold,
                undercharge_price,
                overcharge_threshold,
                overcharge_price,
            } => Box::new(ModelSegment::new(SocPricing::new(
                solver,
                label,
                periods,
                battery,
                soc_pricing::SocBand {
                    undercharge_threshold,
                    undercharge_price,
                    overcharge_threshold,
                    overcharge_price,
                },
            ))),
            SegmentConfig::BatteryBalance => {
                Box::new(ModelSegment::new(BatteryBalance::new(solver, label, periods)))
            }
        };
        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_config_tagging() {
        let config: SegmentConfig = serde_json::from_value(serde_json::json!({
            "segment_type": "power_limit",
            "max_power_source_target": 5.0,
        }))
        .unwrap();
        assert_eq!(config.kind(), SegmentKind::PowerLimit);
        assert!(matches!(
            config,
            SegmentConfig::PowerLimit { fixed: false, max_power_target_source: None, .. }
        ));

        let balance: SegmentConfig =
            serde_json::from_value(serde_json::json!({ "segment_type": "battery_balance" }))
                .unwrap();
        assert_eq!(balance, SegmentConfig::BatteryBalance);
    }

    #[test]
    fn test_lossless_ports_alias_outputs() {
        let mut solver = Solver::new(Default::default());
        let ports = Ports::lossless(&mut solver, "c", 3);
        assert_eq!(ports.in_st, ports.out_st);
        assert_eq!(ports.in_ts, ports.out_ts);
        assert_eq!(solver.num_columns(), 6);

        let separate = Ports::separate(&mut solver, "d", 2);
        assert_ne!(separate.in_st, separate.out_st);
        assert_eq!(separate.len(), 2);
    }
}
