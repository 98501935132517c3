//! Peak-demand tariff.
//!
//! The horizon is cut into blocks of `block_hours`, anchored at local midnight through the
//! start offset. For every block the overlap-weighted average power entering the stage
//! must not exceed the direction's peak column, and the peak is billed at
//! `price · billing_days`.

use crate::error::ModelError;
use crate::horizon::{boundaries, overlap};
use crate::output::{Direction, OutputData, OutputType, Shape};
use crate::reactive::{ConfigParam, Declaration, Model, Param, Scope};
use crate::solver::{Col, LinExpr, RowSpec, Solution, Solver};

use super::{Ports, SegmentKind, SegmentModel};

const MIN_OVERLAP: f64 = 1e-9;

/// Tariff settings as configured.
#[derive(Debug, Clone, PartialEq)]
pub struct DemandTariff {
    pub price_source_target: Option<f64>,
    pub price_target_source: Option<f64>,
    pub current_peak_source_target: Option<f64>,
    pub current_peak_target_source: Option<f64>,
    pub block_hours: f64,
    pub billing_days: f64,
}

#[derive(Debug)]
pub struct DemandPricing {
    periods: Param<Vec<f64>>,
    start_offset: Param<f64>,
    demand_price_source_target: Param<f64>,
    demand_price_target_source: Param<f64>,
    demand_current_peak_source_target: Param<f64>,
    demand_current_peak_target_source: Param<f64>,
    demand_block_hours: Param<f64>,
    demand_days: Param<f64>,
    peak_source_target: Col,
    peak_target_source: Col,
    ports: Ports,
}

/// Overlap (hours) of every period with each block that intersects the horizon.
pub fn demand_blocks(periods: &[f64], start_offset: f64, block_hours: f64) -> Vec<Vec<(usize, f64)>> {
    let edges = boundaries(periods);
    let end = edges.last().copied().unwrap_or(0.0);
    let mut block_start = -start_offset.rem_euclid(block_hours);
    let mut blocks = Vec::new();
    while block_start < end - MIN_OVERLAP {
        let block_end = block_start + block_hours;
        let covered: Vec<(usize, f64)> = edges
            .windows(2)
            .enumerate()
            .map(|(t, edge)| (t, overlap(block_start, block_end, edge[0], edge[1])))
            .filter(|(_, hours)| *hours > MIN_OVERLAP)
            .collect();
        if !covered.is_empty() {
            blocks.push(covered);
        }
        block_start = block_end;
    }
    blocks
}

impl DemandPricing {
    pub fn new(
        solver: &mut Solver,
        label: &str,
        periods: &[f64],
        start_offset: f64,
        tariff: DemandTariff,
    ) -> Self {
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            start_offset: Param::with_value("start_offset", start_offset),
            demand_price_source_target: Param::with_optional(
                "demand_price_source_target",
                tariff.price_source_target,
            ),
            demand_price_target_source: Param::with_optional(
                "demand_price_target_source",
                tariff.price_target_source,
            ),
            demand_current_peak_source_target: Param::with_optional(
                "demand_current_peak_source_target",
                tariff.current_peak_source_target,
            ),
            demand_current_peak_target_source: Param::with_optional(
                "demand_current_peak_target_source",
                tariff.current_peak_target_source,
            ),
            demand_block_hours: Param::with_value("demand_block_hours", tariff.block_hours),
            demand_days: Param::with_value("demand_days", tariff.billing_days),
            peak_source_target: solver.add_column(
                format!("{label}.peak_source_target"),
                0.0,
                f64::INFINITY,
            ),
            peak_target_source: solver.add_column(
                format!("{label}.peak_target_source"),
                0.0,
                f64::INFINITY,
            ),
            ports: Ports::lossless(solver, label, periods.len()),
        }
    }

    fn block_peaks(
        &self,
        scope: &mut Scope<'_, Self>,
        price: &Param<f64>,
        flows: &[Col],
        peak: Col,
    ) -> Result<Option<Vec<RowSpec>>, ModelError> {
        if price.get_opt(scope).is_none() {
            return Ok(None);
        }
        let periods = self.periods.get(scope)?.clone();
        let offset = *self.start_offset.get(scope)?;
        let block_hours = *self.demand_block_hours.get(scope)?;
        if block_hours.is_nan() || block_hours <= 0.0 {
            return Err(ModelError::invalid(
                self.demand_block_hours.name(),
                "block duration must be positive",
            ));
        }

        let rows = demand_blocks(&periods, offset, block_hours)
            .into_iter()
            .map(|block| {
                let covered: f64 = block.iter().map(|(_, hours)| hours).sum();
                let average = LinExpr::weighted(
                    block
                        .iter()
                        .map(|(t, hours)| (flows[*t], hours / covered)),
                );
                average.leq(peak)
            })
            .collect();
        Ok(Some(rows))
    }

    fn floor(
        &self,
        scope: &mut Scope<'_, Self>,
        price: &Param<f64>,
        current: &Param<f64>,
        peak: Col,
    ) -> Result<Option<Vec<RowSpec>>, ModelError> {
        match (price.get_opt(scope), current.get_opt(scope)) {
            (Some(_), Some(current)) => Ok(Some(vec![LinExpr::from(peak).geq(*current)])),
            _ => Ok(None),
        }
    }

    fn peaks_source_target(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.block_peaks(
            scope,
            &self.demand_price_source_target,
            &self.ports.in_st,
            self.peak_source_target,
        )
    }

    fn peaks_target_source(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.block_peaks(
            scope,
            &self.demand_price_target_source,
            &self.ports.in_ts,
            self.peak_target_source,
        )
    }

    fn floor_source_target(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.floor(
            scope,
            &self.demand_price_source_target,
            &self.demand_current_peak_source_target,
            self.peak_source_target,
        )
    }

    fn floor_target_source(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.floor(
            scope,
            &self.demand_price_target_source,
            &self.demand_current_peak_target_source,
            self.peak_target_source,
        )
    }

    fn demand_cost(&self, scope: &mut Scope<'_, Self>) -> Result<Option<LinExpr>, ModelError> {
        let days = *self.demand_days.get(scope)?;
        let forward = self.demand_price_source_target.get_opt(scope).copied();
        let reverse = self.demand_price_target_source.get_opt(scope).copied();
        if forward.is_none() && reverse.is_none() {
            return Ok(None);
        }
        // Peaks are only bounded from below, so a negative rate makes the model unbounded.
        if days.is_nan() || days < 0.0 {
            return Err(ModelError::invalid(
                self.demand_days.name(),
                format!("billing days must not be negative, got {days}"),
            ));
        }
        for (param, price) in [
            (&self.demand_price_source_target, forward),
            (&self.demand_price_target_source, reverse),
        ] {
            if let Some(price) = price.filter(|price| *price < 0.0) {
                return Err(ModelError::invalid(
                    param.name(),
                    format!("demand price must not be negative, got {price}"),
                ));
            }
        }
        let mut cost = LinExpr::new();
        if let Some(price) = forward {
            cost.add_term(self.peak_source_target, price * days);
        }
        if let Some(price) = reverse {
            cost.add_term(self.peak_target_source, price * days);
        }
        Ok(Some(cost))
    }

    fn peak_output(
        &self,
        solution: &Solution,
        peak: Col,
        name: &'static str,
    ) -> Result<OutputData, ModelError> {
        let values = vec![solution.value(peak)];
        OutputData::new(name, OutputType::Power, Shape::Scalar, values, self.period_count())
    }

    fn peak_source_target_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        Ok(self
            .peak_output(solution, self.peak_source_target, "demand_peak_source_target")?
            .with_direction(Direction::Positive))
    }

    fn peak_target_source_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        Ok(self
            .peak_output(solution, self.peak_target_source, "demand_peak_target_source")?
            .with_direction(Direction::Negative))
    }
}

impl Model for DemandPricing {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::constraint("demand_blocks_source_target", Self::peaks_source_target),
        Declaration::constraint("demand_blocks_target_source", Self::peaks_target_source),
        Declaration::constraint("demand_floor_source_target", Self::floor_source_target),
        Declaration::constraint("demand_floor_target_source", Self::floor_target_source),
        Declaration::cost("demand_cost", Self::demand_cost),
        Declaration::output("demand_peak_source_target", Self::peak_source_target_output),
        Declaration::output("demand_peak_target_source", Self::peak_target_source_output),
    ];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn start_offset_mut(&mut self) -> Option<&mut Param<f64>> {
        Some(&mut self.start_offset)
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "demand_price_source_target" => Some(&mut self.demand_price_source_target),
            "demand_price_target_source" => Some(&mut self.demand_price_target_source),
            "demand_current_peak_source_target" => Some(&mut self.demand_current_peak_source_target),
            "demand_current_peak_target_source" => Some(&mut self.demand_current_peak_target_source),
            "demand_block_hours" => Some(&mut self.demand_block_hours),
            "demand_days" => Some(&mut self.demand_days),
            _ => None,
        }
    }
}

impl SegmentModel for DemandPricing {
    const KIND: SegmentKind = SegmentKind::DemandPricing;

    fn ports(&self) -> &Ports {
        &self.ports
    }
}
