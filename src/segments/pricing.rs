use crate::error::ModelError;
use crate::horizon::Series;
use crate::reactive::{ConfigParam, Declaration, Model, Param, Scope};
use crate::solver::{LinExpr, Solver};

use super::{Ports, SegmentKind, SegmentModel};

/// Linear transfer cost per kWh entering the stage, per direction.
#[derive(Debug)]
pub struct Pricing {
    periods: Param<Vec<f64>>,
    price_source_target: Param<Series>,
    price_target_source: Param<Series>,
    ports: Ports,
}

impl Pricing {
    pub fn new(
        solver: &mut Solver,
        label: &str,
        periods: &[f64],
        price_source_target: Option<Series>,
        price_target_source: Option<Series>,
    ) -> Self {
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            price_source_target: Param::with_optional("price_source_target", price_source_target),
            price_target_source: Param::with_optional("price_target_source", price_target_source),
            ports: Ports::lossless(solver, label, periods.len()),
        }
    }

    fn transfer_cost(&self, scope: &mut Scope<'_, Self>) -> Result<Option<LinExpr>, ModelError> {
        let periods = self.periods.get(scope)?.clone();
        let n = periods.len();
        let forward = self.price_source_target.resolve(scope, n)?;
        let reverse = self.price_target_source.resolve(scope, n)?;
        if forward.is_none() && reverse.is_none() {
            return Ok(None);
        }

        let mut cost = LinExpr::new();
        for (prices, flows) in [(forward, &self.ports.in_st), (reverse, &self.ports.in_ts)] {
            let Some(prices) = prices else { continue };
            for ((flow, price), hours) in flows.iter().zip(prices).zip(&periods) {
                cost.add_term(*flow, price * hours);
            }
        }
        Ok(Some(cost))
    }
}

impl Model for Pricing {
    const DECLARATIONS: &'static [Declaration<Self>] =
        &[Declaration::cost("transfer_cost", Self::transfer_cost)];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "price_source_target" => Some(&mut self.price_source_target),
            "price_target_source" => Some(&mut self.price_target_source),
            _ => None,
        }
    }
}

impl SegmentModel for Pricing {
    const KIND: SegmentKind = SegmentKind::Pricing;

    fn ports(&self) -> &Ports {
        &self.ports
    }
}
