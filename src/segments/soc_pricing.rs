use crate::element::EndpointView;
use crate::error::ModelError;
use crate::horizon::Series;
use crate::output::{OutputData, OutputType, Shape};
use crate::reactive::{ConfigParam, Declaration, Model, Param, Reactive, Scope};
use crate::solver::{Col, LinExpr, RowSpec, Solution, Solver};

use super::{Ports, SegmentKind, SegmentModel, Side};

/// Thresholds (kWh, per period end) and penalties ($/kWh) of a state-of-charge band.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SocBand {
    pub undercharge_threshold: Option<Series>,
    pub undercharge_price: Option<Series>,
    pub overcharge_threshold: Option<Series>,
    pub overcharge_price: Option<Series>,
}

/// Penalizes the stored energy of the battery at one end of the connection when it
/// leaves the configured band. Being inside the band earns nothing.
#[derive(Debug)]
pub struct SocPricing {
    periods: Param<Vec<f64>>,
    battery: Side,
    /// Stored energy per boundary, taken from the battery endpoint.
    stored_energy: Param<Vec<LinExpr>>,
    undercharge_threshold: Param<Series>,
    undercharge_price: Param<Series>,
    overcharge_threshold: Param<Series>,
    overcharge_price: Param<Series>,
    undercharge: Vec<Col>,
    overcharge: Vec<Col>,
    ports: Ports,
}

impl SocPricing {
    pub fn new(solver: &mut Solver, label: &str, periods: &[f64], battery: Side, band: SocBand) -> Self {
        let n = periods.len();
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            battery,
            stored_energy: Param::new("stored_energy"),
            undercharge_threshold: Param::with_optional("undercharge_threshold", band.undercharge_threshold),
            undercharge_price: Param::with_optional("undercharge_price", band.undercharge_price),
            overcharge_threshold: Param::with_optional("overcharge_threshold", band.overcharge_threshold),
            overcharge_price: Param::with_optional("overcharge_price", band.overcharge_price),
            undercharge: solver.add_columns(&format!("{label}.undercharge"), n, 0.0, f64::INFINITY),
            overcharge: solver.add_columns(&format!("{label}.overcharge"), n, 0.0, f64::INFINITY),
            ports: Ports::lossless(solver, label, n),
        }
    }

    /// Thresholds, prices and stored energy when the band side is fully configured.
    fn band(
        &self,
        scope: &mut Scope<'_, Self>,
        threshold: &Param<Series>,
        price: &Param<Series>,
    ) -> Result<Option<(Vec<f64>, Vec<f64>, Vec<LinExpr>)>, ModelError> {
        let n = self.periods.get(scope)?.len();
        let (Some(thresholds), Some(prices)) = (threshold.resolve(scope, n)?, price.resolve(scope, n)?)
        else {
            return Ok(None);
        };
        let stored = self.stored_energy.get(scope)?.clone();
        if stored.len() != n + 1 {
            return Err(ModelError::LengthMismatch {
                name: self.stored_energy.name(),
                expected: n + 1,
                actual: stored.len(),
            });
        }
        Ok(Some((thresholds, prices, stored)))
    }

    fn undercharge_rows(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let Some((thresholds, _, stored)) =
            self.band(scope, &self.undercharge_threshold, &self.undercharge_price)?
        else {
            return Ok(None);
        };
        let rows = self
            .undercharge
            .iter()
            .zip(thresholds)
            .enumerate()
            .map(|(t, (slack, threshold))| {
                (LinExpr::from(*slack) + stored[t + 1].clone()).geq(threshold)
            })
            .collect();
        Ok(Some(rows))
    }

    fn overcharge_rows(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let Some((thresholds, _, stored)) =
            self.band(scope, &self.overcharge_threshold, &self.overcharge_price)?
        else {
            return Ok(None);
        };
        let rows = self
            .overcharge
            .iter()
            .zip(thresholds)
            .enumerate()
            .map(|(t, (slack, threshold))| {
                (LinExpr::from(*slack) - stored[t + 1].clone()).geq(-threshold)
            })
            .collect();
        Ok(Some(rows))
    }

    fn penalty(&self, scope: &mut Scope<'_, Self>) -> Result<Option<LinExpr>, ModelError> {
        let n = self.periods.get(scope)?.len();
        let under = self.undercharge_price.resolve(scope, n)?;
        let over = self.overcharge_price.resolve(scope, n)?;
        if under.is_none() && over.is_none() {
            return Ok(None);
        }
        let mut cost = LinExpr::new();
        for (param, prices, slacks) in [
            (&self.undercharge_price, under, &self.undercharge),
            (&self.overcharge_price, over, &self.overcharge),
        ] {
            let Some(prices) = prices else { continue };
            // A slack with a negative price and no band row would grow without bound.
            if let Some(bad) = prices.iter().find(|price| **price < 0.0) {
                return Err(ModelError::invalid(
                    param.name(),
                    format!("penalty must not be negative, got {bad}"),
                ));
            }
            for (slack, price) in slacks.iter().zip(prices) {
                cost.add_term(*slack, price);
            }
        }
        Ok(Some(cost))
    }

    fn undercharge_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        OutputData::new(
            "undercharge_energy",
            OutputType::Energy,
            Shape::Interval,
            solution.values(&self.undercharge),
            self.period_count(),
        )
    }

    fn overcharge_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        OutputData::new(
            "overcharge_energy",
            OutputType::Energy,
            Shape::Interval,
            solution.values(&self.overcharge),
            self.period_count(),
        )
    }
}

impl Model for SocPricing {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::constraint("undercharge", Self::undercharge_rows),
        Declaration::constraint("overcharge", Self::overcharge_rows),
        Declaration::cost("soc_penalty", Self::penalty),
        Declaration::output("undercharge_energy", Self::undercharge_output),
        Declaration::output("overcharge_energy", Self::overcharge_output),
    ];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "undercharge_threshold" => Some(&mut self.undercharge_threshold),
            "undercharge_price" => Some(&mut self.undercharge_price),
            "overcharge_threshold" => Some(&mut self.overcharge_threshold),
            "overcharge_price" => Some(&mut self.overcharge_price),
            _ => None,
        }
    }
}

impl SegmentModel for SocPricing {
    const KIND: SegmentKind = SegmentKind::SocPricing;

    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn bind_endpoints(
        reactive: &mut Reactive<Self>,
        source: &EndpointView,
        target: &EndpointView,
    ) -> Result<(), ModelError> {
        let view = match reactive.model().battery {
            Side::Source => source,
            Side::Target => target,
        };
        let stored = view.stored_energy.clone().ok_or_else(|| {
            ModelError::invalid("battery", format!("endpoint '{}' does not store energy", view.name))
        })?;
        reactive.set(|model| &mut model.stored_energy, stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Computed;

    fn stored_view(solver: &mut Solver, n: usize) -> (EndpointView, Vec<Col>) {
        let cols = solver.add_columns("battery.stored", n + 1, 0.0, 10.0);
        let view = EndpointView {
            name: "battery".to_string(),
            stored_energy: Some(cols.iter().map(|col| LinExpr::from(*col)).collect()),
            capacity: Some(vec![10.0; n + 1]),
        };
        (view, cols)
    }

    #[test]
    fn test_undercharge_reads_period_end() {
        let mut solver = Solver::default();
        let band = SocBand {
            undercharge_threshold: Some(Series::Scalar(2.0)),
            undercharge_price: Some(Series::Scalar(0.5)),
            ..SocBand::default()
        };
        let model = SocPricing::new(&mut solver, "s", &[1.0, 1.0], Side::Target, band);
        let under = model.undercharge.clone();
        let mut reactive = Reactive::new(model);
        let (view, stored) = stored_view(&mut solver, 2);
        <SocPricing as SegmentModel>::bind_endpoints(&mut reactive, &EndpointView::plain("grid"), &view)
            .unwrap();

        let Computed::Rows(Some(rows)) = reactive.invoke("undercharge").unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(rows[0].expr.coefficient(stored[1]), 1.0);
        assert_eq!(rows[0].expr.coefficient(stored[0]), 0.0);
        assert_eq!(rows[0].expr.coefficient(under[0]), 1.0);
        assert_eq!(rows[0].lower, 2.0);
        assert_eq!(reactive.invoke("overcharge").unwrap(), Computed::Rows(None));
    }

    #[test]
    fn test_negative_penalty_is_rejected() {
        let mut solver = Solver::default();
        let band = SocBand {
            overcharge_price: Some(Series::Values(vec![0.1, -0.2])),
            ..SocBand::default()
        };
        let model = SocPricing::new(&mut solver, "s", &[1.0, 1.0], Side::Target, band);
        let mut reactive = Reactive::new(model);
        let ModelError::Computation { computation, source, .. } = reactive.cost("s").unwrap_err() else {
            panic!("expected a computation error");
        };
        assert_eq!(computation, "soc_penalty");
        assert!(matches!(*source, ModelError::InvalidParameter { name, .. } if name == "overcharge_price"));

        assert!(reactive
            .set_json("overcharge_price", &serde_json::json!(0.2))
            .unwrap()
            .unwrap());
        let cost = reactive.cost("s").unwrap().unwrap();
        assert_eq!(cost.coefficient(reactive.model().overcharge[1]), 0.2);
    }

    #[test]
    fn test_non_storage_endpoint_is_rejected() {
        let mut solver = Solver::default();
        let model = SocPricing::new(&mut solver, "s", &[1.0], Side::Source, SocBand::default());
        let mut reactive = Reactive::new(model);
        let result = <SocPricing as SegmentModel>::bind_endpoints(
            &mut reactive,
            &EndpointView::plain("grid"),
            &EndpointView::plain("load"),
        );
        assert!(matches!(result, Err(ModelError::InvalidParameter { .. })));
    }
}
