use crate::error::ModelError;
use crate::horizon::Series;
use crate::output::Direction;
use crate::reactive::{ConfigParam, Declaration, Model, Param, Scope, ShadowPrice};
use crate::solver::{Col, LinExpr, RowSpec, Solver};

use super::{Ports, SegmentKind, SegmentModel};

/// Caps (or pins, when `fixed`) the flow entering the stage in each direction.
#[derive(Debug)]
pub struct PowerLimit {
    periods: Param<Vec<f64>>,
    max_power_source_target: Param<Series>,
    max_power_target_source: Param<Series>,
    fixed: Param<bool>,
    ports: Ports,
}

impl PowerLimit {
    pub fn new(
        solver: &mut Solver,
        label: &str,
        periods: &[f64],
        max_power_source_target: Option<Series>,
        max_power_target_source: Option<Series>,
        fixed: bool,
    ) -> Self {
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            max_power_source_target: Param::with_optional(
                "max_power_source_target",
                max_power_source_target,
            ),
            max_power_target_source: Param::with_optional(
                "max_power_target_source",
                max_power_target_source,
            ),
            fixed: Param::with_value("fixed", fixed),
            ports: Ports::lossless(solver, label, periods.len()),
        }
    }

    fn limit(
        &self,
        scope: &mut Scope<'_, Self>,
        limit: &Param<Series>,
        flows: &[Col],
    ) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let n = self.periods.get(scope)?.len();
        let Some(limits) = limit.resolve(scope, n)? else {
            return Ok(None);
        };
        if let Some(bad) = limits.iter().find(|max| **max < 0.0) {
            return Err(ModelError::invalid(
                limit.name(),
                format!("power limit must not be negative, got {bad}"),
            ));
        }
        let fixed = *self.fixed.get(scope)?;
        let rows = flows
            .iter()
            .zip(limits)
            .map(|(flow, max)| {
                let flow = LinExpr::from(*flow);
                if fixed {
                    flow.equals(max)
                } else {
                    flow.leq(max)
                }
            })
            .collect();
        Ok(Some(rows))
    }

    fn source_target(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.limit(scope, &self.max_power_source_target, &self.ports.in_st)
    }

    fn target_source(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.limit(scope, &self.max_power_target_source, &self.ports.in_ts)
    }
}

impl Model for PowerLimit {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::priced_constraint(
            "max_power_source_target",
            Self::source_target,
            ShadowPrice::interval("$/kW").directed(Direction::Positive),
        ),
        Declaration::priced_constraint(
            "max_power_target_source",
            Self::target_source,
            ShadowPrice::interval("$/kW").directed(Direction::Negative),
        ),
    ];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "max_power_source_target" => Some(&mut self.max_power_source_target),
            "max_power_target_source" => Some(&mut self.max_power_target_source),
            "fixed" => Some(&mut self.fixed),
            _ => None,
        }
    }
}

impl SegmentModel for PowerLimit {
    const KIND: SegmentKind = SegmentKind::PowerLimit;

    fn ports(&self) -> &Ports {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computed, Reactive};

    #[test]
    fn test_unset_limit_is_not_applicable() {
        let mut solver = Solver::default();
        let model = PowerLimit::new(&mut solver, "p", &[1.0; 3], Some(Series::Scalar(4.0)), None, false);
        let mut reactive = Reactive::new(model);
        assert_eq!(
            reactive.invoke("max_power_target_source").unwrap(),
            Computed::Rows(None)
        );

        let rows = reactive.constraints("p", &mut solver).unwrap();
        assert_eq!(rows["max_power_source_target"].len(), 3);
        assert!(!rows.contains_key("max_power_target_source"));
    }

    #[test]
    fn test_fixed_pins_the_flow() {
        let mut solver = Solver::default();
        let model = PowerLimit::new(&mut solver, "p", &[1.0], None, Some(Series::Scalar(2.0)), true);
        let mut reactive = Reactive::new(model);
        let Computed::Rows(Some(rows)) = reactive.invoke("max_power_target_source").unwrap() else {
            panic!("expected rows");
        };
        assert!(rows[0].is_equality());
        assert_eq!(rows[0].upper, 2.0);
    }
}
