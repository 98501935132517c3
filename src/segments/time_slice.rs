use crate::error::ModelError;
use crate::horizon::Series;
use crate::reactive::{ConfigParam, Declaration, Model, Param, Scope};
use crate::solver::{LinExpr, RowSpec, Solver};

use super::{Ports, SegmentKind, SegmentModel};

/// Forbids running both directions at full capacity in the same period:
/// `in_st / max_st + in_ts / max_ts ≤ 1`.
#[derive(Debug)]
pub struct TimeSlice {
    periods: Param<Vec<f64>>,
    max_power_source_target: Param<Series>,
    max_power_target_source: Param<Series>,
    ports: Ports,
}

impl TimeSlice {
    pub fn new(
        solver: &mut Solver,
        label: &str,
        periods: &[f64],
        max_power_source_target: Option<Series>,
        max_power_target_source: Option<Series>,
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
            ports: Ports::lossless(solver, label, periods.len()),
        }
    }

    fn shared_capacity(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let n = self.periods.get(scope)?.len();
        let forward = self.max_power_source_target.resolve(scope, n)?;
        let reverse = self.max_power_target_source.resolve(scope, n)?;
        let (Some(forward), Some(reverse)) = (forward, reverse) else {
            return Ok(None);
        };

        let rows = (0..n)
            .map(|t| {
                let mut expr = LinExpr::new();
                expr.add_term(self.ports.in_st[t], inverse(forward[t]));
                expr.add_term(self.ports.in_ts[t], inverse(reverse[t]));
                expr.leq(1.0)
            })
            .collect();
        Ok(Some(rows))
    }
}

/// Zero capacity contributes nothing; the power limit already pins that flow to zero.
fn inverse(capacity: f64) -> f64 {
    if capacity > 0.0 {
        1.0 / capacity
    } else {
        0.0
    }
}

impl Model for TimeSlice {
    const DECLARATIONS: &'static [Declaration<Self>] =
        &[Declaration::constraint("time_slice", Self::shared_capacity)];

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
            _ => None,
        }
    }
}

impl SegmentModel for TimeSlice {
    const KIND: SegmentKind = SegmentKind::TimeSlice;

    fn ports(&self) -> &Ports {
        &self.ports
    }
}
