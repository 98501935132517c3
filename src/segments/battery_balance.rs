//! Lossless redistribution between two adjacent partitions of one physical battery.
//!
//! The source endpoint is the upper partition and the target the lower one. Energy flows
//! down (`in_st`) until the lower partition is full and up (`in_ts`) whenever the lower
//! partition holds more than its (possibly shrunk) capacity. The slack columns absorb
//! what the partitions physically cannot and carry [`BALANCE_PENALTY`].

use crate::element::EndpointView;
use crate::error::ModelError;
use crate::output::{Direction, OutputData, OutputType, Shape};
use crate::reactive::{ConfigParam, Declaration, Model, Param, Reactive, Scope};
use crate::solver::{Col, LinExpr, RowSpec, Solution, Solver};

use super::{Ports, SegmentKind, SegmentModel};

/// Cost per kWh of unmet demand or unabsorbed excess.
pub const BALANCE_PENALTY: f64 = 100.0;

/// Cost per kWh moved in either direction; rules out circulating flows.
pub const TRANSFER_COST: f64 = 1e-4;

#[derive(Debug)]
pub struct BatteryBalance {
    periods: Param<Vec<f64>>,
    upper_stored: Param<Vec<LinExpr>>,
    lower_stored: Param<Vec<LinExpr>>,
    upper_capacity: Param<Vec<f64>>,
    lower_capacity: Param<Vec<f64>>,
    unmet: Vec<Col>,
    absorbed: Vec<Col>,
    ports: Ports,
}

struct Partitions {
    durations: Vec<f64>,
    upper_stored: Vec<LinExpr>,
    lower_stored: Vec<LinExpr>,
    upper_capacity: Vec<f64>,
    lower_capacity: Vec<f64>,
}

impl BatteryBalance {
    pub fn new(solver: &mut Solver, label: &str, periods: &[f64]) -> Self {
        let n = periods.len();
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            upper_stored: Param::new("upper_stored"),
            lower_stored: Param::new("lower_stored"),
            upper_capacity: Param::new("upper_capacity"),
            lower_capacity: Param::new("lower_capacity"),
            unmet: solver.add_columns(&format!("{label}.unmet"), n, 0.0, f64::INFINITY),
            absorbed: solver.add_columns(&format!("{label}.absorbed"), n, 0.0, f64::INFINITY),
            ports: Ports::lossless(solver, label, n),
        }
    }

    fn partitions(&self, scope: &mut Scope<'_, Self>) -> Result<Partitions, ModelError> {
        let durations = self.periods.get(scope)?.clone();
        let boundaries = durations.len() + 1;
        let partitions = Partitions {
            upper_stored: self.upper_stored.get(scope)?.clone(),
            lower_stored: self.lower_stored.get(scope)?.clone(),
            upper_capacity: self.upper_capacity.get(scope)?.clone(),
            lower_capacity: self.lower_capacity.get(scope)?.clone(),
            durations,
        };
        for (name, len) in [
            (self.upper_stored.name(), partitions.upper_stored.len()),
            (self.lower_stored.name(), partitions.lower_stored.len()),
            (self.upper_capacity.name(), partitions.upper_capacity.len()),
            (self.lower_capacity.name(), partitions.lower_capacity.len()),
        ] {
            if len != boundaries {
                return Err(ModelError::LengthMismatch {
                    name,
                    expected: boundaries,
                    actual: len,
                });
            }
        }
        Ok(partitions)
    }

    /// `down·Δt + unmet + lower[t] ≥ lower_cap[t+1]`: fill the lower partition.
    fn down(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let p = self.partitions(scope)?;
        let rows = (0..p.durations.len())
            .map(|t| {
                (self.ports.in_st[t] * p.durations[t] + self.unmet[t] + p.lower_stored[t].clone())
                    .geq(p.lower_capacity[t + 1])
            })
            .collect();
        Ok(Some(rows))
    }

    /// `unmet + lower[t] + upper[t] ≥ lower_cap[t+1]`: demand beyond what the upper holds.
    fn unmet_demand(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let p = self.partitions(scope)?;
        let rows = (0..p.durations.len())
            .map(|t| {
                (LinExpr::from(self.unmet[t]) + p.lower_stored[t].clone() + p.upper_stored[t].clone())
                    .geq(p.lower_capacity[t + 1])
            })
            .collect();
        Ok(Some(rows))
    }

    /// `up·Δt + absorbed − lower[t] ≥ −lower_cap[t+1]`: push out the lower excess.
    fn up(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let p = self.partitions(scope)?;
        let rows = (0..p.durations.len())
            .map(|t| {
                (self.ports.in_ts[t] * p.durations[t] + self.absorbed[t] - p.lower_stored[t].clone())
                    .geq(-p.lower_capacity[t + 1])
            })
            .collect();
        Ok(Some(rows))
    }

    /// `absorbed − lower[t] − upper[t] ≥ −lower_cap[t+1] − upper_cap[t+1]`: excess the
    /// upper partition has no room for.
    fn unabsorbed(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let p = self.partitions(scope)?;
        let rows = (0..p.durations.len())
            .map(|t| {
                (LinExpr::from(self.absorbed[t]) - p.lower_stored[t].clone() - p.upper_stored[t].clone())
                    .geq(-p.lower_capacity[t + 1] - p.upper_capacity[t + 1])
            })
            .collect();
        Ok(Some(rows))
    }

    fn penalty(&self, scope: &mut Scope<'_, Self>) -> Result<Option<LinExpr>, ModelError> {
        let durations = self.periods.get(scope)?;
        let mut cost = LinExpr::new();
        for t in 0..durations.len() {
            cost.add_term(self.unmet[t], BALANCE_PENALTY);
            cost.add_term(self.absorbed[t], BALANCE_PENALTY);
            cost.add_term(self.ports.in_st[t], TRANSFER_COST * durations[t]);
            cost.add_term(self.ports.in_ts[t], TRANSFER_COST * durations[t]);
        }
        Ok(Some(cost))
    }

    fn down_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        Ok(OutputData::new(
            "balance_power_down",
            OutputType::PowerFlow,
            Shape::Interval,
            solution.values(&self.ports.in_st),
            self.period_count(),
        )?
        .with_direction(Direction::Positive))
    }

    fn up_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        Ok(OutputData::new(
            "balance_power_up",
            OutputType::PowerFlow,
            Shape::Interval,
            solution.values(&self.ports.in_ts),
            self.period_count(),
        )?
        .with_direction(Direction::Negative))
    }

    fn unmet_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        OutputData::new(
            "balance_unmet_demand",
            OutputType::Energy,
            Shape::Interval,
            solution.values(&self.unmet),
            self.period_count(),
        )
    }

    fn absorbed_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        OutputData::new(
            "balance_absorbed_excess",
            OutputType::Energy,
            Shape::Interval,
            solution.values(&self.absorbed),
            self.period_count(),
        )
    }
}

impl Model for BatteryBalance {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::constraint("balance_down", Self::down),
        Declaration::constraint("balance_unmet", Self::unmet_demand),
        Declaration::constraint("balance_up", Self::up),
        Declaration::constraint("balance_absorbed", Self::unabsorbed),
        Declaration::cost("balance_penalty", Self::penalty),
        Declaration::output("balance_power_down", Self::down_output),
        Declaration::output("balance_power_up", Self::up_output),
        Declaration::output("balance_unmet_demand", Self::unmet_output),
        Declaration::output("balance_absorbed_excess", Self::absorbed_output),
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

impl SegmentModel for BatteryBalance {
    const KIND: SegmentKind = SegmentKind::BatteryBalance;

    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn bind_endpoints(
        reactive: &mut Reactive<Self>,
        source: &EndpointView,
        target: &EndpointView,
    ) -> Result<(), ModelError> {
        let (upper_stored, upper_capacity) = partition(source)?;
        let (lower_stored, lower_capacity) = partition(target)?;
        reactive.set(|model| &mut model.upper_stored, upper_stored);
        reactive.set(|model| &mut model.upper_capacity, upper_capacity);
        reactive.set(|model| &mut model.lower_stored, lower_stored);
        reactive.set(|model| &mut model.lower_capacity, lower_capacity);
        Ok(())
    }
}

fn partition(view: &EndpointView) -> Result<(Vec<LinExpr>, Vec<f64>), ModelError> {
    match (&view.stored_energy, &view.capacity) {
        (Some(stored), Some(capacity)) => Ok((stored.clone(), capacity.clone())),
        _ => Err(ModelError::invalid(
            "battery_balance",
            format!("endpoint '{}' is not a battery partition", view.name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Computed;

    fn view(name: &str, solver: &mut Solver, capacity: f64) -> EndpointView {
        let cols = solver.add_columns(name, 2, 0.0, f64::INFINITY);
        EndpointView {
            name: name.to_string(),
            stored_energy: Some(cols.into_iter().map(LinExpr::from).collect()),
            capacity: Some(vec![capacity; 2]),
        }
    }

    #[test]
    fn test_capacity_change_only_touches_bounds() {
        let mut solver = Solver::default();
        let model = BatteryBalance::new(&mut solver, "b", &[1.0]);
        let mut reactive = Reactive::new(model);
        let upper = view("upper", &mut solver, 5.0);
        let mut lower = view("lower", &mut solver, 10.0);
        <BatteryBalance as SegmentModel>::bind_endpoints(&mut reactive, &upper, &lower).unwrap();
        reactive.constraints("b", &mut solver).unwrap();
        let edits = solver.stats().clone();

        lower.capacity = Some(vec![7.0; 2]);
        <BatteryBalance as SegmentModel>::bind_endpoints(&mut reactive, &upper, &lower).unwrap();
        assert!(reactive.is_stale("balance_down"));
        reactive.constraints("b", &mut solver).unwrap();
        assert_eq!(solver.stats().rows_added, edits.rows_added);
        assert_eq!(solver.stats().coefficient_changes, edits.coefficient_changes);
        assert_eq!(solver.stats().bound_changes, edits.bound_changes + 4);
    }

    #[test]
    fn test_unbound_partitions_are_an_error() {
        let mut solver = Solver::default();
        let mut reactive = Reactive::new(BatteryBalance::new(&mut solver, "b", &[1.0]));
        assert!(matches!(
            reactive.invoke("balance_down"),
            Err(ModelError::UnsetParameter("upper_stored"))
        ));
        assert!(matches!(reactive.invoke("balance_penalty").unwrap(), Computed::Expr(Some(_))));
    }
}
