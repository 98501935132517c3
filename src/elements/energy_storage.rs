//! Battery partition modelled with cumulative energy columns.
//!
//! `energy_in[t]` and `energy_out[t]` hold the energy charged and discharged up to
//! boundary `t`; stored energy is their difference. Fixing boundary 0 through a reactive
//! constraint turns a new initial charge into a bound change on two existing rows.

use serde::{Deserialize, Serialize};

use crate::element::{net_inflow, ConnectionTap, ElementKind, ElementModel, EndpointView};
use crate::error::ModelError;
use crate::horizon::Series;
use crate::output::{Direction, OutputData, OutputType, Shape};
use crate::reactive::{ConfigParam, Declaration, Model, Param, Scope, ShadowPrice};
use crate::solver::{Col, LinExpr, RowSpec, Solution, Solver};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyStorageConfig {
    pub name: String,
    /// Usable capacity (kWh) per boundary.
    pub capacity: Series,
    /// Stored energy (kWh) at the horizon start.
    pub initial_charge: f64,
}

#[derive(Debug)]
pub struct EnergyStorage {
    periods: Param<Vec<f64>>,
    capacity: Param<Series>,
    initial_charge: Param<f64>,
    connections: Param<Vec<ConnectionTap>>,
    energy_in: Vec<Col>,
    energy_out: Vec<Col>,
}

impl EnergyStorage {
    pub fn new(solver: &mut Solver, config: &EnergyStorageConfig, periods: &[f64]) -> Self {
        let boundaries = periods.len() + 1;
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            capacity: Param::with_value("capacity", config.capacity.clone()),
            initial_charge: Param::with_value("initial_charge", config.initial_charge),
            connections: Param::with_value("connections", Vec::new()),
            energy_in: solver.add_columns(
                &format!("{}.energy_in", config.name),
                boundaries,
                0.0,
                f64::INFINITY,
            ),
            energy_out: solver.add_columns(
                &format!("{}.energy_out", config.name),
                boundaries,
                0.0,
                f64::INFINITY,
            ),
        }
    }

    fn stored(&self, t: usize) -> LinExpr {
        LinExpr::from(self.energy_in[t]) - self.energy_out[t]
    }

    fn capacities(&self, scope: &mut Scope<'_, Self>) -> Result<Vec<f64>, ModelError> {
        let boundaries = self.periods.get(scope)?.len() + 1;
        let capacity = self.capacity.get(scope)?.resolve(self.capacity.name(), boundaries)?;
        if let Some(bad) = capacity.iter().find(|c| **c < 0.0) {
            return Err(ModelError::invalid(
                self.capacity.name(),
                format!("capacity must not be negative, got {bad}"),
            ));
        }
        Ok(capacity)
    }

    fn initial(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let initial = *self.initial_charge.get(scope)?;
        if initial < 0.0 {
            return Err(ModelError::invalid(
                self.initial_charge.name(),
                format!("initial charge must not be negative, got {initial}"),
            ));
        }
        Ok(Some(vec![
            LinExpr::from(self.energy_in[0]).equals(initial),
            LinExpr::from(self.energy_out[0]).equals(0.0),
        ]))
    }

    fn monotonic(
        &self,
        scope: &mut Scope<'_, Self>,
        cumulative: &[Col],
    ) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let n = self.periods.get(scope)?.len();
        let rows = (0..n)
            .map(|t| (LinExpr::from(cumulative[t + 1]) - cumulative[t]).geq(0.0))
            .collect();
        Ok(Some(rows))
    }

    fn energy_in_monotonic(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.monotonic(scope, &self.energy_in)
    }

    fn energy_out_monotonic(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.monotonic(scope, &self.energy_out)
    }

    /// `stored[t] ≥ 0` for boundaries `1..=n`; boundary 0 is the initial charge.
    ///
    /// The floor's shadow price is non-negative, the ceiling's non-positive.
    fn stored_min(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let n = self.periods.get(scope)?.len();
        Ok(Some((1..=n).map(|t| self.stored(t).geq(0.0)).collect()))
    }

    /// `stored[t] ≤ capacity[t]` for boundaries `1..=n`.
    fn stored_max(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let capacity = self.capacities(scope)?;
        let rows = (1..capacity.len())
            .map(|t| self.stored(t).leq(capacity[t]))
            .collect();
        Ok(Some(rows))
    }

    /// Net connection energy equals the change in stored energy.
    fn power_balance(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let taps = self.connections.get(scope)?;
        let periods = self.periods.get(scope)?;
        let rows = periods
            .iter()
            .enumerate()
            .map(|(t, hours)| {
                let delta = self.stored(t + 1) - self.stored(t);
                (net_inflow(taps, t) * *hours).equals(delta)
            })
            .collect();
        Ok(Some(rows))
    }

    fn rates(&self, solution: &Solution, cumulative: &[Col]) -> Vec<f64> {
        let periods = self.periods.peek().map(Vec::as_slice).unwrap_or_default();
        periods
            .iter()
            .enumerate()
            .map(|(t, hours)| {
                (solution.value(cumulative[t + 1]) - solution.value(cumulative[t])) / hours
            })
            .collect()
    }

    fn stored_values(&self, solution: &Solution) -> Vec<f64> {
        (0..self.energy_in.len())
            .map(|t| solution.evaluate(&self.stored(t)))
            .collect()
    }

    fn charge_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        Ok(OutputData::new(
            "power_charge",
            OutputType::Power,
            Shape::Interval,
            self.rates(solution, &self.energy_in),
            self.period_count(),
        )?
        .with_direction(Direction::Positive))
    }

    fn discharge_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        Ok(OutputData::new(
            "power_discharge",
            OutputType::Power,
            Shape::Interval,
            self.rates(solution, &self.energy_out),
            self.period_count(),
        )?
        .with_direction(Direction::Negative))
    }

    fn stored_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        OutputData::new(
            "stored_energy",
            OutputType::Energy,
            Shape::Boundary,
            self.stored_values(solution),
            self.period_count(),
        )
    }

    fn soc_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        let capacity = self.boundary_capacity()?;
        let values = self
            .stored_values(solution)
            .into_iter()
            .zip(capacity)
            .map(|(stored, capacity)| if capacity > 0.0 { stored / capacity * 100.0 } else { 0.0 })
            .collect();
        OutputData::new(
            "state_of_charge",
            OutputType::StateOfCharge,
            Shape::Boundary,
            values,
            self.period_count(),
        )
    }

    fn boundary_capacity(&self) -> Result<Vec<f64>, ModelError> {
        let boundaries = self.period_count() + 1;
        match self.capacity.peek() {
            Some(capacity) => capacity.resolve(self.capacity.name(), boundaries),
            None => Err(ModelError::UnsetParameter(self.capacity.name())),
        }
    }
}

impl Model for EnergyStorage {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::constraint("initial_charge", Self::initial),
        Declaration::priced_constraint(
            "energy_in_monotonic",
            Self::energy_in_monotonic,
            ShadowPrice::interval("$/kWh"),
        ),
        Declaration::priced_constraint(
            "energy_out_monotonic",
            Self::energy_out_monotonic,
            ShadowPrice::interval("$/kWh"),
        ),
        Declaration::priced_constraint(
            "stored_energy_min",
            Self::stored_min,
            ShadowPrice::boundary("$/kWh"),
        ),
        Declaration::priced_constraint(
            "stored_energy_max",
            Self::stored_max,
            ShadowPrice::boundary("$/kWh"),
        ),
        Declaration::constraint("power_balance", Self::power_balance),
        Declaration::output("power_charge", Self::charge_output),
        Declaration::output("power_discharge", Self::discharge_output),
        Declaration::output("stored_energy", Self::stored_output),
        Declaration::output("state_of_charge", Self::soc_output),
    ];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "capacity" => Some(&mut self.capacity),
            "initial_charge" => Some(&mut self.initial_charge),
            _ => None,
        }
    }
}

impl ElementModel for EnergyStorage {
    const KIND: ElementKind = ElementKind::EnergyStorage;

    fn connections(&self) -> &Param<Vec<ConnectionTap>> {
        &self.connections
    }

    fn connections_mut(&mut self) -> &mut Param<Vec<ConnectionTap>> {
        &mut self.connections
    }

    fn endpoint_view(&self, name: &str) -> Result<EndpointView, ModelError> {
        Ok(EndpointView {
            name: name.to_string(),
            stored_energy: Some((0..self.energy_in.len()).map(|t| self.stored(t)).collect()),
            capacity: Some(self.boundary_capacity()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, ModelElement};

    fn storage(solver: &mut Solver, capacity: Series) -> ModelElement<EnergyStorage> {
        let config = EnergyStorageConfig {
            name: "battery".to_string(),
            capacity,
            initial_charge: 2.0,
        };
        ModelElement::new("battery", EnergyStorage::new(solver, &config, &[1.0, 1.0, 1.0]))
    }

    #[test]
    fn test_initial_charge_change_is_a_bound_change() {
        let mut solver = Solver::default();
        let mut battery = storage(&mut solver, Series::Scalar(10.0));
        let rows = battery.constraints(&mut solver).unwrap();
        assert_eq!(rows["stored_energy_min"].len(), 3);
        assert_eq!(rows["stored_energy_max"].len(), 3);
        assert_eq!(rows["energy_in_monotonic"].len(), 3);
        let added = solver.stats().rows_added;

        assert!(battery.apply("initial_charge", &serde_json::json!(4.0)).unwrap());
        battery.constraints(&mut solver).unwrap();
        assert_eq!(solver.stats().rows_added, added);
        assert_eq!(solver.stats().bound_changes, 1);
        assert_eq!(solver.stats().coefficient_changes, 0);
    }

    #[test]
    fn test_capacity_length_is_checked_at_evaluation() {
        let mut solver = Solver::default();
        let mut battery = storage(&mut solver, Series::Values(vec![10.0; 3]));
        let err = battery.constraints(&mut solver).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Computation { computation: "stored_energy_max", .. }
        ));
    }

    #[test]
    fn test_endpoint_view_exposes_boundaries() {
        let mut solver = Solver::default();
        let battery = storage(&mut solver, Series::Values(vec![10.0, 9.0, 8.0, 7.0]));
        let view = battery.endpoint_view().unwrap();
        assert_eq!(view.stored_energy.unwrap().len(), 4);
        assert_eq!(view.capacity.unwrap(), vec![10.0, 9.0, 8.0, 7.0]);
    }
}
