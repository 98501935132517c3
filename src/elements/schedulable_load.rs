//! Deferrable load with a fixed power draw and run duration (MILP).
//!
//! Every horizon boundary inside the start window whose run would finish before the
//! horizon ends is a candidate start. A convex combination of the candidates' energy
//! profiles must be supplied by the connections; the integrality policy decides how many
//! of the combination weights are forced to be binary.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::element::{net_inflow, ConnectionTap, ElementKind, ElementModel};
use crate::error::ModelError;
use crate::horizon::{boundaries, overlap};
use crate::output::{Direction, OutputData, OutputType, Shape};
use crate::reactive::{ConfigParam, Declaration, Model, Param, Reactive, Scope};
use crate::solver::{Col, LinExpr, RowSpec, Solution, Solver};

const FINISH_TOLERANCE: f64 = 1e-9;

/// Which candidate weights are integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntegralityPolicy {
    /// Pure LP.
    None,
    /// Only the earliest candidate, so the immediate start/wait decision is crisp.
    #[default]
    First,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulableLoadConfig {
    pub name: String,
    /// Constant draw while running (kW).
    pub power: f64,
    /// Run length (h).
    pub duration: f64,
    /// Earliest start, hours after the horizon start.
    #[serde(default)]
    pub earliest_start: f64,
    /// Latest start, hours after the horizon start. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_start: Option<f64>,
    #[serde(default)]
    pub integrality: IntegralityPolicy,
}

/// One admissible start time and the energy it draws in every period.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub boundary: usize,
    pub start: f64,
    pub energy: Vec<f64>,
}

/// Candidate starts for a run of `duration` hours at `power` kW.
pub fn candidates(
    periods: &[f64],
    power: f64,
    duration: f64,
    earliest: f64,
    latest: Option<f64>,
) -> Vec<Candidate> {
    let edges = boundaries(periods);
    let end = edges.last().copied().unwrap_or(0.0);
    let latest = latest.unwrap_or(f64::INFINITY);
    edges
        .iter()
        .enumerate()
        .filter(|(_, start)| {
            **start >= earliest - FINISH_TOLERANCE
                && **start <= latest + FINISH_TOLERANCE
                && **start + duration <= end + FINISH_TOLERANCE
        })
        .map(|(boundary, start)| Candidate {
            boundary,
            start: *start,
            energy: edges
                .windows(2)
                .map(|edge| power * overlap(*start, start + duration, edge[0], edge[1]))
                .collect(),
        })
        .collect()
}

#[derive(Debug)]
pub struct SchedulableLoad {
    periods: Param<Vec<f64>>,
    power: Param<f64>,
    duration: Param<f64>,
    earliest_start: Param<f64>,
    latest_start: Param<f64>,
    integrality: Param<IntegralityPolicy>,
    connections: Param<Vec<ConnectionTap>>,
    /// One weight per boundary; only candidate boundaries take part in the model.
    weights: Vec<Col>,
}

impl SchedulableLoad {
    pub fn new(solver: &mut Solver, config: &SchedulableLoadConfig, periods: &[f64]) -> Self {
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            power: Param::with_value("power", config.power),
            duration: Param::with_value("duration", config.duration),
            earliest_start: Param::with_value("earliest_start", config.earliest_start),
            latest_start: Param::with_optional("latest_start", config.latest_start),
            integrality: Param::with_value("integrality", config.integrality),
            connections: Param::with_value("connections", Vec::new()),
            weights: solver.add_columns(
                &format!("{}.start_weight", config.name),
                periods.len() + 1,
                0.0,
                1.0,
            ),
        }
    }

    fn tracked_candidates(&self, scope: &mut Scope<'_, Self>) -> Result<Vec<Candidate>, ModelError> {
        let periods = self.periods.get(scope)?.clone();
        let power = *self.power.get(scope)?;
        let duration = *self.duration.get(scope)?;
        let earliest = *self.earliest_start.get(scope)?;
        let latest = self.latest_start.get_opt(scope).copied();
        validate(power, duration)?;
        let found = candidates(&periods, power, duration, earliest, latest);
        if found.is_empty() {
            return Err(ModelError::invalid(
                "earliest_start",
                format!(
                    "no start in [{earliest}, {}] lets a {duration} h run finish within the horizon",
                    latest.map_or("end".to_string(), |l| l.to_string())
                ),
            ));
        }
        Ok(found)
    }

    /// Candidates from the current parameters without recording dependencies.
    fn current_candidates(&self) -> Vec<Candidate> {
        match (
            self.periods.peek(),
            self.power.peek(),
            self.duration.peek(),
            self.earliest_start.peek(),
        ) {
            (Some(periods), Some(power), Some(duration), Some(earliest)) => candidates(
                periods,
                *power,
                *duration,
                *earliest,
                self.latest_start.peek().copied(),
            ),
            _ => Vec::new(),
        }
    }

    fn selection(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let found = self.tracked_candidates(scope)?;
        let total = LinExpr::weighted(found.iter().map(|c| (self.weights[c.boundary], 1.0)));
        Ok(Some(vec![total.equals(1.0)]))
    }

    fn energy(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let found = self.tracked_candidates(scope)?;
        let taps = self.connections.get(scope)?;
        let periods = self.periods.get(scope)?;
        let rows = periods
            .iter()
            .enumerate()
            .map(|(t, hours)| {
                let drawn = LinExpr::weighted(
                    found
                        .iter()
                        .map(|c| (self.weights[c.boundary], c.energy[t])),
                );
                (net_inflow(taps, t) * *hours).equals(drawn)
            })
            .collect();
        Ok(Some(rows))
    }

    fn power_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        let periods = self.periods.peek().map(Vec::as_slice).unwrap_or_default();
        let found = self.current_candidates();
        let values = periods
            .iter()
            .enumerate()
            .map(|(t, hours)| {
                found
                    .iter()
                    .map(|c| solution.value(self.weights[c.boundary]) * c.energy[t])
                    .sum::<f64>()
                    / hours
            })
            .collect();
        Ok(
            OutputData::new("power", OutputType::Power, Shape::Interval, values, periods.len())?
                .with_direction(Direction::Negative),
        )
    }

    fn start_output(&self, solution: &Solution) -> Result<OutputData, ModelError> {
        let found = self.current_candidates();
        let chosen = realized_start(&found, |c| solution.value(self.weights[c.boundary]));
        OutputData::new(
            "start_time",
            OutputType::Duration,
            Shape::Scalar,
            vec![chosen.map_or(0.0, |c| c.start)],
            self.period_count(),
        )
    }
}

/// Candidate with the largest weight; the earliest one wins ties.
pub fn realized_start<F>(found: &[Candidate], weight: F) -> Option<&Candidate>
where
    F: Fn(&Candidate) -> f64,
{
    let mut best: Option<(&Candidate, f64)> = None;
    for candidate in found {
        let w = weight(candidate);
        if best.map_or(true, |(_, top)| w > top) {
            best = Some((candidate, w));
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn validate(power: f64, duration: f64) -> Result<(), ModelError> {
    if power < 0.0 {
        return Err(ModelError::invalid("power", format!("power must not be negative, got {power}")));
    }
    if duration.is_nan() || duration <= 0.0 {
        return Err(ModelError::invalid(
            "duration",
            format!("duration must be positive, got {duration}"),
        ));
    }
    Ok(())
}

impl Model for SchedulableLoad {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::constraint("start_selection", Self::selection),
        Declaration::constraint("energy_balance", Self::energy),
        Declaration::output("power", Self::power_output),
        Declaration::output("start_time", Self::start_output),
    ];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "power" => Some(&mut self.power),
            "duration" => Some(&mut self.duration),
            "earliest_start" => Some(&mut self.earliest_start),
            "latest_start" => Some(&mut self.latest_start),
            "integrality" => Some(&mut self.integrality),
            _ => None,
        }
    }
}

impl ElementModel for SchedulableLoad {
    const KIND: ElementKind = ElementKind::SchedulableLoad;

    fn connections(&self) -> &Param<Vec<ConnectionTap>> {
        &self.connections
    }

    fn connections_mut(&mut self) -> &mut Param<Vec<ConnectionTap>> {
        &mut self.connections
    }

    /// Applies the integrality policy to the current candidate set.
    fn prepare(reactive: &mut Reactive<Self>, solver: &mut Solver) -> Result<(), ModelError> {
        let model = reactive.model();
        let policy = model.integrality.peek().copied().unwrap_or_default();
        let found = model.current_candidates();
        let mut changed = 0;
        for (boundary, weight) in model.weights.iter().enumerate() {
            let position = found.iter().position(|c| c.boundary == boundary);
            let integer = match (policy, position) {
                (IntegralityPolicy::All, Some(_)) => true,
                (IntegralityPolicy::First, Some(0)) => true,
                _ => false,
            };
            if solver.set_integrality(*weight, integer) {
                changed += 1;
            }
        }
        if changed > 0 {
            debug!(%policy, changed, candidates = found.len(), "updated start integrality");
        }
        Ok(())
    }
}
