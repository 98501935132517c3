//! Reactive Core
//!
//! Parameters ([`Param`]) and memoized computations (constraints and costs) with
//! automatic dependency capture. A model type lists its computations once in a static
//! declaration table; [`Reactive`] owns the model together with its cache and keeps the
//! solver rows of every constraint in step with the cached results.

mod cache;
mod param;

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::ModelError;
use crate::output::{Direction, OutputData, OutputType, Shape};
use crate::solver::{LinExpr, RowId, RowSpec, Solution, Solver};

pub use cache::{ComputationCache, Scope};
pub use param::{ConfigParam, Param, Tracker};

pub type ConstraintFn<S> = fn(&S, &mut Scope<'_, S>) -> Result<Option<Vec<RowSpec>>, ModelError>;
pub type CostFn<S> = fn(&S, &mut Scope<'_, S>) -> Result<Option<LinExpr>, ModelError>;
pub type OutputFn<S> = fn(&S, &Solution) -> Result<OutputData, ModelError>;

/// Result of a reactive computation. `None` means "not applicable".
#[derive(Debug, Clone, PartialEq)]
pub enum Computed {
    Rows(Option<Vec<RowSpec>>),
    Expr(Option<LinExpr>),
}

/// Shadow-price exposure requested by a constraint declaration.
#[derive(Debug, Clone, Copy)]
pub struct ShadowPrice {
    pub shape: Shape,
    pub unit: &'static str,
    pub direction: Option<Direction>,
}

impl ShadowPrice {
    pub const fn interval(unit: &'static str) -> Self {
        Self {
            shape: Shape::Interval,
            unit,
            direction: None,
        }
    }

    /// Rows cover boundaries `1..=n`; boundary 0 reads as zero.
    pub const fn boundary(unit: &'static str) -> Self {
        Self {
            shape: Shape::Boundary,
            unit,
            direction: None,
        }
    }

    pub const fn scalar(unit: &'static str) -> Self {
        Self {
            shape: Shape::Scalar,
            unit,
            direction: None,
        }
    }

    pub const fn directed(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// One entry of a model's declaration table.
pub enum Declaration<S> {
    Constraint {
        name: &'static str,
        compute: ConstraintFn<S>,
        shadow_price: Option<ShadowPrice>,
    },
    Cost {
        name: &'static str,
        compute: CostFn<S>,
    },
    Output {
        name: &'static str,
        compute: OutputFn<S>,
    },
}

impl<S> Declaration<S> {
    pub const fn constraint(name: &'static str, compute: ConstraintFn<S>) -> Self {
        Declaration::Constraint {
            name,
            compute,
            shadow_price: None,
        }
    }

    pub const fn priced_constraint(
        name: &'static str,
        compute: ConstraintFn<S>,
        shadow_price: ShadowPrice,
    ) -> Self {
        Declaration::Constraint {
            name,
            compute,
            shadow_price: Some(shadow_price),
        }
    }

    pub const fn cost(name: &'static str, compute: CostFn<S>) -> Self {
        Declaration::Cost { name, compute }
    }

    pub const fn output(name: &'static str, compute: OutputFn<S>) -> Self {
        Declaration::Output { name, compute }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Declaration::Constraint { name, .. }
            | Declaration::Cost { name, .. }
            | Declaration::Output { name, .. } => *name,
        }
    }
}

/// A type whose constraints, costs and outputs are listed in a static table.
pub trait Model: Sized + 'static {
    const DECLARATIONS: &'static [Declaration<Self>];

    fn periods(&self) -> &Param<Vec<f64>>;

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>>;

    /// Hours between local midnight and the horizon start, for models that anchor to it.
    fn start_offset_mut(&mut self) -> Option<&mut Param<f64>> {
        None
    }

    /// Parameter writable from configuration under `name`.
    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam>;

    fn period_count(&self) -> usize {
        self.periods().peek().map_or(0, Vec::len)
    }
}

/// A model together with its computation cache.
#[derive(Debug)]
pub struct Reactive<S: Model> {
    model: S,
    cache: ComputationCache,
}

impl<S: Model> Reactive<S> {
    pub fn new(model: S) -> Self {
        Self {
            model,
            cache: ComputationCache::default(),
        }
    }

    pub fn model(&self) -> &S {
        &self.model
    }

    pub fn cache(&self) -> &ComputationCache {
        &self.cache
    }

    /// Writes a parameter and invalidates its readers when the value changed.
    pub fn set<T, F>(&mut self, select: F, value: T) -> bool
    where
        T: Clone + PartialEq,
        F: FnOnce(&mut S) -> &mut Param<T>,
    {
        let param = select(&mut self.model);
        let name = param.name();
        let changed = param.set(value);
        if changed {
            self.cache.invalidate(name);
        }
        changed
    }

    pub fn set_periods(&mut self, periods: &[f64]) -> bool {
        self.set(|model| model.periods_mut(), periods.to_vec())
    }

    pub fn set_start_offset(&mut self, hours: f64) -> bool {
        match self.model.start_offset_mut() {
            Some(param) => {
                let name = param.name();
                let changed = param.set(hours);
                if changed {
                    self.cache.invalidate(name);
                }
                changed
            }
            None => false,
        }
    }

    /// Writes a configuration value by parameter name. `Ok(None)` when no such parameter.
    pub fn set_json(&mut self, name: &str, value: &Value) -> Result<Option<bool>, ModelError> {
        let Some(param) = self.model.config_param(name) else {
            return Ok(None);
        };
        let key = param.name();
        let changed = param.set_json(value)?;
        if changed {
            debug!(param = key, "parameter changed");
            self.cache.invalidate(key);
        }
        Ok(Some(changed))
    }

    /// Returns the cached result of `name`, recomputing it only when stale.
    pub fn invoke(&mut self, name: &'static str) -> Result<Computed, ModelError> {
        let mut scope = Scope::new(&self.model, &mut self.cache);
        scope.evaluate(name)
    }

    pub fn is_stale(&self, name: &str) -> bool {
        self.cache.is_stale(name)
    }

    /// Invokes every declared constraint and brings its solver rows up to date.
    ///
    /// Fresh results register new rows; recomputed results are diffed into the rows they
    /// already own; a not-applicable result relaxes its rows instead of removing them.
    pub fn constraints(
        &mut self,
        owner: &str,
        solver: &mut Solver,
    ) -> Result<BTreeMap<&'static str, Vec<RowId>>, ModelError> {
        let mut registered = BTreeMap::new();
        for declaration in S::DECLARATIONS {
            let &Declaration::Constraint { name, .. } = declaration else {
                continue;
            };
            let specs = match self.invoke(name).map_err(|e| e.within(owner, name))? {
                Computed::Rows(specs) => specs.unwrap_or_default(),
                Computed::Expr(_) => {
                    return Err(ModelError::OutputType {
                        name,
                        expected: "constraint rows".to_string(),
                        actual: "cost expression".to_string(),
                    })
                }
            };

            let slot = self.cache.slot_mut(name);
            if !slot.synced {
                let label = format!("{owner}.{name}");
                for (index, spec) in specs.iter().enumerate() {
                    match slot.rows.get(index) {
                        Some(row) => {
                            solver.update_row(*row, spec);
                        }
                        None => slot.rows.push(solver.add_row(label.as_str(), spec)),
                    }
                }
                for row in slot.rows.iter().take(slot.active_rows).skip(specs.len()) {
                    solver.relax_row(*row);
                }
                slot.active_rows = specs.len();
                slot.synced = true;
            }

            if slot.active_rows > 0 {
                registered.insert(name, slot.rows[..slot.active_rows].to_vec());
            }
        }
        Ok(registered)
    }

    /// Sum of every applicable declared cost.
    pub fn cost(&mut self, owner: &str) -> Result<Option<LinExpr>, ModelError> {
        let mut total: Option<LinExpr> = None;
        for declaration in S::DECLARATIONS {
            let &Declaration::Cost { name, .. } = declaration else {
                continue;
            };
            if let Computed::Expr(Some(expr)) =
                self.invoke(name).map_err(|e| e.within(owner, name))?
            {
                total = Some(total.unwrap_or_default() + expr);
            }
        }
        Ok(total)
    }

    /// Fresh outputs plus shadow prices. Empty until the solver holds a solution.
    pub fn outputs(
        &self,
        owner: &str,
        solver: &Solver,
    ) -> Result<Vec<(&'static str, OutputData)>, ModelError> {
        let Some(solution) = solver.solution() else {
            return Ok(Vec::new());
        };
        let periods = self.model.period_count();
        let mut outputs = Vec::new();
        for declaration in S::DECLARATIONS {
            match *declaration {
                Declaration::Output { name, compute } => {
                    let data = compute(&self.model, solution).map_err(|e| e.within(owner, name))?;
                    outputs.push((name, data));
                }
                Declaration::Constraint {
                    name,
                    shadow_price: Some(meta),
                    ..
                } if solution.has_duals() => {
                    let rows = self.cache.active_rows(name);
                    let mut values: Vec<f64> = match meta.shape {
                        Shape::Boundary => std::iter::once(0.0)
                            .chain(rows.iter().map(|row| solution.row_dual(*row).unwrap_or(0.0)))
                            .collect(),
                        _ => rows
                            .iter()
                            .map(|row| solution.row_dual(*row).unwrap_or(0.0))
                            .collect(),
                    };
                    if rows.is_empty() {
                        values = vec![0.0; meta.shape.len(periods)];
                    }
                    let mut data =
                        OutputData::new(name, OutputType::ShadowPrice, meta.shape, values, periods)
                            .map_err(|e| e.within(owner, name))?
                            .with_unit(meta.unit);
                    if let Some(direction) = meta.direction {
                        data = data.with_direction(direction);
                    }
                    outputs.push((name, data));
                }
                _ => {}
            }
        }
        Ok(outputs)
    }
}
