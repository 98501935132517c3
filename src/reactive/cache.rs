use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::trace;

use super::{Computed, Declaration, Model, Tracker};
use crate::error::ModelError;
use crate::solver::{LinExpr, RowId, RowSpec};

/// Memo state of one declared computation.
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) value: Option<Computed>,
    pub(crate) dependencies: BTreeSet<&'static str>,
    pub(crate) stale: bool,
    pub(crate) evaluations: u64,
    /// Every row this constraint ever registered, in result order.
    pub(crate) rows: Vec<RowId>,
    /// Prefix of `rows` that currently carries the constraint; the rest are relaxed.
    pub(crate) active_rows: usize,
    /// Whether the solver reflects `value`.
    pub(crate) synced: bool,
}

/// Cached results and recorded dependencies for one model.
#[derive(Debug, Default)]
pub struct ComputationCache {
    slots: HashMap<&'static str, Slot>,
    in_progress: Vec<&'static str>,
}

impl ComputationCache {
    /// A computation is stale until it has been evaluated, and again after invalidation.
    pub fn is_stale(&self, name: &str) -> bool {
        self.slots
            .get(name)
            .map_or(true, |slot| slot.stale || slot.value.is_none())
    }

    pub fn evaluations(&self, name: &str) -> u64 {
        self.slots.get(name).map_or(0, |slot| slot.evaluations)
    }

    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<&'static str>> {
        self.slots.get(name).map(|slot| &slot.dependencies)
    }

    /// Rows currently carrying the constraint `name`.
    pub fn active_rows(&self, name: &str) -> &[RowId] {
        match self.slots.get(name) {
            Some(slot) => &slot.rows[..slot.active_rows],
            None => &[],
        }
    }

    pub(crate) fn slot_mut(&mut self, name: &'static str) -> &mut Slot {
        self.slots.entry(name).or_default()
    }

    /// Marks stale every computation that read `key`, then every computation that read
    /// one of those, until no new computation turns stale. Returns the affected names.
    pub fn invalidate(&mut self, key: &'static str) -> Vec<&'static str> {
        let mut invalidated = Vec::new();
        let mut queue = VecDeque::from([key]);
        while let Some(changed) = queue.pop_front() {
            for (name, slot) in self.slots.iter_mut() {
                if !slot.stale && slot.dependencies.contains(changed) {
                    slot.stale = true;
                    invalidated.push(*name);
                    queue.push_back(*name);
                }
            }
        }
        if !invalidated.is_empty() {
            trace!(key, ?invalidated, "invalidated computations");
        }
        invalidated
    }
}

/// Dependency-recording scope handed to every computation function.
///
/// Each evaluation pushes a fresh frame; every tracked read lands in the innermost frame,
/// and the frame becomes the computation's dependency set once the function returns.
pub struct Scope<'a, S> {
    model: &'a S,
    cache: &'a mut ComputationCache,
    frames: Vec<BTreeSet<&'static str>>,
}

impl<S: Model> Tracker for Scope<'_, S> {
    fn track(&mut self, key: &'static str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(key);
        }
    }
}

impl<'a, S: Model> Scope<'a, S> {
    pub(crate) fn new(model: &'a S, cache: &'a mut ComputationCache) -> Self {
        Self {
            model,
            cache,
            frames: Vec::new(),
        }
    }

    /// Reads another constraint of the same model, recording it as a dependency.
    pub fn constraint(&mut self, name: &'static str) -> Result<Option<Vec<RowSpec>>, ModelError> {
        match self.evaluate(name)? {
            Computed::Rows(rows) => Ok(rows),
            Computed::Expr(_) => Err(ModelError::OutputType {
                name,
                expected: "constraint rows".to_string(),
                actual: "cost expression".to_string(),
            }),
        }
    }

    /// Reads another cost of the same model, recording it as a dependency.
    pub fn cost(&mut self, name: &'static str) -> Result<Option<LinExpr>, ModelError> {
        match self.evaluate(name)? {
            Computed::Expr(expr) => Ok(expr),
            Computed::Rows(_) => Err(ModelError::OutputType {
                name,
                expected: "cost expression".to_string(),
                actual: "constraint rows".to_string(),
            }),
        }
    }

    pub(crate) fn evaluate(&mut self, name: &'static str) -> Result<Computed, ModelError> {
        self.track(name);

        if let Some(slot) = self.cache.slots.get(name) {
            if let (false, Some(value)) = (slot.stale, &slot.value) {
                trace!(name, "cache hit");
                return Ok(value.clone());
            }
        }
        if self.cache.in_progress.contains(&name) {
            return Err(ModelError::CyclicComputation(name));
        }

        let declaration = S::DECLARATIONS
            .iter()
            .find(|declaration| declaration.name() == name)
            .ok_or_else(|| ModelError::UnknownComputation {
                name: name.to_string(),
            })?;

        self.cache.in_progress.push(name);
        self.frames.push(BTreeSet::new());
        let model = self.model;
        let result = match declaration {
            Declaration::Constraint { compute, .. } => compute(model, self).map(Computed::Rows),
            Declaration::Cost { compute, .. } => compute(model, self).map(Computed::Expr),
            Declaration::Output { .. } => Err(ModelError::UnknownComputation {
                name: name.to_string(),
            }),
        };
        let dependencies = self.frames.pop().unwrap_or_default();
        self.cache.in_progress.pop();

        let value = result?;
        trace!(name, ?dependencies, "evaluated");
        let slot = self.cache.slot_mut(name);
        slot.value = Some(value.clone());
        slot.dependencies = dependencies;
        slot.stale = false;
        slot.synced = false;
        slot.evaluations += 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const COMPUTATIONS: [&str; 6] = ["c0", "c1", "c2", "c3", "c4", "c5"];
    const PARAMS: [&str; 3] = ["p0", "p1", "p2"];

    /// Computation `i` may read any parameter and any computation declared before it.
    fn graph() -> impl Strategy<Value = Vec<(Vec<bool>, Vec<bool>)>> {
        (0..COMPUTATIONS.len())
            .map(|i| {
                (
                    prop::collection::vec(any::<bool>(), PARAMS.len()),
                    prop::collection::vec(any::<bool>(), i),
                )
            })
            .collect::<Vec<_>>()
    }

    fn cache_for(graph: &[(Vec<bool>, Vec<bool>)]) -> ComputationCache {
        let mut cache = ComputationCache::default();
        for (i, (params, computations)) in graph.iter().enumerate() {
            let slot = cache.slot_mut(COMPUTATIONS[i]);
            slot.value = Some(Computed::Rows(None));
            slot.dependencies = PARAMS
                .iter()
                .zip(params)
                .chain(COMPUTATIONS.iter().zip(computations))
                .filter(|(_, read)| **read)
                .map(|(name, _)| *name)
                .collect();
        }
        cache
    }

    fn expected_stale(graph: &[(Vec<bool>, Vec<bool>)], param: usize) -> BTreeSet<&'static str> {
        let mut stale = BTreeSet::new();
        for (i, (params, computations)) in graph.iter().enumerate() {
            let reads_stale = computations
                .iter()
                .enumerate()
                .any(|(j, read)| *read && stale.contains(COMPUTATIONS[j]));
            if params[param] || reads_stale {
                stale.insert(COMPUTATIONS[i]);
            }
        }
        stale
    }

    proptest! {
        #[test]
        fn prop_invalidation_reaches_every_reader(graph in graph(), param in 0..PARAMS.len()) {
            let mut cache = cache_for(&graph);
            let invalidated: BTreeSet<_> = cache.invalidate(PARAMS[param]).into_iter().collect();
            let expected = expected_stale(&graph, param);

            prop_assert_eq!(&invalidated, &expected);
            for name in COMPUTATIONS {
                prop_assert_eq!(cache.is_stale(name), expected.contains(name));
            }
        }
    }

    #[test]
    fn test_unknown_key_invalidates_nothing() {
        let mut cache = cache_for(&[(vec![true, false, false], vec![])]);
        assert!(cache.invalidate("elsewhere").is_empty());
        assert!(!cache.is_stale("c0"));
        assert!(cache.is_stale("never_evaluated"));
    }
}
