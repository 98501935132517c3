//! Property tests for cache invalidation and schedule candidates.

use energy_optimizer::element::{Element, ModelElement};
use energy_optimizer::elements::{candidates, EnergyStorage, EnergyStorageConfig};
use energy_optimizer::horizon::{boundaries, Series};
use energy_optimizer::solver::Solver;
use proptest::prelude::*;
use serde_json::json;

const PERIODS: [f64; 3] = [1.0, 0.5, 2.0];

fn battery(solver: &mut Solver, capacity: Vec<f64>, initial: f64) -> ModelElement<EnergyStorage> {
    let config = EnergyStorageConfig {
        name: "battery".to_string(),
        capacity: Series::Values(capacity),
        initial_charge: initial,
    };
    ModelElement::new("battery", EnergyStorage::new(solver, &config, &PERIODS))
}

proptest! {
    /// After any parameter change the solver rows match a model built from scratch with
    /// the new values, and computations that never read the parameter stay cached.
    #[test]
    fn prop_incremental_rows_match_fresh_build(
        first in prop::collection::vec(0.0f64..50.0, 4),
        second in prop::collection::vec(0.0f64..50.0, 4),
        initial in 0.0f64..20.0,
    ) {
        let mut solver = Solver::default();
        let mut incremental = battery(&mut solver, first.clone(), initial);
        incremental.constraints(&mut solver).unwrap();

        let changed = incremental.apply("capacity", &json!(second)).unwrap();
        prop_assert_eq!(changed, first != second);
        prop_assert_eq!(
            incremental.reactive().is_stale("stored_energy_max"),
            changed
        );
        prop_assert!(!incremental.reactive().is_stale("stored_energy_min"));
        prop_assert!(!incremental.reactive().is_stale("initial_charge"));
        prop_assert!(!incremental.reactive().is_stale("power_balance"));
        let rows = incremental.constraints(&mut solver).unwrap();

        let mut fresh_solver = Solver::default();
        let mut fresh = battery(&mut fresh_solver, second, initial);
        let fresh_rows = fresh.constraints(&mut fresh_solver).unwrap();

        prop_assert_eq!(rows.len(), fresh_rows.len());
        for (name, ids) in &rows {
            let expected = &fresh_rows[name];
            prop_assert_eq!(ids.len(), expected.len());
            for (row, fresh_row) in ids.iter().zip(expected) {
                prop_assert_eq!(solver.row_bounds(*row), fresh_solver.row_bounds(*fresh_row));
            }
        }
    }

    #[test]
    fn prop_unchanged_value_keeps_cache(capacity in prop::collection::vec(0.0f64..50.0, 4)) {
        let mut solver = Solver::default();
        let mut element = battery(&mut solver, capacity.clone(), 0.0);
        element.constraints(&mut solver).unwrap();
        let before = solver.stats().clone();

        prop_assert!(!element.apply("capacity", &json!(capacity)).unwrap());
        element.constraints(&mut solver).unwrap();
        prop_assert_eq!(solver.stats(), &before);
    }

    /// Every candidate draws exactly `power × duration` and never before its start.
    #[test]
    fn prop_candidates_draw_full_energy(
        periods in prop::collection::vec(0.25f64..2.0, 1..8),
        power in 0.1f64..10.0,
        duration in 0.1f64..4.0,
        earliest in 0.0f64..3.0,
    ) {
        let edges = boundaries(&periods);
        for candidate in candidates(&periods, power, duration, earliest, None) {
            prop_assert!(candidate.start >= earliest - 1e-9);
            let total: f64 = candidate.energy.iter().sum();
            prop_assert!((total - power * duration).abs() < 1e-6);
            for (t, energy) in candidate.energy.iter().enumerate() {
                if edges[t + 1] <= candidate.start {
                    prop_assert_eq!(*energy, 0.0);
                }
            }
        }
    }
}
