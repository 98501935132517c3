//! End-to-end network scenarios: build, solve, update, re-solve.

use chrono::DateTime;
use energy_optimizer::{
    ElementConfig, Error, Horizon, ModelError, Network, NetworkOutputs, OutputType, SolverOptions,
};
use rstest::rstest;
use serde_json::{json, Value};

const TOLERANCE: f64 = 1e-6;

fn horizon(periods: &[f64]) -> Horizon {
    let start = DateTime::parse_from_rfc3339("2025-01-06T00:00:00+00:00").unwrap();
    Horizon::new(periods.to_vec(), start).unwrap()
}

fn network(periods: &[f64]) -> Network {
    Network::new(horizon(periods), SolverOptions::default())
}

fn element(value: Value) -> ElementConfig {
    serde_json::from_value(value).unwrap()
}

fn series<'a>(outputs: &'a NetworkOutputs, element: &str, output: &str) -> &'a [f64] {
    &outputs[element][output].values
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < TOLERANCE, "{actual:?} vs {expected:?}");
    }
}

/// grid → house → load, with the load pinned to `demand` and imports priced.
fn import_network(periods: &[f64], demand: Value, price: Value) -> Network {
    let mut network = network(periods);
    network
        .add_all(vec![
            element(json!({ "element_type": "node", "name": "grid", "is_source": true })),
            element(json!({ "element_type": "node", "name": "house" })),
            element(json!({ "element_type": "node", "name": "load", "is_sink": true })),
            element(json!({
                "element_type": "power_connection", "name": "import",
                "source": "grid", "target": "house", "price_source_target": price,
            })),
            element(json!({
                "element_type": "power_connection", "name": "demand",
                "source": "house", "target": "load",
                "max_power_source_target": demand, "max_power_target_source": 0.0, "fixed": true,
            })),
        ])
        .unwrap();
    network
}

#[test]
fn test_junction_conserves_power() {
    let mut network = import_network(&[1.0, 1.0, 0.5], json!([2.0, 1.0, 3.0]), json!(0.2));
    let objective = network.optimize().unwrap();

    let outputs = network.outputs().unwrap();
    let imported = series(&outputs, "import", "power_source_target");
    let delivered = series(&outputs, "demand", "power_source_target");
    assert_close(imported, delivered);
    assert_close(delivered, &[2.0, 1.0, 3.0]);
    assert!((objective - 0.2 * (2.0 + 1.0 + 1.5)).abs() < TOLERANCE);
}

#[rstest]
#[case(1.0)]
#[case(0.9)]
#[case(0.5)]
fn test_efficiency_scales_source_draw(#[case] efficiency: f64) {
    let mut network = network(&[1.0, 1.0]);
    network
        .add_all(vec![
            element(json!({ "element_type": "node", "name": "grid", "is_source": true })),
            element(json!({ "element_type": "node", "name": "load", "is_sink": true })),
            element(json!({
                "element_type": "power_connection", "name": "feeder",
                "source": "grid", "target": "load",
                "efficiency_source_target": efficiency,
                "max_power_source_target": 2.0, "max_power_target_source": 0.0, "fixed": true,
                "price_source_target": 1.0,
            })),
        ])
        .unwrap();
    network.optimize().unwrap();

    let outputs = network.outputs().unwrap();
    assert_close(
        series(&outputs, "feeder", "power_source_target"),
        &[2.0 / efficiency, 2.0 / efficiency],
    );
}

fn partitions(upper: (f64, f64), lower: (f64, f64)) -> Network {
    let mut network = network(&[1.0]);
    network
        .add_all(vec![
            element(json!({
                "element_type": "energy_storage", "name": "upper",
                "capacity": upper.0, "initial_charge": upper.1,
            })),
            element(json!({
                "element_type": "energy_storage", "name": "lower",
                "capacity": lower.0, "initial_charge": lower.1,
            })),
            element(json!({
                "element_type": "connection", "name": "balance",
                "source": "upper", "target": "lower",
                "segments": [{ "segment_type": "battery_balance" }],
            })),
        ])
        .unwrap();
    network
}

#[test]
fn test_balance_fills_lower_partition() {
    let mut network = partitions((10.0, 8.0), (10.0, 7.0));
    network.optimize().unwrap();

    let outputs = network.outputs().unwrap();
    assert_close(series(&outputs, "balance", "balance_power_down"), &[3.0]);
    assert_close(series(&outputs, "balance", "balance_power_up"), &[0.0]);
    assert_close(series(&outputs, "balance", "balance_unmet_demand"), &[0.0]);
    assert_close(series(&outputs, "upper", "stored_energy"), &[8.0, 5.0]);
}

#[test]
fn test_balance_follows_capacity_update() {
    let mut network = partitions((10.0, 5.0), (10.0, 9.0));
    network.optimize().unwrap();
    let outputs = network.outputs().unwrap();
    assert_close(series(&outputs, "balance", "balance_power_down"), &[1.0]);

    let changed = network
        .update(&element(json!({
            "element_type": "energy_storage", "name": "lower",
            "capacity": 7.0, "initial_charge": 9.0,
        })))
        .unwrap();
    assert_eq!(changed, 1);
    network.optimize().unwrap();

    let outputs = network.outputs().unwrap();
    assert_close(series(&outputs, "balance", "balance_power_up"), &[2.0]);
    assert_close(series(&outputs, "balance", "balance_power_down"), &[0.0]);
    assert_close(series(&outputs, "lower", "stored_energy"), &[9.0, 7.0]);
}

#[test]
fn test_schedulable_load_picks_cheapest_start() {
    let mut network = network(&[1.0, 1.0, 1.0]);
    network
        .add_all(vec![
            element(json!({ "element_type": "node", "name": "grid", "is_source": true })),
            element(json!({
                "element_type": "schedulable_load", "name": "washer",
                "power": 1.0, "duration": 1.0, "integrality": "all",
            })),
            element(json!({
                "element_type": "power_connection", "name": "supply",
                "source": "grid", "target": "washer", "price_source_target": [3.0, 1.0, 2.0],
            })),
        ])
        .unwrap();
    let objective = network.optimize().unwrap();

    let outputs = network.outputs().unwrap();
    assert!((objective - 1.0).abs() < TOLERANCE);
    assert_close(series(&outputs, "washer", "start_time"), &[1.0]);
    assert_close(series(&outputs, "washer", "power"), &[0.0, 1.0, 0.0]);
}

fn storage_network(periods: &[f64]) -> Network {
    let mut network = network(periods);
    network
        .add_all(vec![
            element(json!({ "element_type": "node", "name": "grid", "is_source": true })),
            element(json!({ "element_type": "node", "name": "house" })),
            element(json!({ "element_type": "node", "name": "load", "is_sink": true })),
            element(json!({
                "element_type": "energy_storage", "name": "battery",
                "capacity": 10.0, "initial_charge": 2.0,
            })),
            element(json!({
                "element_type": "power_connection", "name": "import",
                "source": "grid", "target": "house",
                "max_power_source_target": 5.0, "price_source_target": [0.3, 0.1, 0.4],
            })),
            element(json!({
                "element_type": "power_connection", "name": "inverter",
                "source": "house", "target": "battery",
                "efficiency_source_target": 0.9, "efficiency_target_source": 0.9,
                "max_power_source_target": 4.0, "max_power_target_source": 4.0,
            })),
            element(json!({
                "element_type": "power_connection", "name": "demand",
                "source": "house", "target": "load",
                "max_power_source_target": [1.0, 2.0, 1.0], "max_power_target_source": 0.0,
                "fixed": true,
            })),
        ])
        .unwrap();
    network
}

#[test]
fn test_period_update_matches_fresh_build() {
    let mut updated = storage_network(&[1.0, 1.0, 1.0]);
    updated.optimize().unwrap();
    let columns = updated.solver().num_columns();

    updated.update_periods(vec![0.5, 1.0, 2.0]).unwrap();
    let warm = updated.optimize().unwrap();
    assert_eq!(updated.solver().num_columns(), columns);

    let mut fresh = storage_network(&[0.5, 1.0, 2.0]);
    let cold = fresh.optimize().unwrap();
    assert!((warm - cold).abs() < TOLERANCE, "warm {warm} vs cold {cold}");
}

#[test]
fn test_price_change_reuses_rows() {
    let mut network = storage_network(&[1.0, 1.0, 1.0]);
    let first = network.optimize().unwrap();
    let before = network.stats().clone();

    network
        .update_json("import", &json!({ "price_source_target": [0.1, 0.1, 0.1] }))
        .unwrap();
    let second = network.optimize().unwrap();
    let after = network.stats();

    assert!(second < first);
    assert_eq!(after.rows_added, before.rows_added);
    assert_eq!(after.columns_added, before.columns_added);
    assert_eq!(after.bound_changes, before.bound_changes);
    assert_eq!(after.solves, before.solves + 1);
}

#[test]
fn test_capacity_change_only_edits_bounds() {
    let mut network = storage_network(&[1.0, 1.0, 1.0]);
    network.optimize().unwrap();
    let before = network.stats().clone();

    network
        .update_json("battery", &json!({ "capacity": 8.0 }))
        .unwrap();
    network.optimize().unwrap();
    let after = network.stats();

    assert_eq!(after.rows_added, before.rows_added);
    assert_eq!(after.coefficient_changes, before.coefficient_changes);
    assert_eq!(after.bound_changes, before.bound_changes + 3);
}

#[test]
fn test_shadow_prices_after_solve() {
    let mut network = import_network(&[1.0, 1.0], json!(1.0), json!([0.2, 0.5]));
    assert!(network.outputs().unwrap().is_empty());

    network.optimize().unwrap();
    let outputs = network.outputs().unwrap();
    let balance = &outputs["house"]["node_balance"];
    assert_eq!(balance.output_type, OutputType::ShadowPrice);
    assert_eq!(balance.unit, "$/kWh");
    assert_eq!(balance.values.len(), 2);
    assert!(outputs["demand"].contains_key("max_power_source_target"));
}

#[test]
fn test_stored_energy_bounds_have_separate_prices() {
    let mut network = storage_network(&[1.0, 1.0, 1.0]);
    network.optimize().unwrap();

    let outputs = network.outputs().unwrap();
    let floor = &outputs["battery"]["stored_energy_min"];
    let ceiling = &outputs["battery"]["stored_energy_max"];
    assert_eq!(floor.output_type, OutputType::ShadowPrice);
    assert_eq!(floor.values.len(), 4);
    assert_eq!(ceiling.values.len(), 4);
    assert!(floor.values.iter().all(|price| *price >= -TOLERANCE));
    assert!(ceiling.values.iter().all(|price| *price <= TOLERANCE));
}

#[test]
fn test_shadow_prices_disabled() {
    let mut network = Network::new(
        horizon(&[1.0]),
        SolverOptions {
            compute_duals: false,
        },
    );
    network
        .add_all(vec![
            element(json!({ "element_type": "node", "name": "grid", "is_source": true })),
            element(json!({ "element_type": "node", "name": "load", "is_sink": true })),
            element(json!({
                "element_type": "power_connection", "name": "feeder",
                "source": "grid", "target": "load", "price_source_target": 0.1,
            })),
        ])
        .unwrap();
    network.optimize().unwrap();

    let outputs = network.outputs().unwrap();
    assert!(!outputs["load"].contains_key("node_balance"));
    assert!(outputs["feeder"].contains_key("power_source_target"));
}

#[test]
fn test_configuration_errors() {
    let mut network = network(&[1.0]);
    network
        .add(element(json!({ "element_type": "node", "name": "grid" })))
        .unwrap();

    assert!(matches!(
        network.add(element(json!({ "element_type": "node", "name": "grid" }))),
        Err(ModelError::DuplicateElement(_))
    ));
    assert!(matches!(
        network.add(element(json!({
            "element_type": "power_connection", "name": "line",
            "source": "grid", "target": "nowhere",
        }))),
        Err(ModelError::MissingEndpoint { .. })
    ));
    assert!(matches!(
        network.update_json("nowhere", &json!({ "is_sink": true })),
        Err(ModelError::UnknownElement(_))
    ));
    assert!(matches!(
        network.update(&element(json!({
            "element_type": "energy_storage", "name": "grid",
            "capacity": 1.0, "initial_charge": 0.0,
        }))),
        Err(ModelError::InvalidParameter { .. })
    ));
}

#[test]
fn test_rejected_connection_leaves_model_untouched() {
    let mut clean = import_network(&[1.0], json!(2.0), json!(1.0));
    let expected = clean.optimize().unwrap();

    let mut network = import_network(&[1.0], json!(2.0), json!(1.0));
    // The house stores nothing, so binding the state-of-charge stage fails.
    let rejected = network.add(element(json!({
        "element_type": "connection", "name": "bypass",
        "source": "grid", "target": "house",
        "segments": [{ "segment_type": "soc_pricing", "battery": "target" }],
    })));
    assert!(matches!(rejected, Err(ModelError::InvalidParameter { .. })));
    assert!(network.element("bypass").is_none());

    let objective = network.optimize().unwrap();
    assert!((objective - 2.0).abs() < TOLERANCE);
    assert!((objective - expected).abs() < TOLERANCE);
    assert_eq!(network.solver().num_columns(), clean.solver().num_columns());
    assert_eq!(network.solver().num_rows(), clean.solver().num_rows());
    assert_eq!(network.stats(), clean.stats());
}

#[test]
fn test_fixed_flow_both_ways_is_rejected() {
    let mut network = network(&[1.0]);
    network
        .add_all(vec![
            element(json!({ "element_type": "node", "name": "a" })),
            element(json!({ "element_type": "node", "name": "b" })),
        ])
        .unwrap();
    let columns = network.solver().num_columns();
    assert!(matches!(
        network.add(element(json!({
            "element_type": "power_connection", "name": "tie", "source": "a", "target": "b",
            "max_power_source_target": 1.0, "max_power_target_source": 1.0, "fixed": true,
        }))),
        Err(ModelError::InvalidParameter { .. })
    ));
    assert_eq!(network.solver().num_columns(), columns);
}

#[test]
fn test_negative_soc_penalty_is_a_parameter_error() {
    let mut network = storage_network(&[1.0, 1.0, 1.0]);
    network
        .add(element(json!({
            "element_type": "connection", "name": "soc",
            "source": "house", "target": "battery",
            "segments": [{ "segment_type": "soc_pricing", "overcharge_price": -1.0 }],
        })))
        .unwrap();

    assert!(matches!(
        network.optimize(),
        Err(Error::Model(ModelError::Computation { computation: "soc_penalty", .. }))
    ));
    network
        .update_json("soc", &json!({ "segments": [{ "overcharge_price": 1.0 }] }))
        .unwrap();
    network.optimize().unwrap();
}

#[test]
fn test_invalid_value_surfaces_on_optimize() {
    let mut network = storage_network(&[1.0, 1.0, 1.0]);
    network.optimize().unwrap();

    network
        .update_json("battery", &json!({ "initial_charge": -1.0 }))
        .unwrap();
    assert!(network.optimize().is_err());
}
