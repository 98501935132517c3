use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use energy_optimizer::config::{Config, Scenario};
use energy_optimizer::telemetry::init_tracing;
use energy_optimizer::Network;
use tracing::info;

fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let path: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.scenario.path.clone());

    let text = fs::read_to_string(&path)
        .with_context(|| format!("cannot read scenario {}", path.display()))?;
    let scenario = Scenario::from_json(&text)?;
    info!(
        scenario = %path.display(),
        periods = scenario.periods.len(),
        elements = scenario.elements.len(),
        "loaded scenario"
    );

    let mut network = Network::new(scenario.horizon()?, cfg.solver.clone());
    network.add_all(scenario.elements)?;
    let objective = network.optimize()?;

    let report = serde_json::json!({
        "objective": objective,
        "stats": network.stats(),
        "outputs": network.outputs()?,
    });
    let rendered = if cfg.output.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{rendered}");
    Ok(())
}
