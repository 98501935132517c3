use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::elements::ElementConfig;
use crate::horizon::Horizon;
use crate::solver::SolverOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub solver: SolverOptions,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub path: PathBuf,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scenarios/home_battery.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub pretty: bool,
}

impl Config {
    /// Defaults, then `config/default.toml`, then `ENOPT__*` environment variables.
    pub fn load() -> Result<Self> {
        Self::figment(Toml::file("config/default.toml"))
            .extract()
            .context("failed to load configuration")
    }

    fn figment(file: Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(file)
            .merge(Env::prefixed("ENOPT__").split("__"))
    }
}

/// A horizon plus the elements living on it, as read from a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub periods: Vec<f64>,
    pub start: DateTime<FixedOffset>,
    pub elements: Vec<ElementConfig>,
}

impl Scenario {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid scenario")
    }

    pub fn horizon(&self) -> Result<Horizon> {
        Ok(Horizon::new(self.periods.clone(), self.start)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ENOPT__OUTPUT__PRETTY", "true");
            let config: Config = Config::figment(Toml::file("missing.toml")).extract()?;
            assert!(config.solver.compute_duals);
            assert!(config.output.pretty);
            assert_eq!(config.scenario.path, PathBuf::from("scenarios/home_battery.json"));
            Ok(())
        });
    }

    #[test]
    fn test_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "enopt.toml",
                "[solver]\ncompute_duals = false\n\n[scenario]\npath = \"other.json\"\n",
            )?;
            let config: Config = Config::figment(Toml::file("enopt.toml")).extract()?;
            assert!(!config.solver.compute_duals);
            assert_eq!(config.scenario.path, PathBuf::from("other.json"));
            Ok(())
        });
    }

    #[test]
    fn test_scenario_parses() {
        let scenario = Scenario::from_json(
            r#"{
                "periods": [1.0, 1.0],
                "start": "2025-01-01T00:00:00+00:00",
                "elements": [{ "element_type": "node", "name": "grid", "is_source": true }]
            }"#,
        )
        .unwrap();
        assert_eq!(scenario.horizon().unwrap().len(), 2);
        assert_eq!(scenario.elements[0].name(), "grid");
    }
}
