//! nimbus.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::types::Scope;

pub const DEFAULT_ACCOUNT_ID: &str = "123456789012";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_LOG_FILTER: &str = "info,nimbus=debug";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmulatorConfig {
    #[serde(default)]
    pub emulator: EmulatorSection,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorSection {
    #[serde(default = "default_account_id")]
    pub account_id: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Seed mixed into every generated identifier.
    #[serde(default = "default_id_seed")]
    pub id_seed: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Used for instances whose launch specification names no zone.
    pub default_availability_zone: Option<String>,
    /// Instance type → hourly on-demand price, used when a launch
    /// specification carries no explicit price.
    #[serde(default)]
    pub on_demand_prices: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    #[serde(default)]
    pub json: bool,
}

fn default_account_id() -> String {
    DEFAULT_ACCOUNT_ID.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_id_seed() -> String {
    "nimbus".to_string()
}

impl Default for EmulatorSection {
    fn default() -> Self {
        Self {
            account_id: default_account_id(),
            region: default_region(),
            id_seed: default_id_seed(),
        }
    }
}

impl ComputeConfig {
    /// On-demand price for an instance type, if one is configured.
    pub fn on_demand_price(&self, instance_type: &str) -> Option<f64> {
        self.on_demand_prices.get(instance_type).copied()
    }

    /// Availability zone for instances in `region` that name none.
    pub fn availability_zone_for(&self, region: &str) -> String {
        self.default_availability_zone
            .clone()
            .unwrap_or_else(|| format!("{region}a"))
    }
}

impl EmulatorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EmulatorConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The account/region scope requests land in when none is given.
    pub fn default_scope(&self) -> Scope {
        Scope::new(&self.emulator.account_id, &self.emulator.region)
    }

    /// Log filter directive, falling back to the built-in default.
    pub fn log_filter(&self) -> &str {
        self.logging.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Scaffold a starter nimbus.toml with a small on-demand price table.
    pub fn scaffold() -> Self {
        let on_demand_prices = [
            ("t2.nano", 0.0058),
            ("t2.micro", 0.0116),
            ("t2.small", 0.023),
            ("t2.medium", 0.0464),
            ("t2.large", 0.0928),
        ]
        .into_iter()
        .map(|(ty, price)| (ty.to_string(), price))
        .collect();

        EmulatorConfig {
            emulator: EmulatorSection::default(),
            compute: ComputeConfig {
                default_availability_zone: Some(format!("{DEFAULT_REGION}a")),
                on_demand_prices,
            },
            logging: LoggingConfig {
                filter: Some(DEFAULT_LOG_FILTER.to_string()),
                json: false,
            },
        }
    }
}
