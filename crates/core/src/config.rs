//! Engine configuration
//!
//! Loaded once at startup and passed to [`Engine::new`](crate::engine::Engine::new).
//!
//! ```yaml
//! platform_fee: "2%"
//! storage_utilization: "0.68"
//! ```

use std::{fs, path::Path, str::FromStr};

use decimal_percentage::Percentage;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// Invalid percentage format
    #[error("Invalid percentage format: {0}")]
    InvalidPercentage(String),

    /// Invalid decimal format
    #[error("Invalid decimal format: {0}")]
    InvalidDecimal(String),
}

/// Engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Platform fee added on top of an order's produce and cooling-fee subtotal
    pub platform_fee: Percentage,

    /// Share of a volume-measured storage unit that crates can actually fill
    pub storage_utilization: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            platform_fee: Percentage::from(Decimal::new(2, 2)),
            storage_utilization: Decimal::new(68, 2),
        }
    }
}

/// Configuration as written in YAML; omitted keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    platform_fee: Option<String>,
    storage_utilization: Option<String>,
}

impl EngineConfig {
    /// Parse configuration from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a value cannot be parsed.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: EngineConfigFile = serde_norway::from_str(yaml)?;
        let mut config = Self::default();

        if let Some(platform_fee) = file.platform_fee {
            config.platform_fee = parse_percentage(&platform_fee)?;
        }

        if let Some(utilization) = file.storage_utilization {
            config.storage_utilization = Decimal::from_str(utilization.trim())
                .map_err(|_err| ConfigError::InvalidDecimal(utilization.clone()))?;
        }

        Ok(config)
    }

    /// Read configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;

        Self::from_yaml_str(&contents)
    }
}

/// Parse percentage string (e.g., "15%" or "0.15") into a `Percentage`
///
/// Values are read as exact decimals, so non-finite input such as `NaN` is rejected.
///
/// # Errors
///
/// Returns an error if the string cannot be parsed.
pub fn parse_percentage(s: &str) -> Result<Percentage, ConfigError> {
    let trimmed = s.trim();

    let (number, scale) = match trimmed.strip_suffix('%') {
        Some(percent_str) => (percent_str.trim(), Decimal::ONE_HUNDRED),
        None => (trimmed, Decimal::ONE),
    };

    let value = Decimal::from_str(number)
        .map_err(|_err| ConfigError::InvalidPercentage(s.to_string()))?;

    Ok(Percentage::from(value / scale))
}
