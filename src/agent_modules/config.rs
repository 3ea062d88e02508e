use crate::agent_modules::sensors::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;
use tracing::{error, info, warn};

pub const DEFAULT_DATABASE_PATH: &str = "/homeassistant/database.db";
pub const DEFAULT_I2C_BUS: &str = "/dev/i2c-1";
pub const DEFAULT_SAMPLE_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_RETAINED_METRIC_ROWS: usize = 180;

const ENV_PREFIX: &str = "ENVMON_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid catalog: {0}")]
    Catalog(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SensorSpec {
    pub name: String,
    /// Hex string as stored, e.g. "0x5f".
    pub address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    pub key: String,
    pub external_id: String,
    pub sensor: String,
    pub quantity: Quantity,
    pub unit: String,
}

/// Sensors and entities upserted at startup. Entities are written in
/// declaration order every cycle.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    pub sensors: Vec<SensorSpec>,
    pub entities: Vec<EntitySpec>,
}

impl Default for Catalog {
    fn default() -> Self {
        let sensor = |name: &str, address: &str| SensorSpec {
            name: name.to_string(),
            address: address.to_string(),
        };
        let entity = |key: &str, external_id: &str, sensor: &str, quantity: Quantity, unit: &str| EntitySpec {
            key: key.to_string(),
            external_id: external_id.to_string(),
            sensor: sensor.to_string(),
            quantity,
            unit: unit.to_string(),
        };

        Self {
            sensors: vec![
                sensor("HTS221", "0x5f"),
                sensor("LPS25H", "0x5c"),
                sensor("SGP30", "0x58"),
            ],
            entities: vec![
                entity("Temperature", "sensor.sensehat_temp", "HTS221", Quantity::Temperature, "°C"),
                entity("Humidity", "sensor.sensehat_hum", "HTS221", Quantity::Humidity, "%RH"),
                entity("Pressure", "sensor.sensehat_press", "LPS25H", Quantity::Pressure, "Pa"),
                entity("CO2eq", "sensor.sgp30_CO2eq", "SGP30", Quantity::Co2Eq, "ppm"),
                entity("TVOC", "sensor.sgp30_TVOC", "SGP30", Quantity::Tvoc, "ppb"),
            ],
        }
    }
}

impl Catalog {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut sensor_names = HashSet::new();
        for sensor in &self.sensors {
            if sensor.name.trim().is_empty() {
                return Err(ConfigError::Catalog("sensor with empty name".into()));
            }
            if !sensor_names.insert(sensor.name.as_str()) {
                return Err(ConfigError::Catalog(format!("duplicate sensor '{}'", sensor.name)));
            }
        }

        if self.entities.is_empty() {
            return Err(ConfigError::Catalog("no entities declared".into()));
        }
        let mut entity_keys = HashSet::new();
        for entity in &self.entities {
            if entity.key.trim().is_empty() {
                return Err(ConfigError::Catalog("entity with empty key".into()));
            }
            if !entity_keys.insert(entity.key.as_str()) {
                return Err(ConfigError::Catalog(format!("duplicate entity '{}'", entity.key)));
            }
            if !sensor_names.contains(entity.sensor.as_str()) {
                return Err(ConfigError::Catalog(format!(
                    "entity '{}' references unknown sensor '{}'",
                    entity.key, entity.sensor
                )));
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub database_path: String,
    pub i2c_bus: String,
    pub sample_interval_seconds: u64,
    pub retained_metric_rows: usize,
    pub catalog: Catalog,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialAgentConfig {
    database_path: Option<String>,
    i2c_bus: Option<String>,
    sample_interval_seconds: Option<u64>,
    retained_metric_rows: Option<usize>,
    catalog: Option<Catalog>,
}

impl AgentConfig {
    /// Defaults, then the TOML file at `config_path` if it exists, then
    /// `ENVMON_*` variables (a `.env` file is honored).
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::load_from(config_path, std::env::vars())
    }

    pub fn load_from<I>(config_path: Option<&str>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path) => read_file(path)?,
            None => PartialAgentConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialAgentConfig = envy::prefixed(ENV_PREFIX).from_iter(env)?;

        // 3. Merge: environment overrides file
        let config = AgentConfig {
            database_path: env_config
                .database_path
                .or(file_config.database_path)
                .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            i2c_bus: env_config
                .i2c_bus
                .or(file_config.i2c_bus)
                .unwrap_or_else(|| DEFAULT_I2C_BUS.to_string()),
            sample_interval_seconds: env_config
                .sample_interval_seconds
                .or(file_config.sample_interval_seconds)
                .unwrap_or(DEFAULT_SAMPLE_INTERVAL_SECONDS),
            retained_metric_rows: env_config
                .retained_metric_rows
                .or(file_config.retained_metric_rows)
                .unwrap_or(DEFAULT_RETAINED_METRIC_ROWS),
            catalog: env_config.catalog.or(file_config.catalog).unwrap_or_default(),
        };

        config.validate()?;
        info!(config = ?config, "Loaded config successfully.");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_seconds == 0 {
            return Err(ConfigError::Invalid("sample_interval_seconds must be > 0".into()));
        }
        if self.retained_metric_rows == 0 {
            return Err(ConfigError::Invalid("retained_metric_rows must be > 0".into()));
        }
        self.catalog.validate()
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds)
    }
}

fn read_file(path_str: &str) -> Result<PartialAgentConfig, ConfigError> {
    let path = Path::new(path_str);
    if !path.exists() {
        warn!(path = %path_str, "Config file not found, using defaults.");
        return Ok(PartialAgentConfig::default());
    }
    info!(path = %path_str, "Attempting to load config.");

    let contents = fs::read_to_string(path).map_err(|source| {
        error!(path = %path_str, error = %source, "Failed to read config file.");
        ConfigError::Read {
            path: path_str.to_string(),
            source,
        }
    })?;
    toml::from_str(&contents).map_err(|source| {
        error!(path = %path_str, error = %source, "Failed to parse config file.");
        ConfigError::Parse {
            path: path_str.to_string(),
            source,
        }
    })
}
