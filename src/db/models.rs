use serde::{Deserialize, Serialize};

/// A physical device on the I2C bus.
/// Corresponds to the `sensors` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub address: String,
}

/// A measurable quantity published by a sensor.
/// Corresponds to the `entities` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: String,
    pub external_id: String, // Home Assistant entity id, e.g. `sensor.sensehat_temp`
    pub sensor_name: String,
}

/// One observation of an entity.
/// Corresponds to the `metrics` table, keyed by (entity, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub entity: String,
    pub timestamp: i64,
    pub datetime: String,
    pub value: f64,
    pub unit: String,
}
