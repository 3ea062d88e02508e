pub mod schema;
pub mod tasks;
pub mod writer;

use crate::db::models::{Entity, Metric, Sensor};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to create '{table}' table: {source}")]
    Schema {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Metric for entity '{entity}' at timestamp {timestamp} already exists")]
    DuplicateMetric { entity: String, timestamp: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Owns the single SQLite connection used by the sampling loop.
/// Every statement auto-commits; nothing here opens a transaction.
#[derive(Debug)]
pub struct MetricStore {
    conn: Connection,
}

impl MetricStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = ?path, "Opening SQLite metric store.");
        let conn = Connection::open(path).map_err(|e| {
            error!(path = ?path, error = %e, "Failed to open database.");
            e
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::PRAGMAS)?;
        Ok(Self { conn })
    }

    /// Creates `sensors`, `entities` and `metrics` if they are missing.
    pub fn ensure_schema(&self) -> Result<()> {
        info!("Ensuring SQLite schema...");
        for (table, ddl) in schema::TABLES {
            self.conn.execute_batch(ddl).map_err(|source| {
                error!(table, error = %source, "Failed to create table.");
                Error::Schema { table, source }
            })?;
        }
        info!("SQLite schema ready.");
        Ok(())
    }

    /// Insert-or-replace by `sensor_name`.
    ///
    /// Uses an upsert rather than `INSERT OR REPLACE` so that the parent row
    /// is never deleted while entities reference it.
    pub fn upsert_sensor(&self, name: &str, address: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sensors (sensor_name, i2c_address) VALUES (?1, ?2)
             ON CONFLICT(sensor_name) DO UPDATE SET i2c_address = excluded.i2c_address",
            params![name, address],
        )?;
        debug!(sensor = name, address, "Upserted sensor.");
        Ok(())
    }

    /// Insert-or-replace by `entity`.
    pub fn upsert_entity(&self, key: &str, external_id: &str, sensor_name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entities (entity, entity_id, sensor_name) VALUES (?1, ?2, ?3)
             ON CONFLICT(entity) DO UPDATE SET
                 entity_id = excluded.entity_id,
                 sensor_name = excluded.sensor_name",
            params![key, external_id, sensor_name],
        )?;
        debug!(entity = key, external_id, sensor = sensor_name, "Upserted entity.");
        Ok(())
    }

    pub fn sensor_count(&self) -> Result<u64> {
        self.count("sensors")
    }

    pub fn entity_count(&self) -> Result<u64> {
        self.count("entities")
    }

    pub fn metric_count(&self) -> Result<u64> {
        self.count("metrics")
    }

    fn count(&self, table: &str) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn find_sensor(&self, name: &str) -> Result<Option<Sensor>> {
        let sensor = self
            .conn
            .query_row(
                "SELECT sensor_name, i2c_address FROM sensors WHERE sensor_name = ?1",
                [name],
                |row| {
                    Ok(Sensor {
                        name: row.get(0)?,
                        address: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(sensor)
    }

    pub fn find_entity(&self, key: &str) -> Result<Option<Entity>> {
        let entity = self
            .conn
            .query_row(
                "SELECT entity, entity_id, sensor_name FROM entities WHERE entity = ?1",
                [key],
                |row| {
                    Ok(Entity {
                        key: row.get(0)?,
                        external_id: row.get(1)?,
                        sensor_name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entity)
    }

    /// The `limit` most recently inserted metrics, newest first.
    pub fn recent_metrics(&self, limit: usize) -> Result<Vec<Metric>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity, time_stamp, date_time, value, unit_of_measurement
             FROM metrics ORDER BY ROWID DESC LIMIT ?1",
        )?;
        let metrics = stmt
            .query_map([limit as i64], |row| {
                Ok(Metric {
                    entity: row.get(0)?,
                    timestamp: row.get(1)?,
                    datetime: row.get(2)?,
                    value: row.get(3)?,
                    unit: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(metrics)
    }
}
