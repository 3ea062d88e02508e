use super::{Error, MetricStore, Result};
use crate::db::models::Metric;
use rusqlite::{ffi, params};
use tracing::{debug, error, info};

impl MetricStore {
    /// Strict insert. A second row for the same (entity, timestamp) is an
    /// error and leaves the stored row untouched.
    pub fn insert_metric(
        &self,
        entity: &str,
        timestamp: i64,
        datetime: &str,
        value: f64,
        unit: &str,
    ) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO metrics (entity, time_stamp, date_time, value, unit_of_measurement)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entity, timestamp, datetime, value, unit],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                error!(entity, timestamp, "Duplicate metric for this second.");
                Err(Error::DuplicateMetric {
                    entity: entity.to_string(),
                    timestamp,
                })
            }
            Err(e) => {
                error!(entity, timestamp, error = %e, "Failed to insert into 'metrics' table.");
                Err(e.into())
            }
        }
    }

    /// Writes every metric of one sampling cycle, stopping at the first failure.
    pub fn write_cycle(&self, metrics: &[Metric]) -> Result<usize> {
        for metric in metrics {
            self.insert_metric(
                &metric.entity,
                metric.timestamp,
                &metric.datetime,
                metric.value,
                &metric.unit,
            )?;
            debug!(entity = %metric.entity, value = metric.value, unit = %metric.unit, "Metric stored.");
        }
        if let Some(first) = metrics.first() {
            info!(rows = metrics.len(), timestamp = first.timestamp, "Wrote sampling cycle.");
        }
        Ok(metrics.len())
    }
}
