use crate::agent_modules::clock::Clock;
use crate::agent_modules::config::{AgentConfig, Catalog};
use crate::agent_modules::sensors::{AirQualitySensor, EnvironmentSensor, SensorError, SensorReader};
use crate::db::models::Metric;
use crate::db::sqlite_service::{self, MetricStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("Store error: {0}")]
    Store(#[from] sqlite_service::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingSettings {
    pub interval: Duration,
    pub retained_rows: usize,
}

impl From<&AgentConfig> for SamplingSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            interval: config.sample_interval(),
            retained_rows: config.retained_metric_rows,
        }
    }
}

/// Upserts every sensor, then every entity. Safe to repeat.
pub fn seed_catalog(store: &MetricStore, catalog: &Catalog) -> Result<(), sqlite_service::Error> {
    for sensor in &catalog.sensors {
        store.upsert_sensor(&sensor.name, &sensor.address)?;
    }
    for entity in &catalog.entities {
        store.upsert_entity(&entity.key, &entity.external_id, &entity.sensor)?;
    }
    info!(
        sensors = catalog.sensors.len(),
        entities = catalog.entities.len(),
        "Catalog seeded."
    );
    Ok(())
}

pub struct Sampler<E, A, C> {
    reader: SensorReader<E, A>,
    clock: C,
    store: MetricStore,
    catalog: Catalog,
    settings: SamplingSettings,
}

impl<E, A, C> Sampler<E, A, C>
where
    E: EnvironmentSensor,
    A: AirQualitySensor,
    C: Clock,
{
    pub fn new(
        reader: SensorReader<E, A>,
        clock: C,
        store: MetricStore,
        catalog: Catalog,
        settings: SamplingSettings,
    ) -> Self {
        Self {
            reader,
            clock,
            store,
            catalog,
            settings,
        }
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    /// Primary sensor init, schema and catalog; any failure here is fatal.
    pub fn prepare(&mut self) -> Result<(), SamplerError> {
        self.reader.initialize().map_err(|e| {
            error!(error = %e, "Sensor initialization failed.");
            e
        })?;
        self.store.ensure_schema()?;
        seed_catalog(&self.store, &self.catalog)?;
        Ok(())
    }

    /// Reads both sensors, stamps the cycle once and writes one row per entity.
    /// Returns the number of rows written.
    pub fn run_cycle(&mut self) -> Result<usize, SamplerError> {
        self.reader.read_primary();
        let readings = *self.reader.read_air_quality();
        self.clock.update();
        let stamp = self.clock.current();

        let metrics: Vec<Metric> = self
            .catalog
            .entities
            .iter()
            .map(|entity| Metric {
                entity: entity.key.clone(),
                timestamp: stamp.timestamp,
                datetime: stamp.datetime.clone(),
                value: readings.value(entity.quantity),
                unit: entity.unit.clone(),
            })
            .collect();
        let written = self.store.write_cycle(&metrics)?;

        // Retention is advisory; the next cycle prunes again.
        if let Err(e) = self.store.prune_oldest(self.settings.retained_rows) {
            warn!(error = %e, "Failed to prune old metrics.");
        }
        Ok(written)
    }

    /// Samples until `shutdown` is observed at the top of an iteration, then
    /// releases the sensors. The flag is not checked during the sleep.
    /// Returns the number of completed cycles.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<u64, SamplerError> {
        let outcome = self.sample_until(&shutdown).await;
        if let Err(e) = &outcome {
            error!(error = %e, "Sampling stopped on a fatal error.");
        }
        info!("Releasing sensors.");
        self.reader.cleanup();
        outcome
    }

    async fn sample_until(&mut self, shutdown: &AtomicBool) -> Result<u64, SamplerError> {
        self.prepare()?;
        info!(
            interval_seconds = self.settings.interval.as_secs(),
            retained_rows = self.settings.retained_rows,
            "Sampling loop started."
        );

        let mut cycles = 0u64;
        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle()?;
            cycles += 1;
            debug!(cycle = cycles, "Cycle complete, sleeping.");
            tokio::time::sleep(self.settings.interval).await;
        }
        info!(cycles, "Shutdown requested.");
        Ok(cycles)
    }
}
