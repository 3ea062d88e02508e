pub mod sense_hat;
pub mod sgp30;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("No IMU found")]
    ImuNotFound,
    #[error("Unrecognized IMU at {address:#04x}: WHO_AM_I = {id:#04x}")]
    UnrecognizedImu { address: u8, id: u8 },
    #[error("Failed to open I2C bus {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("I2C error talking to {device}: {reason}")]
    Bus { device: &'static str, reason: String },
    #[error("{device} reports unusable calibration data")]
    Calibration { device: &'static str },
    #[error("CRC mismatch from {device}: expected {expected:#04x}, got {found:#04x}")]
    Crc {
        device: &'static str,
        expected: u8,
        found: u8,
    },
}

impl SensorError {
    pub(crate) fn bus<E: std::fmt::Debug>(device: &'static str) -> impl FnOnce(E) -> Self {
        move |e| SensorError::Bus {
            device,
            reason: format!("{e:?}"),
        }
    }
}

/// One drained sample from the primary board. A field is `None` when the
/// matching sub-sensor is absent or had nothing new.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnvironmentSample {
    pub temperature: Option<f64>, // °C
    pub humidity: Option<f64>,    // %RH
    pub pressure: Option<f64>,    // hPa
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AirQualitySample {
    pub co2_eq_ppm: u16,
    pub tvoc_ppb: u16,
}

/// Primary motion/environmental board.
pub trait EnvironmentSensor {
    /// Discovers and configures the board. Fails when the IMU is missing.
    fn init(&mut self) -> Result<(), SensorError>;
    /// Drains everything buffered since the previous call.
    fn read(&mut self) -> Result<EnvironmentSample, SensorError>;
    fn release(&mut self);
}

pub trait AirQualitySensor {
    fn init(&mut self) -> Result<(), SensorError>;
    fn measure(&mut self) -> Result<AirQualitySample, SensorError>;
    fn release(&mut self);
}

/// Which reading an entity publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    Humidity,
    Pressure,
    Co2Eq,
    Tvoc,
}

/// Latest values, as persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub co2_eq_ppm: u16,
    pub tvoc_ppb: u16,
}

impl Readings {
    pub fn value(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Temperature => self.temperature,
            Quantity::Humidity => self.humidity,
            Quantity::Pressure => self.pressure,
            Quantity::Co2Eq => f64::from(self.co2_eq_ppm),
            Quantity::Tvoc => f64::from(self.tvoc_ppb),
        }
    }
}

/// Rounds to two decimal places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Both sensor subsystems plus the values last read from them.
pub struct SensorReader<E, A> {
    environment: E,
    air_quality: A,
    latest: Readings,
}

impl<E, A> SensorReader<E, A>
where
    E: EnvironmentSensor,
    A: AirQualitySensor,
{
    pub fn new(environment: E, air_quality: A) -> Self {
        Self {
            environment,
            air_quality,
            latest: Readings::default(),
        }
    }

    /// Only the primary board is required. An air-quality init failure is
    /// logged and sampling goes on with its values at zero.
    pub fn initialize(&mut self) -> Result<(), SensorError> {
        self.environment.init()?;
        if let Err(e) = self.air_quality.init() {
            warn!(error = %e, "Air quality sensor init failed, CO2eq and TVOC stay at their last values.");
        }
        info!("Sensors initialized.");
        Ok(())
    }

    /// Updates temperature, humidity and pressure. Values missing from this
    /// cycle's sample keep whatever was read before.
    pub fn read_primary(&mut self) -> &Readings {
        match self.environment.read() {
            Ok(sample) => {
                if let Some(t) = sample.temperature {
                    self.latest.temperature = round2(t);
                }
                if let Some(h) = sample.humidity {
                    self.latest.humidity = round2(h);
                }
                if let Some(p) = sample.pressure {
                    self.latest.pressure = round2(p);
                }
                debug!(?sample, "Primary sensor drained.");
            }
            Err(e) => warn!(error = %e, "Primary sensor read failed, keeping previous values."),
        }
        &self.latest
    }

    /// CO2eq and TVOC are integral; they are stored as read.
    pub fn read_air_quality(&mut self) -> &Readings {
        match self.air_quality.measure() {
            Ok(sample) => {
                self.latest.co2_eq_ppm = sample.co2_eq_ppm;
                self.latest.tvoc_ppb = sample.tvoc_ppb;
                debug!(?sample, "Air quality measured.");
            }
            Err(e) => warn!(error = %e, "Air quality measurement failed, keeping previous values."),
        }
        &self.latest
    }

    pub fn latest(&self) -> &Readings {
        &self.latest
    }

    /// Releases both subsystems. Takes `self`, so it runs at most once.
    pub fn cleanup(mut self) {
        self.air_quality.release();
        self.environment.release();
        info!("Sensors released.");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Shared log so tests can inspect a sensor after the reader consumed it.
    #[derive(Debug, Default)]
    pub struct Calls {
        pub reads: usize,
        pub released: usize,
    }

    pub struct FakeEnvironment {
        pub present: bool,
        pub samples: VecDeque<Result<EnvironmentSample, SensorError>>,
        pub calls: Rc<RefCell<Calls>>,
    }

    impl FakeEnvironment {
        pub fn new(samples: Vec<EnvironmentSample>) -> Self {
            Self {
                present: true,
                samples: samples.into_iter().map(Ok).collect(),
                calls: Rc::default(),
            }
        }
    }

    impl EnvironmentSensor for FakeEnvironment {
        fn init(&mut self) -> Result<(), SensorError> {
            if self.present {
                Ok(())
            } else {
                Err(SensorError::ImuNotFound)
            }
        }

        fn read(&mut self) -> Result<EnvironmentSample, SensorError> {
            self.calls.borrow_mut().reads += 1;
            self.samples.pop_front().unwrap_or(Ok(EnvironmentSample::default()))
        }

        fn release(&mut self) {
            self.calls.borrow_mut().released += 1;
        }
    }

    pub struct FakeAirQuality {
        pub present: bool,
        pub samples: VecDeque<Result<AirQualitySample, SensorError>>,
        pub calls: Rc<RefCell<Calls>>,
    }

    impl FakeAirQuality {
        pub fn new(samples: Vec<AirQualitySample>) -> Self {
            Self {
                present: true,
                samples: samples.into_iter().map(Ok).collect(),
                calls: Rc::default(),
            }
        }
    }

    impl AirQualitySensor for FakeAirQuality {
        fn init(&mut self) -> Result<(), SensorError> {
            if self.present {
                Ok(())
            } else {
                Err(SensorError::Bus {
                    device: "SGP30",
                    reason: "no acknowledge".into(),
                })
            }
        }

        fn measure(&mut self) -> Result<AirQualitySample, SensorError> {
            self.calls.borrow_mut().reads += 1;
            self.samples.pop_front().unwrap_or(Ok(AirQualitySample::default()))
        }

        fn release(&mut self) {
            self.calls.borrow_mut().released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(23.456), 23.46);
        assert_eq!(round2(23.454), 23.45);
        assert_eq!(round2(-1.005_1), -1.01);
        assert_eq!(round2(1013.25), 1013.25);
    }

    #[test]
    fn test_read_primary_rounds_to_two_decimals() {
        let env = FakeEnvironment::new(vec![EnvironmentSample {
            temperature: Some(23.456),
            humidity: Some(41.234_9),
            pressure: Some(1013.254_9),
        }]);
        let mut reader = SensorReader::new(env, FakeAirQuality::new(vec![]));

        let readings = *reader.read_primary();
        assert_eq!(readings.temperature, 23.46);
        assert_eq!(readings.humidity, 41.23);
        assert_eq!(readings.pressure, 1013.25);
    }

    #[test]
    fn test_missing_values_keep_previous_reading() {
        let env = FakeEnvironment::new(vec![
            EnvironmentSample {
                temperature: Some(20.0),
                humidity: Some(50.0),
                pressure: Some(100_000.0),
            },
            EnvironmentSample {
                temperature: Some(21.0),
                humidity: None,
                pressure: None,
            },
        ]);
        let mut reader = SensorReader::new(env, FakeAirQuality::new(vec![]));
        reader.read_primary();
        let readings = *reader.read_primary();

        assert_eq!(readings.temperature, 21.0);
        assert_eq!(readings.humidity, 50.0);
        assert_eq!(readings.pressure, 100_000.0);
    }

    #[test]
    fn test_failed_reads_keep_previous_values() {
        let mut env = FakeEnvironment::new(vec![EnvironmentSample {
            temperature: Some(19.5),
            ..Default::default()
        }]);
        env.samples.push_back(Err(SensorError::Bus {
            device: "HTS221",
            reason: "nack".into(),
        }));
        let mut air = FakeAirQuality::new(vec![AirQualitySample {
            co2_eq_ppm: 412,
            tvoc_ppb: 7,
        }]);
        air.samples.push_back(Err(SensorError::Crc {
            device: "SGP30",
            expected: 0x92,
            found: 0x00,
        }));
        let mut reader = SensorReader::new(env, air);

        reader.read_primary();
        reader.read_air_quality();
        reader.read_primary();
        let readings = *reader.read_air_quality();

        assert_eq!(readings.temperature, 19.5);
        assert_eq!(readings.co2_eq_ppm, 412);
        assert_eq!(readings.tvoc_ppb, 7);
    }

    #[test]
    fn test_initialize_fails_without_imu() {
        let mut env = FakeEnvironment::new(vec![]);
        env.present = false;
        let mut reader = SensorReader::new(env, FakeAirQuality::new(vec![]));
        assert!(matches!(reader.initialize(), Err(SensorError::ImuNotFound)));
    }

    #[test]
    fn test_initialize_tolerates_missing_air_quality_sensor() {
        let env = FakeEnvironment::new(vec![EnvironmentSample {
            temperature: Some(22.0),
            ..Default::default()
        }]);
        let mut air = FakeAirQuality::new(vec![]);
        air.present = false;
        air.samples.push_back(Err(SensorError::Bus {
            device: "SGP30",
            reason: "no acknowledge".into(),
        }));
        let mut reader = SensorReader::new(env, air);

        reader.initialize().unwrap();
        reader.read_primary();
        let readings = *reader.read_air_quality();
        assert_eq!(readings.temperature, 22.0);
        assert_eq!(readings.co2_eq_ppm, 0);
        assert_eq!(readings.tvoc_ppb, 0);
    }

    #[test]
    fn test_cleanup_releases_both_subsystems() {
        let env = FakeEnvironment::new(vec![]);
        let air = FakeAirQuality::new(vec![]);
        let env_calls = env.calls.clone();
        let air_calls = air.calls.clone();

        SensorReader::new(env, air).cleanup();

        assert_eq!(env_calls.borrow().released, 1);
        assert_eq!(air_calls.borrow().released, 1);
    }

    #[test]
    fn test_readings_value_by_quantity() {
        let readings = Readings {
            temperature: 1.5,
            humidity: 2.5,
            pressure: 3.5,
            co2_eq_ppm: 400,
            tvoc_ppb: 12,
        };
        assert_eq!(readings.value(Quantity::Temperature), 1.5);
        assert_eq!(readings.value(Quantity::Humidity), 2.5);
        assert_eq!(readings.value(Quantity::Pressure), 3.5);
        assert_eq!(readings.value(Quantity::Co2Eq), 400.0);
        assert_eq!(readings.value(Quantity::Tvoc), 12.0);
    }
}
