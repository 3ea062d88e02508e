// Raspberry Pi Sense HAT: LSM9DS1 IMU, HTS221 humidity/temperature and
// LPS25H pressure sensors, all on one I2C bus.
// Register values follow the ST datasheets; init sequences match RTIMULib.

use super::{EnvironmentSample, EnvironmentSensor, SensorError};
use embedded_hal::i2c::I2c;
use tracing::{debug, info, warn};

/// LSM9DS1 accelerometer/gyro, depending on the SA0 strap.
pub const LSM9DS1_I2C_ADDRESSES: [u8; 2] = [0x6A, 0x6B];
pub const HTS221_I2C_ADDRESS: u8 = 0x5F;
pub const LPS25H_I2C_ADDRESS: u8 = 0x5C;

const LSM9DS1_ID: u8 = 0x68;
const HTS221_ID: u8 = 0xBC;
const LPS25H_ID: u8 = 0xBD;

const WHO_AM_I: u8 = 0x0F;
/// Sub-address MSB requests register auto-increment on ST parts.
const AUTO_INCREMENT: u8 = 0x80;

const HTS221_AV_CONF: u8 = 0x10;
const HTS221_CTRL_REG1: u8 = 0x20;
const HTS221_STATUS: u8 = 0x27;
const HTS221_HUMIDITY_OUT: u8 = 0x28;
const HTS221_TEMP_OUT: u8 = 0x2A;
const HTS221_CALIBRATION: u8 = 0x30;

const LPS25H_RES_CONF: u8 = 0x10;
const LPS25H_CTRL_REG1: u8 = 0x20;
const LPS25H_CTRL_REG2: u8 = 0x21;
const LPS25H_STATUS: u8 = 0x27;
const LPS25H_PRESS_OUT: u8 = 0x28;
const LPS25H_TEMP_OUT: u8 = 0x2B;
const LPS25H_FIFO_CTRL: u8 = 0x2E;

const STATUS_TEMPERATURE_READY: u8 = 0x01;
const STATUS_SECOND_CHANNEL_READY: u8 = 0x02; // humidity on HTS221, pressure on LPS25H

/// Linear calibration read from HTS221 OTP registers 0x30..=0x3F.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hts221Calibration {
    pub t0_deg_c: f64,
    pub t1_deg_c: f64,
    pub t0_out: f64,
    pub t1_out: f64,
    pub h0_rh: f64,
    pub h1_rh: f64,
    pub h0_t0_out: f64,
    pub h1_t0_out: f64,
}

impl Hts221Calibration {
    pub fn from_registers(regs: &[u8; 16]) -> Result<Self, SensorError> {
        let word = |offset: usize| f64::from(i16::from_le_bytes([regs[offset], regs[offset + 1]]));
        let msb = regs[5];
        let t0_x8 = (u16::from(msb & 0x03) << 8) | u16::from(regs[2]);
        let t1_x8 = (u16::from(msb & 0x0C) << 6) | u16::from(regs[3]);

        let calibration = Self {
            h0_rh: f64::from(regs[0]) / 2.0,
            h1_rh: f64::from(regs[1]) / 2.0,
            t0_deg_c: f64::from(t0_x8) / 8.0,
            t1_deg_c: f64::from(t1_x8) / 8.0,
            h0_t0_out: word(6),
            h1_t0_out: word(10),
            t0_out: word(12),
            t1_out: word(14),
        };
        if calibration.t1_out == calibration.t0_out || calibration.h1_t0_out == calibration.h0_t0_out {
            return Err(SensorError::Calibration { device: "HTS221" });
        }
        Ok(calibration)
    }

    pub fn temperature(&self, raw: i16) -> f64 {
        let slope = (self.t1_deg_c - self.t0_deg_c) / (self.t1_out - self.t0_out);
        slope * (f64::from(raw) - self.t0_out) + self.t0_deg_c
    }

    pub fn humidity(&self, raw: i16) -> f64 {
        let slope = (self.h1_rh - self.h0_rh) / (self.h1_t0_out - self.h0_t0_out);
        slope * (f64::from(raw) - self.h0_t0_out) + self.h0_rh
    }
}

/// LPS25H 24-bit two's complement pressure, in hPa (4096 LSB per hPa).
pub fn lps25h_pressure_hpa(bytes: [u8; 3]) -> f64 {
    let sign = if bytes[2] & 0x80 != 0 { 0xFF } else { 0x00 };
    let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], sign]);
    f64::from(raw) / 4096.0
}

pub fn lps25h_temperature(raw: i16) -> f64 {
    42.5 + f64::from(raw) / 480.0
}

pub struct SenseHat<I2C> {
    i2c: Option<I2C>,
    imu_address: Option<u8>,
    humidity: Option<Hts221Calibration>,
    pressure: bool,
}

impl<I2C: I2c> SenseHat<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c: Some(i2c),
            imu_address: None,
            humidity: None,
            pressure: false,
        }
    }

    /// Address the IMU answered on, once initialized.
    pub fn imu_address(&self) -> Option<u8> {
        self.imu_address
    }

    pub fn has_humidity_sensor(&self) -> bool {
        self.humidity.is_some()
    }

    pub fn has_pressure_sensor(&self) -> bool {
        self.pressure
    }

    pub fn into_inner(self) -> Option<I2C> {
        self.i2c
    }

    fn bus(&mut self) -> Result<&mut I2C, SensorError> {
        self.i2c.as_mut().ok_or_else(|| SensorError::Bus {
            device: "Sense HAT",
            reason: "released".to_string(),
        })
    }

    fn read_registers(
        &mut self,
        device: &'static str,
        address: u8,
        register: u8,
        buf: &mut [u8],
    ) -> Result<(), SensorError> {
        let register = if buf.len() > 1 {
            register | AUTO_INCREMENT
        } else {
            register
        };
        self.bus()?
            .write_read(address, &[register], buf)
            .map_err(SensorError::bus(device))
    }

    fn read_register(&mut self, device: &'static str, address: u8, register: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.read_registers(device, address, register, &mut buf)?;
        Ok(buf[0])
    }

    fn read_i16(&mut self, device: &'static str, address: u8, register: u8) -> Result<i16, SensorError> {
        let mut buf = [0u8; 2];
        self.read_registers(device, address, register, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    fn write_register(
        &mut self,
        device: &'static str,
        address: u8,
        register: u8,
        value: u8,
    ) -> Result<(), SensorError> {
        self.bus()?
            .write(address, &[register, value])
            .map_err(SensorError::bus(device))
    }

    /// `Some(id)` when something acknowledged at `address`.
    fn probe(&mut self, device: &'static str, address: u8) -> Option<u8> {
        match self.read_register(device, address, WHO_AM_I) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!(device, address, error = %e, "No answer to WHO_AM_I.");
                None
            }
        }
    }

    fn discover_imu(&mut self) -> Result<u8, SensorError> {
        let mut unrecognized = None;
        for address in LSM9DS1_I2C_ADDRESSES {
            match self.probe("LSM9DS1", address) {
                Some(LSM9DS1_ID) => return Ok(address),
                Some(id) => unrecognized = Some(SensorError::UnrecognizedImu { address, id }),
                None => {}
            }
        }
        Err(unrecognized.unwrap_or(SensorError::ImuNotFound))
    }

    fn init_hts221(&mut self) -> Result<Hts221Calibration, SensorError> {
        const DEVICE: &str = "HTS221";
        // Power on, block data update, 12.5 Hz.
        self.write_register(DEVICE, HTS221_I2C_ADDRESS, HTS221_CTRL_REG1, 0x87)?;
        self.write_register(DEVICE, HTS221_I2C_ADDRESS, HTS221_AV_CONF, 0x1B)?;

        let mut regs = [0u8; 16];
        self.read_registers(DEVICE, HTS221_I2C_ADDRESS, HTS221_CALIBRATION, &mut regs)?;
        Hts221Calibration::from_registers(&regs)
    }

    fn init_lps25h(&mut self) -> Result<(), SensorError> {
        const DEVICE: &str = "LPS25H";
        // Power on, 25 Hz, block data update; FIFO mean mode.
        self.write_register(DEVICE, LPS25H_I2C_ADDRESS, LPS25H_CTRL_REG1, 0xC4)?;
        self.write_register(DEVICE, LPS25H_I2C_ADDRESS, LPS25H_RES_CONF, 0x05)?;
        self.write_register(DEVICE, LPS25H_I2C_ADDRESS, LPS25H_FIFO_CTRL, 0xC0)?;
        self.write_register(DEVICE, LPS25H_I2C_ADDRESS, LPS25H_CTRL_REG2, 0x40)?;
        Ok(())
    }

    /// Temperature and humidity, each only when the status register flags new data.
    fn read_hts221(&mut self, calibration: Hts221Calibration) -> Result<(Option<f64>, Option<f64>), SensorError> {
        const DEVICE: &str = "HTS221";
        let status = self.read_register(DEVICE, HTS221_I2C_ADDRESS, HTS221_STATUS)?;

        let humidity = if status & STATUS_SECOND_CHANNEL_READY != 0 {
            let raw = self.read_i16(DEVICE, HTS221_I2C_ADDRESS, HTS221_HUMIDITY_OUT)?;
            Some(calibration.humidity(raw))
        } else {
            None
        };
        let temperature = if status & STATUS_TEMPERATURE_READY != 0 {
            let raw = self.read_i16(DEVICE, HTS221_I2C_ADDRESS, HTS221_TEMP_OUT)?;
            Some(calibration.temperature(raw))
        } else {
            None
        };
        Ok((temperature, humidity))
    }

    fn read_lps25h(&mut self) -> Result<(Option<f64>, Option<f64>), SensorError> {
        const DEVICE: &str = "LPS25H";
        let status = self.read_register(DEVICE, LPS25H_I2C_ADDRESS, LPS25H_STATUS)?;

        let pressure = if status & STATUS_SECOND_CHANNEL_READY != 0 {
            let mut bytes = [0u8; 3];
            self.read_registers(DEVICE, LPS25H_I2C_ADDRESS, LPS25H_PRESS_OUT, &mut bytes)?;
            Some(lps25h_pressure_hpa(bytes))
        } else {
            None
        };
        let temperature = if status & STATUS_TEMPERATURE_READY != 0 {
            let raw = self.read_i16(DEVICE, LPS25H_I2C_ADDRESS, LPS25H_TEMP_OUT)?;
            Some(lps25h_temperature(raw))
        } else {
            None
        };
        Ok((temperature, pressure))
    }
}

impl<I2C: I2c> EnvironmentSensor for SenseHat<I2C> {
    fn init(&mut self) -> Result<(), SensorError> {
        let imu_address = self.discover_imu()?;
        self.imu_address = Some(imu_address);
        info!(address = %format!("{imu_address:#04x}"), "LSM9DS1 IMU detected.");

        if self.probe("HTS221", HTS221_I2C_ADDRESS) == Some(HTS221_ID) {
            match self.init_hts221() {
                Ok(calibration) => {
                    self.humidity = Some(calibration);
                    info!("HTS221 humidity sensor initialized.");
                }
                Err(e @ SensorError::Calibration { .. }) => {
                    warn!(error = %e, "Humidity sensor unusable, humidity will not be read.");
                    self.humidity = None;
                }
                Err(e) => return Err(e),
            }
        } else {
            info!("No humidity sensor found, humidity will not be read.");
        }

        if self.probe("LPS25H", LPS25H_I2C_ADDRESS) == Some(LPS25H_ID) {
            self.init_lps25h()?;
            self.pressure = true;
            info!("LPS25H pressure sensor initialized.");
        } else {
            info!("No pressure sensor found, pressure will not be read.");
        }
        Ok(())
    }

    /// The output registers always hold the latest (FIFO-averaged) sample,
    /// so one read per sub-sensor drains the board.
    fn read(&mut self) -> Result<EnvironmentSample, SensorError> {
        let mut sample = EnvironmentSample::default();

        if self.pressure {
            let (temperature, pressure) = self.read_lps25h()?;
            sample.temperature = temperature;
            sample.pressure = pressure;
        }
        // The humidity sensor's temperature takes precedence over the pressure sensor's.
        if let Some(calibration) = self.humidity {
            let (temperature, humidity) = self.read_hts221(calibration)?;
            sample.temperature = temperature.or(sample.temperature);
            sample.humidity = humidity;
        }
        Ok(sample)
    }

    fn release(&mut self) {
        if self.i2c.take().is_some() {
            self.imu_address = None;
            info!("Sense HAT released.");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use embedded_hal::delay::DelayNs;
    use embedded_hal::i2c::{self, ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
    use std::collections::{HashMap, HashSet, VecDeque};

    #[derive(Debug)]
    pub struct FakeBusError;

    impl i2c::Error for FakeBusError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        }
    }

    /// Register-map I2C fake. Writes set a register pointer (and a value when
    /// a second byte follows); reads either pop a queued raw response or
    /// return consecutive registers from the pointer.
    #[derive(Debug, Default)]
    pub struct FakeBus {
        present: HashSet<u8>,
        registers: HashMap<(u8, u8), u8>,
        pointers: HashMap<u8, u8>,
        raw_reads: HashMap<u8, VecDeque<Vec<u8>>>,
        writes: Vec<(u8, Vec<u8>)>,
    }

    impl FakeBus {
        pub fn set_registers(&mut self, address: u8, start: u8, values: &[u8]) {
            self.present.insert(address);
            for (offset, value) in values.iter().enumerate() {
                self.registers.insert((address, start + offset as u8), *value);
            }
        }

        pub fn queue_read(&mut self, address: u8, bytes: Vec<u8>) {
            self.present.insert(address);
            self.raw_reads.entry(address).or_default().push_back(bytes);
        }

        pub fn register(&self, address: u8, register: u8) -> Option<u8> {
            self.registers.get(&(address, register)).copied()
        }

        pub fn writes(&self, address: u8) -> Vec<Vec<u8>> {
            self.writes
                .iter()
                .filter(|(a, _)| *a == address)
                .map(|(_, bytes)| bytes.clone())
                .collect()
        }
    }

    impl ErrorType for FakeBus {
        type Error = FakeBusError;
    }

    impl i2c::I2c for FakeBus {
        fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Self::Error> {
            if !self.present.contains(&address) {
                return Err(FakeBusError);
            }
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => {
                        self.writes.push((address, bytes.to_vec()));
                        if let Some((first, rest)) = bytes.split_first() {
                            let pointer = first & 0x7F;
                            self.pointers.insert(address, pointer);
                            if let Some(value) = rest.first() {
                                self.registers.insert((address, pointer), *value);
                            }
                        }
                    }
                    Operation::Read(buf) => {
                        if let Some(bytes) = self.raw_reads.get_mut(&address).and_then(|q| q.pop_front()) {
                            buf.copy_from_slice(&bytes[..buf.len()]);
                            continue;
                        }
                        let pointer = self.pointers.get(&address).copied().unwrap_or(0);
                        for (offset, byte) in buf.iter_mut().enumerate() {
                            let register = pointer.wrapping_add(offset as u8);
                            *byte = self.registers.get(&(address, register)).copied().unwrap_or(0);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    pub struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }
}
