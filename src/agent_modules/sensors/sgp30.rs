// Sensirion SGP30 gas sensor, word protocol over I2C.
// Every 16-bit word on the wire is followed by a CRC-8 byte.

use super::{AirQualitySample, AirQualitySensor, SensorError};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use tracing::{info, warn};

pub const SGP30_I2C_ADDRESS: u8 = 0x58;

const DEVICE: &str = "SGP30";

const CMD_INIT_AIR_QUALITY: [u8; 2] = [0x20, 0x03];
const CMD_MEASURE_AIR_QUALITY: [u8; 2] = [0x20, 0x08];
const CMD_GET_FEATURE_SET_VERSION: [u8; 2] = [0x20, 0x2F];
const CMD_GET_SERIAL_ID: [u8; 2] = [0x36, 0x82];

const CRC8_POLYNOMIAL: u8 = 0x31;
const CRC8_INIT: u8 = 0xFF;

/// CRC-8 as specified in the SGP30 datasheet (polynomial 0x31, init 0xFF).
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC8_INIT;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Splits a response into words, checking each word's CRC.
fn decode_words<const N: usize>(buf: &[u8]) -> Result<[u16; N], SensorError> {
    let mut words = [0u16; N];
    for (word, chunk) in words.iter_mut().zip(buf.chunks_exact(3)) {
        let expected = crc8(&chunk[..2]);
        if expected != chunk[2] {
            return Err(SensorError::Crc {
                device: DEVICE,
                expected,
                found: chunk[2],
            });
        }
        *word = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Ok(words)
}

pub struct Sgp30<I2C, D> {
    i2c: Option<I2C>,
    delay: D,
    address: u8,
}

impl<I2C, D> Sgp30<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c: Some(i2c),
            delay,
            address: SGP30_I2C_ADDRESS,
        }
    }

    fn bus(&mut self) -> Result<&mut I2C, SensorError> {
        self.i2c.as_mut().ok_or_else(|| SensorError::Bus {
            device: DEVICE,
            reason: "released".to_string(),
        })
    }

    fn command(&mut self, cmd: [u8; 2]) -> Result<(), SensorError> {
        let address = self.address;
        self.bus()?
            .write(address, &cmd)
            .map_err(SensorError::bus(DEVICE))
    }

    fn read_words<const N: usize>(
        &mut self,
        cmd: [u8; 2],
        wait_ms: u32,
    ) -> Result<[u16; N], SensorError> {
        self.command(cmd)?;
        self.delay.delay_ms(wait_ms);
        let address = self.address;
        // Three bytes per word; the largest response is the 3-word serial id.
        let mut buf = [0u8; 9];
        let len = N * 3;
        self.bus()?
            .read(address, &mut buf[..len])
            .map_err(SensorError::bus(DEVICE))?;
        decode_words::<N>(&buf[..len])
    }

    /// 48-bit chip serial number.
    pub fn serial_id(&mut self) -> Result<u64, SensorError> {
        let words: [u16; 3] = self.read_words(CMD_GET_SERIAL_ID, 1)?;
        Ok(words
            .iter()
            .fold(0u64, |acc, word| (acc << 16) | u64::from(*word)))
    }

    pub fn feature_set_version(&mut self) -> Result<u16, SensorError> {
        let [version]: [u16; 1] = self.read_words(CMD_GET_FEATURE_SET_VERSION, 10)?;
        Ok(version)
    }

    /// Hands the bus back, e.g. for tests.
    pub fn into_inner(self) -> Option<I2C> {
        self.i2c
    }
}

impl<I2C, D> AirQualitySensor for Sgp30<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    fn init(&mut self) -> Result<(), SensorError> {
        self.command(CMD_INIT_AIR_QUALITY)?;
        self.delay.delay_ms(10);

        // Identification is informational only.
        match self.serial_id() {
            Ok(serial) => info!(serial = %format!("{serial:#014x}"), "SGP30 serial."),
            Err(e) => warn!(error = %e, "Could not read SGP30 serial."),
        }
        match self.feature_set_version() {
            Ok(version) => info!(version = %format!("{version:#06x}"), "SGP30 feature set version."),
            Err(e) => warn!(error = %e, "Could not read SGP30 feature set version."),
        }

        // Let the on-chip baseline algorithm settle before the first measurement.
        self.delay.delay_ms(1_000);
        Ok(())
    }

    fn measure(&mut self) -> Result<AirQualitySample, SensorError> {
        let [co2_eq_ppm, tvoc_ppb]: [u16; 2] = self.read_words(CMD_MEASURE_AIR_QUALITY, 12)?;
        Ok(AirQualitySample {
            co2_eq_ppm,
            tvoc_ppb,
        })
    }

    fn release(&mut self) {
        // Dropping the handle closes the i2c-dev file descriptor.
        if self.i2c.take().is_some() {
            info!("SGP30 released.");
        }
    }
}
