use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::info;

use super::{SensorError, bus_fault};

const SENSOR: &str = "ENS160";

pub const ENS160_DEFAULT_ADDRESS: u8 = 0x53;

const REG_PART_ID: u8 = 0x00;
const REG_OPMODE: u8 = 0x10;
const REG_TEMP_IN: u8 = 0x13;
const REG_DATA_STATUS: u8 = 0x20;

pub const ENS160_PART_ID: u16 = 0x0160;

const OPMODE_STANDARD: u8 = 0x02;
const OPMODE_RESET: u8 = 0xF0;
const RESET_WAIT_MS: u32 = 100;

/// Time the compensation inputs need to reach the data registers.
pub const COMPENSATION_SETTLE_MS: u32 = 50;

/// DEVICE_STATUS bit set when a new measurement is available.
pub const STATUS_NEW_DATA: u8 = 0x02;

const DATA_LEN: usize = 6;

/// Build the TEMP_IN/RH_IN write: opcode, Kelvin * 64 (LE), %RH * 512 (LE).
///
/// The Kelvin value is truncated to a whole degree before scaling.
pub fn encode_compensation(temperature_c: f32, humidity_pct: f32) -> [u8; 5] {
    let kelvin = (temperature_c + 273.15) as u16;
    let temperature_code = kelvin.wrapping_mul(64).to_le_bytes();
    let humidity_code = ((humidity_pct * 512.0) as u16).to_le_bytes();

    [
        REG_TEMP_IN,
        temperature_code[0],
        temperature_code[1],
        humidity_code[0],
        humidity_code[1],
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ens160Reading {
    pub status: u8,
    /// UBA air quality index, 1 (excellent) to 5 (unhealthy).
    pub aqi: u8,
    pub tvoc_ppb: u16,
    pub eco2_ppm: u16,
}

impl Ens160Reading {
    pub fn from_bytes(data: &[u8; DATA_LEN]) -> Self {
        Self {
            status: data[0],
            aqi: data[1] & 0x07,
            tvoc_ppb: u16::from_le_bytes([data[2], data[3]]),
            eco2_ppm: u16::from_le_bytes([data[4], data[5]]),
        }
    }

    /// `false` means the data registers still hold a previous measurement.
    pub const fn is_fresh(&self) -> bool {
        self.status & STATUS_NEW_DATA != 0
    }
}

/// ENS160 digital metal-oxide gas sensor.
pub struct Ens160 {
    address: u8,
}

impl Ens160 {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    async fn set_opmode<I: I2c>(&mut self, bus: &mut I, mode: u8) -> Result<(), SensorError> {
        bus.write(self.address, &[REG_OPMODE, mode])
            .await
            .map_err(bus_fault(SENSOR, "opmode write"))
    }

    /// Verify the part ID and enter standard gas sensing mode.
    pub async fn init<I: I2c>(&mut self, bus: &mut I) -> Result<(), SensorError> {
        let mut id = [0u8; 2];
        bus.write_read(self.address, &[REG_PART_ID], &mut id)
            .await
            .map_err(bus_fault(SENSOR, "part id read"))?;

        let part_id = u16::from_le_bytes(id);
        if part_id != ENS160_PART_ID {
            log::error!("ENS160: unexpected part id {:#06x}", part_id);
            return Err(SensorError::DeviceMismatch {
                sensor: SENSOR,
                found: part_id,
            });
        }

        self.set_opmode(bus, OPMODE_STANDARD).await?;
        info!("ENS160: standard gas sensing mode");
        Ok(())
    }

    /// Cycle the sensor through its reset state back into gas sensing.
    pub async fn reset<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut I,
        delay: &mut D,
    ) -> Result<(), SensorError> {
        self.set_opmode(bus, OPMODE_RESET).await?;
        delay.delay_ms(RESET_WAIT_MS).await;
        self.set_opmode(bus, OPMODE_STANDARD).await?;
        delay.delay_ms(RESET_WAIT_MS).await;
        Ok(())
    }

    /// Feed ambient conditions to the on-chip compensation and wait for them
    /// to take effect. Must precede every [`read`](Self::read).
    pub async fn compensate<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut I,
        delay: &mut D,
        temperature_c: f32,
        humidity_pct: f32,
    ) -> Result<(), SensorError> {
        bus.write(
            self.address,
            &encode_compensation(temperature_c, humidity_pct),
        )
        .await
        .map_err(bus_fault(SENSOR, "compensation write"))?;
        delay.delay_ms(COMPENSATION_SETTLE_MS).await;
        Ok(())
    }

    pub async fn read<I: I2c>(&mut self, bus: &mut I) -> Result<Ens160Reading, SensorError> {
        let mut data = [0u8; DATA_LEN];
        bus.write_read(self.address, &[REG_DATA_STATUS], &mut data)
            .await
            .map_err(bus_fault(SENSOR, "data read"))?;

        Ok(Ens160Reading::from_bytes(&data))
    }
}
