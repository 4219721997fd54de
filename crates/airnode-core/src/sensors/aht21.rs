use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{SensorError, bus_fault};

const SENSOR: &str = "AHT21";

pub const AHT21_DEFAULT_ADDRESS: u8 = 0x38;

const CMD_STATUS: u8 = 0x71;
const CMD_INIT: [u8; 3] = [0xBE, 0x08, 0x00];
const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];
const CMD_SOFT_RESET: u8 = 0xBA;

/// Both calibration-enable bits must be set in the status byte.
const STATUS_CALIBRATED: u8 = 0x18;

const SETTLE_MS: u32 = 20;
/// Conversion time mandated by the datasheet.
const CONVERSION_MS: u32 = 100;

pub const AHT21_FRAME_LEN: usize = 7;

const CRC_POLYNOMIAL: u8 = 0x31;
const CRC_INIT: u8 = 0xFF;

/// 2^20, full scale of both 20-bit channels.
const FULL_SCALE: f32 = 1_048_576.0;

/// CRC-8 as used by the AHT2x family: polynomial 0x31, init 0xFF, MSB first,
/// no final XOR.
pub fn aht21_crc8(data: &[u8]) -> u8 {
    data.iter().fold(CRC_INIT, |crc, &byte| {
        (0..8).fold(crc ^ byte, |crc, _| {
            if crc & 0x80 != 0 {
                (crc << 1) ^ CRC_POLYNOMIAL
            } else {
                crc << 1
            }
        })
    })
}

/// Field calibration applied on top of the datasheet conversion.
///
/// These are per-installation corrections (self-heating of the enclosure,
/// sensor drift), not protocol constants.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Aht21Adjustment {
    pub temperature_offset_c: f32,
    pub humidity_gain: f32,
}

impl Default for Aht21Adjustment {
    fn default() -> Self {
        Self {
            temperature_offset_c: -4.0,
            humidity_gain: 0.85,
        }
    }
}

/// One decoded AHT21 measurement.
///
/// A reading with `crc_ok == false` was decoded from a corrupted frame and
/// must be treated as absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aht21Reading {
    pub status: u8,
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub crc_ok: bool,
}

impl Aht21Reading {
    /// Decode a raw 7-byte measurement frame.
    pub fn decode(frame: &[u8; AHT21_FRAME_LEN], adjustment: &Aht21Adjustment) -> Self {
        let crc_ok = aht21_crc8(&frame[..6]) == frame[6];

        let raw_humidity =
            ((u32::from(frame[1]) << 16) | (u32::from(frame[2]) << 8) | u32::from(frame[3])) >> 4;
        let raw_temperature = (u32::from(frame[3] & 0x0F) << 16)
            | (u32::from(frame[4]) << 8)
            | u32::from(frame[5]);

        let humidity_pct = raw_humidity as f32 * 100.0 / FULL_SCALE * adjustment.humidity_gain;
        let temperature_c =
            raw_temperature as f32 * 200.0 / FULL_SCALE - 50.0 + adjustment.temperature_offset_c;

        Self {
            status: frame[0],
            temperature_c,
            humidity_pct,
            crc_ok,
        }
    }
}

/// AHT21 temperature/humidity sensor.
pub struct Aht21 {
    address: u8,
    adjustment: Aht21Adjustment,
}

impl Aht21 {
    pub fn new(address: u8, adjustment: Aht21Adjustment) -> Self {
        Self {
            address,
            adjustment,
        }
    }

    pub async fn reset<I: I2c>(&mut self, bus: &mut I) -> Result<(), SensorError> {
        bus.write(self.address, &[CMD_SOFT_RESET])
            .await
            .map_err(bus_fault(SENSOR, "soft reset"))
    }

    /// Enable calibration, issuing the explicit init command only if the
    /// status byte does not already report a calibrated sensor.
    pub async fn init<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut I,
        delay: &mut D,
    ) -> Result<(), SensorError> {
        bus.write(self.address, &[CMD_STATUS])
            .await
            .map_err(bus_fault(SENSOR, "status request"))?;
        delay.delay_ms(SETTLE_MS).await;

        let mut status = [0u8; 1];
        bus.read(self.address, &mut status)
            .await
            .map_err(bus_fault(SENSOR, "status read"))?;

        if status[0] & STATUS_CALIBRATED == STATUS_CALIBRATED {
            info!("AHT21: already calibrated (status {:#04x})", status[0]);
            return Ok(());
        }

        debug!("AHT21: status {:#04x}, sending init", status[0]);
        bus.write(self.address, &CMD_INIT)
            .await
            .map_err(bus_fault(SENSOR, "init"))?;
        delay.delay_ms(SETTLE_MS).await;

        info!("AHT21: calibration enabled");
        Ok(())
    }

    /// Trigger a measurement and read it back.
    ///
    /// The returned reading may carry `crc_ok == false`; only bus failures are
    /// reported as errors.
    pub async fn read<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut I,
        delay: &mut D,
    ) -> Result<Aht21Reading, SensorError> {
        bus.write(self.address, &CMD_TRIGGER)
            .await
            .map_err(bus_fault(SENSOR, "trigger measurement"))?;
        delay.delay_ms(CONVERSION_MS).await;

        let mut frame = [0u8; AHT21_FRAME_LEN];
        bus.read(self.address, &mut frame)
            .await
            .map_err(bus_fault(SENSOR, "read measurement"))?;

        Ok(Aht21Reading::decode(&frame, &self.adjustment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusOp, NoDelay, SimulatedBus, encode_aht21_frame};
    use embassy_futures::block_on;

    const UNADJUSTED: Aht21Adjustment = Aht21Adjustment {
        temperature_offset_c: 0.0,
        humidity_gain: 1.0,
    };

    // 50 % RH, 25 °C
    const FRAME: [u8; 7] = [0x1C, 0x80, 0x00, 0x06, 0x00, 0x00, 0x4E];

    #[test]
    fn test_crc_matches_transmitted_byte() {
        assert_eq!(aht21_crc8(&FRAME[..6]), FRAME[6]);
        assert_eq!(aht21_crc8(&[0x1C, 0x6B, 0x8A, 0x55, 0x9E, 0x1A]), 0x70);
    }

    #[test]
    fn test_decode_known_frame() {
        let reading = Aht21Reading::decode(&FRAME, &UNADJUSTED);

        assert!(reading.crc_ok);
        assert_eq!(reading.status, 0x1C);
        assert_eq!(reading.humidity_pct, 50.0);
        assert_eq!(reading.temperature_c, 25.0);
    }

    #[test]
    fn test_decode_applies_field_adjustment() {
        let reading = Aht21Reading::decode(&FRAME, &Aht21Adjustment::default());

        assert!((reading.humidity_pct - 42.5).abs() < 1e-4);
        assert!((reading.temperature_c - 21.0).abs() < 1e-4);
    }

    #[test]
    fn test_any_single_bit_flip_fails_crc() {
        for byte in 0..6 {
            for bit in 0..8 {
                let mut frame = FRAME;
                frame[byte] ^= 1 << bit;
                let reading = Aht21Reading::decode(&frame, &UNADJUSTED);
                assert!(!reading.crc_ok, "flip of byte {} bit {} went undetected", byte, bit);
            }
        }
    }

    #[test]
    fn test_corrupted_crc_byte_is_flagged() {
        let mut frame = FRAME;
        frame[6] ^= 0xFF;
        assert!(!Aht21Reading::decode(&frame, &UNADJUSTED).crc_ok);
    }

    #[test]
    fn test_encoded_frames_decode_back() {
        let frame = encode_aht21_frame(0x1C, 18.5, 63.0);
        let reading = Aht21Reading::decode(&frame, &UNADJUSTED);

        assert!(reading.crc_ok);
        assert!((reading.temperature_c - 18.5).abs() < 0.01);
        assert!((reading.humidity_pct - 63.0).abs() < 0.01);
    }

    #[test]
    fn test_init_skips_init_command_when_calibrated() {
        let mut bus = SimulatedBus::default();
        let mut aht21 = Aht21::new(AHT21_DEFAULT_ADDRESS, UNADJUSTED);

        block_on(aht21.init(&mut bus, &mut NoDelay)).unwrap();

        assert_eq!(
            bus.ops(),
            &[
                BusOp::write(AHT21_DEFAULT_ADDRESS, &[CMD_STATUS]),
                BusOp::read(AHT21_DEFAULT_ADDRESS, 1),
            ]
        );
    }

    #[test]
    fn test_init_sends_init_command_when_uncalibrated() {
        let mut bus = SimulatedBus::default();
        bus.faults.aht21_uncalibrated = true;
        let mut aht21 = Aht21::new(AHT21_DEFAULT_ADDRESS, UNADJUSTED);

        block_on(aht21.init(&mut bus, &mut NoDelay)).unwrap();

        assert_eq!(
            bus.ops().last(),
            Some(&BusOp::write(AHT21_DEFAULT_ADDRESS, &CMD_INIT))
        );
    }

    #[test]
    fn test_read_reports_bus_failure() {
        let mut bus = SimulatedBus::default();
        bus.faults.nack_address = Some(AHT21_DEFAULT_ADDRESS);
        let mut aht21 = Aht21::new(AHT21_DEFAULT_ADDRESS, UNADJUSTED);

        let err = block_on(aht21.read(&mut bus, &mut NoDelay)).unwrap_err();

        assert!(matches!(err, SensorError::Bus { sensor: "AHT21", .. }));
    }
}
