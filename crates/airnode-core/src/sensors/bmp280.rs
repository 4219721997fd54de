use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::info;
use serde::{Deserialize, Serialize};

use super::{SensorError, bus_fault};

const SENSOR: &str = "BMP280";

pub const BMP280_DEFAULT_ADDRESS: u8 = 0x76;

const REG_CALIB_START: u8 = 0x88;
const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_PRESS_MSB: u8 = 0xF7;

/// Chip IDs of the BMP280 engineering samples (0x56, 0x57), mass production
/// parts (0x58) and the BME280 (0x60), which shares the register map.
const CHIP_IDS: [u8; 4] = [0x60, 0x56, 0x57, 0x58];
const RESET_VALUE: u8 = 0xB6;
const RESET_WAIT_MS: u32 = 10;

/// osrs_t = 0b111 and osrs_p = 0b101 (both x16), mode = normal.
const CTRL_MEAS_VALUE: u8 = 0xF7;
/// t_sb = 0.5 ms, filter off, 3-wire SPI off.
const CONFIG_VALUE: u8 = 0x00;

const ADC_LEN: usize = 6;

/// Unit the compensated pressure is reported in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PressureUnit {
    Pascal,
    Hectopascal,
    #[default]
    MillimetersOfMercury,
}

impl PressureUnit {
    pub fn from_pascal(self, pascal: f32) -> f32 {
        match self {
            Self::Pascal => pascal,
            Self::Hectopascal => pascal / 100.0,
            Self::MillimetersOfMercury => pascal * 0.007_500_62,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pascal => "Pa",
            Self::Hectopascal => "hPa",
            Self::MillimetersOfMercury => "mmHg",
        }
    }
}

/// Field calibration and output unit for the BMP280.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Bmp280Adjustment {
    pub temperature_offset_c: f32,
    pub pressure_gain: f32,
    pub unit: PressureUnit,
}

impl Default for Bmp280Adjustment {
    fn default() -> Self {
        Self {
            temperature_offset_c: -2.0,
            pressure_gain: 1.0,
            unit: PressureUnit::MillimetersOfMercury,
        }
    }
}

/// Factory trimming coefficients stored in the calibration block at 0x88.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationCoefficients {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
}

/// Result of the integer temperature compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensatedTemperature {
    /// Temperature in 0.01 °C.
    pub centi_celsius: i32,
    /// Fine temperature shared with the pressure compensation.
    pub t_fine: i32,
}

impl CalibrationCoefficients {
    pub const LEN: usize = 24;

    pub fn from_bytes(raw: &[u8; Self::LEN]) -> Self {
        let unsigned = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
        let signed = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]);

        Self {
            t1: unsigned(0),
            t2: signed(2),
            t3: signed(4),
            p1: unsigned(6),
            p2: signed(8),
            p3: signed(10),
            p4: signed(12),
            p5: signed(14),
            p6: signed(16),
            p7: signed(18),
            p8: signed(20),
            p9: signed(22),
        }
    }

    /// Bosch 32-bit fixed-point temperature compensation.
    ///
    /// Arithmetic wraps like the reference C implementation.
    pub fn compensate_temperature(&self, adc_t: i32) -> CompensatedTemperature {
        let t1 = i32::from(self.t1);
        let t2 = i32::from(self.t2);
        let t3 = i32::from(self.t3);

        let var1 = ((adc_t >> 3).wrapping_sub(t1 << 1)).wrapping_mul(t2) >> 11;
        let delta = (adc_t >> 4).wrapping_sub(t1);
        let var2 = (delta.wrapping_mul(delta) >> 12).wrapping_mul(t3) >> 14;

        let t_fine = var1.wrapping_add(var2);
        let centi_celsius = t_fine.wrapping_mul(5).wrapping_add(128) >> 8;

        CompensatedTemperature {
            centi_celsius,
            t_fine,
        }
    }

    /// Bosch 64-bit fixed-point pressure compensation.
    ///
    /// Returns pascals in Q24.8 format, or 0 when the intermediate
    /// denominator is zero.
    pub fn compensate_pressure(&self, adc_p: i32, t_fine: i32) -> i64 {
        let p1 = i64::from(self.p1);
        let p2 = i64::from(self.p2);
        let p3 = i64::from(self.p3);
        let p4 = i64::from(self.p4);
        let p5 = i64::from(self.p5);
        let p6 = i64::from(self.p6);
        let p7 = i64::from(self.p7);
        let p8 = i64::from(self.p8);
        let p9 = i64::from(self.p9);

        let mut var1 = i64::from(t_fine) - 128_000;
        let mut var2 = var1.wrapping_mul(var1).wrapping_mul(p6);
        var2 = var2.wrapping_add(var1.wrapping_mul(p5) << 17);
        var2 = var2.wrapping_add(p4 << 35);
        var1 = (var1.wrapping_mul(var1).wrapping_mul(p3) >> 8)
            .wrapping_add(var1.wrapping_mul(p2) << 12);
        var1 = ((1_i64 << 47).wrapping_add(var1)).wrapping_mul(p1) >> 33;

        if var1 == 0 {
            return 0;
        }

        let mut p = 1_048_576 - i64::from(adc_p);
        p = (p << 31).wrapping_sub(var2).wrapping_mul(3125).wrapping_div(var1);
        var1 = p9.wrapping_mul(p >> 13).wrapping_mul(p >> 13) >> 25;
        var2 = p8.wrapping_mul(p) >> 19;

        (p.wrapping_add(var1).wrapping_add(var2) >> 8).wrapping_add(p7 << 4)
    }
}

/// Assemble a 20-bit ADC value from its MSB, LSB and XLSB registers.
fn adc_value(bytes: &[u8]) -> i32 {
    (i32::from(bytes[0]) << 12) | (i32::from(bytes[1]) << 4) | (i32::from(bytes[2]) >> 4)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bmp280Reading {
    pub temperature_c: f32,
    /// Pressure in the configured [`PressureUnit`].
    pub pressure: f32,
}

/// BMP280 pressure/temperature sensor.
pub struct Bmp280 {
    address: u8,
    adjustment: Bmp280Adjustment,
    coefficients: Option<CalibrationCoefficients>,
}

impl Bmp280 {
    pub fn new(address: u8, adjustment: Bmp280Adjustment) -> Self {
        Self {
            address,
            adjustment,
            coefficients: None,
        }
    }

    pub fn coefficients(&self) -> Option<&CalibrationCoefficients> {
        self.coefficients.as_ref()
    }

    /// Verify the chip ID, reset the sensor, load the calibration block and
    /// start continuous measurement.
    pub async fn init<I: I2c, D: DelayNs>(
        &mut self,
        bus: &mut I,
        delay: &mut D,
    ) -> Result<(), SensorError> {
        let mut chip_id = [0u8; 1];
        bus.write_read(self.address, &[REG_CHIP_ID], &mut chip_id)
            .await
            .map_err(bus_fault(SENSOR, "chip id read"))?;

        if !CHIP_IDS.contains(&chip_id[0]) {
            log::error!("BMP280: unexpected chip id {:#04x}", chip_id[0]);
            return Err(SensorError::DeviceMismatch {
                sensor: SENSOR,
                found: u16::from(chip_id[0]),
            });
        }

        bus.write(self.address, &[REG_RESET, RESET_VALUE])
            .await
            .map_err(bus_fault(SENSOR, "soft reset"))?;
        delay.delay_ms(RESET_WAIT_MS).await;

        let mut raw = [0u8; CalibrationCoefficients::LEN];
        bus.write_read(self.address, &[REG_CALIB_START], &mut raw)
            .await
            .map_err(bus_fault(SENSOR, "calibration read"))?;
        self.coefficients = Some(CalibrationCoefficients::from_bytes(&raw));

        bus.write(self.address, &[REG_CTRL_MEAS, CTRL_MEAS_VALUE])
            .await
            .map_err(bus_fault(SENSOR, "ctrl_meas write"))?;
        bus.write(self.address, &[REG_CONFIG, CONFIG_VALUE])
            .await
            .map_err(bus_fault(SENSOR, "config write"))?;

        info!("BMP280: chip id {:#04x}, calibration loaded", chip_id[0]);
        Ok(())
    }

    pub async fn read<I: I2c>(&mut self, bus: &mut I) -> Result<Bmp280Reading, SensorError> {
        let coefficients = self
            .coefficients
            .ok_or(SensorError::NotInitialized { sensor: SENSOR })?;

        let mut data = [0u8; ADC_LEN];
        bus.write_read(self.address, &[REG_PRESS_MSB], &mut data)
            .await
            .map_err(bus_fault(SENSOR, "adc read"))?;

        let adc_p = adc_value(&data[0..3]);
        let adc_t = adc_value(&data[3..6]);

        Ok(compensate(&coefficients, &self.adjustment, adc_p, adc_t))
    }
}

/// Full compensation pipeline from a raw ADC pair to adjusted output units.
pub fn compensate(
    coefficients: &CalibrationCoefficients,
    adjustment: &Bmp280Adjustment,
    adc_p: i32,
    adc_t: i32,
) -> Bmp280Reading {
    let temperature = coefficients.compensate_temperature(adc_t);
    let pressure_q24_8 = coefficients.compensate_pressure(adc_p, temperature.t_fine);

    let temperature_c = temperature.centi_celsius as f32 / 100.0 + adjustment.temperature_offset_c;
    let pascal = pressure_q24_8 as f32 / 256.0;
    let pressure = adjustment.unit.from_pascal(pascal) * adjustment.pressure_gain;

    Bmp280Reading {
        temperature_c,
        pressure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BMP280_DATASHEET_CALIBRATION, NoDelay, SimulatedBus};
    use embassy_futures::block_on;

    // Worked example from the BMP280 datasheet, section 3.12.
    const ADC_T: i32 = 519_888;
    const ADC_P: i32 = 415_148;

    fn datasheet() -> CalibrationCoefficients {
        CalibrationCoefficients::from_bytes(&BMP280_DATASHEET_CALIBRATION)
    }

    #[test]
    fn test_coefficients_decode_little_endian() {
        let c = datasheet();
        assert_eq!((c.t1, c.t2, c.t3), (27504, 26435, -1000));
        assert_eq!(
            [c.p1 as i32, c.p2 as i32, c.p3 as i32, c.p4 as i32, c.p5 as i32],
            [36477, -10685, 3024, 2855, 140]
        );
        assert_eq!([c.p6, c.p7, c.p8, c.p9], [-7, 15500, -14600, 6000]);
    }

    #[test]
    fn test_temperature_matches_datasheet_example() {
        let t = datasheet().compensate_temperature(ADC_T);
        assert_eq!(t.t_fine, 128_422);
        assert_eq!(t.centi_celsius, 2508);
    }

    #[test]
    fn test_pressure_matches_datasheet_example() {
        let c = datasheet();
        let t_fine = c.compensate_temperature(ADC_T).t_fine;

        let q24_8 = c.compensate_pressure(ADC_P, t_fine);

        assert_eq!(q24_8, 25_767_233);
        let pascal = q24_8 as f64 / 256.0;
        assert!((pascal - 100_653.27).abs() < 0.05, "got {} Pa", pascal);
    }

    #[test]
    fn test_zero_denominator_yields_zero_pressure() {
        let mut c = datasheet();
        c.p1 = 0;
        let t_fine = c.compensate_temperature(ADC_T).t_fine;

        assert_eq!(c.compensate_pressure(ADC_P, t_fine), 0);

        let adjustment = Bmp280Adjustment {
            unit: PressureUnit::Pascal,
            ..Bmp280Adjustment::default()
        };
        assert_eq!(compensate(&c, &adjustment, ADC_P, ADC_T).pressure, 0.0);
    }

    #[test]
    fn test_output_adjustment_and_units() {
        let c = datasheet();
        let adjustment = Bmp280Adjustment {
            temperature_offset_c: -2.0,
            pressure_gain: 1.0,
            unit: PressureUnit::Hectopascal,
        };

        let reading = compensate(&c, &adjustment, ADC_P, ADC_T);

        assert!((reading.temperature_c - 23.08).abs() < 1e-4);
        assert!((reading.pressure - 1006.5325).abs() < 1e-2);

        let mmhg = compensate(&c, &Bmp280Adjustment::default(), ADC_P, ADC_T);
        assert!((mmhg.pressure - 754.96).abs() < 1e-2);
    }

    #[test]
    fn test_adc_value_assembly() {
        assert_eq!(adc_value(&[0x65, 0x5A, 0xC0]), ADC_P);
        assert_eq!(adc_value(&[0x7E, 0xED, 0x00]), ADC_T);
    }

    #[test]
    fn test_init_rejects_unknown_chip() {
        let mut bus = SimulatedBus::default();
        bus.faults.bmp280_chip_id = 0x55;
        let mut bmp280 = Bmp280::new(BMP280_DEFAULT_ADDRESS, Bmp280Adjustment::default());

        let err = block_on(bmp280.init(&mut bus, &mut NoDelay)).unwrap_err();

        assert_eq!(
            err,
            SensorError::DeviceMismatch {
                sensor: "BMP280",
                found: 0x55
            }
        );
        assert!(bmp280.coefficients().is_none());
    }

    #[test]
    fn test_read_before_init_is_rejected() {
        let mut bus = SimulatedBus::default();
        let mut bmp280 = Bmp280::new(BMP280_DEFAULT_ADDRESS, Bmp280Adjustment::default());

        let err = block_on(bmp280.read(&mut bus)).unwrap_err();

        assert_eq!(err, SensorError::NotInitialized { sensor: "BMP280" });
        assert!(bus.ops().is_empty());
    }

    #[test]
    fn test_init_then_read_over_bus() {
        let mut bus = SimulatedBus::default();
        let adjustment = Bmp280Adjustment {
            temperature_offset_c: 0.0,
            pressure_gain: 1.0,
            unit: PressureUnit::Pascal,
        };
        let mut bmp280 = Bmp280::new(BMP280_DEFAULT_ADDRESS, adjustment);

        block_on(bmp280.init(&mut bus, &mut NoDelay)).unwrap();
        let reading = block_on(bmp280.read(&mut bus)).unwrap();

        assert_eq!(bmp280.coefficients(), Some(&datasheet()));
        assert_eq!(bus.bmp280_register(REG_CTRL_MEAS), CTRL_MEAS_VALUE);
        assert!((reading.temperature_c - 25.08).abs() < 1e-4);
        assert!((reading.pressure - 100_653.25).abs() < 0.1);
    }
}
