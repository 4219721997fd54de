//! In-memory I2C bus emulating the AHT21, BMP280 and ENS160.
//!
//! Used by the unit tests and by the desktop simulator. The bus answers the
//! register protocols the drivers speak, records every operation for
//! call-sequence assertions, and can inject the failure modes the pipeline
//! has to tolerate.

use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{
    Error as I2cError, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation,
};

use crate::config::DeviceAddresses;
use crate::sensors::{AHT21_FRAME_LEN, ENS160_PART_ID, STATUS_NEW_DATA, aht21_crc8};

/// Calibration block of the worked example in the BMP280 datasheet.
pub const BMP280_DATASHEET_CALIBRATION: [u8; 24] = [
    0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC, 0x7D, 0x8E, 0x43, 0xD6, 0xD0, 0x0B, 0x27, 0x0B, 0x8C, 0x00,
    0xF9, 0xFF, 0x8C, 0x3C, 0xF8, 0xC6, 0x70, 0x17,
];

/// Raw ADC registers (0xF7..=0xFC) of the same worked example:
/// adc_P = 415148, adc_T = 519888.
pub const BMP280_DATASHEET_ADC: [u8; 6] = [0x65, 0x5A, 0xC0, 0x7E, 0xED, 0x00];

const AHT21_STATUS_CALIBRATED: u8 = 0x18;
const AHT21_STATUS_UNCALIBRATED: u8 = 0x08;

const ENS160_STATUS_RUNNING: u8 = 0x80;

/// Bound on the operation log. When full, the oldest half is discarded.
pub const MAX_RECORDED_OPS: usize = 512;

/// Delay that returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Build a valid AHT21 measurement frame for the given conditions.
pub fn encode_aht21_frame(status: u8, temperature_c: f32, humidity_pct: f32) -> [u8; AHT21_FRAME_LEN] {
    let raw_humidity = ((humidity_pct / 100.0 * 1_048_576.0) as u32).min(0xF_FFFF);
    let raw_temperature = (((temperature_c + 50.0) / 200.0 * 1_048_576.0) as u32).min(0xF_FFFF);

    let mut frame = [
        status,
        (raw_humidity >> 12) as u8,
        (raw_humidity >> 4) as u8,
        (((raw_humidity & 0x0F) << 4) | (raw_temperature >> 16)) as u8,
        (raw_temperature >> 8) as u8,
        raw_temperature as u8,
        0,
    ];
    frame[6] = aht21_crc8(&frame[..6]);
    frame
}

/// Physical conditions the emulated sensors report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimEnvironment {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    /// BMP280 data registers, pressure first.
    pub bmp280_adc: [u8; 6],
    pub aqi: u8,
    pub tvoc_ppb: u16,
    pub eco2_ppm: u16,
}

impl Default for SimEnvironment {
    fn default() -> Self {
        Self {
            temperature_c: 25.0,
            humidity_pct: 50.0,
            bmp280_adc: BMP280_DATASHEET_ADC,
            aqi: 2,
            tvoc_ppb: 120,
            eco2_ppm: 650,
        }
    }
}

/// Faults to inject. All default to a healthy bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFaults {
    /// Flip the CRC byte of every AHT21 measurement frame.
    pub corrupt_aht21_crc: bool,
    /// AHT21 reports cleared calibration bits until the init command arrives.
    pub aht21_uncalibrated: bool,
    /// ENS160 never raises its new-data bit.
    pub stale_ens160: bool,
    /// Address that does not acknowledge.
    pub nack_address: Option<u8>,
    pub bmp280_chip_id: u8,
    pub ens160_part_id: u16,
}

impl Default for SimFaults {
    fn default() -> Self {
        Self {
            corrupt_aht21_crc: false,
            aht21_uncalibrated: false,
            stale_ens160: false,
            nack_address: None,
            bmp280_chip_id: 0x58,
            ens160_part_id: ENS160_PART_ID,
        }
    }
}

/// One recorded bus operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Write { address: u8, bytes: Vec<u8> },
    Read { address: u8, len: usize },
}

impl BusOp {
    pub fn write(address: u8, bytes: &[u8]) -> Self {
        Self::Write {
            address,
            bytes: bytes.to_vec(),
        }
    }

    pub fn read(address: u8, len: usize) -> Self {
        Self::Read { address, len }
    }

    pub fn address(&self) -> u8 {
        match self {
            Self::Write { address, .. } | Self::Read { address, .. } => *address,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBusError(pub ErrorKind);

impl I2cError for SimBusError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

pub struct SimulatedBus {
    pub environment: SimEnvironment,
    pub faults: SimFaults,
    addresses: DeviceAddresses,
    ops: Vec<BusOp>,
    aht21_init_received: bool,
    bmp280_pointer: u8,
    bmp280_registers: [u8; 256],
    ens160_pointer: u8,
    ens160_opmode: Option<u8>,
    ens160_compensation: Option<[u8; 4]>,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new(DeviceAddresses::default())
    }
}

impl SimulatedBus {
    pub fn new(addresses: DeviceAddresses) -> Self {
        Self {
            environment: SimEnvironment::default(),
            faults: SimFaults::default(),
            addresses,
            ops: Vec::new(),
            aht21_init_received: false,
            bmp280_pointer: 0,
            bmp280_registers: [0; 256],
            ens160_pointer: 0,
            ens160_opmode: None,
            ens160_compensation: None,
        }
    }

    /// Recorded operations, oldest first. Holds at most
    /// [`MAX_RECORDED_OPS`] entries.
    pub fn ops(&self) -> &[BusOp] {
        &self.ops
    }

    fn record(&mut self, op: BusOp) {
        if self.ops.len() >= MAX_RECORDED_OPS {
            self.ops.drain(..MAX_RECORDED_OPS / 2);
        }
        self.ops.push(op);
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn bmp280_register(&self, register: u8) -> u8 {
        self.bmp280_registers[usize::from(register)]
    }

    pub fn ens160_opmode(&self) -> Option<u8> {
        self.ens160_opmode
    }

    /// Last TEMP_IN/RH_IN payload written to the ENS160.
    pub fn ens160_compensation(&self) -> Option<[u8; 4]> {
        self.ens160_compensation
    }

    fn aht21_status(&self) -> u8 {
        if self.aht21_init_received || !self.faults.aht21_uncalibrated {
            AHT21_STATUS_CALIBRATED
        } else {
            AHT21_STATUS_UNCALIBRATED
        }
    }

    fn handle_write(&mut self, address: u8, bytes: &[u8]) {
        let Some(&first) = bytes.first() else {
            return;
        };

        if address == self.addresses.aht21 {
            if first == 0xBE {
                self.aht21_init_received = true;
            }
        } else if address == self.addresses.bmp280 {
            self.bmp280_pointer = first;
            if let Some(&value) = bytes.get(1) {
                self.bmp280_registers[usize::from(first)] = value;
            }
        } else if address == self.addresses.ens160 {
            self.ens160_pointer = first;
            match (first, &bytes[1..]) {
                (0x10, [mode]) => self.ens160_opmode = Some(*mode),
                (0x13, [a, b, c, d]) => self.ens160_compensation = Some([*a, *b, *c, *d]),
                _ => {}
            }
        }
    }

    fn handle_read(&mut self, address: u8, buf: &mut [u8]) {
        if address == self.addresses.aht21 {
            if buf.len() < AHT21_FRAME_LEN {
                buf.fill(self.aht21_status());
                return;
            }
            let mut frame = encode_aht21_frame(
                self.aht21_status(),
                self.environment.temperature_c,
                self.environment.humidity_pct,
            );
            if self.faults.corrupt_aht21_crc {
                frame[6] ^= 0xFF;
            }
            buf[..AHT21_FRAME_LEN].copy_from_slice(&frame);
        } else if address == self.addresses.bmp280 {
            for byte in buf.iter_mut() {
                *byte = self.bmp280_byte(self.bmp280_pointer);
                self.bmp280_pointer = self.bmp280_pointer.wrapping_add(1);
            }
        } else if address == self.addresses.ens160 {
            for byte in buf.iter_mut() {
                *byte = self.ens160_byte(self.ens160_pointer);
                self.ens160_pointer = self.ens160_pointer.wrapping_add(1);
            }
        }
    }

    fn bmp280_byte(&self, register: u8) -> u8 {
        match register {
            0x88..=0x9F => BMP280_DATASHEET_CALIBRATION[usize::from(register - 0x88)],
            0xD0 => self.faults.bmp280_chip_id,
            0xF7..=0xFC => self.environment.bmp280_adc[usize::from(register - 0xF7)],
            _ => self.bmp280_registers[usize::from(register)],
        }
    }

    fn ens160_byte(&self, register: u8) -> u8 {
        let env = &self.environment;
        let part_id = self.faults.ens160_part_id.to_le_bytes();
        let tvoc = env.tvoc_ppb.to_le_bytes();
        let eco2 = env.eco2_ppm.to_le_bytes();
        match register {
            0x00 => part_id[0],
            0x01 => part_id[1],
            0x10 => self.ens160_opmode.unwrap_or(0),
            0x20 if self.faults.stale_ens160 => ENS160_STATUS_RUNNING,
            0x20 => ENS160_STATUS_RUNNING | STATUS_NEW_DATA,
            0x21 => env.aqi,
            0x22 => tvoc[0],
            0x23 => tvoc[1],
            0x24 => eco2[0],
            0x25 => eco2[1],
            _ => 0,
        }
    }

    fn responds_to(&self, address: u8) -> bool {
        let DeviceAddresses {
            aht21,
            ens160,
            bmp280,
        } = self.addresses;
        self.faults.nack_address != Some(address) && [aht21, ens160, bmp280].contains(&address)
    }
}

impl ErrorType for SimulatedBus {
    type Error = SimBusError;
}

impl I2c for SimulatedBus {
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if !self.responds_to(address) {
            return Err(SimBusError(ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Address,
            )));
        }

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    self.record(BusOp::write(address, bytes));
                    self.handle_write(address, bytes);
                }
                Operation::Read(buf) => {
                    self.record(BusOp::read(address, buf.len()));
                    self.handle_read(address, buf);
                }
            }
        }
        Ok(())
    }
}
