//! Drivers for the three sensors sharing the I2C bus.
//!
//! Drivers do not own the bus. Each operation borrows it from the caller,
//! which is expected to hold a [`BusGuard`](crate::async_i2c_bus::BusGuard)
//! for the full multi-step transaction.

mod aht21;
mod bmp280;
mod ens160;

pub use aht21::*;
pub use bmp280::*;
pub use ens160::*;

use embedded_hal_async::i2c::{Error as I2cError, ErrorKind};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: I2C failure during {operation} ({kind:?})")]
    Bus {
        sensor: &'static str,
        operation: &'static str,
        kind: ErrorKind,
    },
    #[error("{sensor}: unexpected device id {found:#06x}")]
    DeviceMismatch { sensor: &'static str, found: u16 },
    #[error("{sensor}: read before initialization")]
    NotInitialized { sensor: &'static str },
}

/// Map an I2C error into a [`SensorError::Bus`] tagged with the failing step.
pub(crate) fn bus_fault<E: I2cError>(
    sensor: &'static str,
    operation: &'static str,
) -> impl FnOnce(E) -> SensorError {
    move |e| {
        log::debug!("{} {} failed: {:?}", sensor, operation, e);
        SensorError::Bus {
            sensor,
            operation,
            kind: e.kind(),
        }
    }
}
