//! Shared I2C bus arbitration
//!
//! The three sensors, the display controller and the power management chip
//! all sit on one physical I2C bus. Every client goes through the same
//! [`BusArbiter`]: the sampler holds a [`BusGuard`] for a whole acquisition
//! cycle, while other clients use an [`ArbitratedDevice`] that takes the bus
//! for a single transaction.

use core::ops::{Deref, DerefMut};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{Duration, with_timeout};
use embedded_hal_async::i2c::{Error as I2cError, ErrorKind, ErrorType, I2c, Operation};
use thiserror_no_std::Error;

/// The bus is owned by another client and could not be taken in time.
///
/// This is an expected outcome under contention. Callers skip the operation
/// and try again on their next natural cycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("I2C bus is owned by another client")]
pub struct BusBusy;

/// Exclusive, non-reentrant ownership gate over a shared I2C bus.
///
/// Built on Embassy's async `Mutex` so that ownership can be held across the
/// await points of a multi-step sensor transaction (trigger, conversion
/// delay, read-back).
pub struct BusArbiter<T> {
    bus: Mutex<CriticalSectionRawMutex, T>,
}

impl<T> BusArbiter<T> {
    pub const fn new(bus: T) -> Self {
        Self {
            bus: Mutex::new(bus),
        }
    }

    /// Wait at most `timeout` for ownership of the bus.
    pub async fn acquire(&self, timeout: Duration) -> Result<BusGuard<'_, T>, BusBusy> {
        with_timeout(timeout, self.bus.lock())
            .await
            .map(|guard| BusGuard { guard })
            .map_err(|_| BusBusy)
    }

    /// Take ownership only if the bus is free right now.
    pub fn try_acquire(&self) -> Result<BusGuard<'_, T>, BusBusy> {
        self.bus
            .try_lock()
            .map(|guard| BusGuard { guard })
            .map_err(|_| BusBusy)
    }

    /// Give the bus back, e.g. to hand it to a task on another executor.
    pub fn into_inner(self) -> T {
        self.bus.into_inner()
    }
}

/// Proof of bus ownership. The bus is released when the guard is dropped.
pub struct BusGuard<'a, T> {
    guard: MutexGuard<'a, CriticalSectionRawMutex, T>,
}

impl<T> BusGuard<'_, T> {
    /// Release ownership explicitly.
    #[inline]
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for BusGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for BusGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Error returned by an [`ArbitratedDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitratedError<E> {
    /// The arbiter could not be acquired within the device timeout.
    Busy,
    /// The underlying bus reported an error.
    Bus(E),
}

impl<E: I2cError> I2cError for ArbitratedError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::Other,
            Self::Bus(e) => e.kind(),
        }
    }
}

/// I2C device handle for bus clients other than the sampler.
///
/// Each transaction acquires the arbiter with a bounded wait and releases it
/// as soon as the transaction completes, so the hold time stays short. A
/// busy bus surfaces as [`ArbitratedError::Busy`] instead of blocking the
/// caller indefinitely.
///
/// # Example
///
/// ```ignore
/// use airnode_core::async_i2c_bus::{ArbitratedDevice, BusArbiter};
/// use embassy_time::Duration;
///
/// static I2C_BUS: StaticCell<BusArbiter<esp_hal::i2c::master::I2c<'static, esp_hal::Async>>> = StaticCell::new();
///
/// let i2c = /* ... create async I2C ... */;
/// let arbiter = I2C_BUS.init(BusArbiter::new(i2c));
///
/// let power_chip_i2c = ArbitratedDevice::new(arbiter, Duration::from_millis(50));
/// ```
pub struct ArbitratedDevice<'a, T> {
    arbiter: &'a BusArbiter<T>,
    timeout: Duration,
}

impl<'a, T> ArbitratedDevice<'a, T> {
    /// Create a new `ArbitratedDevice`.
    #[inline]
    pub const fn new(arbiter: &'a BusArbiter<T>, timeout: Duration) -> Self {
        Self { arbiter, timeout }
    }

    async fn acquire(&self) -> Result<BusGuard<'a, T>, ArbitratedError<T::Error>>
    where
        T: ErrorType,
    {
        self.arbiter.acquire(self.timeout).await.map_err(|_| {
            log::debug!("I2C bus busy, skipping arbitrated transaction");
            ArbitratedError::Busy
        })
    }
}

impl<T> ErrorType for ArbitratedDevice<'_, T>
where
    T: ErrorType,
{
    type Error = ArbitratedError<T::Error>;
}

impl<T> I2c for ArbitratedDevice<'_, T>
where
    T: I2c,
{
    #[inline]
    async fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        let mut bus = self.acquire().await?;
        bus.read(address, read).await.map_err(ArbitratedError::Bus)
    }

    #[inline]
    async fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        let mut bus = self.acquire().await?;
        bus.write(address, write).await.map_err(ArbitratedError::Bus)
    }

    #[inline]
    async fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        let mut bus = self.acquire().await?;
        bus.write_read(address, write, read)
            .await
            .map_err(ArbitratedError::Bus)
    }

    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut bus = self.acquire().await?;
        bus.transaction(address, operations)
            .await
            .map_err(ArbitratedError::Bus)
    }
}
