//! Sensor acquisition cycle
//!
//! The [`Sampler`] owns the three drivers and the cadence. Each cycle takes
//! the bus once, drives the sensors in their dependency order (AHT21, then
//! BMP280, then ENS160 compensated with the first two), releases the bus and
//! hands a [`CompositeSample`] to the distributor. Cycles that produce
//! untrustworthy data are dropped and counted, never published.

use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Ticker, with_timeout};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::app_state::NodeContext;
use crate::async_i2c_bus::BusArbiter;
use crate::config::{NodeConfig, Timing};
use crate::sensors::{
    Aht21, Aht21Reading, Bmp280, Bmp280Reading, Ens160, Ens160Reading, SensorError,
};

/// Wait after power-up before the first bus transaction.
pub const POWER_UP_DELAY_MS: u32 = 100;
/// Wait between the sensor resets and their initialization.
pub const BRING_UP_SETTLE_MS: u32 = 250;

/// One fused measurement, published once per successful cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeSample {
    /// Strictly increasing across published samples, starting at 1.
    pub generation: u32,
    /// Milliseconds since boot at the end of acquisition.
    pub timestamp_ms: u64,
    pub aht21: Aht21Reading,
    pub bmp280: Bmp280Reading,
    pub ens160: Ens160Reading,
}

/// Why a cycle ended without publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    BusBusy,
    BusFault(SensorError),
    CrcMismatch,
    StaleData,
    /// The distributor did not accept the sample in time.
    PublishTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(u32),
    Dropped(DropReason),
}

/// Fatal failure while bringing the sensors up.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpError {
    #[error("I2C bus could not be acquired for bring-up")]
    BusUnavailable,
    #[error("sensor bring-up failed: {0}")]
    Sensor(#[from] SensorError),
}

pub struct Sampler<'a, T, D> {
    ctx: &'a NodeContext,
    bus: &'a BusArbiter<T>,
    aht21: Aht21,
    bmp280: Bmp280,
    ens160: Ens160,
    timing: Timing,
    delay: D,
    /// Generation of the last published sample.
    generation: u32,
}

impl<'a, T, D> Sampler<'a, T, D>
where
    T: I2c,
    D: DelayNs,
{
    pub fn new(
        ctx: &'a NodeContext,
        bus: &'a BusArbiter<T>,
        config: &NodeConfig,
        delay: D,
    ) -> Self {
        let addresses = &config.addresses;
        Self {
            ctx,
            bus,
            aht21: Aht21::new(addresses.aht21, config.aht21),
            bmp280: Bmp280::new(addresses.bmp280, config.bmp280),
            ens160: Ens160::new(addresses.ens160),
            timing: config.timing,
            delay,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Reset and initialize all sensors. Runs once before the first cycle.
    pub async fn bring_up(&mut self) -> Result<(), BringUpError> {
        info!("Sampler: bringing up sensors");
        self.delay.delay_ms(POWER_UP_DELAY_MS).await;

        let mut bus = self
            .bus
            .acquire(self.timing.bring_up_bus_timeout())
            .await
            .map_err(|_| {
                error!("Sampler: I2C bus unavailable for bring-up");
                BringUpError::BusUnavailable
            })?;

        self.aht21.reset(&mut *bus).await?;
        self.ens160.reset(&mut *bus, &mut self.delay).await?;
        self.delay.delay_ms(BRING_UP_SETTLE_MS).await;

        self.aht21.init(&mut *bus, &mut self.delay).await?;
        self.ens160.init(&mut *bus).await?;
        self.bmp280.init(&mut *bus, &mut self.delay).await?;
        bus.release();

        info!("Sampler: all sensors online");
        Ok(())
    }

    /// Run one acquisition cycle and publish its result.
    ///
    /// Recoverable failures are counted in the pipeline stats and reported
    /// through the outcome; they never propagate further.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = match self.acquire().await {
            Ok(sample) => self.publish(sample).await,
            Err(reason) => CycleOutcome::Dropped(reason),
        };

        match &outcome {
            CycleOutcome::Published(generation) => {
                debug!("Sampler: published generation {}", generation);
                self.ctx.stats.record_published();
            }
            CycleOutcome::Dropped(reason) => {
                match reason {
                    DropReason::BusBusy | DropReason::StaleData => {
                        debug!("Sampler: cycle dropped ({:?})", reason)
                    }
                    _ => warn!("Sampler: cycle dropped ({:?})", reason),
                }
                self.ctx.stats.record_drop(reason);
            }
        }
        outcome
    }

    async fn acquire(&mut self) -> Result<CompositeSample, DropReason> {
        let mut bus = self
            .bus
            .acquire(self.timing.bus_timeout())
            .await
            .map_err(|_| DropReason::BusBusy)?;

        let aht21 = self
            .aht21
            .read(&mut *bus, &mut self.delay)
            .await
            .map_err(DropReason::BusFault)?;
        if !aht21.crc_ok {
            return Err(DropReason::CrcMismatch);
        }

        let bmp280 = self
            .bmp280
            .read(&mut *bus)
            .await
            .map_err(DropReason::BusFault)?;

        self.ens160
            .compensate(
                &mut *bus,
                &mut self.delay,
                bmp280.temperature_c,
                aht21.humidity_pct,
            )
            .await
            .map_err(DropReason::BusFault)?;
        let ens160 = self
            .ens160
            .read(&mut *bus)
            .await
            .map_err(DropReason::BusFault)?;
        bus.release();

        if !ens160.is_fresh() {
            return Err(DropReason::StaleData);
        }

        Ok(CompositeSample {
            generation: self.generation.wrapping_add(1),
            timestamp_ms: Instant::now().as_millis(),
            aht21,
            bmp280,
            ens160,
        })
    }

    async fn publish(&mut self, sample: CompositeSample) -> CycleOutcome {
        match with_timeout(self.timing.send_timeout(), self.ctx.samples.send(sample)).await {
            Ok(()) => {
                self.generation = sample.generation;
                CycleOutcome::Published(sample.generation)
            }
            Err(_) => CycleOutcome::Dropped(DropReason::PublishTimeout),
        }
    }

    /// Run cycles at the configured cadence until shutdown.
    ///
    /// A cycle in progress always completes; shutdown is only observed
    /// between cycles.
    pub async fn run(&mut self) {
        let ctx = self.ctx;
        let mut ticker = Ticker::every(self.timing.measurement_interval());
        info!(
            "Sampler: running every {} ms",
            self.timing.measurement_interval_ms
        );

        loop {
            match select(ticker.next(), ctx.shutdown.wait()).await {
                Either::First(()) => {
                    self.run_cycle().await;
                }
                Either::Second(()) => {
                    info!("Sampler: shutdown");
                    return;
                }
            }
        }
    }
}
