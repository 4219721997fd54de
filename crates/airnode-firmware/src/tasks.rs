//! Embassy tasks for the pipeline stages.
//!
//! Tasks cannot be generic, so each one pins the core component to the
//! concrete firmware types. Acquisition and distribution run on the
//! interrupt-priority executor; the consumers run in thread mode, where a
//! slow SPI flush can only delay other consumers.

use airnode_core::app_state::NodeContext;
use airnode_core::async_i2c_bus::BusArbiter;
use airnode_core::buzzer::AlertActuator;
use airnode_core::config::NodeConfig;
use airnode_core::display_manager::DisplayManager;
use airnode_core::distribution::Distributor;
use airnode_core::log_writer::LogWriter;
use airnode_core::sampling::Sampler;
use embassy_executor::Spawner;
use embassy_time::Delay;
use esp_hal::gpio::Output;
use log::error;

use crate::app_state::{BlockingI2cBus, FirmwareDisplay, I2cBus, UartLogSink};

/// Unrecoverable failure: log it and restart the chip.
pub fn restart(reason: &dyn core::fmt::Display) -> ! {
    error!("Fatal: {}. Restarting", reason);
    esp_hal::system::software_reset()
}

/// First task on the acquisition executor.
///
/// Takes the bus in blocking mode, switches it to async on this executor and
/// hands it to [`acquisition_task`].
#[embassy_executor::task]
pub async fn acquisition_bootstrap(
    i2c: BlockingI2cBus,
    ctx: &'static NodeContext,
    config: NodeConfig,
) {
    let spawner = Spawner::for_current_executor().await;
    match acquisition_task(i2c.into_async(), ctx, config) {
        Ok(token) => spawner.spawn(token),
        Err(_) => restart(&"acquisition task already running"),
    }
}

#[embassy_executor::task]
async fn acquisition_task(i2c: I2cBus, ctx: &'static NodeContext, config: NodeConfig) {
    let bus = BusArbiter::new(i2c);
    let mut sampler = Sampler::new(ctx, &bus, &config, Delay);
    if let Err(e) = sampler.bring_up().await {
        restart(&e);
    }
    sampler.run().await;
}

#[embassy_executor::task]
pub async fn distributor_task(distributor: Distributor<'static>) {
    distributor.run().await;
}

#[embassy_executor::task]
pub async fn display_task(
    mut manager: DisplayManager<FirmwareDisplay>,
    ctx: &'static NodeContext,
) {
    manager.run(ctx).await;
}

#[embassy_executor::task]
pub async fn log_task(mut writer: LogWriter<UartLogSink>, ctx: &'static NodeContext) {
    writer.run(ctx).await;
}

#[embassy_executor::task]
pub async fn buzzer_task(
    mut actuator: AlertActuator<Output<'static>>,
    ctx: &'static NodeContext,
) {
    actuator.run(ctx).await;
}
