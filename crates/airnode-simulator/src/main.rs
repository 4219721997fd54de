//! Desktop simulator for the airnode acquisition pipeline.
//!
//! Runs the real sampler, distributor and consumers from `airnode-core` on
//! the host against an emulated sensor bus. A scenario task varies the
//! environment over time and injects the faults the pipeline has to ride
//! out, then triggers shutdown after the requested number of cycles.
//!
//! # Usage
//!
//! ```text
//! airnode-simulator [CYCLES] [INTERVAL_MS] [CONFIG]
//! ```
//!
//! Defaults to 20 cycles at 250 ms. `CONFIG` is a postcard-encoded
//! [`NodeConfig`] as produced by `NodeConfig::to_postcard`; the interval
//! argument still overrides its measurement interval. Set `RUST_LOG=debug`
//! to see the reason for every dropped cycle.

use std::path::Path;
use std::process::ExitCode;

use airnode_core::app_state::{NodeContext, StatsSnapshot};
use airnode_core::async_i2c_bus::BusArbiter;
use airnode_core::buzzer::AlertActuator;
use airnode_core::config::NodeConfig;
use airnode_core::display_manager::{DisplayFrame, DisplayManager};
use airnode_core::distribution::Distributor;
use airnode_core::log_writer::LogWriter;
use airnode_core::sampling::{BringUpError, Sampler};
use airnode_core::sim::SimulatedBus;
use embassy_futures::block_on;
use embassy_futures::join::{join, join3};
use embassy_time::{Delay, Ticker};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics_simulator::SimulatorDisplay;
use log::{error, info, warn};

const DEFAULT_CYCLES: u32 = 20;
const DEFAULT_INTERVAL_MS: u32 = 250;

const DISPLAY_WIDTH_PX: u32 = 320;
const DISPLAY_HEIGHT_PX: u32 = 240;

/// Cycle on which the AHT21 frame CRC is corrupted.
const CRC_FAULT_CYCLE: u32 = 4;
/// Cycle on which the ENS160 has no new data.
const STALE_FAULT_CYCLE: u32 = 7;

// ---------------------------------------------------------------------------
// Host-side consumers
// ---------------------------------------------------------------------------

/// Log sink forwarding the record stream unchanged to a host writer.
struct IoSink<W>(W);

impl<W: std::io::Write> embedded_io_async::ErrorType for IoSink<W> {
    type Error = embedded_io_async::ErrorKind;
}

impl<W: std::io::Write> embedded_io_async::Write for IoSink<W> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0
            .write(buf)
            .map_err(|_| embedded_io_async::ErrorKind::Other)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0
            .flush()
            .map_err(|_| embedded_io_async::ErrorKind::Other)
    }
}

/// Buzzer stand-in that reports level changes.
struct ConsoleBuzzer;

impl embedded_hal::digital::ErrorType for ConsoleBuzzer {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::OutputPin for ConsoleBuzzer {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        info!("Buzzer off");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        warn!("Buzzer ON");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// Slowly deteriorating room: eCO2 climbs past the alert threshold halfway
/// through the run while temperature and humidity drift.
fn apply_scenario(bus: &mut SimulatedBus, cycle: u32, cycles: u32) {
    let progress = cycle as f32 / cycles.max(1) as f32;
    let t = cycle as f32;

    bus.environment.temperature_c = 24.0 + 2.0 * (t / 6.0).sin();
    bus.environment.humidity_pct = 45.0 + 8.0 * (t / 9.0).cos();
    bus.environment.eco2_ppm = (500.0 + 1200.0 * progress) as u16;
    bus.environment.tvoc_ppb = (100.0 + 600.0 * progress) as u16;
    bus.environment.aqi = 1 + (progress * 4.0) as u8;

    bus.faults.corrupt_aht21_crc = cycle == CRC_FAULT_CYCLE;
    bus.faults.stale_ens160 = cycle == STALE_FAULT_CYCLE;
}

async fn drive_scenario(
    ctx: &NodeContext,
    bus: &BusArbiter<SimulatedBus>,
    config: &NodeConfig,
    cycles: u32,
) {
    let mut ticker = Ticker::every(config.timing.measurement_interval());
    for cycle in 0..cycles {
        match bus.acquire(config.timing.measurement_interval()).await {
            Ok(mut bus) => {
                // Only the call sequence of the current cycle is of interest
                bus.clear_ops();
                apply_scenario(&mut bus, cycle, cycles);
            }
            Err(_) => warn!("Scenario: bus busy, keeping previous conditions"),
        }
        ticker.next().await;
    }
    // Let the last cycle reach every consumer before winding down.
    ticker.next().await;
    info!("Scenario complete, shutting down");
    ctx.shutdown.trigger();
}

async fn simulate(
    ctx: &NodeContext,
    bus: &BusArbiter<SimulatedBus>,
    config: &NodeConfig,
    cycles: u32,
) -> Result<Option<DisplayFrame>, BringUpError> {
    let mut sampler = Sampler::new(ctx, bus, config, Delay);
    sampler.bring_up().await?;

    let distributor = Distributor::new(ctx, config);
    let mut display = DisplayManager::new(
        SimulatorDisplay::<Rgb565>::new(Size::new(DISPLAY_WIDTH_PX, DISPLAY_HEIGHT_PX)),
        config.bmp280.unit,
    );
    let mut log_writer = LogWriter::new(IoSink(std::io::stdout()));
    let mut buzzer = AlertActuator::new(ConsoleBuzzer);

    join(
        join3(
            sampler.run(),
            distributor.run(),
            drive_scenario(ctx, bus, config, cycles),
        ),
        join3(display.run(ctx), log_writer.run(ctx), buzzer.run(ctx)),
    )
    .await;

    Ok(display.frame().cloned())
}

fn parse_arg(position: usize, default: u32) -> Result<u32, String> {
    match std::env::args().nth(position) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| format!("argument {position} must be a positive integer, got {raw:?}")),
    }
}

/// Load a postcard-encoded configuration, or the built-in defaults.
fn load_config(path: Option<&Path>) -> Result<NodeConfig, String> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    NodeConfig::from_postcard(&bytes).map_err(|e| format!("{}: {e}", path.display()))
}

fn report(stats: &StatsSnapshot) {
    info!(
        "Published {} samples, dropped {} cycles (crc {}, stale {}, bus busy {}, bus fault {}, publish {})",
        stats.published,
        stats.dropped_cycles(),
        stats.crc_drops,
        stats.stale_drops,
        stats.bus_busy,
        stats.bus_faults,
        stats.publish_drops
    );
    info!(
        "Alerts raised {}, alert drops {}, log drops {}",
        stats.alerts_raised, stats.alert_drops, stats.log_drops
    );
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (cycles, interval_ms) = match (
        parse_arg(1, DEFAULT_CYCLES),
        parse_arg(2, DEFAULT_INTERVAL_MS),
    ) {
        (Ok(cycles), Ok(interval_ms)) => (cycles, interval_ms),
        (Err(e), _) | (_, Err(e)) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config_path = std::env::args().nth(3);
    let mut config = match load_config(config_path.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    config.timing.measurement_interval_ms = interval_ms;
    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    info!("Starting airnode simulator: {cycles} cycles every {interval_ms} ms");

    let ctx = NodeContext::new();
    let bus = BusArbiter::new(SimulatedBus::new(config.addresses));
    let result = block_on(simulate(&ctx, &bus, &config, cycles));
    report(&ctx.stats.snapshot());

    match result {
        Ok(frame) => {
            if let Some(frame) = frame {
                info!("Final display frame ({}):", frame.level.label());
                for line in &frame.lines {
                    info!("  {line}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Bring-up failed: {e}");
            ExitCode::FAILURE
        }
    }
}
