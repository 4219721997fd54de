//! Hardware initialization for the airnode device
//!
//! This module provides functions for setting up all hardware components
//! in the correct order: the shared I2C bus first, then the power management
//! chip on that bus (which feeds the display and sensor rails), then the
//! display, log UART and buzzer.
//!
//! The I2C controller is brought up in async mode for the power chip and then
//! returned in blocking mode. Async drivers are bound to the executor that
//! created them, so the acquisition executor converts it back itself.

use axp2101_embedded::AsyncAxp2101;
use embassy_time::Duration;
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::Config as I2cConfig;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::uart::{Config as UartConfig, UartTx};
use log::{error, info};
use mipidsi::interface::SpiInterface;
use mipidsi::models::ILI9342CRgb565;
use mipidsi::{Builder as MipidsiBuilder, NoResetPin};
use static_cell::StaticCell;
use thiserror_no_std::Error;

use airnode_core::async_i2c_bus::{ArbitratedDevice, BusArbiter};

const DISPLAY_WIDTH: u16 = 320;
const DISPLAY_HEIGHT: u16 = 240;

/// Per-transaction bus wait for the power management chip.
const POWER_CHIP_BUS_TIMEOUT: Duration = Duration::from_millis(50);

/// Display panel rail voltage on ALDO4.
const DISPLAY_RAIL_MV: u16 = 3300;

pub type I2cBus = esp_hal::i2c::master::I2c<'static, esp_hal::Async>;
/// The same controller in a form that can move between executors.
pub type BlockingI2cBus = esp_hal::i2c::master::I2c<'static, esp_hal::Blocking>;

pub type FirmwareDisplay = mipidsi::Display<
    SpiInterface<
        'static,
        ExclusiveDevice<Spi<'static, esp_hal::Blocking>, Output<'static>, NoDelay>,
        Output<'static>,
    >,
    ILI9342CRgb565,
    NoResetPin,
>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    #[error("I2C bus configuration rejected")]
    I2c,
    #[error("power management chip did not respond")]
    PowerManagement,
    #[error("SPI bus configuration rejected")]
    Spi,
    #[error("display initialization failed")]
    Display,
    #[error("UART configuration rejected")]
    Uart,
}

/// Initialize the I2C bus hardware
///
/// Creates the I2C peripheral with proper configuration, in async mode for
/// [`init_power_management`].
pub fn create_i2c_bus(
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: esp_hal::peripherals::GPIO12<'static>,
    scl: esp_hal::peripherals::GPIO11<'static>,
) -> Result<I2cBus, HardwareError> {
    let i2c = esp_hal::i2c::master::I2c::new(
        i2c0,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .map_err(|e| {
        error!("I2C config error: {:?}", e);
        HardwareError::I2c
    })?;

    Ok(i2c.with_sda(sda).with_scl(scl).into_async())
}

/// Power up the display and sensor rails through the AXP2101.
///
/// The chip shares the bus with the sensors, so every register access goes
/// through the arbiter with a short bounded wait. Hands the bus back in
/// blocking mode once the rails are up.
pub async fn init_power_management(i2c: I2cBus) -> Result<BlockingI2cBus, HardwareError> {
    info!("Configuring power management");
    let arbiter = BusArbiter::new(i2c);
    enable_rails(&arbiter).await?;
    info!("Power management ready");
    Ok(arbiter.into_inner().into_blocking())
}

async fn enable_rails(arbiter: &BusArbiter<I2cBus>) -> Result<(), HardwareError> {
    let mut power_mgmt_chip =
        AsyncAxp2101::new(ArbitratedDevice::new(arbiter, POWER_CHIP_BUS_TIMEOUT));

    let fail = |e| {
        error!("Power management error: {:?}", e);
        HardwareError::PowerManagement
    };

    power_mgmt_chip.init().await.map_err(fail)?;
    power_mgmt_chip.enable_aldo1().await.map_err(fail)?;
    power_mgmt_chip.enable_aldo2().await.map_err(fail)?;
    power_mgmt_chip.enable_aldo3().await.map_err(fail)?;
    power_mgmt_chip.enable_aldo4().await.map_err(fail)?;
    power_mgmt_chip.enable_bldo1().await.map_err(fail)?;
    power_mgmt_chip.enable_bldo2().await.map_err(fail)?;
    power_mgmt_chip.enable_dldo1().await.map_err(fail)?;
    power_mgmt_chip
        .set_aldo4_voltage(DISPLAY_RAIL_MV)
        .await
        .map_err(fail)
}

/// Pins and peripherals of the ILI9342C panel.
pub struct DisplayPins {
    pub spi: esp_hal::peripherals::SPI2<'static>,
    pub sck: esp_hal::peripherals::GPIO36<'static>,
    pub mosi: esp_hal::peripherals::GPIO37<'static>,
    pub cs: esp_hal::peripherals::GPIO35<'static>,
    pub dc: esp_hal::peripherals::GPIO34<'static>,
}

pub fn init_display(pins: DisplayPins) -> Result<FirmwareDisplay, HardwareError> {
    let spi_bus = Spi::new(pins.spi, SpiConfig::default())
        .map_err(|e| {
            error!("SPI config error: {:?}", e);
            HardwareError::Spi
        })?
        .with_sck(pins.sck)
        .with_mosi(pins.mosi);

    // Hardware CS is not used by this panel
    let cs = Output::new(pins.cs, Level::High, OutputConfig::default());
    let spi_device = ExclusiveDevice::new_no_delay(spi_bus, cs).map_err(|e| {
        error!("SPI device error: {:?}", e);
        HardwareError::Spi
    })?;
    let dc = Output::new(pins.dc, Level::Low, OutputConfig::default());

    // Batching buffer for SPI writes; larger is faster but costs RAM
    static SPI_BUFFER: StaticCell<[u8; 512]> = StaticCell::new();
    let di = SpiInterface::new(spi_device, dc, SPI_BUFFER.init([0; 512]));

    let display = MipidsiBuilder::new(ILI9342CRgb565, di)
        .display_size(DISPLAY_WIDTH, DISPLAY_HEIGHT)
        .init(&mut embassy_time::Delay)
        .map_err(|e| {
            error!("Display init error: {:?}", e);
            HardwareError::Display
        })?;

    info!("Display initialized");
    Ok(display)
}

/// Serial sink for the measurement log.
pub struct UartLogSink {
    tx: UartTx<'static, esp_hal::Async>,
}

pub fn create_log_uart(
    uart: esp_hal::peripherals::UART1<'static>,
    tx: esp_hal::peripherals::GPIO17<'static>,
) -> Result<UartLogSink, HardwareError> {
    let tx = UartTx::new(uart, UartConfig::default().with_baudrate(115_200))
        .map_err(|e| {
            error!("UART config error: {:?}", e);
            HardwareError::Uart
        })?
        .with_tx(tx)
        .into_async();

    Ok(UartLogSink { tx })
}

impl embedded_io_async::ErrorType for UartLogSink {
    type Error = embedded_io_async::ErrorKind;
}

impl embedded_io_async::Write for UartLogSink {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx
            .write_async(buf)
            .await
            .map_err(|_| embedded_io_async::ErrorKind::Other)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.tx
            .flush_async()
            .await
            .map_err(|_| embedded_io_async::ErrorKind::Other)
    }
}

pub fn create_buzzer(pin: esp_hal::peripherals::GPIO9<'static>) -> Output<'static> {
    Output::new(pin, Level::Low, OutputConfig::default())
}
