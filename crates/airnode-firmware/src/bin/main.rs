#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::interrupt::Priority;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_rtos::embassy::InterruptExecutor;
use log::info;
use static_cell::StaticCell;

use airnode_core::buzzer::AlertActuator;
use airnode_core::config::NodeConfig;
use airnode_core::display_manager::DisplayManager;
use airnode_core::distribution::Distributor;
use airnode_core::log_writer::LogWriter;
use airnode_firmware::app_state::{
    DisplayPins, NodeContext, create_buzzer, create_i2c_bus, create_log_uart, init_display,
    init_power_management,
};
use airnode_firmware::tasks::{
    acquisition_bootstrap, buzzer_task, display_task, distributor_task, log_task, restart,
};

/// Interval between pipeline statistics reports on the debug log.
const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static CONTEXT: NodeContext = NodeContext::new();

/// Runs acquisition and distribution above the thread-mode consumers, so a
/// blocking display flush cannot delay a cycle.
static ACQUISITION_EXECUTOR: StaticCell<InterruptExecutor<2>> = StaticCell::new();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized");

    // Compiled-in deployment constants. Postcard blobs are produced and
    // checked by host tooling.
    let node_config = NodeConfig::default();
    let ctx: &'static NodeContext = &CONTEXT;

    let i2c = create_i2c_bus(peripherals.I2C0, peripherals.GPIO12, peripherals.GPIO11)
        .unwrap_or_else(|e| restart(&e));
    let i2c = init_power_management(i2c)
        .await
        .unwrap_or_else(|e| restart(&e));

    let display = init_display(DisplayPins {
        spi: peripherals.SPI2,
        sck: peripherals.GPIO36,
        mosi: peripherals.GPIO37,
        cs: peripherals.GPIO35,
        dc: peripherals.GPIO34,
    })
    .unwrap_or_else(|e| restart(&e));
    let log_sink =
        create_log_uart(peripherals.UART1, peripherals.GPIO17).unwrap_or_else(|e| restart(&e));
    let buzzer = create_buzzer(peripherals.GPIO9);

    // Consumers first so nothing published is lost
    spawner.spawn(
        display_task(DisplayManager::new(display, node_config.bmp280.unit), ctx)
            .expect("display task"),
    );
    spawner.spawn(log_task(LogWriter::new(log_sink), ctx).expect("log task"));
    spawner.spawn(buzzer_task(AlertActuator::new(buzzer), ctx).expect("buzzer task"));

    let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    let executor = ACQUISITION_EXECUTOR.init(InterruptExecutor::new(sw_ints.software_interrupt2));
    let acquisition = executor.start(Priority::Priority3);

    acquisition.spawn(
        distributor_task(Distributor::new(ctx, &node_config)).expect("distributor task"),
    );
    acquisition.spawn(
        acquisition_bootstrap(i2c, ctx, node_config).expect("acquisition task"),
    );

    info!("Pipeline running");

    loop {
        Timer::after(STATS_REPORT_INTERVAL).await;
        let stats = ctx.stats.snapshot();
        info!(
            "Published {}, dropped {} (crc {}, stale {}, busy {}, fault {}), log drops {}, alerts {}",
            stats.published,
            stats.dropped_cycles(),
            stats.crc_drops,
            stats.stale_drops,
            stats.bus_busy,
            stats.bus_faults,
            stats.log_drops,
            stats.alerts_raised
        );
    }
}
