//! Application-wide shared state for the airnode pipeline

mod shutdown;
mod stats;

pub use shutdown::*;
pub use stats::*;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::Duration;

use crate::sampling::CompositeSample;

/// The sampler never runs ahead of the distributor by more than one sample.
pub const SAMPLE_QUEUE_DEPTH: usize = 1;
/// Backlog of records waiting for the log sink.
pub const LOG_QUEUE_DEPTH: usize = 32;
/// Pending buzzer pulses.
pub const ALERT_QUEUE_DEPTH: usize = 8;

pub type SampleChannel = Channel<CriticalSectionRawMutex, CompositeSample, SAMPLE_QUEUE_DEPTH>;
/// Overwrite-latest slot for the display.
pub type DisplaySignal = Signal<CriticalSectionRawMutex, CompositeSample>;
pub type LogChannel = Channel<CriticalSectionRawMutex, CompositeSample, LOG_QUEUE_DEPTH>;
pub type AlertChannel = Channel<CriticalSectionRawMutex, Duration, ALERT_QUEUE_DEPTH>;

/// Queues, counters and the shutdown latch shared by the pipeline tasks.
///
/// Built once at startup (in a `StaticCell` on the device) and handed to each
/// task by reference. It is `Sync` whatever bus driver the node uses, so
/// tasks on different executors can share it. The bus itself lives behind a
/// [`BusArbiter`](crate::async_i2c_bus::BusArbiter) owned by the acquisition
/// side.
pub struct NodeContext {
    pub samples: SampleChannel,
    pub display: DisplaySignal,
    pub log: LogChannel,
    pub alerts: AlertChannel,
    pub stats: PipelineStats,
    pub shutdown: Shutdown,
}

impl Default for NodeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeContext {
    pub const fn new() -> Self {
        Self {
            samples: Channel::new(),
            display: Signal::new(),
            log: Channel::new(),
            alerts: Channel::new(),
            stats: PipelineStats::new(),
            shutdown: Shutdown::new(),
        }
    }
}
