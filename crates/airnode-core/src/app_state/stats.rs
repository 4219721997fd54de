//! Pipeline counters

use core::sync::atomic::{AtomicU32, Ordering};

use crate::sampling::DropReason;

/// Running counters for every outcome the pipeline tolerates silently.
///
/// Updated from several tasks; reads through [`snapshot`](Self::snapshot) are
/// not atomic as a whole but each counter is individually consistent.
#[derive(Debug, Default)]
pub struct PipelineStats {
    published: AtomicU32,
    crc_drops: AtomicU32,
    stale_drops: AtomicU32,
    bus_busy: AtomicU32,
    bus_faults: AtomicU32,
    publish_drops: AtomicU32,
    log_drops: AtomicU32,
    alert_drops: AtomicU32,
    alerts_raised: AtomicU32,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub published: u32,
    pub crc_drops: u32,
    pub stale_drops: u32,
    pub bus_busy: u32,
    pub bus_faults: u32,
    pub publish_drops: u32,
    pub log_drops: u32,
    pub alert_drops: u32,
    pub alerts_raised: u32,
}

impl StatsSnapshot {
    /// Cycles that ended without a published sample.
    pub const fn dropped_cycles(&self) -> u32 {
        self.crc_drops + self.stale_drops + self.bus_busy + self.bus_faults + self.publish_drops
    }
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub const fn new() -> Self {
        Self {
            published: AtomicU32::new(0),
            crc_drops: AtomicU32::new(0),
            stale_drops: AtomicU32::new(0),
            bus_busy: AtomicU32::new(0),
            bus_faults: AtomicU32::new(0),
            publish_drops: AtomicU32::new(0),
            log_drops: AtomicU32::new(0),
            alert_drops: AtomicU32::new(0),
            alerts_raised: AtomicU32::new(0),
        }
    }

    pub fn record_published(&self) {
        bump(&self.published);
    }

    pub fn record_drop(&self, reason: &DropReason) {
        let counter = match reason {
            DropReason::BusBusy => &self.bus_busy,
            DropReason::BusFault(_) => &self.bus_faults,
            DropReason::CrcMismatch => &self.crc_drops,
            DropReason::StaleData => &self.stale_drops,
            DropReason::PublishTimeout => &self.publish_drops,
        };
        bump(counter);
    }

    pub fn record_log_drop(&self) {
        bump(&self.log_drops);
    }

    pub fn record_alert_raised(&self) {
        bump(&self.alerts_raised);
    }

    pub fn record_alert_drop(&self) {
        bump(&self.alert_drops);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU32| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            published: load(&self.published),
            crc_drops: load(&self.crc_drops),
            stale_drops: load(&self.stale_drops),
            bus_busy: load(&self.bus_busy),
            bus_faults: load(&self.bus_faults),
            publish_drops: load(&self.publish_drops),
            log_drops: load(&self.log_drops),
            alert_drops: load(&self.alert_drops),
            alerts_raised: load(&self.alerts_raised),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorError;
    use embedded_hal_async::i2c::ErrorKind;

    #[test]
    fn test_drops_are_counted_by_reason() {
        let stats = PipelineStats::new();

        stats.record_drop(&DropReason::CrcMismatch);
        stats.record_drop(&DropReason::CrcMismatch);
        stats.record_drop(&DropReason::StaleData);
        stats.record_drop(&DropReason::BusBusy);
        stats.record_drop(&DropReason::BusFault(SensorError::Bus {
            sensor: "AHT21",
            operation: "read measurement",
            kind: ErrorKind::Other,
        }));
        stats.record_published();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.crc_drops, 2);
        assert_eq!(snapshot.stale_drops, 1);
        assert_eq!(snapshot.bus_busy, 1);
        assert_eq!(snapshot.bus_faults, 1);
        assert_eq!(snapshot.published, 1);
        assert_eq!(snapshot.dropped_cycles(), 5);
    }

    #[test]
    fn test_consumer_side_counters() {
        let stats = PipelineStats::new();

        stats.record_log_drop();
        stats.record_alert_raised();
        stats.record_alert_raised();
        stats.record_alert_drop();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.log_drops, 1);
        assert_eq!(snapshot.alerts_raised, 2);
        assert_eq!(snapshot.alert_drops, 1);
        assert_eq!(snapshot.dropped_cycles(), 0);
    }
}
