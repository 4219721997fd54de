//! Fan-out of published samples to the consumers.
//!
//! Each consumer gets its own back-pressure policy: the display slot is
//! overwritten, the log queue is waited on briefly and then skipped, and the
//! buzzer only hears about samples that pass the alert policy. None of them
//! can hold up the sampler for longer than the send timeout.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, with_timeout};
use log::{debug, info, warn};

use crate::app_state::NodeContext;
use crate::config::NodeConfig;
use crate::metrics::AlertPolicy;
use crate::sampling::CompositeSample;

pub struct Distributor<'a> {
    ctx: &'a NodeContext,
    policy: AlertPolicy,
    send_timeout: Duration,
}

impl<'a> Distributor<'a> {
    pub fn new(ctx: &'a NodeContext, config: &NodeConfig) -> Self {
        Self {
            ctx,
            policy: AlertPolicy::new(&config.alert),
            send_timeout: config.timing.send_timeout(),
        }
    }

    /// Forward one sample to every consumer.
    pub async fn dispatch(&self, sample: CompositeSample) {
        let ctx = self.ctx;

        ctx.display.signal(sample);

        if with_timeout(self.send_timeout, ctx.log.send(sample))
            .await
            .is_err()
        {
            debug!(
                "Distributor: log queue full, dropped generation {}",
                sample.generation
            );
            ctx.stats.record_log_drop();
        }

        if let Some(pulse) = self.policy.evaluate(&sample.ens160) {
            warn!(
                "Air quality alert: AQI {} eCO2 {} ppm",
                sample.ens160.aqi, sample.ens160.eco2_ppm
            );
            ctx.stats.record_alert_raised();
            if with_timeout(self.send_timeout, ctx.alerts.send(pulse))
                .await
                .is_err()
            {
                warn!("Distributor: alert queue full, pulse dropped");
                ctx.stats.record_alert_drop();
            }
        }
    }

    pub async fn run(&self) {
        let ctx = self.ctx;
        info!("Distributor: started");
        loop {
            match select(ctx.samples.receive(), ctx.shutdown.wait()).await {
                Either::First(sample) => self.dispatch(sample).await,
                Either::Second(()) => {
                    info!("Distributor: shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::LOG_QUEUE_DEPTH;
    use crate::sensors::{Aht21Reading, Bmp280Reading, Ens160Reading};
    use embassy_futures::block_on;

    fn sample(generation: u32, aqi: u8, eco2_ppm: u16) -> CompositeSample {
        CompositeSample {
            generation,
            timestamp_ms: u64::from(generation) * 1000,
            aht21: Aht21Reading {
                status: 0x18,
                temperature_c: 21.0,
                humidity_pct: 42.5,
                crc_ok: true,
            },
            bmp280: Bmp280Reading {
                temperature_c: 23.08,
                pressure: 754.96,
            },
            ens160: Ens160Reading {
                status: 0x82,
                aqi,
                tvoc_ppb: 120,
                eco2_ppm,
            },
        }
    }

    fn distributor(ctx: &NodeContext) -> Distributor<'_> {
        let mut config = NodeConfig::default();
        config.timing.send_timeout_ms = 5;
        Distributor::new(ctx, &config)
    }

    #[test]
    fn test_sample_reaches_display_and_log() {
        let ctx = NodeContext::new();
        let distributor = distributor(&ctx);

        block_on(distributor.dispatch(sample(1, 2, 650)));

        assert_eq!(ctx.display.try_take().map(|s| s.generation), Some(1));
        assert_eq!(ctx.log.try_receive().map(|s| s.generation), Ok(1));
        assert!(ctx.alerts.try_receive().is_err());
    }

    #[test]
    fn test_display_keeps_only_latest() {
        let ctx = NodeContext::new();
        let distributor = distributor(&ctx);

        block_on(distributor.dispatch(sample(1, 2, 650)));
        block_on(distributor.dispatch(sample(2, 2, 660)));

        assert_eq!(ctx.display.try_take().map(|s| s.generation), Some(2));
        assert!(ctx.display.try_take().is_none());
        assert_eq!(ctx.log.len(), 2);
    }

    #[test]
    fn test_alert_pulse_is_queued_above_thresholds() {
        let ctx = NodeContext::new();
        let distributor = distributor(&ctx);

        block_on(distributor.dispatch(sample(1, 4, 1200)));
        block_on(distributor.dispatch(sample(2, 3, 1200)));

        assert_eq!(ctx.alerts.try_receive(), Ok(Duration::from_millis(500)));
        assert!(ctx.alerts.try_receive().is_err());
        assert_eq!(ctx.stats.snapshot().alerts_raised, 1);
    }

    #[test]
    fn test_full_log_queue_drops_without_blocking() {
        let ctx = NodeContext::new();
        let distributor = distributor(&ctx);

        for generation in 1..=LOG_QUEUE_DEPTH as u32 + 2 {
            block_on(distributor.dispatch(sample(generation, 2, 650)));
        }

        assert_eq!(ctx.stats.snapshot().log_drops, 2);
        // Order is preserved for what was kept.
        assert_eq!(ctx.log.try_receive().map(|s| s.generation), Ok(1));
        assert_eq!(
            ctx.display.try_take().map(|s| s.generation),
            Some(LOG_QUEUE_DEPTH as u32 + 2)
        );
    }

    #[test]
    fn test_run_forwards_until_shutdown() {
        let ctx = NodeContext::new();
        let distributor = distributor(&ctx);
        ctx.samples.try_send(sample(7, 2, 650)).unwrap();

        block_on(embassy_futures::join::join(distributor.run(), async {
            let forwarded = ctx.log.receive().await;
            ctx.shutdown.trigger();
            assert_eq!(forwarded.generation, 7);
        }));

        assert_eq!(ctx.display.try_take().map(|s| s.generation), Some(7));
    }
}
