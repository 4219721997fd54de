//! Serial measurement log
//!
//! Each sample becomes one comma-separated record terminated by `;`:
//! `aht21_t,aht21_h,bmp280_t,bmp280_p,aqi,tvoc,eco2;`

use core::fmt::Write as _;

use embassy_futures::select::{Either, select};
use embedded_io_async::Write;
use log::{error, info, warn};

use crate::app_state::NodeContext;
use crate::sampling::CompositeSample;

pub const RECORD_CAPACITY: usize = 96;

pub type LogRecord = heapless::String<RECORD_CAPACITY>;

pub fn format_record(sample: &CompositeSample) -> LogRecord {
    let mut record = LogRecord::new();
    let written = write!(
        record,
        "{:.2},{:.2},{:.2},{:.2},{},{},{};",
        sample.aht21.temperature_c,
        sample.aht21.humidity_pct,
        sample.bmp280.temperature_c,
        sample.bmp280.pressure,
        sample.ens160.aqi,
        sample.ens160.tvoc_ppb,
        sample.ens160.eco2_ppm,
    );
    if written.is_err() {
        warn!("Log record truncated at {} bytes", RECORD_CAPACITY);
    }
    record
}

/// Drains the log queue into a byte sink such as a UART.
pub struct LogWriter<W> {
    sink: W,
}

impl<W: Write> LogWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub async fn write_sample(&mut self, sample: &CompositeSample) -> Result<(), W::Error> {
        let record = format_record(sample);
        self.sink.write_all(record.as_bytes()).await?;
        self.sink.flush().await
    }

    /// Write queued records in order until shutdown. Sink errors lose the
    /// affected record only.
    pub async fn run(&mut self, ctx: &NodeContext) {
        info!("Log writer: started");
        loop {
            match select(ctx.log.receive(), ctx.shutdown.wait()).await {
                Either::First(sample) => {
                    if let Err(e) = self.write_sample(&sample).await {
                        error!(
                            "Log writer: failed to write generation {}: {:?}",
                            sample.generation, e
                        );
                    }
                }
                Either::Second(()) => {
                    info!("Log writer: shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{Aht21Reading, Bmp280Reading, Ens160Reading};
    use alloc::vec::Vec;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embassy_futures::join::join;

    #[derive(Default)]
    struct Capture(Vec<u8>);

    impl embedded_io_async::ErrorType for Capture {
        type Error = Infallible;
    }

    impl Write for Capture {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn sample(generation: u32) -> CompositeSample {
        CompositeSample {
            generation,
            timestamp_ms: 0,
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
                aqi: 2,
                tvoc_ppb: 120,
                eco2_ppm: 650,
            },
        }
    }

    #[test]
    fn test_record_format() {
        assert_eq!(
            format_record(&sample(1)).as_str(),
            "21.00,42.50,23.08,754.96,2,120,650;"
        );
    }

    #[test]
    fn test_negative_values_fit() {
        let mut s = sample(1);
        s.aht21.temperature_c = -39.99;
        s.bmp280.pressure = 100_653.27;
        s.ens160.tvoc_ppb = u16::MAX;
        s.ens160.eco2_ppm = u16::MAX;

        let record = format_record(&s);

        assert!(record.starts_with("-39.99,"));
        assert!(record.ends_with(",65535,65535;"));
    }

    #[test]
    fn test_run_writes_queued_records_in_order() {
        let ctx = NodeContext::new();
        ctx.log.try_send(sample(1)).unwrap();
        ctx.log.try_send(sample(2)).unwrap();
        let mut writer = LogWriter::new(Capture::default());

        block_on(join(writer.run(&ctx), async {
            while !ctx.log.is_empty() {
                embassy_futures::yield_now().await;
            }
            ctx.shutdown.trigger();
        }));

        let written = writer.into_inner().0;
        let expected = "21.00,42.50,23.08,754.96,2,120,650;";
        assert_eq!(written, [expected, expected].concat().as_bytes());
    }
}
