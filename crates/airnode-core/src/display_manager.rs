//! Display Manager for the measurement screen
//!
//! This module turns the latest published sample into a four-line text frame
//! and draws it onto any `embedded-graphics` target:
//! - Waits on the overwrite-latest display slot, so a slow panel only ever
//!   skips stale frames
//! - Colors the eCO2 line by air-quality level
//! - Redraws only when a new frame arrives
//! - Shows a splash banner before the first frame

use core::fmt::{self, Write as _};

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::mono_font::iso_8859_1::{FONT_6X10, FONT_10X20};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Alignment, Baseline, Text};
use log::{debug, error, info, warn};

use crate::app_state::NodeContext;
use crate::metrics::AirQualityLevel;
use crate::sampling::CompositeSample;
use crate::sensors::PressureUnit;

const LINE_CAPACITY: usize = 48;
const LINE_COUNT: usize = 4;

const MARGIN: i32 = 4;
const LINE_SPACING: i32 = 14;

const SPLASH_TEXT: &str = "airnode";
/// How long the splash stays up before the first frame may replace it.
pub const SPLASH_DURATION: Duration = Duration::from_millis(3000);

pub type Line = heapless::String<LINE_CAPACITY>;

fn line(args: fmt::Arguments<'_>) -> Line {
    let mut line = Line::new();
    if line.write_fmt(args).is_err() {
        warn!("Display line truncated at {} bytes", LINE_CAPACITY);
    }
    line
}

/// Text content of one screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    pub lines: [Line; LINE_COUNT],
    pub level: AirQualityLevel,
}

impl DisplayFrame {
    /// Ambient temperature comes from the BMP280 and humidity from the AHT21.
    pub fn from_sample(sample: &CompositeSample, unit: PressureUnit) -> Self {
        let ens160 = &sample.ens160;
        Self {
            lines: [
                line(format_args!(
                    "{:.2} °C  {:.2} %   {:.0} {}",
                    sample.bmp280.temperature_c,
                    sample.aht21.humidity_pct,
                    sample.bmp280.pressure,
                    unit.label()
                )),
                line(format_args!("AQI   : {}", ens160.aqi)),
                line(format_args!("TVOC  : {} ppb", ens160.tvoc_ppb)),
                line(format_args!("ECO2  : {} ppm", ens160.eco2_ppm)),
            ],
            level: AirQualityLevel::assess(ens160.eco2_ppm),
        }
    }
}

/// Display manager that owns the display and draws measurement frames
pub struct DisplayManager<D>
where
    D: DrawTarget<Color = Rgb565>,
{
    display: D,
    unit: PressureUnit,
    frame: Option<DisplayFrame>,
    needs_redraw: bool,
    splash: Duration,
}

impl<D> DisplayManager<D>
where
    D: DrawTarget<Color = Rgb565>,
{
    pub fn new(display: D, unit: PressureUnit) -> Self {
        Self {
            display,
            unit,
            frame: None,
            needs_redraw: true,
            splash: SPLASH_DURATION,
        }
    }

    /// Override how long [`run`](Self::run) holds the splash.
    pub fn with_splash(mut self, duration: Duration) -> Self {
        self.splash = duration;
        self
    }

    pub fn frame(&self) -> Option<&DisplayFrame> {
        self.frame.as_ref()
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Replace the current frame with one built from `sample`
    pub fn show(&mut self, sample: &CompositeSample) {
        let frame = DisplayFrame::from_sample(sample, self.unit);
        if self.frame.as_ref() != Some(&frame) {
            self.frame = Some(frame);
            self.needs_redraw = true;
        }
    }

    /// Draw the splash banner centered on a cleared screen
    pub fn draw_splash(&mut self) -> Result<(), D::Error> {
        self.display.clear(Rgb565::BLACK)?;
        let style = MonoTextStyle::new(&FONT_10X20, Rgb565::WHITE);
        let center = self.display.bounding_box().center();
        Text::with_alignment(SPLASH_TEXT, center, style, Alignment::Center)
            .draw(&mut self.display)?;
        self.needs_redraw = true;
        Ok(())
    }

    /// Render the current frame if needed
    pub fn render(&mut self) -> Result<(), D::Error> {
        if !self.needs_redraw {
            return Ok(());
        }
        debug!("Display: rendering frame");
        self.display.clear(Rgb565::BLACK)?;

        if let Some(frame) = &self.frame {
            let text_style = MonoTextStyle::new(&FONT_6X10, Rgb565::WHITE);
            let level_style = MonoTextStyle::new(&FONT_6X10, frame.level.color());

            for (row, text) in frame.lines.iter().enumerate() {
                let style = if row == LINE_COUNT - 1 {
                    level_style
                } else {
                    text_style
                };
                let origin = Point::new(MARGIN, MARGIN + row as i32 * LINE_SPACING);
                Text::with_baseline(text.as_str(), origin, style, Baseline::Top)
                    .draw(&mut self.display)?;
            }
        }

        self.needs_redraw = false;
        Ok(())
    }

    /// Run the display manager task
    ///
    /// Draws every frame published to the display slot until shutdown.
    pub async fn run(&mut self, ctx: &NodeContext)
    where
        D::Error: core::fmt::Debug,
    {
        info!("Display: started");

        if let Err(e) = self.draw_splash() {
            error!("Display: splash error {:?}", e);
        }
        if let Either::Second(()) = select(Timer::after(self.splash), ctx.shutdown.wait()).await {
            info!("Display: shutdown");
            return;
        }

        loop {
            match select(ctx.display.wait(), ctx.shutdown.wait()).await {
                Either::First(sample) => {
                    self.show(&sample);
                    if let Err(e) = self.render() {
                        error!("Display: render error {:?}", e);
                    }
                }
                Either::Second(()) => {
                    info!("Display: shutdown");
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
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use alloc::vec::Vec;

    /// Draw target that only counts lit pixels per color.
    struct CountingDisplay {
        white: usize,
        other: usize,
        clears: usize,
        /// White pixel count at the moment of each clear.
        white_at_clear: Vec<usize>,
    }

    impl CountingDisplay {
        fn new() -> Self {
            Self {
                white: 0,
                other: 0,
                clears: 0,
                white_at_clear: Vec::new(),
            }
        }
    }

    impl OriginDimensions for CountingDisplay {
        fn size(&self) -> Size {
            Size::new(320, 240)
        }
    }

    impl DrawTarget for CountingDisplay {
        type Color = Rgb565;
        type Error = Infallible;

        fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
        where
            I: IntoIterator<Item = Pixel<Self::Color>>,
        {
            for Pixel(_, color) in pixels {
                if color == Rgb565::WHITE {
                    self.white += 1;
                } else if color != Rgb565::BLACK {
                    self.other += 1;
                }
            }
            Ok(())
        }

        fn clear(&mut self, _color: Self::Color) -> Result<(), Self::Error> {
            self.white_at_clear.push(self.white);
            self.clears += 1;
            Ok(())
        }
    }

    fn sample(eco2_ppm: u16) -> CompositeSample {
        CompositeSample {
            generation: 1,
            timestamp_ms: 1000,
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
                eco2_ppm,
            },
        }
    }

    #[test]
    fn test_frame_text_layout() {
        let frame = DisplayFrame::from_sample(&sample(650), PressureUnit::MillimetersOfMercury);

        assert_eq!(frame.lines[0].as_str(), "23.08 °C  42.50 %   755 mmHg");
        assert_eq!(frame.lines[1].as_str(), "AQI   : 2");
        assert_eq!(frame.lines[2].as_str(), "TVOC  : 120 ppb");
        assert_eq!(frame.lines[3].as_str(), "ECO2  : 650 ppm");
        assert_eq!(frame.level, AirQualityLevel::Good);
    }

    #[test]
    fn test_render_draws_eco2_line_in_level_color() {
        let mut manager = DisplayManager::new(CountingDisplay::new(), PressureUnit::default());

        manager.show(&sample(1600));
        manager.render().unwrap();

        assert_eq!(manager.display().clears, 1);
        assert!(manager.display().white > 0);
        assert!(manager.display().other > 0);
    }

    #[test]
    fn test_identical_frame_is_not_redrawn() {
        let mut manager = DisplayManager::new(CountingDisplay::new(), PressureUnit::default());

        manager.show(&sample(650));
        manager.render().unwrap();
        manager.show(&sample(650));
        manager.render().unwrap();

        assert_eq!(manager.display().clears, 1);
    }

    #[test]
    fn test_run_draws_latest_sample() {
        let ctx = NodeContext::new();
        let mut manager = DisplayManager::new(CountingDisplay::new(), PressureUnit::default())
            .with_splash(Duration::from_millis(0));
        ctx.display.signal(sample(900));

        block_on(join(manager.run(&ctx), async {
            Timer::after_millis(5).await;
            ctx.shutdown.trigger();
        }));

        let frame = manager.frame().unwrap();
        assert_eq!(frame.lines[3].as_str(), "ECO2  : 900 ppm");
        assert_eq!(frame.level, AirQualityLevel::Fair);
    }

    #[test]
    fn test_splash_draws_banner() {
        let mut manager = DisplayManager::new(CountingDisplay::new(), PressureUnit::default());

        manager.draw_splash().unwrap();

        assert_eq!(manager.display().clears, 1);
        assert!(manager.display().white > 0);
        assert!(manager.frame().is_none());
    }

    #[test]
    fn test_splash_precedes_first_frame() {
        let ctx = NodeContext::new();
        let mut manager = DisplayManager::new(CountingDisplay::new(), PressureUnit::default())
            .with_splash(Duration::from_millis(10));
        ctx.display.signal(sample(650));

        block_on(join(manager.run(&ctx), async {
            Timer::after_millis(30).await;
            ctx.shutdown.trigger();
        }));

        let display = manager.display();
        // Splash clear on a blank panel, then the frame clear over the banner
        assert_eq!(display.white_at_clear.len(), 2);
        assert_eq!(display.white_at_clear[0], 0);
        assert!(display.white_at_clear[1] > 0);
        assert!(display.white > display.white_at_clear[1]);
        assert!(manager.frame().is_some());
    }

    #[test]
    fn test_shutdown_during_splash_skips_frames() {
        let ctx = NodeContext::new();
        let mut manager = DisplayManager::new(CountingDisplay::new(), PressureUnit::default());
        ctx.display.signal(sample(650));
        ctx.shutdown.trigger();

        block_on(manager.run(&ctx));

        assert_eq!(manager.display().clears, 1);
        assert!(manager.frame().is_none());
    }
}
