//! Alerting and air-quality assessment
//!
//! The alert policy decides when the buzzer fires; the quality level is a
//! coarser eCO2 classification shown on the display.

use embassy_time::Duration;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::WebColors;

use crate::config::AlertConfig;
use crate::sensors::Ens160Reading;

/// Pure threshold rule for the buzzer.
///
/// Fires only when both the AQI and eCO2 strictly exceed their thresholds;
/// a reading sitting exactly on a threshold does not alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    aqi_threshold: u8,
    eco2_threshold_ppm: u16,
    pulse: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::new(&AlertConfig::default())
    }
}

impl AlertPolicy {
    pub const fn new(config: &AlertConfig) -> Self {
        Self {
            aqi_threshold: config.aqi_threshold,
            eco2_threshold_ppm: config.eco2_threshold_ppm,
            pulse: Duration::from_millis(config.pulse_ms as u64),
        }
    }

    pub const fn triggers(&self, reading: &Ens160Reading) -> bool {
        reading.aqi > self.aqi_threshold && reading.eco2_ppm > self.eco2_threshold_ppm
    }

    /// Pulse to emit for this reading, if any.
    pub fn evaluate(&self, reading: &Ens160Reading) -> Option<Duration> {
        self.triggers(reading).then_some(self.pulse)
    }
}

/// Indoor air quality derived from eCO2 concentration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AirQualityLevel {
    /// Below 600 ppm
    Excellent,
    /// Below 800 ppm
    Good,
    /// Below 1000 ppm
    Fair,
    /// Below 1500 ppm
    Poor,
    Bad,
}

impl AirQualityLevel {
    pub const fn assess(eco2_ppm: u16) -> Self {
        match eco2_ppm {
            0..600 => Self::Excellent,
            600..800 => Self::Good,
            800..1000 => Self::Fair,
            1000..1500 => Self::Poor,
            _ => Self::Bad,
        }
    }

    /// Get the display color for this quality level
    pub const fn color(self) -> Rgb565 {
        match self {
            Self::Excellent => Rgb565::CSS_GREEN,
            Self::Good => Rgb565::CSS_LIGHT_GREEN,
            Self::Fair => Rgb565::CSS_YELLOW,
            Self::Poor => Rgb565::CSS_ORANGE,
            Self::Bad => Rgb565::CSS_RED,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::Poor => "Poor",
            Self::Bad => "Bad",
        }
    }
}
