//! Per-deployment node configuration.
//!
//! Defaults reproduce the constants of the reference hardware build. A
//! deployment can override them with a postcard-encoded blob.

use alloc::vec::Vec;

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::sensors::{
    AHT21_DEFAULT_ADDRESS, Aht21Adjustment, BMP280_DEFAULT_ADDRESS, Bmp280Adjustment,
    ENS160_DEFAULT_ADDRESS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to decode configuration: {0:?}")]
    Decode(postcard::Error),
    #[error("failed to encode configuration: {0:?}")]
    Encode(postcard::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// 7-bit I2C addresses of the sensors.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddresses {
    pub aht21: u8,
    pub ens160: u8,
    pub bmp280: u8,
}

impl Default for DeviceAddresses {
    fn default() -> Self {
        Self {
            aht21: AHT21_DEFAULT_ADDRESS,
            ens160: ENS160_DEFAULT_ADDRESS,
            bmp280: BMP280_DEFAULT_ADDRESS,
        }
    }
}

/// Pipeline timing, all values in milliseconds.
///
/// Sensor conversion, reset and settle delays are protocol requirements and
/// live in the drivers and the sampler. Only scheduling knobs are here.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub measurement_interval_ms: u32,
    pub bus_timeout_ms: u32,
    pub bring_up_bus_timeout_ms: u32,
    /// Bounded wait for every producer-side channel send.
    pub send_timeout_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            measurement_interval_ms: 1000,
            bus_timeout_ms: 200,
            bring_up_bus_timeout_ms: 1000,
            send_timeout_ms: 50,
        }
    }
}

const fn millis(ms: u32) -> Duration {
    Duration::from_millis(ms as u64)
}

impl Timing {
    pub const fn measurement_interval(&self) -> Duration {
        millis(self.measurement_interval_ms)
    }

    pub const fn bus_timeout(&self) -> Duration {
        millis(self.bus_timeout_ms)
    }

    pub const fn bring_up_bus_timeout(&self) -> Duration {
        millis(self.bring_up_bus_timeout_ms)
    }

    pub const fn send_timeout(&self) -> Duration {
        millis(self.send_timeout_ms)
    }
}

/// Thresholds for the buzzer alert. Both must be exceeded strictly.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertConfig {
    pub aqi_threshold: u8,
    pub eco2_threshold_ppm: u16,
    pub pulse_ms: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            aqi_threshold: 3,
            eco2_threshold_ppm: 1000,
            pulse_ms: 500,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeConfig {
    pub addresses: DeviceAddresses,
    pub aht21: Aht21Adjustment,
    pub bmp280: Bmp280Adjustment,
    pub timing: Timing,
    pub alert: AlertConfig,
}

impl NodeConfig {
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(ConfigError::Encode)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let DeviceAddresses {
            aht21,
            ens160,
            bmp280,
        } = self.addresses;
        if [aht21, ens160, bmp280].iter().any(|&a| a > 0x7F) {
            return Err(ConfigError::Invalid("I2C address is not 7-bit"));
        }
        if aht21 == ens160 || aht21 == bmp280 || ens160 == bmp280 {
            return Err(ConfigError::Invalid("sensor addresses must be distinct"));
        }

        let t = &self.timing;
        if t.measurement_interval_ms == 0 || t.bus_timeout_ms == 0 || t.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid("intervals and timeouts must be non-zero"));
        }
        if t.bring_up_bus_timeout_ms == 0 {
            return Err(ConfigError::Invalid("bring-up bus timeout must be non-zero"));
        }

        let gains = [self.aht21.humidity_gain, self.bmp280.pressure_gain];
        if gains.iter().any(|g| !g.is_finite() || *g <= 0.0) {
            return Err(ConfigError::Invalid("gains must be finite and positive"));
        }
        let offsets = [
            self.aht21.temperature_offset_c,
            self.bmp280.temperature_offset_c,
        ];
        if offsets.iter().any(|o| !o.is_finite()) {
            return Err(ConfigError::Invalid("offsets must be finite"));
        }

        if self.alert.pulse_ms == 0 {
            return Err(ConfigError::Invalid("alert pulse must be non-zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::PressureUnit;

    #[test]
    fn test_defaults_match_reference_build() {
        let config = NodeConfig::default();

        assert_eq!(
            config.addresses,
            DeviceAddresses {
                aht21: 0x38,
                ens160: 0x53,
                bmp280: 0x76
            }
        );
        assert_eq!(config.aht21.temperature_offset_c, -4.0);
        assert_eq!(config.aht21.humidity_gain, 0.85);
        assert_eq!(config.bmp280.temperature_offset_c, -2.0);
        assert_eq!(config.bmp280.unit, PressureUnit::MillimetersOfMercury);
        assert_eq!(config.timing.measurement_interval(), Duration::from_millis(1000));
        assert_eq!(config.alert.pulse_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timing_holds_only_scheduling_knobs() {
        let timing = Timing {
            measurement_interval_ms: 1000,
            bus_timeout_ms: 200,
            bring_up_bus_timeout_ms: 1000,
            send_timeout_ms: 50,
        };

        assert_eq!(timing, Timing::default());
    }

    #[test]
    fn test_deployment_override_is_loaded() {
        let mut config = NodeConfig::default();
        config.addresses.bmp280 = 0x77;
        config.bmp280.unit = PressureUnit::Hectopascal;
        config.timing.measurement_interval_ms = 5000;

        let bytes = config.to_postcard().unwrap();
        let loaded = NodeConfig::from_postcard(&bytes).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let bytes = NodeConfig::default().to_postcard().unwrap();

        let result = NodeConfig::from_postcard(&bytes[..bytes.len() / 2]);

        assert!(matches!(result, Err(ConfigError::Decode(_))));
    }

    #[test]
    fn test_duplicate_addresses_are_rejected() {
        let mut config = NodeConfig::default();
        config.addresses.ens160 = config.addresses.aht21;

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let mut config = NodeConfig::default();
        config.timing.measurement_interval_ms = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_gain_is_rejected() {
        let mut config = NodeConfig::default();
        config.aht21.humidity_gain = 0.0;
        assert!(config.validate().is_err());

        config.aht21.humidity_gain = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_blob_fails_validation() {
        let mut config = NodeConfig::default();
        config.addresses.aht21 = 0x80;
        let bytes = config.to_postcard().unwrap();

        assert!(matches!(
            NodeConfig::from_postcard(&bytes),
            Err(ConfigError::Invalid(_))
        ));
    }
}
