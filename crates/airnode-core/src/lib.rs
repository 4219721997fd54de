//! Hardware-independent core library for airnode
//!
//! This crate contains the platform-agnostic acquisition pipeline of the
//! airnode air-quality monitor: shared I2C bus arbitration, the AHT21, BMP280
//! and ENS160 drivers, the sampling orchestrator, and the fan-out of composite
//! samples to the display, log and alert consumers.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod async_i2c_bus;
pub mod buzzer;
pub mod config;
pub mod display_manager;
pub mod distribution;
pub mod log_writer;
pub mod metrics;
pub mod sampling;
pub mod sensors;

#[cfg(any(test, feature = "simulation"))]
pub mod sim;
