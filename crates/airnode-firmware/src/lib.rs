//! ESP32-S3 firmware-specific modules for airnode
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: ESP32 peripheral initialization and the embassy tasks that run
//! the acquisition pipeline.

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod tasks;
