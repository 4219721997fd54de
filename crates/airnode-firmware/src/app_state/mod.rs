//! Firmware-specific application state extensions
//!
//! Re-exports the hardware-independent app state from `airnode_core` and
//! adds ESP32-specific hardware initialization.

mod hardware;

pub use hardware::*;

// Re-export all shared app state types from airnode-core
pub use airnode_core::app_state::*;
