//! open-mouse-core: device discovery, vendor protocol encoders, fallback
//! transports, and connection supervision for gaming mice.
//!
//! This crate provides the cross-platform core logic for configuring gaming
//! mice over USB HID, falling back to raw USB transfers via libusb when the
//! HID stack refuses to cooperate.

pub mod config;
pub mod connector;
pub mod device;
pub mod dispatch;
pub mod error;
#[cfg(test)]
mod integration_tests;
pub mod metrics;
pub mod native;
pub mod protocol;
pub mod safety;
pub mod scheduler;
pub mod setting;
pub mod supervisor;
pub mod transport;

pub use device::{scan, DeviceDescriptor, PollingRate};
pub use error::{Error, Result};
pub use supervisor::{ConnectionState, Supervisor};

/// USB Vendor IDs with a dedicated protocol encoder.
pub mod vids {
    /// Razer (primary ID).
    pub const RAZER: u16 = 0x1532;
    /// Logitech.
    pub const LOGITECH: u16 = 0x046D;
    /// SteelSeries.
    pub const STEELSERIES: u16 = 0x2516;
    /// CyberpowerPC (shares this ID with other OEM boards).
    pub const CYBERPOWER: u16 = 0x1B1C;
    /// iBuyPower.
    pub const IBUYPOWER: u16 = 0x26CE;
}
