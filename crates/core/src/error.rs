//! Error types for open-mouse-core.

use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum Error {
    /// HID bus enumeration failed. Callers of `scan` never see this; it is
    /// logged and turned into an empty device list.
    #[error("enumeration failed: {0}")]
    Enumeration(String),

    /// HID device communication failure.
    #[error("HID error: {0}")]
    Hid(String),

    /// Raw USB communication failure.
    #[error("USB error: {0}")]
    Usb(String),

    /// Device not found on the bus.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Every connection strategy failed.
    #[error("no supported connection after {attempts} strategies: {last_error}")]
    ConnectFailed { attempts: usize, last_error: String },

    /// Every transfer method failed on every retry.
    #[error("transfer failed after {retries} retries: {last_error}")]
    Transfer { retries: u32, last_error: String },

    /// Value out of safe range.
    #[error("value out of range: {field} = {value} (allowed {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Value that is not range-based but still malformed (colour strings, rate tables).
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// The device's protocol family has no encoding for this operation.
    #[error("{operation} is not supported by the {family} protocol")]
    Unsupported {
        operation: &'static str,
        family: &'static str,
    },

    /// Permission denied by the OS (udev rules, exclusive access, admin rights).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation requires a connected device.
    #[error("device not connected")]
    NotConnected,

    /// Connection attempt was cancelled by an explicit disconnect.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The supervisor worker could not be started or has gone away.
    #[error("supervisor worker: {0}")]
    Worker(String),
}

impl From<hidapi::HidError> for Error {
    fn from(err: hidapi::HidError) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();
        if lower.contains("permission") || lower.contains("access denied") {
            Self::PermissionDenied(message)
        } else {
            Self::Hid(message)
        }
    }
}

impl From<rusb::Error> for Error {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Access => Self::PermissionDenied(err.to_string()),
            rusb::Error::NoDevice | rusb::Error::NotFound => {
                Self::DeviceNotFound(err.to_string())
            }
            rusb::Error::Timeout => Self::Timeout(err.to_string()),
            other => Self::Usb(other.to_string()),
        }
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
