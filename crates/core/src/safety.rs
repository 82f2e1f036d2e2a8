//! Safety layer: validates every write parameter against known-safe ranges
//! before anything is encoded or sent to the device.
//!
//! # Ranges
//!
//! | setting          | accepted                          |
//! |------------------|-----------------------------------|
//! | DPI              | 100 – 20,000 (no rounding)        |
//! | DPI stages       | 1 – 5 stages, each a valid DPI    |
//! | polling rate     | 125, 250, 500, 1000 Hz            |
//! | colour           | `#RRGGBB`                         |
//! | brightness/speed | 0 – 100 %                         |
//! | lift-off         | 1 – 3 mm                          |
//! | debounce         | 2 – 16 ms                         |
//!
//! Vendor encoders may impose a tighter ceiling of their own (the Razer and
//! CyberpowerPC single-byte DPI encodings); those are reported by the encoder.
//!
//! Firmware-mode switches (DFU enter/exit) are gated behind an explicit
//! acknowledgement and never happen implicitly.

use crate::device::PollingRate;
use crate::error::{Error, Result};
use crate::protocol::{Lighting, LightingMode, Rgb, MAX_DPI_STAGES};

/// Bricking risk disclaimer. Show it before any firmware-mode switch.
pub const BRICKING_DISCLAIMER: &str = "\
WARNING: Switching a mouse into or out of firmware-update (DFU) mode talks \
directly to its bootloader. An interrupted or unexpected switch can leave the \
device unresponsive until it is recovered with the vendor's own tools. \
Only continue if you know how to recover your model. Use at your own risk.";

pub const DPI_MIN: u16 = 100;
pub const DPI_MAX: u16 = 20_000;

pub const LOD_MIN_MM: u8 = 1;
pub const LOD_MAX_MM: u8 = 3;

pub const DEBOUNCE_MIN_MS: u8 = 2;
pub const DEBOUNCE_MAX_MS: u8 = 16;

fn check_range<T>(field: &'static str, value: T, min: T, max: T) -> Result<T>
where
    T: PartialOrd + Into<u32> + Copy,
{
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(Error::OutOfRange {
            field,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        })
    }
}

/// Validate a DPI value. Values are passed through unchanged.
pub fn validate_dpi(dpi: u16) -> Result<u16> {
    check_range("dpi", dpi, DPI_MIN, DPI_MAX)
}

/// Validate a list of DPI stages.
pub fn validate_dpi_stages(stages: &[u16]) -> Result<Vec<u16>> {
    if stages.is_empty() || stages.len() > MAX_DPI_STAGES {
        return Err(Error::OutOfRange {
            field: "dpi_stages",
            value: stages.len() as u32,
            min: 1,
            max: MAX_DPI_STAGES as u32,
        });
    }
    stages.iter().map(|dpi| validate_dpi(*dpi)).collect()
}

/// Validate a polling rate value.
pub fn validate_polling_rate(hz: u16) -> Result<PollingRate> {
    PollingRate::from_hz(hz).ok_or_else(|| Error::InvalidValue {
        field: "polling_rate",
        reason: format!("{hz} Hz is not one of 125, 250, 500, 1000"),
    })
}

/// Parse `#RRGGBB` (the leading `#` is optional).
pub fn parse_color(color: &str) -> Result<Rgb> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    let invalid = || Error::InvalidValue {
        field: "color",
        reason: format!("{color:?} is not #RRGGBB"),
    };
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
    Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
}

/// Validate a 0..=100 percentage.
pub fn validate_percent(field: &'static str, value: u8) -> Result<u8> {
    check_range(field, value, 0, 100)
}

/// Validate a full lighting request.
pub fn validate_lighting(
    color: &str,
    mode: LightingMode,
    brightness: u8,
    speed: u8,
) -> Result<Lighting> {
    Ok(Lighting {
        color: parse_color(color)?,
        mode,
        brightness: validate_percent("brightness", brightness)?,
        speed: validate_percent("speed", speed)?,
    })
}

/// Validate a lift-off distance in millimetres.
pub fn validate_lod(mm: u8) -> Result<u8> {
    check_range("lift_off_distance", mm, LOD_MIN_MM, LOD_MAX_MM)
}

/// Validate a debounce time in milliseconds.
pub fn validate_debounce(ms: u8) -> Result<u8> {
    check_range("debounce", ms, DEBOUNCE_MIN_MS, DEBOUNCE_MAX_MS)
}

/// Refuse a firmware-mode switch unless the caller acknowledged the risk.
pub fn confirm_firmware_mode(acknowledged: bool) -> Result<()> {
    if acknowledged {
        Ok(())
    } else {
        Err(Error::InvalidValue {
            field: "firmware_mode",
            reason: "DFU mode switch requires explicit acknowledgement".into(),
        })
    }
}
