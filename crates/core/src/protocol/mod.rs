//! Vendor command encoders.
//!
//! Every supported vendor family has a module of pure functions that turn a
//! semantic setting into the exact report buffer the firmware expects.
//! [`VendorProtocol`] is the closed set of families; it is resolved once when
//! a [`DeviceDescriptor`](crate::device::DeviceDescriptor) is built.
//!
//! Protocol reference: openrazer (GPLv2, protocol knowledge only) and
//! libratbag (MIT) device notes.

pub mod cyberpower;
pub mod generic;
pub mod ibuypower;
pub mod logitech;
pub mod razer;
pub mod steelseries;

use crate::device::PollingRate;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Maximum number of DPI stages any family accepts.
pub const MAX_DPI_STAGES: usize = 5;

/// What a command does. Only used for logging and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    SetDpi,
    SetDpiStages,
    SetPollRate,
    SetRgb,
    SetLiftOffDistance,
    SetAngleSnapping,
    SetDebounce,
    SetButtonMapping,
    GetFirmwareVersion,
    EnterDfuMode,
    ExitDfuMode,
}

impl CommandKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetDpi => "set DPI",
            Self::SetDpiStages => "set DPI stages",
            Self::SetPollRate => "set polling rate",
            Self::SetRgb => "set RGB",
            Self::SetLiftOffDistance => "set lift-off distance",
            Self::SetAngleSnapping => "set angle snapping",
            Self::SetDebounce => "set debounce time",
            Self::SetButtonMapping => "set button mapping",
            Self::GetFirmwareVersion => "get firmware version",
            Self::EnterDfuMode => "enter DFU mode",
            Self::ExitDfuMode => "exit DFU mode",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// An encoded, fixed-format report ready for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolCommand {
    kind: CommandKind,
    bytes: Vec<u8>,
}

impl ProtocolCommand {
    pub fn new(kind: CommandKind, bytes: Vec<u8>) -> Self {
        Self { kind, bytes }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// RGB lighting effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightingMode {
    Static,
    Breathing,
    Spectrum,
    Wave,
    Reactive,
}

impl LightingMode {
    pub const ALL: &'static [LightingMode] = &[
        LightingMode::Static,
        LightingMode::Breathing,
        LightingMode::Spectrum,
        LightingMode::Wave,
        LightingMode::Reactive,
    ];

    /// Mode byte used by the short-report families.
    pub fn id(&self) -> u8 {
        match self {
            Self::Static => 0,
            Self::Breathing => 1,
            Self::Spectrum => 2,
            Self::Wave => 3,
            Self::Reactive => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Static => "Static",
            Self::Breathing => "Breathing",
            Self::Spectrum => "Spectrum",
            Self::Wave => "Wave",
            Self::Reactive => "Reactive",
        }
    }

    /// Parse a mode name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|mode| mode.label().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for LightingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// A validated lighting request. Brightness and speed are percentages (0..=100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lighting {
    pub color: Rgb,
    pub mode: LightingMode,
    pub brightness: u8,
    pub speed: u8,
}

impl Lighting {
    /// Brightness scaled to a full wire byte.
    pub fn brightness_byte(&self) -> u8 {
        percent_to_byte(self.brightness)
    }

    /// Speed scaled to a full wire byte.
    pub fn speed_byte(&self) -> u8 {
        percent_to_byte(self.speed)
    }
}

/// Scale 0..=100 to 0..=255, truncating like the vendor tools do.
pub fn percent_to_byte(percent: u8) -> u8 {
    (u16::from(percent.min(100)) * 255 / 100) as u8
}

/// Write a little-endian u16 at `offset`.
pub(crate) fn put_u16_le(report: &mut [u8], offset: usize, value: u16) {
    report[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Supported vendor protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VendorProtocol {
    Razer,
    Logitech,
    SteelSeries,
    Cyberpower,
    IBuyPower,
    Generic,
}

impl VendorProtocol {
    /// Resolve the family from the vendor table name. Unknown vendors use
    /// the generic 64-byte protocol.
    pub fn from_vendor_name(vendor: &str) -> Self {
        match vendor {
            "Razer" => Self::Razer,
            "Logitech" => Self::Logitech,
            "SteelSeries" => Self::SteelSeries,
            "CyberpowerPC" => Self::Cyberpower,
            "iBuyPower" => Self::IBuyPower,
            _ => Self::Generic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Razer => "Razer",
            Self::Logitech => "Logitech",
            Self::SteelSeries => "SteelSeries",
            Self::Cyberpower => "CyberpowerPC",
            Self::IBuyPower => "iBuyPower",
            Self::Generic => "generic",
        }
    }

    fn unsupported(&self, operation: &'static str) -> Error {
        Error::Unsupported {
            operation,
            family: self.name(),
        }
    }

    /// Encode a DPI change (same value on both axes).
    pub fn set_dpi(&self, dpi: u16) -> Result<ProtocolCommand> {
        match self {
            Self::Razer => razer::set_dpi(dpi, dpi),
            Self::Logitech => Ok(logitech::set_dpi(dpi)),
            Self::SteelSeries => Ok(steelseries::set_dpi(dpi)),
            Self::Cyberpower => cyberpower::set_dpi(dpi),
            Self::IBuyPower => Ok(ibuypower::set_dpi(dpi)),
            Self::Generic => Ok(generic::set_dpi(dpi)),
        }
    }

    /// Encode a polling rate change. Total over [`PollingRate`].
    pub fn set_poll_rate(&self, rate: PollingRate) -> ProtocolCommand {
        match self {
            Self::Razer => razer::set_poll_rate(rate),
            Self::Logitech => logitech::set_poll_rate(rate),
            Self::SteelSeries => steelseries::set_poll_rate(rate),
            Self::Cyberpower => cyberpower::set_poll_rate(rate),
            Self::IBuyPower => ibuypower::set_poll_rate(rate),
            Self::Generic => generic::set_poll_rate(rate),
        }
    }

    /// Encode a lighting change.
    pub fn set_rgb(&self, lighting: &Lighting) -> Result<ProtocolCommand> {
        match self {
            Self::Razer => razer::set_lighting(lighting),
            Self::Logitech => Ok(logitech::set_rgb(lighting)),
            Self::SteelSeries => Ok(steelseries::set_rgb(lighting)),
            Self::Cyberpower => Ok(cyberpower::set_rgb(lighting)),
            Self::IBuyPower => Ok(ibuypower::set_rgb(lighting)),
            Self::Generic => Ok(generic::set_led_color(lighting)),
        }
    }

    /// Encode a lift-off distance change (millimetres).
    pub fn set_lift_off_distance(&self, mm: u8) -> Result<ProtocolCommand> {
        match self {
            Self::Razer => razer::set_lift_off_distance(mm),
            Self::SteelSeries => Ok(steelseries::set_lod(mm)),
            Self::Cyberpower => Ok(cyberpower::set_lod(mm)),
            _ => Err(self.unsupported("lift-off distance")),
        }
    }

    /// Encode an angle snapping toggle.
    pub fn set_angle_snapping(&self, enabled: bool) -> Result<ProtocolCommand> {
        match self {
            Self::Razer => razer::set_angle_snapping(enabled),
            _ => Err(self.unsupported("angle snapping")),
        }
    }

    /// Encode a button debounce time change (milliseconds).
    pub fn set_debounce(&self, ms: u8) -> Result<ProtocolCommand> {
        match self {
            Self::Generic => Ok(generic::set_debounce_time(ms)),
            _ => Err(self.unsupported("debounce time")),
        }
    }

    /// Encode up to [`MAX_DPI_STAGES`] DPI stages.
    pub fn set_dpi_stages(&self, stages: &[u16]) -> Result<ProtocolCommand> {
        match self {
            Self::Logitech => Ok(logitech::set_dpi_stages(stages)),
            Self::Generic => Ok(generic::set_dpi_stages(stages)),
            _ => Err(self.unsupported("DPI stages")),
        }
    }

    /// Encode a raw button-to-action remap.
    pub fn set_button_mapping(&self, button: u8, action: u8) -> Result<ProtocolCommand> {
        match self {
            Self::Logitech => Ok(logitech::set_button_mapping(button, action)),
            Self::Generic => Ok(generic::set_button_mapping(button, action)),
            _ => Err(self.unsupported("button mapping")),
        }
    }

    /// Encode a firmware version request.
    pub fn get_firmware_version(&self) -> Result<ProtocolCommand> {
        match self {
            Self::Razer => razer::get_firmware_version(),
            _ => Err(self.unsupported("firmware version")),
        }
    }

    /// Encode the switch into the firmware-update bootloader.
    pub fn enter_dfu_mode(&self) -> Result<ProtocolCommand> {
        match self {
            Self::Razer => razer::enter_dfu_mode(),
            _ => Err(self.unsupported("DFU mode")),
        }
    }

    /// Encode the switch back out of the firmware-update bootloader.
    pub fn exit_dfu_mode(&self) -> Result<ProtocolCommand> {
        match self {
            Self::Razer => razer::exit_dfu_mode(),
            _ => Err(self.unsupported("DFU mode")),
        }
    }
}

impl std::fmt::Display for VendorProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
