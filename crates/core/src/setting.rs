//! Semantic settings a caller can apply to a mouse.
//!
//! A [`Setting`] is validated and encoded in one step so nothing out of range
//! ever reaches a transport.

use crate::error::Result;
use crate::protocol::{LightingMode, ProtocolCommand, VendorProtocol};
use crate::safety;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    Dpi(u16),
    DpiStages(Vec<u16>),
    PollingRate(u16),
    Rgb {
        color: String,
        mode: LightingMode,
        brightness: u8,
        speed: u8,
    },
    LiftOffDistance(u8),
    AngleSnapping(bool),
    Debounce(u8),
    ButtonMapping {
        button: u8,
        action: u8,
    },
}

impl Setting {
    /// Validate, then encode for `protocol`.
    pub fn encode(&self, protocol: VendorProtocol) -> Result<ProtocolCommand> {
        match self {
            Self::Dpi(dpi) => protocol.set_dpi(safety::validate_dpi(*dpi)?),
            Self::DpiStages(stages) => {
                protocol.set_dpi_stages(&safety::validate_dpi_stages(stages)?)
            }
            Self::PollingRate(hz) => {
                Ok(protocol.set_poll_rate(safety::validate_polling_rate(*hz)?))
            }
            Self::Rgb {
                color,
                mode,
                brightness,
                speed,
            } => protocol.set_rgb(&safety::validate_lighting(
                color,
                *mode,
                *brightness,
                *speed,
            )?),
            Self::LiftOffDistance(mm) => {
                protocol.set_lift_off_distance(safety::validate_lod(*mm)?)
            }
            Self::AngleSnapping(enabled) => protocol.set_angle_snapping(*enabled),
            Self::Debounce(ms) => protocol.set_debounce(safety::validate_debounce(*ms)?),
            Self::ButtonMapping { button, action } => {
                protocol.set_button_mapping(*button, *action)
            }
        }
    }
}

impl std::fmt::Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dpi(dpi) => write!(f, "DPI {dpi}"),
            Self::DpiStages(stages) => write!(f, "DPI stages {stages:?}"),
            Self::PollingRate(hz) => write!(f, "polling rate {hz} Hz"),
            Self::Rgb {
                color,
                mode,
                brightness,
                speed,
            } => write!(
                f,
                "RGB {color} {mode} (brightness {brightness}%, speed {speed}%)"
            ),
            Self::LiftOffDistance(mm) => write!(f, "lift-off distance {mm} mm"),
            Self::AngleSnapping(enabled) => {
                write!(f, "angle snapping {}", if *enabled { "on" } else { "off" })
            }
            Self::Debounce(ms) => write!(f, "debounce {ms} ms"),
            Self::ButtonMapping { button, action } => {
                write!(f, "button {button} -> action {action}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::CommandKind;

    #[test]
    fn validation_runs_before_encoding() {
        let err = Setting::PollingRate(333)
            .encode(VendorProtocol::Razer)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { field: "polling_rate", .. }));

        let err = Setting::Dpi(50).encode(VendorProtocol::Generic).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { field: "dpi", .. }));
    }

    #[test]
    fn cyberpower_ceiling_surfaces_from_encoder() {
        assert!(Setting::Dpi(12_000).encode(VendorProtocol::Cyberpower).is_ok());
        assert!(matches!(
            Setting::Dpi(16_000).encode(VendorProtocol::Cyberpower),
            Err(Error::OutOfRange { max: 12_750, .. })
        ));
    }

    #[test]
    fn rgb_setting_encodes_for_every_family() {
        let setting = Setting::Rgb {
            color: "#00FF00".into(),
            mode: LightingMode::Static,
            brightness: 80,
            speed: 50,
        };
        for family in [
            VendorProtocol::Razer,
            VendorProtocol::Logitech,
            VendorProtocol::SteelSeries,
            VendorProtocol::Cyberpower,
            VendorProtocol::IBuyPower,
            VendorProtocol::Generic,
        ] {
            assert_eq!(setting.encode(family).unwrap().kind(), CommandKind::SetRgb);
        }
    }

    #[test]
    fn unsupported_family_rejected() {
        assert!(matches!(
            Setting::Debounce(4).encode(VendorProtocol::Razer),
            Err(Error::Unsupported { .. })
        ));
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(Setting::Dpi(1600).to_string(), "DPI 1600");
        assert_eq!(Setting::AngleSnapping(true).to_string(), "angle snapping on");
    }
}
