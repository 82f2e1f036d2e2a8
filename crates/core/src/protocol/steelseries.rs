//! SteelSeries 64-byte vendor report.

use super::{put_u16_le, CommandKind, Lighting, ProtocolCommand};
use crate::device::PollingRate;

pub const REPORT_LEN: usize = 64;

pub fn set_dpi(dpi: u16) -> ProtocolCommand {
    let mut r = [0u8; REPORT_LEN];
    r[0] = 0x20;
    r[1] = 0x01;
    put_u16_le(&mut r, 2, dpi);
    ProtocolCommand::new(CommandKind::SetDpi, r.to_vec())
}

pub fn poll_rate_code(rate: PollingRate) -> u8 {
    match rate {
        PollingRate::Hz125 => 0x03,
        PollingRate::Hz250 => 0x02,
        PollingRate::Hz500 => 0x01,
        PollingRate::Hz1000 => 0x00,
    }
}

pub fn set_poll_rate(rate: PollingRate) -> ProtocolCommand {
    let mut r = [0u8; REPORT_LEN];
    r[0] = 0x21;
    r[1] = poll_rate_code(rate);
    ProtocolCommand::new(CommandKind::SetPollRate, r.to_vec())
}

pub fn set_rgb(lighting: &Lighting) -> ProtocolCommand {
    let mut r = [0u8; REPORT_LEN];
    r[0] = 0x22;
    r[1] = lighting.mode.id();
    r[2] = lighting.color.r;
    r[3] = lighting.color.g;
    r[4] = lighting.color.b;
    r[5] = lighting.brightness_byte();
    r[6] = lighting.speed_byte();
    ProtocolCommand::new(CommandKind::SetRgb, r.to_vec())
}

/// Lift-off distance in millimetres.
pub fn set_lod(mm: u8) -> ProtocolCommand {
    let mut r = [0u8; REPORT_LEN];
    r[0] = 0x23;
    r[1] = mm;
    ProtocolCommand::new(CommandKind::SetLiftOffDistance, r.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpi_layout() {
        assert_eq!(&set_dpi(3200).as_bytes()[..4], &[0x20, 0x01, 0x80, 0x0C]);
    }

    #[test]
    fn poll_rate_1000_is_zero_code() {
        assert_eq!(&set_poll_rate(PollingRate::Hz1000).as_bytes()[..2], &[0x21, 0x00]);
        assert_eq!(&set_poll_rate(PollingRate::Hz125).as_bytes()[..2], &[0x21, 0x03]);
    }

    #[test]
    fn lod_layout() {
        assert_eq!(&set_lod(2).as_bytes()[..2], &[0x23, 2]);
    }
}
