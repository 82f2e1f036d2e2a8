//! iBuyPower 65-byte output report (report ID 0 followed by 64 data bytes).

use super::{put_u16_le, CommandKind, Lighting, ProtocolCommand};
use crate::device::PollingRate;

pub const REPORT_LEN: usize = 65;

pub fn set_dpi(dpi: u16) -> ProtocolCommand {
    let mut r = [0u8; REPORT_LEN];
    r[1] = 0x07;
    r[2] = 0x01;
    put_u16_le(&mut r, 3, dpi);
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
    r[1] = 0x08;
    r[2] = poll_rate_code(rate);
    ProtocolCommand::new(CommandKind::SetPollRate, r.to_vec())
}

/// No brightness field; byte 6 is the effect speed.
pub fn set_rgb(lighting: &Lighting) -> ProtocolCommand {
    let mut r = [0u8; REPORT_LEN];
    r[1] = 0x0A;
    r[2] = lighting.mode.id();
    r[3] = lighting.color.r;
    r[4] = lighting.color.g;
    r[5] = lighting.color.b;
    r[6] = lighting.speed_byte();
    ProtocolCommand::new(CommandKind::SetRgb, r.to_vec())
}
