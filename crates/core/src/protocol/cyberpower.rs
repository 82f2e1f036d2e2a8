//! CyberpowerPC 8-byte output report. Byte 0 is the report ID (always 0).

use super::{CommandKind, Lighting, ProtocolCommand};
use crate::device::PollingRate;
use crate::error::{Error, Result};

pub const REPORT_LEN: usize = 8;

/// DPI travels as `dpi / 50` in one byte.
pub const MAX_ENCODABLE_DPI: u16 = 12_750;

fn report(command: u8) -> [u8; REPORT_LEN] {
    let mut r = [0u8; REPORT_LEN];
    r[1] = command;
    r
}

pub fn set_dpi(dpi: u16) -> Result<ProtocolCommand> {
    let step = u8::try_from(dpi / 50).map_err(|_| Error::OutOfRange {
        field: "dpi",
        value: u32::from(dpi),
        min: 0,
        max: u32::from(MAX_ENCODABLE_DPI),
    })?;
    let mut r = report(0x10);
    r[2] = step;
    Ok(ProtocolCommand::new(CommandKind::SetDpi, r.to_vec()))
}

pub fn poll_rate_code(rate: PollingRate) -> u8 {
    match rate {
        PollingRate::Hz125 => 0x08,
        PollingRate::Hz250 => 0x04,
        PollingRate::Hz500 => 0x02,
        PollingRate::Hz1000 => 0x01,
    }
}

pub fn set_poll_rate(rate: PollingRate) -> ProtocolCommand {
    let mut r = report(0x11);
    r[2] = poll_rate_code(rate);
    ProtocolCommand::new(CommandKind::SetPollRate, r.to_vec())
}

/// No speed field in this report.
pub fn set_rgb(lighting: &Lighting) -> ProtocolCommand {
    let mut r = report(0x12);
    r[2] = lighting.mode.id();
    r[3] = lighting.color.r;
    r[4] = lighting.color.g;
    r[5] = lighting.color.b;
    r[6] = lighting.brightness_byte();
    ProtocolCommand::new(CommandKind::SetRgb, r.to_vec())
}

pub fn set_lod(mm: u8) -> ProtocolCommand {
    let mut r = report(0x13);
    r[2] = mm;
    ProtocolCommand::new(CommandKind::SetLiftOffDistance, r.to_vec())
}
