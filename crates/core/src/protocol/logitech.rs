//! Logitech 64-byte vendor report (legacy wired protocol, not HID++).
//!
//! Byte 0 is the command, byte 1 is always 0xFF.

use super::{put_u16_le, CommandKind, Lighting, ProtocolCommand, MAX_DPI_STAGES};
use crate::device::PollingRate;

pub const REPORT_LEN: usize = 64;

const CMD_POLL_RATE: u8 = 0x10;
const CMD_DPI: u8 = 0x11;
const CMD_DPI_STAGES: u8 = 0x12;
const CMD_RGB: u8 = 0x13;
const CMD_BUTTON: u8 = 0x14;

fn report(command: u8) -> [u8; REPORT_LEN] {
    let mut report = [0u8; REPORT_LEN];
    report[0] = command;
    report[1] = 0xFF;
    report
}

/// DPI as little-endian at 3..5. Byte 6 repeats the high byte for the Y axis.
pub fn set_dpi(dpi: u16) -> ProtocolCommand {
    let mut r = report(CMD_DPI);
    r[2] = 0x04;
    put_u16_le(&mut r, 3, dpi);
    r[5] = 0x00;
    r[6] = dpi.to_le_bytes()[1];
    ProtocolCommand::new(CommandKind::SetDpi, r.to_vec())
}

/// Up to five stages, little-endian pairs from byte 3. Extra stages are dropped.
pub fn set_dpi_stages(stages: &[u16]) -> ProtocolCommand {
    let mut r = report(CMD_DPI_STAGES);
    r[2] = 0x05;
    for (i, dpi) in stages.iter().take(MAX_DPI_STAGES).enumerate() {
        put_u16_le(&mut r, 3 + i * 2, *dpi);
    }
    ProtocolCommand::new(CommandKind::SetDpiStages, r.to_vec())
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
    let mut r = report(CMD_POLL_RATE);
    r[2] = poll_rate_code(rate);
    ProtocolCommand::new(CommandKind::SetPollRate, r.to_vec())
}

pub fn set_rgb(lighting: &Lighting) -> ProtocolCommand {
    let mut r = report(CMD_RGB);
    r[2] = lighting.mode.id();
    r[3] = lighting.color.r;
    r[4] = lighting.color.g;
    r[5] = lighting.color.b;
    r[6] = lighting.brightness_byte();
    r[7] = lighting.speed_byte();
    ProtocolCommand::new(CommandKind::SetRgb, r.to_vec())
}

pub fn set_button_mapping(button: u8, action: u8) -> ProtocolCommand {
    let mut r = report(CMD_BUTTON);
    r[2] = button;
    r[3] = action;
    ProtocolCommand::new(CommandKind::SetButtonMapping, r.to_vec())
}
