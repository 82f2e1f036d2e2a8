//! Fallback 64-byte report for mice from vendors without a dedicated encoder.
//!
//! Most white-label sensor boards accept this layout; byte 0 selects the
//! command group and byte 1 the sub-command.

use super::{put_u16_le, CommandKind, Lighting, ProtocolCommand, MAX_DPI_STAGES};
use crate::device::PollingRate;

pub const REPORT_LEN: usize = 64;

fn report(group: u8, sub: u8) -> [u8; REPORT_LEN] {
    let mut r = [0u8; REPORT_LEN];
    r[0] = group;
    r[1] = sub;
    r
}

pub fn set_dpi(dpi: u16) -> ProtocolCommand {
    let mut r = report(0x03, 0x0A);
    put_u16_le(&mut r, 2, dpi);
    ProtocolCommand::new(CommandKind::SetDpi, r.to_vec())
}

pub fn set_dpi_stages(stages: &[u16]) -> ProtocolCommand {
    let mut r = report(0x03, 0x0B);
    for (i, dpi) in stages.iter().take(MAX_DPI_STAGES).enumerate() {
        put_u16_le(&mut r, 2 + i * 2, *dpi);
    }
    ProtocolCommand::new(CommandKind::SetDpiStages, r.to_vec())
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
    let mut r = report(0x02, 0x01);
    r[2] = poll_rate_code(rate);
    ProtocolCommand::new(CommandKind::SetPollRate, r.to_vec())
}

pub fn set_debounce_time(ms: u8) -> ProtocolCommand {
    let mut r = report(0x05, 0x01);
    r[2] = ms;
    ProtocolCommand::new(CommandKind::SetDebounce, r.to_vec())
}

pub fn set_button_mapping(button: u8, action: u8) -> ProtocolCommand {
    let mut r = report(0x06, button);
    r[2] = action;
    ProtocolCommand::new(CommandKind::SetButtonMapping, r.to_vec())
}

pub fn set_led_color(lighting: &Lighting) -> ProtocolCommand {
    let mut r = report(0x04, lighting.mode.id());
    r[2] = lighting.color.r;
    r[3] = lighting.color.g;
    r[4] = lighting.color.b;
    r[5] = lighting.brightness_byte();
    r[6] = lighting.speed_byte();
    ProtocolCommand::new(CommandKind::SetRgb, r.to_vec())
}
