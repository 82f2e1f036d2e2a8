//! Razer 90-byte feature report.
//!
//! Layout:
//!
//! | offset | meaning                                  |
//! |--------|------------------------------------------|
//! | 0      | status (0x00 = new command)              |
//! | 1      | transaction id                           |
//! | 2..=4  | remaining packets / protocol type        |
//! | 5      | payload length                           |
//! | 6      | command class                            |
//! | 7      | command id                               |
//! | 8..88  | payload (up to 80 bytes)                 |
//! | 88     | XOR of bytes 2..88                       |
//! | 89     | reserved                                 |

use super::{CommandKind, Lighting, LightingMode, ProtocolCommand};
use crate::device::PollingRate;
use crate::error::{Error, Result};

pub const REPORT_LEN: usize = 90;
pub const PAYLOAD_OFFSET: usize = 8;
pub const MAX_PAYLOAD: usize = 80;
pub const CHECKSUM_OFFSET: usize = 88;

/// Highest DPI the single-byte `dpi / 100` encoding can carry.
pub const MAX_ENCODABLE_DPI: u16 = 25_500;

const CLASS_DEVICE: u8 = 0x00;
const CLASS_LIGHTING: u8 = 0x03;
const CLASS_SENSOR: u8 = 0x04;
const CLASS_DFU: u8 = 0xFF;

const VARSTORE: u8 = 0x01;
const LED_LOGO: u8 = 0x01;

/// XOR of bytes `2..88`.
pub fn checksum(report: &[u8]) -> u8 {
    report[2..CHECKSUM_OFFSET].iter().fold(0, |acc, b| acc ^ b)
}

/// Frame a command. The length byte always equals `payload.len()`.
pub fn build_report(class: u8, id: u8, payload: &[u8]) -> Result<[u8; REPORT_LEN]> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::InvalidValue {
            field: "payload",
            reason: format!("{} bytes exceeds {MAX_PAYLOAD}", payload.len()),
        });
    }
    Ok(frame(class, id, payload))
}

/// Frame a payload already known to fit. Anything past `MAX_PAYLOAD` is cut.
fn frame(class: u8, id: u8, payload: &[u8]) -> [u8; REPORT_LEN] {
    let payload = &payload[..payload.len().min(MAX_PAYLOAD)];
    let mut report = [0u8; REPORT_LEN];
    report[5] = payload.len() as u8;
    report[6] = class;
    report[7] = id;
    report[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
    report[CHECKSUM_OFFSET] = checksum(&report);
    report
}

fn command(kind: CommandKind, class: u8, id: u8, payload: &[u8]) -> Result<ProtocolCommand> {
    Ok(ProtocolCommand::new(
        kind,
        build_report(class, id, payload)?.to_vec(),
    ))
}

fn dpi_byte(dpi: u16) -> Result<u8> {
    u8::try_from(dpi / 100).map_err(|_| Error::OutOfRange {
        field: "dpi",
        value: u32::from(dpi),
        min: 0,
        max: u32::from(MAX_ENCODABLE_DPI),
    })
}

/// Set X/Y sensitivity. Values are truncated to hundreds.
pub fn set_dpi(dpi_x: u16, dpi_y: u16) -> Result<ProtocolCommand> {
    let payload = [0x00, dpi_byte(dpi_x)?, dpi_byte(dpi_y)?, 0, 0, 0, 0];
    command(CommandKind::SetDpi, CLASS_SENSOR, 0x05, &payload)
}

pub fn poll_rate_code(rate: PollingRate) -> u8 {
    match rate {
        PollingRate::Hz1000 => 0x01,
        PollingRate::Hz500 => 0x02,
        PollingRate::Hz250 => 0x04,
        PollingRate::Hz125 => 0x08,
    }
}

pub fn set_poll_rate(rate: PollingRate) -> ProtocolCommand {
    let report = frame(CLASS_DEVICE, 0x05, &[poll_rate_code(rate)]);
    ProtocolCommand::new(CommandKind::SetPollRate, report.to_vec())
}

pub fn set_lift_off_distance(mm: u8) -> Result<ProtocolCommand> {
    command(
        CommandKind::SetLiftOffDistance,
        CLASS_SENSOR,
        0x06,
        &[VARSTORE, mm],
    )
}

pub fn set_angle_snapping(enabled: bool) -> Result<ProtocolCommand> {
    command(
        CommandKind::SetAngleSnapping,
        CLASS_SENSOR,
        0x07,
        &[u8::from(enabled)],
    )
}

/// Logo lighting effect.
pub fn set_lighting(lighting: &Lighting) -> Result<ProtocolCommand> {
    let c = lighting.color;
    let (id, payload): (u8, Vec<u8>) = match lighting.mode {
        LightingMode::Static => (0x01, vec![VARSTORE, LED_LOGO, c.r, c.g, c.b]),
        LightingMode::Breathing => (
            0x02,
            // single-colour breathing; the second colour slot stays empty
            vec![VARSTORE, LED_LOGO, 0x01, c.r, c.g, c.b, 0, 0],
        ),
        LightingMode::Spectrum => (0x04, vec![VARSTORE, LED_LOGO]),
        LightingMode::Wave => (0x05, vec![VARSTORE, 0x01]),
        LightingMode::Reactive => (0x06, vec![lighting.speed / 25, c.r, c.g, c.b]),
    };
    command(CommandKind::SetRgb, CLASS_LIGHTING, id, &payload)
}

pub fn get_firmware_version() -> Result<ProtocolCommand> {
    command(CommandKind::GetFirmwareVersion, CLASS_DEVICE, 0x81, &[0, 0])
}

pub fn enter_dfu_mode() -> Result<ProtocolCommand> {
    command(CommandKind::EnterDfuMode, CLASS_DFU, 0x00, &[0xAA, 0x55])
}

pub fn exit_dfu_mode() -> Result<ProtocolCommand> {
    command(CommandKind::ExitDfuMode, CLASS_DFU, 0x01, &[0x55, 0xAA])
}
