//! Command dispatcher: pushes an encoded report through whichever transfer
//! method the open transport accepts, with retry and backoff.
//!
//! Transfer methods are tried in order on every attempt:
//! HID feature report, HID write, USB interrupt OUT, USB control
//! SET_REPORT (feature), USB control SET_REPORT (output).

use crate::config::DispatchConfig;
use crate::connector::{ConnectionHandle, UsbConnection};
use crate::error::{Error, Result};
use crate::protocol::ProtocolCommand;
use crate::transport::HidChannel;
use std::thread;
use tracing::{debug, trace, warn};

/// bmRequestType: host-to-device, class, interface.
pub const HID_SET_REPORT_REQUEST_TYPE: u8 = 0x21;
/// HID class request SET_REPORT.
pub const HID_SET_REPORT: u8 = 0x09;
/// wValue for a feature report with ID 0.
pub const REPORT_TYPE_FEATURE: u16 = 0x0300;
/// wValue for an output report with ID 0.
pub const REPORT_TYPE_OUTPUT: u16 = 0x0200;

/// Classification of communication errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on retry (timeout, busy, stalled pipe).
    Transient,
    /// Device is gone. Stop retrying.
    Disconnected,
    /// OS refused access (udev rules, exclusive access, admin rights).
    PermissionDenied,
    /// Caller supplied a bad value. Never reaches the device.
    Validation,
    /// Nothing to retry (cancelled, misconfigured, worker gone).
    Fatal,
}

impl ErrorClass {
    /// Classify an error for retry decisions.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::Timeout(_) | Error::Transfer { .. } | Error::Enumeration(_) => Self::Transient,
            Error::PermissionDenied(_) => Self::PermissionDenied,
            Error::DeviceNotFound(_) | Error::NotConnected | Error::ConnectFailed { .. } => {
                Self::Disconnected
            }
            Error::Hid(msg) | Error::Usb(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("disconnect")
                    || lower.contains("not found")
                    || lower.contains("no such device")
                    || lower.contains("no device")
                {
                    Self::Disconnected
                } else if lower.contains("permission")
                    || lower.contains("access denied")
                    || lower.contains("access is denied")
                {
                    Self::PermissionDenied
                } else {
                    Self::Transient
                }
            }
            Error::OutOfRange { .. } | Error::InvalidValue { .. } | Error::Unsupported { .. } => {
                Self::Validation
            }
            Error::Cancelled | Error::Config(_) | Error::Worker(_) => Self::Fatal,
        }
    }

    /// Whether this error class is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// How a report reached the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    HidFeatureReport,
    HidWrite,
    UsbInterrupt,
    UsbControlFeature,
    UsbControlOutput,
}

impl TransferMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HidFeatureReport => "HID feature report",
            Self::HidWrite => "HID write",
            Self::UsbInterrupt => "USB interrupt",
            Self::UsbControlFeature => "USB control (feature)",
            Self::UsbControlOutput => "USB control (output)",
        }
    }
}

impl std::fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Device connection status for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Device is connected and responding.
    Connected,
    /// Device is not found / disconnected.
    Disconnected,
    /// Permission denied, needs driver or udev setup.
    PermissionError,
    /// Communication error (transient or protocol).
    Error,
}

/// Probe the handle and classify the outcome.
pub fn check_device_status(handle: &ConnectionHandle) -> DeviceStatus {
    match handle.probe() {
        Ok(()) => DeviceStatus::Connected,
        Err(ref e) => match ErrorClass::classify(e) {
            ErrorClass::Disconnected => DeviceStatus::Disconnected,
            ErrorClass::PermissionDenied => DeviceStatus::PermissionError,
            _ => DeviceStatus::Error,
        },
    }
}

/// Send `command`, trying every applicable transfer method on each of
/// `retries` attempts. Returns the method that succeeded.
pub fn send(
    handle: &ConnectionHandle,
    command: &ProtocolCommand,
    retries: u32,
    config: &DispatchConfig,
) -> Result<TransferMethod> {
    let attempts = retries.max(1);
    trace!(
        kind = %command.kind(),
        len = command.len(),
        report_hex = format_args!("{:02X?}", command.as_bytes()),
        "TX"
    );

    let mut last_error = Error::Transfer {
        retries: 0,
        last_error: "no transfer attempted".into(),
    };
    for attempt in 1..=attempts {
        match try_once(handle, command.as_bytes(), config) {
            Ok(method) => {
                if attempt > 1 {
                    debug!(attempt, method = method.name(), "Transfer succeeded after retry");
                }
                thread::sleep(config.post_transfer_delay());
                return Ok(method);
            }
            Err(e) => {
                let class = ErrorClass::classify(&e);
                if !class.is_retryable() {
                    warn!(kind = %command.kind(), ?class, error = %e, "Transfer failed, not retrying");
                    return Err(Error::Transfer {
                        retries: attempt,
                        last_error: e.to_string(),
                    });
                }
                debug!(attempt, attempts, error = %e, "All transfer methods failed");
                last_error = e;
                if attempt < attempts {
                    thread::sleep(config.retry_backoff() * attempt);
                }
            }
        }
    }

    warn!(kind = %command.kind(), retries = attempts, error = %last_error, "Transfer failed");
    Err(Error::Transfer {
        retries: attempts,
        last_error: last_error.to_string(),
    })
}

fn try_once(handle: &ConnectionHandle, data: &[u8], config: &DispatchConfig) -> Result<TransferMethod> {
    match handle {
        ConnectionHandle::Hid(hid) => send_hid(hid.as_ref(), data),
        ConnectionHandle::Usb(usb) => send_usb(usb, data, config),
    }
}

fn send_hid(hid: &dyn HidChannel, data: &[u8]) -> Result<TransferMethod> {
    match hid.send_feature_report(data) {
        Ok(()) => return Ok(TransferMethod::HidFeatureReport),
        Err(e) => trace!(error = %e, "Feature report rejected"),
    }
    hid.write(data)?;
    Ok(TransferMethod::HidWrite)
}

fn send_usb(usb: &UsbConnection, data: &[u8], config: &DispatchConfig) -> Result<TransferMethod> {
    let channel = usb.channel();
    let timeout = config.transfer_timeout();

    if let Some(endpoint) = usb.endpoint_out() {
        match channel.write_interrupt(endpoint, data, timeout) {
            Ok(_) => return Ok(TransferMethod::UsbInterrupt),
            Err(e) => trace!(endpoint, error = %e, "Interrupt transfer failed"),
        }
    }

    let index = u16::from(usb.interface().unwrap_or(0));
    match channel.write_control(
        HID_SET_REPORT_REQUEST_TYPE,
        HID_SET_REPORT,
        REPORT_TYPE_FEATURE,
        index,
        data,
        timeout,
    ) {
        Ok(_) => return Ok(TransferMethod::UsbControlFeature),
        Err(e) => trace!(error = %e, "Control SET_REPORT (feature) failed"),
    }

    channel.write_control(
        HID_SET_REPORT_REQUEST_TYPE,
        HID_SET_REPORT,
        REPORT_TYPE_OUTPUT,
        index,
        data,
        timeout,
    )?;
    Ok(TransferMethod::UsbControlOutput)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{connect, CancelToken, ConnectOptions};
    use crate::device::describe;
    use crate::protocol::VendorProtocol;
    use crate::transport::mock::{MockBackend, MockDevice};
    use crate::transport::{Endpoint, EndpointDirection, HidDeviceEntry};
    use std::time::Duration;

    fn fast() -> DispatchConfig {
        DispatchConfig {
            post_transfer_delay_ms: 0,
            retry_backoff_ms: 0,
            transfer_timeout_ms: 1000,
        }
    }

    fn open(device: MockDevice) -> (MockBackend, ConnectionHandle) {
        let entry = HidDeviceEntry {
            vendor_id: 0x1532,
            product_id: 0x0084,
            path: "/dev/hidraw0".into(),
            product: Some("DeathAdder V2".into()),
            ..Default::default()
        };
        let mock = MockBackend::new(MockDevice {
            entries: vec![entry.clone()],
            ..device
        });
        let options = ConnectOptions {
            reset_settle: Duration::ZERO,
        };
        let connected = connect(
            &mock,
            &describe(&entry).unwrap(),
            &options,
            &CancelToken::new(),
        )
        .unwrap();
        (mock, connected.handle)
    }

    fn command() -> ProtocolCommand {
        VendorProtocol::Razer.set_dpi(800).unwrap()
    }

    fn usb_device() -> MockDevice {
        MockDevice {
            usb_present: true,
            endpoints: vec![Endpoint {
                address: 0x01,
                direction: EndpointDirection::Out,
                interface: 0,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn classify_timeout_as_transient() {
        let err = Error::Timeout("1s elapsed".into());
        assert_eq!(ErrorClass::classify(&err), ErrorClass::Transient);
        assert!(ErrorClass::classify(&err).is_retryable());
    }

    #[test]
    fn classify_permission_denied() {
        let err = Error::PermissionDenied("access denied".into());
        assert_eq!(ErrorClass::classify(&err), ErrorClass::PermissionDenied);
        assert!(!ErrorClass::classify(&err).is_retryable());
        let err = Error::Usb("Access denied (insufficient permissions)".into());
        assert_eq!(ErrorClass::classify(&err), ErrorClass::PermissionDenied);
    }

    #[test]
    fn classify_disconnect() {
        let err = Error::DeviceNotFound("DeathAdder".into());
        assert_eq!(ErrorClass::classify(&err), ErrorClass::Disconnected);
        let err = Error::Hid("device disconnect detected".into());
        assert_eq!(ErrorClass::classify(&err), ErrorClass::Disconnected);
    }

    #[test]
    fn classify_validation() {
        let err = Error::OutOfRange {
            field: "dpi",
            value: 50,
            min: 100,
            max: 20_000,
        };
        assert_eq!(ErrorClass::classify(&err), ErrorClass::Validation);
        assert!(!ErrorClass::classify(&err).is_retryable());
    }

    #[test]
    fn hid_prefers_feature_report() {
        let (mock, handle) = open(MockDevice {
            hid_open_by_id: true,
            ..Default::default()
        });
        let method = send(&handle, &command(), 3, &fast()).unwrap();
        assert_eq!(method, TransferMethod::HidFeatureReport);
        assert_eq!(mock.sent(), vec![command().into_bytes()]);
        assert_eq!(mock.count("hid_write"), 0);
    }

    #[test]
    fn hid_falls_back_to_write() {
        let (mock, handle) = open(MockDevice {
            hid_open_by_id: true,
            feature_report_ok: false,
            ..Default::default()
        });
        let method = send(&handle, &command(), 3, &fast()).unwrap();
        assert_eq!(method, TransferMethod::HidWrite);
        assert_eq!(mock.sent()[0].len(), 90);
    }

    #[test]
    fn usb_prefers_interrupt_then_control() {
        let (mock, handle) = open(usb_device());
        assert_eq!(
            send(&handle, &command(), 1, &fast()).unwrap(),
            TransferMethod::UsbInterrupt
        );

        mock.update(|d| d.interrupt_ok = false);
        assert_eq!(
            send(&handle, &command(), 1, &fast()).unwrap(),
            TransferMethod::UsbControlFeature
        );

        mock.update(|d| d.control_feature_ok = false);
        assert_eq!(
            send(&handle, &command(), 1, &fast()).unwrap(),
            TransferMethod::UsbControlOutput
        );
        assert_eq!(mock.count("usb_control:0x0200"), 1);
    }

    #[test]
    fn exhausted_retries_report_transfer_failure() {
        let (mock, handle) = open(MockDevice {
            interrupt_ok: false,
            control_feature_ok: false,
            control_output_ok: false,
            ..usb_device()
        });
        match send(&handle, &command(), 3, &fast()) {
            Err(Error::Transfer { retries, .. }) => assert_eq!(retries, 3),
            other => panic!("expected transfer failure, got {other:?}"),
        }
        // three methods per attempt
        assert_eq!(mock.count("usb_interrupt:0x01"), 3);
        assert_eq!(mock.count("usb_control:0x0300"), 3);
        assert_eq!(mock.count("usb_control:0x0200"), 3);
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn control_transfers_without_out_endpoint() {
        let (mock, handle) = open(MockDevice {
            usb_present: true,
            endpoints: vec![Endpoint {
                address: 0x81,
                direction: EndpointDirection::In,
                interface: 0,
            }],
            ..Default::default()
        });
        assert!(matches!(&handle, ConnectionHandle::Usb(_)));
        assert_eq!(
            send(&handle, &command(), 1, &fast()).unwrap(),
            TransferMethod::UsbControlFeature
        );
        assert_eq!(mock.count("usb_interrupt:0x81"), 0);
    }

    #[test]
    fn status_reflects_probe() {
        let (mock, handle) = open(MockDevice {
            hid_open_by_id: true,
            ..Default::default()
        });
        assert_eq!(check_device_status(&handle), DeviceStatus::Connected);
        mock.update(|d| d.probe_ok = false);
        assert_eq!(check_device_status(&handle), DeviceStatus::Error);
    }
}
