//! Integration tests: exercise the full flow against a simulated bus.
//!
//! Each test builds a mock backend describing what the OS exposes (HID
//! entries, raw USB endpoints, kernel drivers), then drives it through
//! scan → connect → configure → supervise → disconnect.

#[cfg(test)]
mod tests {
    use crate::config::{DispatchConfig, SupervisorConfig};
    use crate::connector::Strategy;
    use crate::dispatch::{REPORT_TYPE_FEATURE, REPORT_TYPE_OUTPUT};
    use crate::protocol::{razer, LightingMode, VendorProtocol};
    use crate::supervisor::{ConnectionState, Supervisor};
    use crate::transport::mock::{MockBackend, MockDevice};
    use crate::transport::{Endpoint, EndpointDirection, HidDeviceEntry};
    use crate::{scan, Error};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tracing::Span;

    fn quiet_config() -> SupervisorConfig {
        SupervisorConfig {
            max_reconnect_attempts: 4,
            reconnect_base_delay_ms: 5,
            health_check_interval_ms: 60_000,
            max_consecutive_errors: 3,
            auto_reconnect: true,
            command_retries: 2,
            reset_settle_ms: 0,
            dispatch: DispatchConfig {
                post_transfer_delay_ms: 0,
                retry_backoff_ms: 0,
                transfer_timeout_ms: 100,
            },
        }
    }

    fn g502_bus() -> Vec<HidDeviceEntry> {
        vec![
            HidDeviceEntry {
                vendor_id: 0x046D,
                product_id: 0xC077,
                path: "/dev/hidraw3".into(),
                interface_number: 0,
                usage_page: 0x01,
                usage: 0x02,
                product: Some("G502 HERO Gaming Mouse".into()),
                manufacturer: Some("Logitech".into()),
                ..Default::default()
            },
            // keyboard-emulation interface of the same mouse
            HidDeviceEntry {
                vendor_id: 0x046D,
                product_id: 0xC077,
                path: "/dev/hidraw4".into(),
                interface_number: 3,
                usage_page: 0x01,
                usage: 0x06,
                product: Some("G502 HERO Keyboard".into()),
                ..Default::default()
            },
            // unrelated vendor
            HidDeviceEntry {
                vendor_id: 0x045E,
                product_id: 0x07A5,
                path: "/dev/hidraw5".into(),
                product: Some("Wireless Mouse".into()),
                ..Default::default()
            },
        ]
    }

    fn razer_entry() -> HidDeviceEntry {
        HidDeviceEntry {
            vendor_id: 0x1532,
            product_id: 0x0084,
            path: "/dev/hidraw0".into(),
            product: Some("Razer DeathAdder V2".into()),
            ..Default::default()
        }
    }

    fn start(device: MockDevice, config: SupervisorConfig) -> (MockBackend, Supervisor) {
        let mock = MockBackend::new(device);
        let supervisor =
            Supervisor::new(Arc::new(mock.clone()), config, Span::none()).unwrap();
        (mock, supervisor)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    /// Test: scan filters the bus, then a Logitech mouse is configured end to end.
    #[test]
    fn logitech_scan_connect_configure() {
        let mock = MockBackend::new(MockDevice {
            entries: g502_bus(),
            hid_open_by_id: true,
            ..Default::default()
        });
        let devices = scan(&mock);
        assert_eq!(devices.len(), 1);
        let g502 = &devices[0];
        assert_eq!(g502.product, "G502 HERO");
        assert_eq!(g502.protocol, VendorProtocol::Logitech);

        let supervisor =
            Supervisor::new(Arc::new(mock.clone()), quiet_config(), Span::none()).unwrap();
        assert_eq!(supervisor.try_connect(g502).unwrap(), Strategy::HidStandard);

        assert!(supervisor.set_dpi(1600));
        assert!(supervisor.set_polling_rate(500));
        assert!(supervisor.set_rgb("#FF8000", LightingMode::Breathing, 50, 100));
        assert!(supervisor.set_dpi_stages(&[400, 800, 1600]));
        assert!(supervisor.set_button_mapping(3, 0x05));

        let sent = mock.sent();
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(|r| r.len() == 64 && r[1] == 0xFF));
        // DPI 1600 little-endian
        assert_eq!(&sent[0][..5], &[0x11, 0xFF, 0x04, 0x40, 0x06]);
        assert_eq!(&sent[1][..3], &[0x10, 0xFF, 0x02]);
        assert_eq!(&sent[2][..6], &[0x13, 0xFF, 1, 0xFF, 0x80, 0x00]);
        assert_eq!(&sent[3][3..9], &[0x90, 0x01, 0x20, 0x03, 0x40, 0x06]);
        assert_eq!(&sent[4][..4], &[0x14, 0xFF, 3, 0x05]);

        // Logitech legacy reports carry no angle-snapping command.
        assert!(!supervisor.set_angle_snapping(true));
        assert_eq!(mock.sent().len(), 5);
        assert_eq!(supervisor.state(), ConnectionState::Connected);

        let metrics = supervisor.metrics();
        assert_eq!(metrics.commands_sent, 5);
        assert_eq!(metrics.success_rate, 1.0);

        supervisor.disconnect();
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(!supervisor.set_dpi(800));
    }

    /// Test: HID refuses the device, raw USB takes over.
    #[test]
    fn razer_over_raw_usb_when_hid_refuses() {
        let (mock, supervisor) = start(
            MockDevice {
                entries: vec![razer_entry()],
                usb_present: true,
                endpoints: vec![
                    Endpoint {
                        address: 0x81,
                        direction: EndpointDirection::In,
                        interface: 0,
                    },
                    Endpoint {
                        address: 0x02,
                        direction: EndpointDirection::Out,
                        interface: 0,
                    },
                ],
                ..Default::default()
            },
            quiet_config(),
        );
        let descriptor = supervisor.scan_devices().remove(0);
        assert_eq!(
            supervisor.try_connect(&descriptor).unwrap(),
            Strategy::UsbDirect
        );

        let info = supervisor.get_connection_info();
        assert!(info.contains(&"Transport: raw USB".to_string()), "{info:?}");
        assert!(info.contains(&"Output Endpoint: 0x02".to_string()), "{info:?}");

        assert!(supervisor.set_polling_rate(1000));
        assert_eq!(mock.count("usb_interrupt:0x02"), 1);
        let report = mock.sent().remove(0);
        assert_eq!(report.len(), razer::REPORT_LEN);
        assert_eq!(report[razer::PAYLOAD_OFFSET], 0x01);

        // interrupt pipe stalls: control SET_REPORT variants carry the report
        mock.update(|d| d.interrupt_ok = false);
        assert!(supervisor.set_lod(2));
        assert_eq!(mock.count(&format!("usb_control:{REPORT_TYPE_FEATURE:#06x}")), 1);
        mock.update(|d| d.control_feature_ok = false);
        assert!(supervisor.set_angle_snapping(false));
        assert_eq!(mock.count(&format!("usb_control:{REPORT_TYPE_OUTPUT:#06x}")), 1);

        // direct access leaves interface ownership alone
        supervisor.disconnect();
        assert!(!mock.calls().iter().any(|c| c.starts_with("usb_claim")));
        assert_eq!(mock.count("usb_release:0"), 0);
    }

    /// Test: permission problems surface as such instead of a generic failure.
    #[test]
    fn permission_denied_is_reported() {
        let (_mock, supervisor) = start(
            MockDevice {
                entries: vec![razer_entry()],
                usb_present: true,
                usb_permission_denied: true,
                ..Default::default()
            },
            quiet_config(),
        );
        let descriptor = supervisor.scan_devices().remove(0);
        let result = supervisor.try_connect(&descriptor);
        assert!(matches!(result, Err(Error::PermissionDenied(_))), "{result:?}");
        assert_eq!(supervisor.state(), ConnectionState::Error);
        assert!(supervisor.last_error().is_some());
    }

    /// Test: the mouse is unplugged and plugged back in while supervised.
    #[test]
    fn unplug_replug_recovers_and_keeps_working() {
        let config = SupervisorConfig {
            health_check_interval_ms: 15,
            max_reconnect_attempts: 50,
            ..quiet_config()
        };
        let (mock, supervisor) = start(
            MockDevice {
                entries: vec![razer_entry()],
                hid_open_by_id: true,
                ..Default::default()
            },
            config,
        );
        let descriptor = supervisor.scan_devices().remove(0);
        assert!(supervisor.connect(&descriptor));

        mock.update(|d| {
            d.probe_ok = false;
            d.hid_open_by_id = false;
        });
        assert!(wait_for(|| supervisor.state() == ConnectionState::Reconnecting));
        assert!(!supervisor.set_dpi(800));

        mock.update(|d| {
            d.probe_ok = true;
            d.hid_open_by_id = true;
        });
        assert!(wait_for(|| supervisor.state() == ConnectionState::Connected));
        assert!(supervisor.metrics().reconnect_count >= 1);
        assert!(supervisor.set_dpi(800));
        assert!(supervisor.test_connection());
    }

    /// Test: out-of-range and malformed values never reach any vendor.
    #[test]
    fn validation_applies_before_every_vendor() {
        let (mock, supervisor) = start(
            MockDevice {
                entries: g502_bus(),
                hid_open_by_id: true,
                ..Default::default()
            },
            quiet_config(),
        );
        let descriptor = supervisor.scan_devices().remove(0);
        assert!(supervisor.connect(&descriptor));

        assert!(!supervisor.set_dpi(50));
        assert!(!supervisor.set_dpi(20_001));
        assert!(!supervisor.set_polling_rate(2000));
        assert!(!supervisor.set_rgb("orange", LightingMode::Static, 100, 0));
        assert!(!supervisor.set_rgb("#FF8000", LightingMode::Static, 101, 0));
        assert!(!supervisor.set_dpi_stages(&[400, 800, 1600, 3200, 6400, 12_800]));
        assert!(!supervisor.set_dpi_stages(&[]));
        assert!(mock.sent().is_empty());
        assert_eq!(supervisor.metrics().commands_sent, 0);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }
}
