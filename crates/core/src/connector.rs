//! Transport connector: opens a working channel to a mouse by trying six
//! strategies in a fixed order, from the polite HID open to a forced USB
//! reset with every kernel driver detached.
//!
//! Raw USB handles own the resources they acquire. [`UsbConnection::close`]
//! (also run on drop) releases claimed interfaces and then reattaches any
//! kernel driver that was detached, continuing past individual failures.

use crate::device::DeviceDescriptor;
use crate::dispatch::ErrorClass;
use crate::error::{Error, Result};
use crate::transport::{Backend, Endpoint, EndpointDirection, HidChannel, UsbChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Interfaces touched by the driver-detach strategy.
const DETACH_INTERFACES: std::ops::RangeInclusive<u8> = 0..=2;
/// Interfaces touched by the forced-reset strategy.
const RESET_INTERFACES: std::ops::RangeInclusive<u8> = 0..=3;

/// Connection strategies, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    HidStandard,
    HidPath,
    HidAllInterfaces,
    UsbDirect,
    UsbDetachDriver,
    UsbForceReset,
}

impl Strategy {
    pub const ALL: &'static [Strategy] = &[
        Strategy::HidStandard,
        Strategy::HidPath,
        Strategy::HidAllInterfaces,
        Strategy::UsbDirect,
        Strategy::UsbDetachDriver,
        Strategy::UsbForceReset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::HidStandard => "HID Standard",
            Self::HidPath => "HID Path",
            Self::HidAllInterfaces => "HID All Interfaces",
            Self::UsbDirect => "USB Direct",
            Self::UsbDetachDriver => "USB Detach Driver",
            Self::UsbForceReset => "USB Force Reset",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A raw USB device plus every resource acquired on it.
pub struct UsbConnection {
    device: Box<dyn UsbChannel>,
    claimed: Vec<u8>,
    detached: Vec<u8>,
    endpoint_out: Option<u8>,
    endpoint_in: Option<u8>,
}

impl UsbConnection {
    fn new(device: Box<dyn UsbChannel>) -> Self {
        Self {
            device,
            claimed: Vec::new(),
            detached: Vec::new(),
            endpoint_out: None,
            endpoint_in: None,
        }
    }

    pub fn channel(&self) -> &dyn UsbChannel {
        self.device.as_ref()
    }

    /// First claimed interface; used as `wIndex` for control transfers.
    pub fn interface(&self) -> Option<u8> {
        self.claimed.first().copied()
    }

    pub fn endpoint_out(&self) -> Option<u8> {
        self.endpoint_out
    }

    pub fn endpoint_in(&self) -> Option<u8> {
        self.endpoint_in
    }

    pub fn kernel_driver_detached(&self) -> bool {
        !self.detached.is_empty()
    }

    /// Detach the kernel driver on `interface` if one is bound. Failures are
    /// logged and ignored.
    fn detach_if_active(&mut self, interface: u8) {
        match self.device.kernel_driver_active(interface) {
            Ok(true) => match self.device.detach_kernel_driver(interface) {
                Ok(()) => {
                    debug!(interface, "Detached kernel driver");
                    self.detached.push(interface);
                }
                Err(e) => debug!(interface, error = %e, "Kernel driver detach failed"),
            },
            Ok(false) => {}
            Err(e) => trace!(interface, error = %e, "Kernel driver state unknown"),
        }
    }

    fn claim(&mut self, interface: u8) -> Result<()> {
        self.device.claim_interface(interface)?;
        debug!(interface, "Claimed interface");
        self.claimed.push(interface);
        Ok(())
    }

    fn discover_endpoints(&mut self) -> Result<()> {
        let endpoints = self.device.endpoints()?;
        let preferred = self.interface();
        self.endpoint_out = pick_endpoint(&endpoints, EndpointDirection::Out, preferred);
        self.endpoint_in = pick_endpoint(&endpoints, EndpointDirection::In, preferred);
        debug!(
            endpoint_out = ?self.endpoint_out.map(|a| format!("0x{a:02X}")),
            endpoint_in = ?self.endpoint_in.map(|a| format!("0x{a:02X}")),
            "Endpoints discovered"
        );
        Ok(())
    }

    /// Release claimed interfaces, then reattach detached kernel drivers.
    /// Every step runs even if an earlier one failed; calling twice is a no-op.
    pub fn close(&mut self) {
        for interface in std::mem::take(&mut self.claimed) {
            match self.device.release_interface(interface) {
                Ok(()) => debug!(interface, "Released interface"),
                Err(e) => warn!(interface, error = %e, "Failed to release interface"),
            }
        }
        for interface in std::mem::take(&mut self.detached) {
            match self.device.attach_kernel_driver(interface) {
                Ok(()) => debug!(interface, "Reattached kernel driver"),
                Err(e) => warn!(interface, error = %e, "Failed to reattach kernel driver"),
            }
        }
    }
}

/// First endpoint in `direction`, preferring one on the claimed interface.
fn pick_endpoint(
    endpoints: &[Endpoint],
    direction: EndpointDirection,
    preferred: Option<u8>,
) -> Option<u8> {
    let candidates: Vec<&Endpoint> = endpoints
        .iter()
        .filter(|e| e.direction == direction)
        .collect();
    candidates
        .iter()
        .find(|e| Some(e.interface) == preferred)
        .or_else(|| candidates.first())
        .map(|e| e.address)
}

impl Drop for UsbConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// An open transport to one device.
pub enum ConnectionHandle {
    Hid(Box<dyn HidChannel>),
    Usb(UsbConnection),
}

impl ConnectionHandle {
    /// Inexpensive read-only liveness check.
    pub fn probe(&self) -> Result<()> {
        match self {
            Self::Hid(hid) => hid.probe(),
            Self::Usb(usb) => usb.channel().probe(),
        }
    }

    /// Human-readable transport details.
    pub fn info_lines(&self) -> Vec<String> {
        match self {
            Self::Hid(_) => vec!["Transport: HID".to_string()],
            Self::Usb(usb) => {
                let mut lines = vec!["Transport: raw USB".to_string()];
                if usb.kernel_driver_detached() {
                    lines.push("Kernel Driver: Detached (direct hardware access)".into());
                }
                if let Some(interface) = usb.interface() {
                    lines.push(format!("Interface Claimed: {interface}"));
                }
                if let Some(ep) = usb.endpoint_out() {
                    lines.push(format!("Output Endpoint: 0x{ep:02X}"));
                }
                if let Some(ep) = usb.endpoint_in() {
                    lines.push(format!("Input Endpoint: 0x{ep:02X}"));
                }
                lines
            }
        }
    }

    /// Release every resource held by the handle.
    pub fn close(&mut self) {
        if let Self::Usb(usb) = self {
            usb.close();
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hid(_) => f.write_str("ConnectionHandle::Hid"),
            Self::Usb(usb) => f
                .debug_struct("ConnectionHandle::Usb")
                .field("claimed", &usb.claimed)
                .field("detached", &usb.detached)
                .field("endpoint_out", &usb.endpoint_out)
                .field("endpoint_in", &usb.endpoint_in)
                .finish(),
        }
    }
}

/// Cooperative cancellation flag, checked before and after each strategy.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Wait after a forced USB reset before touching the device again.
    pub reset_settle: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            reset_settle: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: Strategy,
    pub error: Error,
}

/// Result of a successful [`connect`].
#[derive(Debug)]
pub struct Connected {
    pub handle: ConnectionHandle,
    pub strategy: Strategy,
    /// Strategies that failed before `strategy` succeeded, in order.
    pub failures: Vec<StrategyFailure>,
}

/// Open a transport to `descriptor`, trying every [`Strategy`] in order.
pub fn connect(
    backend: &dyn Backend,
    descriptor: &DeviceDescriptor,
    options: &ConnectOptions,
    cancel: &CancelToken,
) -> Result<Connected> {
    let mut failures: Vec<StrategyFailure> = Vec::new();

    for &strategy in Strategy::ALL {
        if cancel.is_cancelled() {
            info!(device = %descriptor, "Connection attempt cancelled");
            return Err(Error::Cancelled);
        }

        debug!(strategy = strategy.name(), "Trying connection strategy");
        let result = attempt(backend, descriptor, strategy, options);
        // A strategy can block for a while (reset settle); a handle opened
        // after cancellation is closed again.
        if cancel.is_cancelled() {
            if let Ok(mut handle) = result {
                handle.close();
            }
            info!(
                device = %descriptor,
                strategy = strategy.name(),
                "Connection attempt cancelled"
            );
            return Err(Error::Cancelled);
        }
        match result {
            Ok(handle) => {
                info!(
                    device = %descriptor,
                    strategy = strategy.name(),
                    failed_attempts = failures.len(),
                    "Connected"
                );
                return Ok(Connected {
                    handle,
                    strategy,
                    failures,
                });
            }
            Err(error) => {
                debug!(strategy = strategy.name(), error = %error, "Strategy failed");
                failures.push(StrategyFailure { strategy, error });
            }
        }
    }

    let denied = failures
        .iter()
        .find(|f| ErrorClass::classify(&f.error) == ErrorClass::PermissionDenied);
    if let Some(failure) = denied {
        warn!(device = %descriptor, error = %failure.error, "Access to device denied");
        return Err(Error::PermissionDenied(failure.error.to_string()));
    }

    let last_error = failures
        .last()
        .map(|f| f.error.to_string())
        .unwrap_or_default();
    warn!(device = %descriptor, error = %last_error, "All connection strategies failed");
    Err(Error::ConnectFailed {
        attempts: failures.len(),
        last_error,
    })
}

fn attempt(
    backend: &dyn Backend,
    descriptor: &DeviceDescriptor,
    strategy: Strategy,
    options: &ConnectOptions,
) -> Result<ConnectionHandle> {
    let (vid, pid) = (descriptor.vendor_id, descriptor.product_id);
    match strategy {
        Strategy::HidStandard => {
            let hid = backend.open_hid(vid, pid)?;
            hid.set_nonblocking(true)?;
            Ok(ConnectionHandle::Hid(hid))
        }
        Strategy::HidPath => {
            if descriptor.path.is_empty() {
                return Err(Error::DeviceNotFound("descriptor has no HID path".into()));
            }
            let hid = backend.open_hid_path(&descriptor.path)?;
            hid.set_nonblocking(true)?;
            Ok(ConnectionHandle::Hid(hid))
        }
        Strategy::HidAllInterfaces => open_any_interface(backend, vid, pid),
        Strategy::UsbDirect => open_usb_direct(backend, vid, pid),
        Strategy::UsbDetachDriver => open_usb_detached(backend, vid, pid),
        Strategy::UsbForceReset => open_usb_force_reset(backend, vid, pid, options.reset_settle),
    }
}

fn open_any_interface(backend: &dyn Backend, vid: u16, pid: u16) -> Result<ConnectionHandle> {
    let mut last_error = None;
    for path in backend.hid_interface_paths(vid, pid)? {
        let opened = backend.open_hid_path(&path).and_then(|hid| {
            hid.set_nonblocking(true)?;
            hid.probe()?;
            Ok(hid)
        });
        match opened {
            Ok(hid) => {
                debug!(path = %path, "Interface responded to probe");
                return Ok(ConnectionHandle::Hid(hid));
            }
            Err(e) => {
                trace!(path = %path, error = %e, "Interface did not respond");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        Error::DeviceNotFound(format!("no HID interfaces for {vid:04X}:{pid:04X}"))
    }))
}

fn open_usb_direct(backend: &dyn Backend, vid: u16, pid: u16) -> Result<ConnectionHandle> {
    let mut usb = UsbConnection::new(backend.open_usb(vid, pid)?);
    if let Err(e) = usb.device.set_default_configuration() {
        debug!(error = %e, "Could not set configuration, keeping current one");
    }
    usb.discover_endpoints()?;
    if usb.endpoint_out.is_none() {
        return Err(Error::Usb("no OUT endpoint on active configuration".into()));
    }
    Ok(ConnectionHandle::Usb(usb))
}

fn open_usb_detached(backend: &dyn Backend, vid: u16, pid: u16) -> Result<ConnectionHandle> {
    let mut usb = UsbConnection::new(backend.open_usb(vid, pid)?);
    for interface in DETACH_INTERFACES {
        usb.detach_if_active(interface);
    }
    if let Err(e) = usb.device.set_default_configuration() {
        debug!(error = %e, "Could not set configuration, keeping current one");
    }

    // The interface we freed is the one most likely to carry vendor commands.
    let candidates: Vec<u8> = usb
        .detached
        .last()
        .copied()
        .into_iter()
        .chain(DETACH_INTERFACES)
        .collect();
    let mut last_error = None;
    for interface in candidates {
        match usb.claim(interface) {
            Ok(()) => break,
            Err(e) => last_error = Some(e),
        }
    }
    if usb.claimed.is_empty() {
        return Err(last_error.unwrap_or_else(|| Error::Usb("no claimable interface".into())));
    }

    usb.discover_endpoints()?;
    Ok(ConnectionHandle::Usb(usb))
}

fn open_usb_force_reset(
    backend: &dyn Backend,
    vid: u16,
    pid: u16,
    settle: Duration,
) -> Result<ConnectionHandle> {
    let mut usb = UsbConnection::new(backend.open_usb(vid, pid)?);
    warn!(
        vid = format_args!("0x{vid:04X}"),
        pid = format_args!("0x{pid:04X}"),
        "Forcing USB reset"
    );
    usb.device.reset()?;
    std::thread::sleep(settle);

    for interface in RESET_INTERFACES {
        usb.detach_if_active(interface);
    }
    usb.device.set_default_configuration()?;
    for interface in RESET_INTERFACES {
        if let Err(e) = usb.claim(interface) {
            debug!(interface, error = %e, "Claim failed, continuing");
        }
    }
    if let Err(e) = usb.discover_endpoints() {
        debug!(error = %e, "Endpoint discovery failed, control transfers only");
    }
    Ok(ConnectionHandle::Usb(usb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::describe;
    use crate::transport::mock::{MockBackend, MockDevice};
    use crate::transport::HidDeviceEntry;

    const PATH: &str = "/dev/hidraw0";
    const OTHER_PATH: &str = "/dev/hidraw1";

    fn entry(path: &str, interface: i32) -> HidDeviceEntry {
        HidDeviceEntry {
            vendor_id: 0x1532,
            product_id: 0x0084,
            path: path.to_string(),
            interface_number: interface,
            product: Some("DeathAdder V2".to_string()),
            ..Default::default()
        }
    }

    fn descriptor() -> DeviceDescriptor {
        describe(&entry(PATH, 0)).unwrap()
    }

    fn options() -> ConnectOptions {
        ConnectOptions {
            reset_settle: Duration::ZERO,
        }
    }

    fn out_ep() -> Endpoint {
        Endpoint {
            address: 0x01,
            direction: EndpointDirection::Out,
            interface: 0,
        }
    }

    fn in_ep() -> Endpoint {
        Endpoint {
            address: 0x81,
            direction: EndpointDirection::In,
            interface: 0,
        }
    }

    fn device_succeeding_on(n: usize) -> MockDevice {
        let base = MockDevice {
            entries: vec![entry(PATH, 0), entry(OTHER_PATH, 1)],
            ..Default::default()
        };
        match n {
            1 => MockDevice {
                hid_open_by_id: true,
                ..base
            },
            2 => MockDevice {
                openable_paths: vec![PATH.into()],
                ..base
            },
            3 => MockDevice {
                openable_paths: vec![OTHER_PATH.into()],
                ..base
            },
            4 => MockDevice {
                usb_present: true,
                endpoints: vec![out_ep(), in_ep()],
                ..base
            },
            5 => MockDevice {
                usb_present: true,
                endpoints: vec![in_ep()],
                ..base
            },
            6 => MockDevice {
                usb_present: true,
                endpoint_scan_fails: true,
                ..base
            },
            _ => unreachable!(),
        }
    }

    fn run(mock: &MockBackend) -> Result<Connected> {
        connect(mock, &descriptor(), &options(), &CancelToken::new())
    }

    #[test]
    fn strategy_n_success_records_n_minus_one_failures() {
        for n in 1..=6 {
            let mock = MockBackend::new(device_succeeding_on(n));
            let connected = run(&mock).unwrap();
            assert_eq!(connected.strategy, Strategy::ALL[n - 1], "strategy {n}");
            assert_eq!(connected.failures.len(), n - 1, "strategy {n}");
            let order: Vec<_> = connected.failures.iter().map(|f| f.strategy).collect();
            assert_eq!(order, Strategy::ALL[..n - 1].to_vec());
        }
    }

    #[test]
    fn strategies_tried_in_declared_order() {
        let mock = MockBackend::new(MockDevice {
            entries: vec![entry(PATH, 0)],
            ..Default::default()
        });
        assert!(run(&mock).is_err());
        assert_eq!(
            mock.calls(),
            vec![
                "open_hid".to_string(),
                format!("open_hid_path:{PATH}"),
                format!("open_hid_path:{PATH}"),
                "open_usb".to_string(),
                "open_usb".to_string(),
                "open_usb".to_string(),
            ]
        );
    }

    #[test]
    fn all_strategies_failing_reports_last_error() {
        let mock = MockBackend::new(MockDevice::default());
        match run(&mock) {
            Err(Error::ConnectFailed {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 6);
                assert!(last_error.contains("USB device not found"));
            }
            other => panic!("expected ConnectFailed, got {other:?}"),
        }
    }

    #[test]
    fn permission_failure_surfaces_distinctly() {
        let mock = MockBackend::new(MockDevice {
            usb_permission_denied: true,
            ..Default::default()
        });
        assert!(matches!(run(&mock), Err(Error::PermissionDenied(_))));
    }

    #[test]
    fn cancelled_before_first_strategy() {
        let mock = MockBackend::new(device_succeeding_on(1));
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = connect(&mock, &descriptor(), &options(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn cancel_during_strategy_skips_the_rest() {
        let cancel = CancelToken::new();
        let mock = MockBackend::new(MockDevice {
            cancel_on_open_usb: Some(cancel.clone()),
            ..device_succeeding_on(5)
        });
        let result = connect(&mock, &descriptor(), &options(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)), "{result:?}");
        // UsbDirect ran and failed; UsbDetachDriver would reopen and claim.
        assert_eq!(mock.count("open_usb"), 1);
        assert!(!mock.calls().iter().any(|c| c.starts_with("usb_claim")));
    }

    #[test]
    fn handle_opened_after_cancel_is_discarded() {
        let cancel = CancelToken::new();
        let mock = MockBackend::new(MockDevice {
            cancel_on_open_usb: Some(cancel.clone()),
            ..device_succeeding_on(4)
        });
        let result = connect(&mock, &descriptor(), &options(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)), "{result:?}");
        assert_eq!(mock.count("open_usb"), 1);
    }

    #[test]
    fn hid_strategies_leave_handle_nonblocking() {
        for n in 1..=3 {
            let mock = MockBackend::new(device_succeeding_on(n));
            let connected = run(&mock).unwrap();
            assert_eq!(connected.strategy, Strategy::ALL[n - 1]);
            assert!(mock.is_nonblocking(), "strategy {n}");
        }
    }

    #[test]
    fn detach_strategy_claims_freed_interface() {
        let mock = MockBackend::new(MockDevice {
            active_drivers: vec![1],
            ..device_succeeding_on(5)
        });
        let connected = run(&mock).unwrap();
        assert_eq!(connected.strategy, Strategy::UsbDetachDriver);
        match &connected.handle {
            ConnectionHandle::Usb(usb) => {
                assert_eq!(usb.interface(), Some(1));
                assert!(usb.kernel_driver_detached());
                assert_eq!(usb.endpoint_in(), Some(0x81));
                assert_eq!(usb.endpoint_out(), None);
            }
            other => panic!("expected USB handle, got {other:?}"),
        }
    }

    #[test]
    fn detach_strategy_teardown_runs_once_even_if_reattach_fails() {
        let mock = MockBackend::new(MockDevice {
            active_drivers: vec![0],
            reattach_fails: true,
            ..device_succeeding_on(5)
        });
        let mut connected = run(&mock).unwrap();
        assert_eq!(connected.strategy, Strategy::UsbDetachDriver);

        connected.handle.close();
        connected.handle.close();
        drop(connected);

        assert_eq!(mock.count("usb_release:0"), 1);
        assert_eq!(mock.count("usb_attach:0"), 1);
        let calls = mock.calls();
        let release = calls.iter().position(|c| c == "usb_release:0").unwrap();
        let attach = calls.iter().position(|c| c == "usb_attach:0").unwrap();
        assert!(release < attach);
    }

    #[test]
    fn failed_detach_strategy_releases_what_it_took() {
        let mock = MockBackend::new(MockDevice {
            active_drivers: vec![0],
            ..device_succeeding_on(6)
        });
        let connected = run(&mock).unwrap();
        assert_eq!(connected.strategy, Strategy::UsbForceReset);
        // strategy 5 detached and claimed interface 0, then failed endpoint discovery
        assert_eq!(mock.count("usb_detach:0"), 1);
        assert!(mock.count("usb_attach:0") >= 1);
        assert!(mock.count("usb_release:0") >= 1);
    }

    #[test]
    fn force_reset_claims_every_interface_it_can() {
        let mock = MockBackend::new(MockDevice {
            claimable: vec![0, 2],
            ..device_succeeding_on(6)
        });
        let connected = run(&mock).unwrap();
        assert!(mock.calls().contains(&"usb_reset".to_string()));
        match &connected.handle {
            ConnectionHandle::Usb(usb) => assert_eq!(usb.interface(), Some(0)),
            other => panic!("expected USB handle, got {other:?}"),
        }
        let lines = connected.handle.info_lines();
        assert!(lines.contains(&"Interface Claimed: 0".to_string()));
    }

    #[test]
    fn usb_info_lines_list_endpoints() {
        let mock = MockBackend::new(device_succeeding_on(4));
        let connected = run(&mock).unwrap();
        let lines = connected.handle.info_lines();
        assert!(lines.contains(&"Output Endpoint: 0x01".to_string()));
        assert!(lines.contains(&"Input Endpoint: 0x81".to_string()));
    }

    #[test]
    fn cancel_token_reset() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
