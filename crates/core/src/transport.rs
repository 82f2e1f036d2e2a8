//! Transport abstraction for device communication.
//!
//! Two channel kinds exist: a HID channel (hidapi) and a raw USB channel
//! (libusb). A [`Backend`] enumerates the bus and opens both kinds, so the
//! connector and dispatcher run unchanged against real hardware and the
//! in-crate mock.

use crate::error::Result;
use std::time::Duration;

/// One row of a HID bus enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HidDeviceEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub path: String,
    /// -1 when the platform does not report an interface number.
    pub interface_number: i32,
    pub usage_page: u16,
    pub usage: u16,
    pub product: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub release_number: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

/// An interrupt or bulk endpoint discovered on the active configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: u8,
    pub direction: EndpointDirection,
    pub interface: u8,
}

/// An open HID device.
pub trait HidChannel: Send {
    fn set_nonblocking(&self, nonblocking: bool) -> Result<()>;

    /// Send a feature report. The first byte is the report ID.
    fn send_feature_report(&self, data: &[u8]) -> Result<()>;

    /// Write an output report. Returns the number of bytes written.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Cheap read-only call used to prove the handle is alive.
    fn probe(&self) -> Result<()>;
}

/// An open raw USB device.
pub trait UsbChannel: Send {
    fn reset(&mut self) -> Result<()>;

    /// Activate the first configuration descriptor.
    fn set_default_configuration(&mut self) -> Result<()>;

    fn kernel_driver_active(&self, interface: u8) -> Result<bool>;
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()>;
    fn attach_kernel_driver(&mut self, interface: u8) -> Result<()>;
    fn claim_interface(&mut self, interface: u8) -> Result<()>;
    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Interrupt and bulk endpoints across every interface of the active
    /// configuration.
    fn endpoints(&self) -> Result<Vec<Endpoint>>;

    fn write_interrupt(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize>;

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Cheap read-only call used by health checks.
    fn probe(&self) -> Result<()>;
}

/// Access to the host's HID and USB stacks.
pub trait Backend: Send + Sync {
    fn enumerate_hid(&self) -> Result<Vec<HidDeviceEntry>>;

    fn open_hid(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn HidChannel>>;

    fn open_hid_path(&self, path: &str) -> Result<Box<dyn HidChannel>>;

    /// Paths of every HID interface exposed by one physical device.
    fn hid_interface_paths(&self, vendor_id: u16, product_id: u16) -> Result<Vec<String>> {
        Ok(self
            .enumerate_hid()?
            .into_iter()
            .filter(|e| e.vendor_id == vendor_id && e.product_id == product_id)
            .map(|e| e.path)
            .collect())
    }

    fn open_usb(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn UsbChannel>>;
}
