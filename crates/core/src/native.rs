//! Real hardware backend: `hidapi` for HID, `rusb` (libusb) for raw USB.

use crate::error::{Error, Result};
use crate::transport::{Backend, Endpoint, EndpointDirection, HidChannel, HidDeviceEntry, UsbChannel};
use hidapi::{HidApi, HidDevice};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use std::ffi::CString;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Backend over the host's HID and libusb stacks.
///
/// A fresh `HidApi` is created per call so hot-plugged devices are always
/// visible. libusb is optional: without it the raw-USB strategies fail and
/// only HID strategies remain.
pub struct NativeBackend {
    usb: Option<Context>,
}

impl NativeBackend {
    pub fn new() -> Self {
        let usb = match Context::new() {
            Ok(context) => Some(context),
            Err(e) => {
                warn!(error = %e, "libusb unavailable, raw USB fallbacks disabled");
                None
            }
        };
        Self { usb }
    }

    fn hid_api() -> Result<HidApi> {
        HidApi::new().map_err(|e| Error::Enumeration(format!("hidapi init: {e}")))
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for NativeBackend {
    fn enumerate_hid(&self) -> Result<Vec<HidDeviceEntry>> {
        let api = Self::hid_api()?;
        let entries: Vec<_> = api
            .device_list()
            .map(|info| HidDeviceEntry {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                path: info.path().to_string_lossy().into_owned(),
                interface_number: info.interface_number(),
                usage_page: info.usage_page(),
                usage: info.usage(),
                product: info.product_string().map(str::to_string),
                manufacturer: info.manufacturer_string().map(str::to_string),
                serial_number: info.serial_number().map(str::to_string),
                release_number: info.release_number(),
            })
            .collect();
        trace!(count = entries.len(), "HID bus enumerated");
        Ok(entries)
    }

    fn open_hid(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn HidChannel>> {
        let device = Self::hid_api()?.open(vendor_id, product_id)?;
        Ok(Box::new(NativeHid { device }))
    }

    fn open_hid_path(&self, path: &str) -> Result<Box<dyn HidChannel>> {
        let c_path = CString::new(path).map_err(|_| Error::InvalidValue {
            field: "path",
            reason: format!("{path:?} contains a NUL byte"),
        })?;
        let device = Self::hid_api()?.open_path(&c_path)?;
        Ok(Box::new(NativeHid { device }))
    }

    fn open_usb(&self, vendor_id: u16, product_id: u16) -> Result<Box<dyn UsbChannel>> {
        let context = self
            .usb
            .as_ref()
            .ok_or_else(|| Error::Usb("libusb not available".into()))?;

        for device in context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    trace!(error = %e, "Skipping device without descriptor");
                    continue;
                }
            };
            if descriptor.vendor_id() != vendor_id || descriptor.product_id() != product_id {
                continue;
            }
            debug!(
                bus = device.bus_number(),
                address = device.address(),
                "Opening raw USB device"
            );
            let handle = device.open()?;
            return Ok(Box::new(NativeUsb { device, handle }));
        }

        Err(Error::DeviceNotFound(format!(
            "USB device {vendor_id:04X}:{product_id:04X} not found"
        )))
    }
}

struct NativeHid {
    device: HidDevice,
}

impl HidChannel for NativeHid {
    fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        Ok(self.device.set_blocking_mode(!nonblocking)?)
    }

    fn send_feature_report(&self, data: &[u8]) -> Result<()> {
        Ok(self.device.send_feature_report(data)?)
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        Ok(self.device.write(data)?)
    }

    fn probe(&self) -> Result<()> {
        self.device.get_manufacturer_string()?;
        Ok(())
    }
}

struct NativeUsb {
    device: Device<Context>,
    handle: DeviceHandle<Context>,
}

impl UsbChannel for NativeUsb {
    fn reset(&mut self) -> Result<()> {
        Ok(self.handle.reset()?)
    }

    fn set_default_configuration(&mut self) -> Result<()> {
        let number = self.device.config_descriptor(0)?.number();
        Ok(self.handle.set_active_configuration(number)?)
    }

    fn kernel_driver_active(&self, interface: u8) -> Result<bool> {
        Ok(self.handle.kernel_driver_active(interface)?)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        Ok(self.handle.detach_kernel_driver(interface)?)
    }

    fn attach_kernel_driver(&mut self, interface: u8) -> Result<()> {
        Ok(self.handle.attach_kernel_driver(interface)?)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        Ok(self.handle.claim_interface(interface)?)
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        Ok(self.handle.release_interface(interface)?)
    }

    fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let config = self.device.active_config_descriptor()?;
        let mut endpoints = Vec::new();
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                for ep in descriptor.endpoint_descriptors() {
                    if !matches!(
                        ep.transfer_type(),
                        rusb::TransferType::Interrupt | rusb::TransferType::Bulk
                    ) {
                        continue;
                    }
                    let direction = match ep.direction() {
                        rusb::Direction::In => EndpointDirection::In,
                        rusb::Direction::Out => EndpointDirection::Out,
                    };
                    endpoints.push(Endpoint {
                        address: ep.address(),
                        direction,
                        interface: descriptor.interface_number(),
                    });
                }
            }
        }
        Ok(endpoints)
    }

    fn write_interrupt(&self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        Ok(self.handle.write_interrupt(endpoint, data, timeout)?)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        Ok(self
            .handle
            .write_control(request_type, request, value, index, data, timeout)?)
    }

    fn probe(&self) -> Result<()> {
        self.handle.active_configuration()?;
        Ok(())
    }
}
