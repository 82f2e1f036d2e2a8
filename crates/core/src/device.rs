//! Device model: HID bus scan, mouse classification, and descriptors.

use crate::protocol::VendorProtocol;
use crate::transport::{Backend, HidDeviceEntry};
use crate::vids;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Gaming and peripheral vendors whose devices are considered during a scan.
pub const KNOWN_VENDORS: &[(u16, &str)] = &[
    (0x1532, "Razer"),
    (0x26CE, "iBuyPower"),
    (0x1B1C, "CyberpowerPC"),
    (0x1044, "CyberpowerPC"),
    (0x046D, "Logitech"),
    (0x045E, "Microsoft"),
    (0x09DA, "A4Tech"),
    (0x1E7D, "ZOWIE"),
    (0x1D57, "ZOWIE"),
    (0x0B05, "ASUS"),
    (0x0BDA, "Realtek"),
    (0x1926, "ROCCAT"),
    (0x1BCF, "Xiaomi"),
    (0x2EA8, "Glorious"),
    (0x2516, "SteelSeries"),
    (0x1538, "Razer"),
    (0x0F2D, "EVGA"),
    (0x0E6F, "Logic3"),
    (0x20A0, "NZXT"),
    (0x1E71, "HyperX"),
    (0x0DB0, "Astro"),
    (0x040B, "NEC"),
    (0x056E, "Elecom"),
    (0x04D9, "Hama"),
    (0x093A, "AIPTEK"),
    (0x0C45, "Sonix"),
    (0x099A, "Genius"),
    (0x17EF, "Lenovo"),
    (0x04F2, "Chicony"),
    (0x05AC, "Apple"),
    (0x0A5C, "Broadcom"),
    (0x8087, "Intel"),
];

/// Known Razer product IDs.
pub const RAZER_PRODUCTS: &[(u16, &str)] = &[
    (0x0084, "DeathAdder V2"),
    (0x0070, "Viper Ultimate"),
    (0x007C, "Viper Mini"),
    (0x0078, "Viper"),
    (0x0043, "DeathAdder Chroma"),
    (0x0053, "Mamba Elite"),
    (0x006C, "Basilisk V2"),
    (0x0071, "Basilisk Ultimate"),
    (0x0082, "Naga Pro"),
    (0x008F, "Naga X"),
    (0x0024, "Mamba"),
    (0x0029, "DeathAdder"),
    (0x00A5, "DeathAdder V3"),
    (0x00A6, "DeathAdder V3 Pro"),
    (0x00A7, "Viper V2 Pro"),
    (0x00A8, "Basilisk V3"),
    (0x00A9, "Naga V2 Pro"),
    (0x00AA, "HyperPolling Wireless Dongle"),
    (0x00AB, "Lancehead TE"),
    (0x00AC, "Lancehead"),
    (0x00AD, "Orochi"),
    (0x00AE, "Atheris"),
    (0x00AF, "Naga Left-Handed"),
    (0x00B0, "Naga Trinity"),
    (0x00B1, "Naga Chroma"),
    (0x00B2, "Naga Hex V2"),
    (0x00B3, "Imperator"),
    (0x00B4, "Taipan"),
    (0x00B5, "Ouroboros"),
    (0x00B6, "Mamba Wireless"),
    (0x00B7, "Mamba Tournament Edition"),
    (0x00B8, "Diamondback Chroma"),
    (0x00B9, "Naga Epic Chroma"),
    (0x00BA, "Naga Molten"),
    (0x00BB, "Naga 2012"),
    (0x00BC, "Naga 2014"),
    (0x00BD, "DeathAdder 2013"),
    (0x00BE, "DeathAdder 3.5G"),
    (0x00BF, "DeathAdder 3G"),
    (0x00C0, "Imperator 2012"),
    (0x00C1, "Lachesis 5600"),
    (0x00C2, "Lachesis"),
];

/// Known Logitech G-series product IDs.
pub const LOGITECH_PRODUCTS: &[(u16, &str)] = &[
    (0xC077, "G502 HERO"),
    (0xC082, "G703 HERO"),
    (0xC086, "G903 HERO"),
    (0xC08A, "G PRO X SUPERLIGHT"),
    (0xC08B, "G PRO WIRELESS"),
    (0xC08C, "G PRO"),
    (0xC08D, "G403 HERO"),
    (0xC08E, "G403"),
    (0xC08F, "G703"),
    (0xC090, "G903"),
    (0xC091, "G502 PROTEUS CORE"),
    (0xC092, "G502"),
    (0xC093, "G303"),
    (0xC094, "G302"),
    (0xC095, "G600"),
    (0xC096, "G700s"),
    (0xC097, "G500"),
    (0xC098, "G400"),
    (0xC099, "G300s"),
    (0xC09A, "G300"),
    (0xC09B, "G700"),
    (0xC09C, "G500s"),
    (0xC09D, "G400s"),
    (0xC09E, "G100s"),
    (0xC09F, "G602"),
    (0xC0A0, "G603"),
    (0xC0A1, "G305"),
    (0xC0A2, "G Prodigy"),
    (0xC0A3, "G203"),
    (0xC0A4, "G102"),
    (0xC0A5, "G402"),
    (0xC0A6, "G502 LIGHTSPEED"),
    (0xC0A7, "G703 LIGHTSPEED"),
    (0xC0A8, "G903 LIGHTSPEED"),
    (0xC0A9, "G PRO X LIGHTSPEED"),
    (0xC0AA, "G PRO LIGHTSPEED"),
    (0xC0AB, "G502 X"),
    (0xC0AC, "G502 X PLUS"),
    (0xC0AD, "G703 X"),
    (0xC0AE, "G903 X"),
    (0xC0AF, "G PRO X SUPERLIGHT 2"),
    (0xC0B0, "G PRO X TKL"),
];

/// Known SteelSeries product IDs.
pub const STEELSERIES_PRODUCTS: &[(u16, &str)] = &[
    (0x1800, "Rival 650"),
    (0x1801, "Rival 650 Wireless"),
    (0x1802, "Rival 710"),
    (0x1803, "Rival 600"),
    (0x1804, "Rival 500"),
    (0x1805, "Rival 300"),
    (0x1806, "Rival 110"),
    (0x1807, "Rival 106"),
    (0x1808, "Rival 95"),
    (0x1809, "Rival 3"),
    (0x180A, "Rival 310"),
    (0x180B, "Rival 300S"),
    (0x180C, "Rival 105"),
    (0x180D, "Rival 100"),
    (0x180E, "Sensei 310"),
    (0x180F, "Sensei 300"),
    (0x1810, "Sensei Ten"),
    (0x1811, "Sensei RAW"),
    (0x1812, "Prime"),
    (0x1813, "Prime Wireless"),
    (0x1814, "Prime Mini"),
    (0x1815, "Prime Mini Wireless"),
    (0x1816, "Aerox 3"),
    (0x1817, "Aerox 3 Wireless"),
    (0x1818, "Aerox 5"),
    (0x1819, "Aerox 5 Wireless"),
    (0x181A, "Aerox 9"),
    (0x181B, "Aerox 9 Wireless"),
    (0x181C, "Rival 5"),
    (0x181D, "Rival 3 Wireless"),
    (0x181E, "Rival 650"),
    (0x181F, "Rival 650"),
];

/// Product-string fragments that identify a mouse.
const MOUSE_KEYWORDS: &[&str] = &[
    "mouse",
    "viper",
    "deathadder",
    "basilisk",
    "mamba",
    "naga",
    "rival",
    "g502",
    "g703",
    "g903",
    "g pro",
    "sensei",
    "prime",
];

/// Product-string fragments that identify something that is not a mouse.
const EXCLUDE_KEYWORDS: &[&str] = &["keyboard", "dongle", "receiver", "dock", "headset"];

/// HID Generic Desktop usage page.
const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
/// Generic Desktop usages for mouse (0x02) and keyboard/mouse combo (0x06).
const MOUSE_USAGES: &[u16] = &[0x02, 0x06];

/// Look up a vendor name by USB vendor ID.
pub fn vendor_name(vendor_id: u16) -> Option<&'static str> {
    KNOWN_VENDORS
        .iter()
        .find(|(vid, _)| *vid == vendor_id)
        .map(|(_, name)| *name)
}

/// Look up a product display name from the per-vendor tables.
pub fn product_name(vendor_id: u16, product_id: u16) -> Option<&'static str> {
    let table = match vendor_id {
        vids::RAZER => RAZER_PRODUCTS,
        vids::LOGITECH => LOGITECH_PRODUCTS,
        vids::STEELSERIES => STEELSERIES_PRODUCTS,
        _ => return None,
    };
    table
        .iter()
        .find(|(pid, _)| *pid == product_id)
        .map(|(_, name)| *name)
}

/// Everything known about one candidate mouse interface.
///
/// Produced once per scan and never mutated. The protocol family is resolved
/// here so callers never re-dispatch on the vendor name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub vendor: String,
    pub product: String,
    /// Platform HID path used by the path-based strategies.
    pub path: String,
    /// USB interface number, -1 when the platform does not report one.
    pub interface_number: i32,
    pub usage_page: u16,
    pub usage: u16,
    pub serial: Option<String>,
    pub manufacturer: Option<String>,
    pub release: u16,
    pub protocol: VendorProtocol,
}

impl DeviceDescriptor {
    /// Identity used for de-duplication during a scan.
    pub fn key(&self) -> (u16, u16, i32) {
        (self.vendor_id, self.product_id, self.interface_number)
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} (VID: 0x{:04X}, PID: 0x{:04X}, interface {})",
            self.vendor, self.product, self.vendor_id, self.product_id, self.interface_number
        )
    }
}

/// Decide whether a HID interface is a mouse rather than a keyboard, dongle or
/// vendor-control channel.
pub fn is_mouse_interface(entry: &HidDeviceEntry) -> bool {
    if entry.usage_page == USAGE_PAGE_GENERIC_DESKTOP && MOUSE_USAGES.contains(&entry.usage) {
        return true;
    }

    // Interfaces 3+ are dongles, keyboards or extra feature channels.
    if entry.interface_number > 2 {
        return false;
    }

    let product = entry.product.as_deref().unwrap_or("").to_lowercase();
    if MOUSE_KEYWORDS.iter().any(|k| product.contains(k)) {
        return true;
    }
    if EXCLUDE_KEYWORDS.iter().any(|k| product.contains(k)) {
        return false;
    }

    product.is_empty() && (0..=2).contains(&entry.interface_number)
}

/// Build a descriptor for an enumeration entry, or `None` if it is not a
/// supported mouse.
pub fn describe(entry: &HidDeviceEntry) -> Option<DeviceDescriptor> {
    let vendor = vendor_name(entry.vendor_id)?;
    if !is_mouse_interface(entry) {
        return None;
    }

    let reported = entry.product.clone().unwrap_or_default();
    let product = match product_name(entry.vendor_id, entry.product_id) {
        Some(name) => name.to_string(),
        None if !reported.is_empty() => reported,
        // Unnamed Razer interfaces outside the table are vendor-control channels.
        None if entry.vendor_id == vids::RAZER => return None,
        None => format!("Gaming Mouse (PID: 0x{:04X})", entry.product_id),
    };

    Some(DeviceDescriptor {
        vendor_id: entry.vendor_id,
        product_id: entry.product_id,
        vendor: vendor.to_string(),
        product,
        path: entry.path.clone(),
        interface_number: entry.interface_number,
        usage_page: entry.usage_page,
        usage: entry.usage,
        serial: entry.serial_number.clone().filter(|s| !s.is_empty()),
        manufacturer: entry.manufacturer.clone().filter(|s| !s.is_empty()),
        release: entry.release_number,
        protocol: VendorProtocol::from_vendor_name(vendor),
    })
}

/// Scan the HID bus for gaming mice.
///
/// Enumeration failures are logged and yield an empty list. Entries are
/// de-duplicated by (vendor id, product id, interface number).
pub fn scan(backend: &dyn Backend) -> Vec<DeviceDescriptor> {
    debug!("Starting HID device enumeration");
    let entries = match backend.enumerate_hid() {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "HID enumeration failed");
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut devices = Vec::new();
    for entry in &entries {
        let Some(descriptor) = describe(entry) else {
            continue;
        };
        if !seen.insert(descriptor.key()) {
            continue;
        }
        info!(
            vendor = %descriptor.vendor,
            product = %descriptor.product,
            vid = format_args!("0x{:04X}", descriptor.vendor_id),
            pid = format_args!("0x{:04X}", descriptor.product_id),
            interface = descriptor.interface_number,
            path = %descriptor.path,
            "Found gaming mouse"
        );
        devices.push(descriptor);
    }

    debug!(
        scanned = entries.len(),
        count = devices.len(),
        "Device enumeration complete"
    );
    devices
}

/// Polling rates every supported protocol can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum PollingRate {
    Hz125 = 125,
    Hz250 = 250,
    Hz500 = 500,
    Hz1000 = 1000,
}

impl PollingRate {
    /// Convert from raw Hz value.
    pub fn from_hz(hz: u16) -> Option<Self> {
        match hz {
            125 => Some(Self::Hz125),
            250 => Some(Self::Hz250),
            500 => Some(Self::Hz500),
            1000 => Some(Self::Hz1000),
            _ => None,
        }
    }

    /// Get the Hz value.
    pub fn as_hz(&self) -> u16 {
        *self as u16
    }

    /// All supported rates.
    pub const ALL: &'static [PollingRate] = &[
        PollingRate::Hz125,
        PollingRate::Hz250,
        PollingRate::Hz500,
        PollingRate::Hz1000,
    ];
}

impl std::fmt::Display for PollingRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz", self.as_hz())
    }
}
