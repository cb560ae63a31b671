//! Device capability trait and the driver-name-keyed factory registry
//! (spec.md §9: "Dynamic device registration through a string keyed
//! factory").

use std::collections::HashMap;
use std::os::unix::io::OwnedFd;

use remote_wire::PciInfo;
use serde_json::Map as JsonMap;

use crate::error::HandlerError;

/// One emulated PCI device. The registry owns the `Box<dyn Device>`; the
/// proxy only ever sees the integer id (spec.md §3's "Device registry"
/// ownership rule).
pub trait Device: Send {
    /// Vendor/device/class/subsystem ids reported on `GET_PCI_INFO`.
    fn pci_info(&self) -> PciInfo;

    /// Reads `len` bytes (1, 2 or 4) from config space at `addr`.
    fn config_read(&self, addr: u64, len: u32) -> u64;

    /// Writes the low `len` bytes of `val` into config space at `addr`.
    fn config_write(&mut self, addr: u64, val: u64, len: u32);

    /// Reads `size` bytes (1, 2, 4 or 8) from the given BAR address space.
    /// `memory` selects the memory BAR (`true`) vs the I/O BAR (`false`).
    fn bar_read(&self, memory: bool, addr: u64, size: u32) -> Result<u64, HandlerError>;

    fn bar_write(&mut self, memory: bool, addr: u64, val: u64, size: u32) -> Result<(), HandlerError>;

    /// Installs the interrupt eventfd pair (spec.md §4.5's `SET_IRQFD` row).
    /// `resamplefd` is present for level-triggered interrupts only.
    fn set_irqfd(&mut self, irqfd: OwnedFd, resamplefd: Option<OwnedFd>);

    fn reset(&mut self);
}

/// Builds a [`Device`] plus its PCI identity from a parsed options map
/// (spec.md §4.5's `DEV_OPTS` row, reserved keys already stripped by the
/// caller).
pub trait DeviceFactory: Send + Sync {
    fn driver_name(&self) -> &'static str;

    fn create(&self, options: &JsonMap<String, serde_json::Value>) -> Result<Box<dyn Device>, HandlerError>;
}

/// Driver-name → factory lookup, populated once at bootstrap (spec.md §4.6:
/// "defers the remainder of argv for after first DEV_OPTS so that
/// device-type modules can be registered before any devices are created").
#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<&'static str, Box<dyn DeviceFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Box<dyn DeviceFactory>) {
        self.factories.insert(factory.driver_name(), factory);
    }

    pub fn create(
        &self,
        driver: &str,
        options: &JsonMap<String, serde_json::Value>,
    ) -> Result<Box<dyn Device>, HandlerError> {
        let factory = self
            .factories
            .get(driver)
            .ok_or_else(|| HandlerError::UnknownDriver(driver.to_string()))?;
        factory.create(options)
    }
}

/// Options keys the proxy attaches that belong to process/transport setup,
/// not the device model itself; stripped before a factory ever sees the map
/// (spec.md §4.5).
pub const RESERVED_OPTION_KEYS: &[&str] =
    &["rid", "socket", "remote", "command", "exec", "remote-device", "bus", "addr"];

pub fn strip_reserved_keys(mut options: JsonMap<String, serde_json::Value>) -> JsonMap<String, serde_json::Value> {
    for key in RESERVED_OPTION_KEYS {
        options.remove(*key);
    }
    options
}
