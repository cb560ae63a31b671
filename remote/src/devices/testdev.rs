//! `pci-testdev`: a minimal stand-in device with a 256-byte config space and
//! one 4 KiB memory BAR, used to exercise the registry and handler paths in
//! tests without modeling any real device's register semantics.

use std::os::unix::io::OwnedFd;

use remote_wire::PciInfo;
use serde_json::{Map as JsonMap, Value};

use crate::device::{Device, DeviceFactory};
use crate::error::HandlerError;

const CONFIG_LEN: usize = 256;
const BAR_LEN: usize = 4096;

pub struct PciTestDev {
    config: [u8; CONFIG_LEN],
    bar: Vec<u8>,
    irqfd: Option<OwnedFd>,
    resamplefd: Option<OwnedFd>,
}

impl PciTestDev {
    fn new() -> Self {
        let mut config = [0u8; CONFIG_LEN];
        // vendor_id / device_id at offset 0 / 2, matching the PCI config
        // space header layout real devices use.
        config[0..2].copy_from_slice(&0x1b36u16.to_le_bytes()); // QEMU's test vendor id
        config[2..4].copy_from_slice(&0x0005u16.to_le_bytes());
        PciTestDev { config, bar: vec![0u8; BAR_LEN], irqfd: None, resamplefd: None }
    }
}

impl Device for PciTestDev {
    fn pci_info(&self) -> PciInfo {
        PciInfo { vendor_id: 0x1b36, device_id: 0x0005, class_id: 0x00ff, subsystem_vendor_id: 0, subsystem_id: 0 }
    }

    fn config_read(&self, addr: u64, len: u32) -> u64 {
        let addr = addr as usize;
        let len = len as usize;
        if addr + len > CONFIG_LEN {
            return u64::MAX;
        }
        let mut buf = [0u8; 8];
        buf[..len].copy_from_slice(&self.config[addr..addr + len]);
        u64::from_le_bytes(buf)
    }

    fn config_write(&mut self, addr: u64, val: u64, len: u32) {
        let addr = addr as usize;
        let len = len as usize;
        if addr + len > CONFIG_LEN {
            return;
        }
        let bytes = val.to_le_bytes();
        self.config[addr..addr + len].copy_from_slice(&bytes[..len]);
    }

    fn bar_read(&self, memory: bool, addr: u64, size: u32) -> Result<u64, HandlerError> {
        if !memory {
            return Err(HandlerError::BusAccess("pci-testdev has no I/O BAR".into()));
        }
        let addr = addr as usize;
        let size = size as usize;
        if addr + size > BAR_LEN {
            return Err(HandlerError::BusAccess(format!("BAR read out of range: {addr:#x}+{size}")));
        }
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&self.bar[addr..addr + size]);
        Ok(u64::from_le_bytes(buf))
    }

    fn bar_write(&mut self, memory: bool, addr: u64, val: u64, size: u32) -> Result<(), HandlerError> {
        if !memory {
            return Err(HandlerError::BusAccess("pci-testdev has no I/O BAR".into()));
        }
        let addr = addr as usize;
        let size = size as usize;
        if addr + size > BAR_LEN {
            return Err(HandlerError::BusAccess(format!("BAR write out of range: {addr:#x}+{size}")));
        }
        let bytes = val.to_le_bytes();
        self.bar[addr..addr + size].copy_from_slice(&bytes[..size]);
        Ok(())
    }

    fn set_irqfd(&mut self, irqfd: OwnedFd, resamplefd: Option<OwnedFd>) {
        self.irqfd = Some(irqfd);
        self.resamplefd = resamplefd;
    }

    fn reset(&mut self) {
        self.bar.iter_mut().for_each(|b| *b = 0);
        // Config space keeps its identity fields; only the mutable region
        // beyond the header is cleared.
        self.config[4..].iter_mut().for_each(|b| *b = 0);
    }
}

pub struct PciTestDevFactory;

impl DeviceFactory for PciTestDevFactory {
    fn driver_name(&self) -> &'static str {
        "pci-testdev"
    }

    fn create(&self, _options: &JsonMap<String, Value>) -> Result<Box<dyn Device>, HandlerError> {
        Ok(Box::new(PciTestDev::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_read_write_round_trips_within_bounds() {
        let mut dev = PciTestDev::new();
        dev.config_write(0x10, 0xdeadbeef, 4);
        assert_eq!(dev.config_read(0x10, 4), 0xdeadbeef);
    }

    #[test]
    fn bar_read_write_masks_to_width() {
        let mut dev = PciTestDev::new();
        dev.bar_write(true, 0x20, 0x1122_3344, 2).unwrap();
        assert_eq!(dev.bar_read(true, 0x20, 2).unwrap(), 0x3344);
    }

    #[test]
    fn reset_clears_bar_but_keeps_identity() {
        let mut dev = PciTestDev::new();
        dev.bar_write(true, 0, 0xff, 1).unwrap();
        dev.reset();
        assert_eq!(dev.bar_read(true, 0, 1).unwrap(), 0);
        assert_eq!(dev.pci_info().vendor_id, 0x1b36);
    }
}
