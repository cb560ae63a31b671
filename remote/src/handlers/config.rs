//! `GET_PCI_INFO`, `PCI_CONFIG_WRITE`, `PCI_CONFIG_READ` (spec.md §4.5).

use remote_link::{ChannelKind, Link, LinkError, OwnedFrame};
use remote_wire::frame::PciConfigAccess;
use remote_wire::{Command, Frame, Payload};

use super::{notify_and_release, take_waiter, Ctx};
use crate::error::HandlerError;

/// Replies with a `RET_PCI_INFO` frame on the control channel.
pub fn handle_get_pci_info(ctx: &mut Ctx, link: &Link, id: u64) -> Result<(), LinkError> {
    let Some(slot) = ctx.registry.get(id) else {
        tracing::warn!(id, "GET_PCI_INFO for unknown device");
        return Ok(());
    };
    let reply = Frame::new(Command::RetPciInfo, id, Payload::PciInfo(slot.device.pci_info()), vec![])
        .map_err(LinkError::Protocol)?;
    link.send(ChannelKind::Com, &reply)
}

/// **Config read** (spec.md §4.5: "takes the I/O-thread lock, calls the PCI
/// config-read primitive with (addr, len), then notifies"). Requires a
/// fully-initialized device (spec.md §4.4): short-circuits with
/// `REMOTE_FAIL` before the device's first `SET_IRQFD` has landed.
pub fn handle_pci_config_read(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let id = frame.frame.id;
    let Payload::Bytestream(body) = &frame.frame.payload else {
        return Err(LinkError::Resource("PCI_CONFIG_READ without bytestream payload".into()));
    };
    let access = PciConfigAccess::from_bytes(body).map_err(LinkError::Protocol)?;

    let waiter = take_waiter(ctx, frame, 0)?;
    let value = {
        let _machine = ctx.machine.lock();
        match ctx.registry.get(id) {
            Some(slot) if slot.created => slot.device.config_read(access.addr, access.len),
            Some(_) => {
                tracing::warn!(id, error = %HandlerError::NotCreated(id), "PCI_CONFIG_READ");
                HandlerError::REMOTE_FAIL
            }
            None => {
                tracing::warn!(id, "PCI_CONFIG_READ for unknown device");
                HandlerError::REMOTE_FAIL
            }
        }
    };
    notify_and_release(ctx, waiter, value);
    Ok(())
}

/// **Config write**: no reply, no fds (spec.md §4.5's table). Requires a
/// fully-initialized device, same rule as the read side.
pub fn handle_pci_config_write(ctx: &mut Ctx, frame: &OwnedFrame) -> Result<(), LinkError> {
    let id = frame.frame.id;
    let Payload::Bytestream(body) = &frame.frame.payload else {
        return Err(LinkError::Resource("PCI_CONFIG_WRITE without bytestream payload".into()));
    };
    let access = PciConfigAccess::from_bytes(body).map_err(LinkError::Protocol)?;

    let _machine = ctx.machine.lock();
    match ctx.registry.get_mut(id) {
        Some(slot) if slot.created => slot.device.config_write(access.addr, access.val, access.len),
        Some(_) => tracing::warn!(id, error = %HandlerError::NotCreated(id), "PCI_CONFIG_WRITE"),
        None => tracing::warn!(id, "PCI_CONFIG_WRITE for unknown device"),
    }
    Ok(())
}
