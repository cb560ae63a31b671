//! `BAR_WRITE` / `BAR_READ` (spec.md §4.5).

use remote_link::{ChannelKind, Link, LinkError, OwnedFrame};
use remote_wire::frame::{BarAccess, MmioReturn};
use remote_wire::{Command, Frame, Payload};

use super::Ctx;
use crate::error::HandlerError;

fn bar_access(frame: &OwnedFrame) -> Result<BarAccess, LinkError> {
    match frame.frame.payload {
        Payload::Bar(access) => Ok(access),
        _ => Err(LinkError::Resource("BAR command without inline Bar payload".into())),
    }
}

/// No reply, no fds. Requires a fully-initialized device (spec.md §4.4: a
/// handler that touches device state short-circuits before the device's
/// first `SET_IRQFD` has landed).
pub fn handle_bar_write(ctx: &mut Ctx, frame: &OwnedFrame) -> Result<(), LinkError> {
    let id = frame.frame.id;
    let access = bar_access(frame)?;
    let _machine = ctx.machine.lock();
    match ctx.registry.get_mut(id) {
        Some(slot) if slot.created => {
            if let Err(e) = slot.device.bar_write(access.memory, access.addr, access.val, access.size) {
                tracing::warn!(id, error = %e, "BAR_WRITE failed");
            }
        }
        Some(_) => tracing::warn!(id, error = %HandlerError::NotCreated(id), "BAR_WRITE"),
        None => tracing::warn!(id, "BAR_WRITE for unknown device"),
    }
    Ok(())
}

/// Always replies via `MMIO_RETURN` on the `mmio` channel, never a wait-fd
/// (spec.md §9(d): the two source variants disagreed; `MMIO_RETURN` is
/// authoritative). A read masks the result to the requested width; a
/// MEMTX-class failure yields `u64::MAX`.
pub fn handle_bar_read(ctx: &mut Ctx, link: &Link, frame: &OwnedFrame) -> Result<(), LinkError> {
    let id = frame.frame.id;
    let access = bar_access(frame)?;
    let val = {
        let _machine = ctx.machine.lock();
        match ctx.registry.get(id) {
            Some(slot) if slot.created => match slot.device.bar_read(access.memory, access.addr, access.size) {
                Ok(v) => mask_to_width(v, access.size),
                Err(e) => {
                    tracing::warn!(id, error = %e, "BAR_READ failed");
                    u64::MAX
                }
            },
            Some(_) => {
                tracing::warn!(id, error = %HandlerError::NotCreated(id), "BAR_READ");
                u64::MAX
            }
            None => {
                tracing::warn!(id, "BAR_READ for unknown device");
                u64::MAX
            }
        }
    };
    let reply = Frame::new(Command::MmioReturn, id, Payload::MmioReturn(MmioReturn { val }), vec![])
        .map_err(LinkError::Protocol)?;
    link.send(ChannelKind::Mmio, &reply)
}

fn mask_to_width(val: u64, size: u32) -> u64 {
    match size {
        1 => val & 0xff,
        2 => val & 0xffff,
        4 => val & 0xffff_ffff,
        _ => val,
    }
}
