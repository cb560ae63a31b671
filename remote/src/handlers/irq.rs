//! `SET_IRQFD` (spec.md §4.5): installs the interrupt eventfd pair and, on
//! first success across the registry, flips the machine-creation latch.

use remote_link::{LinkError, OwnedFrame};
use remote_wire::Payload;

use super::Ctx;

pub fn handle_set_irqfd(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let id = frame.frame.id;
    if !matches!(frame.frame.payload, Payload::Irq(_)) {
        return Err(LinkError::Resource("SET_IRQFD without inline Irq payload".into()));
    }
    let irqfd = frame.take_fd(0).ok_or_else(|| LinkError::Resource("SET_IRQFD missing irqfd".into()))?;
    let resamplefd = frame.take_fd(1);

    let Some(slot) = ctx.registry.get_mut(id) else {
        tracing::warn!(id, "SET_IRQFD for unknown device");
        return Ok(());
    };
    slot.device.set_irqfd(irqfd, resamplefd);

    if let Err(e) = ctx.registry.mark_created(id) {
        tracing::warn!(id, error = %e, "failed to mark device created");
    }
    Ok(())
}
