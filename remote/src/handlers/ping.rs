//! `REMOTE_PING` (spec.md §4.5): notifies the wait-fd with this process's
//! pid.

use remote_link::{LinkError, OwnedFrame};

use super::{notify_and_release, take_waiter, Ctx};

pub fn handle_remote_ping(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let waiter = take_waiter(ctx, frame, 0)?;
    notify_and_release(ctx, waiter, ctx.pid as u64);
    Ok(())
}
