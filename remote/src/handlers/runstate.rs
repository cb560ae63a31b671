//! `RUNSTATE_SET` (spec.md §4.5): applies the VM-wide runstate under the
//! machine lock and always notifies `0`.

use remote_link::{LinkError, OwnedFrame};
use remote_wire::Payload;

use super::{notify_and_release, take_waiter, Ctx};

pub fn handle_runstate_set(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let Payload::RunState(state) = frame.frame.payload else {
        return Err(LinkError::Resource("RUNSTATE_SET without inline RunState payload".into()));
    };
    let waiter = take_waiter(ctx, frame, 0)?;
    {
        let mut machine = ctx.machine.lock();
        machine.runstate = state.state;
    }
    notify_and_release(ctx, waiter, 0);
    Ok(())
}
