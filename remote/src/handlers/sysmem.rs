//! `SYNC_SYSMEM` (spec.md §4.5). Unlike device errors, a failure here is
//! fatal to the link (spec.md §7 class (b): "sysmem reconfiguration
//! failure" is listed alongside unknown-command and malformed-frame as a
//! link-terminating protocol error).

use remote_link::{LinkError, OwnedFrame};
use remote_wire::Payload;

use super::Ctx;

pub fn handle_sync_sysmem(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let descriptor = match &frame.frame.payload {
        Payload::Bytestream(b) => b.clone(),
        _ => return Err(LinkError::Resource("SYNC_SYSMEM without bytestream payload".into())),
    };
    let mut memfds = Vec::with_capacity(frame.fd_count());
    for i in 0..frame.fd_count() {
        if let Some(fd) = frame.take_fd(i) {
            memfds.push(fd);
        }
    }
    ctx.sysmem
        .reconfig(&descriptor, &memfds)
        .map_err(LinkError::Resource)
}
