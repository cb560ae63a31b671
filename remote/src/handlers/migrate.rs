//! `START_MIG_OUT` / `START_MIG_IN` (spec.md §4.5). The savevm/loadvm stream
//! format itself is an external primitive the core only invokes (spec.md
//! §1's Non-goals: "live-migration stream encoding"); this writes/consumes
//! a minimal placeholder stream so the fd protocol and byte-count reply are
//! exercised without claiming to implement real device-state
//! serialization.

use std::io::ErrorKind;
use std::os::unix::io::{AsRawFd, OwnedFd};

use remote_link::{LinkError, OwnedFrame};

use super::{notify_and_release, take_waiter, Ctx};

/// A placeholder savevm record: callers needing the real format must
/// replace this with the device-state serializer spec.md §1 places out of
/// scope.
const SAVEVM_MARKER: &[u8] = b"REMOTE-SAVEVM-V1";

fn write_all_fd(fd: &OwnedFd, mut buf: &[u8]) -> std::io::Result<usize> {
    let total = buf.len();
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr() as *const _, buf.len()) };
        match n {
            n if n < 0 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            n => buf = &buf[n as usize..],
        }
    }
    Ok(total)
}

fn drain_fd(fd: &OwnedFd) -> std::io::Result<usize> {
    let mut total = 0usize;
    let mut scratch = [0u8; 4096];
    loop {
        let n = unsafe { libc::read(fd.as_raw_fd(), scratch.as_mut_ptr() as *mut _, scratch.len()) };
        match n {
            0 => return Ok(total),
            n if n < 0 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            n => total += n as usize,
        }
    }
}

pub fn handle_start_mig_out(ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let io_fd = frame.take_fd(0).ok_or_else(|| LinkError::Resource("START_MIG_OUT missing io fd".into()))?;
    let waiter = take_waiter(ctx, frame, 1)?;

    let written = write_all_fd(&io_fd, SAVEVM_MARKER)
        .map_err(|source| LinkError::Transport { channel: "migration-io", source })?;
    notify_and_release(ctx, waiter, written as u64);
    Ok(())
}

pub fn handle_start_mig_in(_ctx: &mut Ctx, frame: &mut OwnedFrame) -> Result<(), LinkError> {
    let io_fd = frame.take_fd(0).ok_or_else(|| LinkError::Resource("START_MIG_IN missing io fd".into()))?;
    let consumed =
        drain_fd(&io_fd).map_err(|source| LinkError::Transport { channel: "migration-io", source })?;
    tracing::debug!(consumed, "loadvm stream consumed");
    Ok(())
}
