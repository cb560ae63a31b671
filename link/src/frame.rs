//! Ownership wrapper around a received [`remote_wire::Frame`]'s FDs
//! (spec.md §5: "Every received FD is owned by the frame until the handler
//! consumes it ... Unconsumed FDs must be closed when the frame is freed").

use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

use remote_wire::Frame;

/// A received frame together with the FDs it carried, now held as owned
/// handles. Dropping an `OwnedFrame` closes every FD the handler didn't
/// [`OwnedFrame::take_fd`] out of it.
pub struct OwnedFrame {
    pub frame: Frame,
    fds: Vec<Option<OwnedFd>>,
}

impl OwnedFrame {
    /// Takes ownership of the raw FDs listed in `frame.fds`.
    ///
    /// # Safety
    ///
    /// Callers must ensure each fd in `frame.fds` is a valid, open,
    /// exclusively-owned descriptor (true immediately after
    /// [`crate::codec::recv`], which received them via `SCM_RIGHTS` and
    /// probed them for liveness).
    pub unsafe fn new(frame: Frame) -> Self {
        let fds = frame.fds.iter().map(|&fd| Some(OwnedFd::from_raw_fd(fd))).collect();
        OwnedFrame { frame, fds }
    }

    /// Hands ownership of the `index`th fd to the caller, removing it from
    /// this frame's close-on-drop set. Returns `None` if already taken or
    /// out of range.
    pub fn take_fd(&mut self, index: usize) -> Option<OwnedFd> {
        self.fds.get_mut(index).and_then(|slot| slot.take())
    }

    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }
}

impl std::fmt::Debug for OwnedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedFrame")
            .field("cmd", &self.frame.cmd)
            .field("id", &self.frame.id)
            .field("fd_count", &self.fds.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_wire::{Command, Payload};
    use std::os::unix::io::{AsRawFd, IntoRawFd};
    use std::os::unix::net::UnixStream;

    #[test]
    fn unconsumed_fds_close_on_drop() {
        let (a, b) = UnixStream::pair().unwrap();
        let raw = a.into_raw_fd();
        let frame = Frame::new(Command::SetIrqfd, 0, Payload::Irq(remote_wire::IrqFdInfo { vector: 0 }), vec![raw])
            .unwrap();
        {
            let owned = unsafe { OwnedFrame::new(frame) };
            assert_eq!(owned.fd_count(), 1);
        }
        // `raw` is now closed; writing through `b` should see the peer gone
        // eventually (not asserted directly here to avoid relying on kernel
        // timing), but at minimum a double-close must not have happened —
        // exercised by running this test under miri/valgrind in CI, not
        // assertable in-process.
        drop(b);
    }

    #[test]
    fn taken_fd_survives_drop() {
        let (a, b) = UnixStream::pair().unwrap();
        let raw = a.into_raw_fd();
        let frame = Frame::new(Command::SetIrqfd, 0, Payload::Irq(remote_wire::IrqFdInfo { vector: 0 }), vec![raw])
            .unwrap();
        let mut owned = unsafe { OwnedFrame::new(frame) };
        let kept = owned.take_fd(0).unwrap();
        drop(owned);
        assert_eq!(kept.as_raw_fd(), raw);
        drop(b);
    }
}
