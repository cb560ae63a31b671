//! The wait-FD primitive: a counter-valued reply channel (spec.md §4.3).
//!
//! The proxy hands the remote a wait-fd as ancillary data on the commands
//! that expect a synchronous reply (`DEV_OPTS`, `PCI_CONFIG_READ`, ...). The
//! remote's job is only [`notify`]; [`wait`] exists for completeness and for
//! testing the offset convention, since in production it is the proxy, not
//! the remote, that blocks on it.

use std::io::ErrorKind;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Timeout for [`wait`] (spec.md §4.3: "Read blocks with a 1-second
/// timeout").
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Writes `v + 1` to `fd` (or `u64::MAX` verbatim), waking a reader blocked
/// in [`wait`] with `v`.
pub fn notify(fd: RawFd, v: u64) -> std::io::Result<()> {
    let wire_value: u64 = if v == u64::MAX { u64::MAX } else { v + 1 };
    let buf = wire_value.to_ne_bytes();
    let mut written = 0;
    while written < buf.len() {
        match unsafe { libc::write(fd, buf[written..].as_ptr() as *const _, buf.len() - written) } {
            n if n < 0 => {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            n => written += n as usize,
        }
    }
    Ok(())
}

/// Polls `fd` for up to [`WAIT_TIMEOUT`] and, if readable in time, reads the
/// counter and reverses the [`notify`] shift. Returns `u64::MAX` on timeout,
/// I/O error, or if the written value itself was `u64::MAX` (spec.md §4.3).
pub fn wait(fd: RawFd) -> u64 {
    let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    let ready = unsafe { libc::poll(&mut pfd, 1, WAIT_TIMEOUT.as_millis() as i32) };
    if ready <= 0 {
        return u64::MAX;
    }
    let mut buf = [0u8; 8];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
    if n != buf.len() as isize {
        return u64::MAX;
    }
    let wire_value = u64::from_ne_bytes(buf);
    if wire_value == u64::MAX {
        u64::MAX
    } else {
        wire_value - 1
    }
}

/// An owned wait-fd handle, received as ancillary data on an inbound frame.
///
/// Dropping a `Waiter` without calling [`Waiter::notify`] closes the fd
/// without signalling the proxy, matching spec.md §5's "Unconsumed FDs must
/// be closed when the frame is freed" for the wait-fd specifically.
pub struct Waiter {
    fd: Option<OwnedFd>,
}

impl Waiter {
    pub fn new(fd: OwnedFd) -> Self {
        Waiter { fd: Some(fd) }
    }

    /// Sends the reply value and consumes the handle.
    pub fn notify(mut self, v: u64) -> std::io::Result<()> {
        let fd = self.fd.take().expect("Waiter used twice");
        notify(fd.as_raw_fd(), v)
    }
}

/// Bounds how many [`Waiter`]s may be outstanding at once (spec.md §4.3:
/// "the fd is returned to a small pool after use").
///
/// The physical fd a `Waiter` wraps is one-shot and proxy-owned — it closes
/// with the `Waiter` regardless of outcome. What this pool actually bounds
/// is concurrency: a dispatcher that is still waiting on `MAX_OUTSTANDING`
/// replies refuses to hand out another one rather than growing unbounded
/// when a slow proxy falls behind on its own wait-fd reads.
pub struct WaitPool {
    outstanding: usize,
    max_outstanding: usize,
}

impl WaitPool {
    pub fn new(max_outstanding: usize) -> Self {
        WaitPool { outstanding: 0, max_outstanding }
    }

    /// Wraps a received fd as a [`Waiter`], or `None` if the pool is full.
    pub fn checkout(&mut self, fd: OwnedFd) -> Option<Waiter> {
        if self.outstanding >= self.max_outstanding {
            return None;
        }
        self.outstanding += 1;
        Some(Waiter::new(fd))
    }

    /// Releases a slot after a `Waiter` has been notified (or dropped).
    pub fn release(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }
}

impl Default for WaitPool {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::FromRawFd;

    fn eventfd_like_pair() -> (OwnedFd, OwnedFd) {
        // A UNIX domain socket pair behaves like a duplex byte pipe, which is
        // all `notify`/`wait` need (they never assume `eventfd` semantics
        // beyond "8 bytes write, 8 bytes read").
        let (a, b) = std::os::unix::net::UnixStream::pair().unwrap();
        use std::os::unix::io::IntoRawFd;
        unsafe { (OwnedFd::from_raw_fd(a.into_raw_fd()), OwnedFd::from_raw_fd(b.into_raw_fd())) }
    }

    #[test]
    fn wait_reverses_notify_offset() {
        let (writer, reader) = eventfd_like_pair();
        for v in [0u64, 1, 42, u64::MAX - 1] {
            notify(writer.as_raw_fd(), v).unwrap();
            assert_eq!(wait(reader.as_raw_fd()), v);
        }
    }

    #[test]
    fn notify_max_is_verbatim() {
        let (writer, reader) = eventfd_like_pair();
        notify(writer.as_raw_fd(), u64::MAX).unwrap();
        assert_eq!(wait(reader.as_raw_fd()), u64::MAX);
    }

    #[test]
    fn wait_times_out_with_no_notifier() {
        let (_writer, reader) = eventfd_like_pair();
        let start = std::time::Instant::now();
        assert_eq!(wait(reader.as_raw_fd()), u64::MAX);
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
