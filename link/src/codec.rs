//! Socket I/O: turns a [`Channel`] plus wire bytes into a sent/received
//! [`remote_wire::Frame`] (spec.md §4.1, C1).
//!
//! FD passing is done with the `sendfd` crate (grounded in its own upstream
//! source, present in the reference pack) rather than the teacher's
//! `tokio-util` byte codec, since SCM_RIGHTS ancillary data has no
//! `Encoder`/`Decoder` analogue.

use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::RawFd;

use sendfd::{RecvWithFd, SendWithFd};
use remote_wire::frame::{Frame, Header, HEADER_LEN};
use remote_wire::{Command, Payload};

use crate::channel::Channel;
use crate::error::LinkError;

/// Retries a fallible I/O operation across `EINTR`/`EAGAIN` forever (spec.md
/// §4.1: "EINTR and EAGAIN are retried indefinitely").
fn retry<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => continue,
            Err(e) => return Err(e),
        }
    }
}

fn fill_exact<R: Read>(mut stream: R, mut buf: &mut [u8], channel: &'static str) -> Result<(), LinkError> {
    while !buf.is_empty() {
        match stream.read(buf) {
            Ok(0) => return Err(LinkError::Hangup(channel)),
            Ok(n) => buf = &mut buf[n..],
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => continue,
            Err(source) => return Err(LinkError::Transport { channel, source }),
        }
    }
    Ok(())
}

fn write_all<W: Write>(mut stream: W, mut buf: &[u8], channel: &'static str) -> Result<(), LinkError> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(n) => buf = &buf[n..],
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => continue,
            Err(source) => return Err(LinkError::Transport { channel, source }),
        }
    }
    Ok(())
}

/// Checks that `fd` is still an open descriptor (spec.md §3: "the receiver
/// probes with a no-op query before accepting").
fn probe_fd_is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD is a pure query, does not take ownership of `fd`.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Sends `frame` on `channel` (spec.md §4.1 `send`).
///
/// Acquires the channel's send-lock for the duration. The header and FDs go
/// out together as one `sendmsg` (ancillary SCM_RIGHTS); the payload body,
/// if any, follows as a plain write.
pub fn send(channel: &Channel, frame: &Frame) -> Result<(), LinkError> {
    let _guard = channel.send_lock().lock();
    let name = channel.kind().name();
    let header_bytes = frame.header().to_bytes();

    retry(|| channel.stream().send_with_fd(&header_bytes, &frame.fds))
        .map_err(|source| LinkError::Transport { channel: name, source })?;

    let body = frame.body_bytes();
    if !body.is_empty() {
        write_all(channel.stream(), &body, name)?;
    }
    Ok(())
}

/// Receives one frame on `channel` (spec.md §4.1 `recv`).
///
/// Acquires the channel's recv-lock for the duration. Validates `size`
/// against the command's known payload shape before trusting it (spec.md
/// §4.1: "the receiver trusts `size` and MUST pre-validate it"), and probes
/// every received FD for liveness before accepting the frame.
pub fn recv(channel: &Channel) -> Result<Frame, LinkError> {
    let _guard = channel.recv_lock().lock();
    let name = channel.kind().name();

    let mut header_buf = [0u8; HEADER_LEN];
    let mut fd_buf = [0 as RawFd; remote_wire::MAX_FDS];
    let (n, num_fds) = retry(|| channel.stream().recv_with_fd(&mut header_buf, &mut fd_buf))
        .map_err(|source| LinkError::Transport { channel: name, source })?;
    if n == 0 {
        return Err(LinkError::Hangup(name));
    }
    if n < HEADER_LEN {
        return Err(LinkError::Transport {
            channel: name,
            source: io::Error::new(ErrorKind::UnexpectedEof, "short header read"),
        });
    }
    let header = Header::from_bytes(&header_buf)?;
    if header.num_fds as usize != num_fds {
        return Err(LinkError::Protocol(remote_wire::WireError::TooManyFds(num_fds)));
    }
    let fds = fd_buf[..num_fds].to_vec();
    for &fd in &fds {
        if !probe_fd_is_open(fd) {
            return Err(LinkError::DeadFd(fd));
        }
    }

    validate_size(&header, name)?;

    let mut body = vec![0u8; header.size as usize];
    if !body.is_empty() {
        fill_exact(channel.stream(), &mut body, name)?;
    }

    Ok(Frame::parse(header, &body, fds)?)
}

/// Pre-validates `size` against the command's known shape, independent of
/// the actual parse (spec.md §4.1: a mismatched `size` is a fatal link
/// error, checked *before* trusting it to allocate/read).
fn validate_size(header: &Header, channel: &'static str) -> Result<(), LinkError> {
    let cmd = Command::try_from(header.cmd)?;
    let expected: Option<usize> = match cmd {
        Command::Init
        | Command::GetPciInfo
        | Command::DeviceReset
        | Command::RemotePing
        | Command::StartMigOut
        | Command::StartMigIn => Some(0),
        Command::BarWrite | Command::BarRead => Some(24),
        Command::RetPciInfo => Some(10),
        Command::MmioReturn => Some(8),
        Command::SetIrqfd => Some(4),
        Command::RunstateSet => Some(4),
        // Bytestream commands carry a proxy-chosen length (JSON blob, or the
        // fixed PciConfigAccess struct); only an upper bound is sane here.
        Command::PciConfigWrite | Command::PciConfigRead => Some(remote_wire::frame::PciConfigAccess::LEN),
        Command::SyncSysmem | Command::DevOpts | Command::DeviceAdd | Command::DeviceDel => None,
        Command::Max => None,
    };
    if let Some(expected) = expected {
        if !cmd.is_bytestream() && header.size as usize != expected {
            return Err(LinkError::Protocol(remote_wire::WireError::BadPayloadSize {
                cmd,
                expected,
                got: header.size as usize,
            }));
        }
        if cmd.is_bytestream() && header.size as usize != expected {
            return Err(LinkError::Protocol(remote_wire::WireError::BadPayloadSize {
                cmd,
                expected,
                got: header.size as usize,
            }));
        }
    } else if header.size as usize > (16 << 20) {
        // No fixed shape (JSON blob / sysmem descriptor): still bound it, a
        // multi-gigabyte `size` is never legitimate and would otherwise be a
        // single fatal allocation (spec.md §7 class (d)).
        return Err(LinkError::Resource(format!(
            "refusing {channel} payload of {} bytes",
            header.size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use mio::Token;
    use remote_wire::frame::BarAccess;
    use std::os::unix::io::IntoRawFd;
    use std::os::unix::net::UnixStream;

    fn pair() -> (Channel, Channel) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            Channel::from_raw_fd(ChannelKind::Com, a.into_raw_fd(), Token(0)).unwrap(),
            Channel::from_raw_fd(ChannelKind::Com, b.into_raw_fd(), Token(1)).unwrap(),
        )
    }

    #[test]
    fn send_then_recv_round_trips() {
        let (tx, rx) = pair();
        let frame = Frame::new(
            Command::BarRead,
            5,
            Payload::Bar(BarAccess { memory: true, addr: 0x40, val: 0, size: 4 }),
            vec![],
        )
        .unwrap();
        send(&tx, &frame).unwrap();
        let received = recv(&rx).unwrap();
        assert_eq!(received, frame);
    }

    #[test]
    fn bytestream_payload_round_trips() {
        let (tx, rx) = pair();
        let json = br#"{"driver":"lsi53c895a","id":"d0"}"#.to_vec();
        let frame = Frame::new(Command::DevOpts, 7, Payload::Bytestream(json.clone()), vec![]).unwrap();
        send(&tx, &frame).unwrap();
        let received = recv(&rx).unwrap();
        let Payload::Bytestream(got) = received.payload else { panic!("expected bytestream") };
        assert_eq!(got, json);
    }

    #[test]
    fn fds_are_conserved_across_send_recv() {
        let (tx, rx) = pair();
        let (f1, f2) = UnixStream::pair().unwrap();
        let fds = vec![f1.into_raw_fd(), f2.into_raw_fd()];
        let frame = Frame::new(Command::SetIrqfd, 1, Payload::Irq(remote_wire::IrqFdInfo { vector: 0 }), fds)
            .unwrap();
        send(&tx, &frame).unwrap();
        let received = recv(&rx).unwrap();
        assert_eq!(received.fds.len(), 2);
        for fd in received.fds {
            assert!(probe_fd_is_open(fd));
            unsafe { libc::close(fd) };
        }
    }

    #[test]
    fn mismatched_size_is_rejected() {
        let (tx, rx) = pair();
        // Hand-craft a header claiming BAR_WRITE shape but with a short body.
        let header = Header { cmd: Command::BarWrite.into(), bytestream: false, size: 4, id: 0, size_id: 0, num_fds: 0 };
        tx.stream().send_with_fd::<RawFd>(&header.to_bytes(), &[]).unwrap();
        assert!(matches!(recv(&rx), Err(LinkError::Protocol(_))));
    }
}
