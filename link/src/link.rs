//! Owns the two channels and the event loop (spec.md §4.2, C3).

use std::os::unix::io::RawFd;

use mio::Token;

use crate::channel::{Channel, ChannelKind};
use crate::codec;
use crate::error::LinkError;
use crate::frame::OwnedFrame;
use crate::reactor::Reactor;

const COM_TOKEN: Token = Token(0);
const MMIO_TOKEN: Token = Token(1);

/// What the dispatch callback wants the event loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep running.
    Keep,
    /// Tear the link down (spec.md §4.2: "On hangup or error the callback
    /// returns a 'remove' verdict and the link tears down").
    Remove,
}

/// The link: two channels, a reactor, and the dispatch callback's contract.
///
/// Not restartable (spec.md §4.2): once [`Link::run`] returns, a new `Link`
/// must be constructed from fresh fds.
pub struct Link {
    com: Channel,
    mmio: Channel,
    reactor: Reactor,
}

impl Link {
    /// Takes ownership of the two pre-opened socket fds (spec.md §6: "The
    /// remote receives the FDs on argv") and registers both with the
    /// reactor independently.
    pub fn new(com_fd: RawFd, mmio_fd: RawFd) -> Result<Self, LinkError> {
        let reactor = Reactor::new()?;
        let com = Channel::from_raw_fd(ChannelKind::Com, com_fd, COM_TOKEN)?;
        let mmio = Channel::from_raw_fd(ChannelKind::Mmio, mmio_fd, MMIO_TOKEN)?;
        com.register(reactor.registry())?;
        mmio.register(reactor.registry())?;
        Ok(Link { com, mmio, reactor })
    }

    pub fn channel(&self, kind: ChannelKind) -> &Channel {
        match kind {
            ChannelKind::Com => &self.com,
            ChannelKind::Mmio => &self.mmio,
        }
    }

    /// Sends `frame` on the named channel (spec.md §4.5's reply column: most
    /// handlers reply on `com` via the wait-fd, `BAR_READ` replies with
    /// `MMIO_RETURN` on `mmio`).
    pub fn send(&self, kind: ChannelKind, frame: &remote_wire::Frame) -> Result<(), LinkError> {
        codec::send(self.channel(kind), frame)
    }

    /// Runs the event loop, invoking `dispatch` for every frame received on
    /// either channel until a hangup, a fatal error, or the callback itself
    /// returns [`Verdict::Remove`] (spec.md §4.2, §5: poll is the only
    /// cross-frame suspension point).
    pub fn run<F>(&mut self, mut dispatch: F) -> Result<(), LinkError>
    where
        F: FnMut(&Link, ChannelKind, OwnedFrame) -> Verdict,
    {
        loop {
            let events = self.reactor.wait(None)?;
            for ev in events {
                let kind = if ev.token == self.com.token() { ChannelKind::Com } else { ChannelKind::Mmio };

                if ev.hangup || ev.error {
                    tracing::warn!(channel = kind.name(), "channel closed, tearing down link");
                    return Ok(());
                }
                if !ev.readable {
                    continue;
                }

                match codec::recv(self.channel(kind)) {
                    Ok(frame) => {
                        // SAFETY: `frame.fds` were just received via
                        // SCM_RIGHTS and probed for liveness by `codec::recv`.
                        let owned = unsafe { OwnedFrame::new(frame) };
                        if dispatch(self, kind, owned) == Verdict::Remove {
                            tracing::warn!("dispatcher requested link teardown");
                            return Ok(());
                        }
                    }
                    Err(LinkError::Hangup(name)) => {
                        tracing::info!(channel = name, "peer hung up");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, channel = kind.name(), "fatal link error");
                        return Err(e);
                    }
                }
            }
        }
    }
}
