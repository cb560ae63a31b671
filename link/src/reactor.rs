//! Minimal poll-source reactor (spec.md §9: "model via a minimal reactor
//! interface {register(fd, mask), wait() → ready set}").
//!
//! Backed by `mio::Poll`. Each [`crate::channel::Channel`] registers itself
//! independently, as spec.md §4.2 requires ("The two channels register
//! independently").

use std::time::Duration;

use mio::{Events, Poll, Token};

use crate::error::LinkError;

/// One ready notification: which channel, and whether it was hangup/error
/// rather than plain readability (spec.md §4.2: "readiness mask is
/// (readable | hangup | error)").
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub hangup: bool,
    pub error: bool,
}

/// The reactor: owns the single `poll` suspension point (spec.md §5 (i)).
pub struct Reactor {
    poll: Poll,
    events: Events,
}

impl Reactor {
    pub fn new() -> Result<Self, LinkError> {
        let poll = Poll::new().map_err(|e| LinkError::Resource(format!("mio::Poll::new: {e}")))?;
        Ok(Reactor { poll, events: Events::with_capacity(8) })
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// Blocks until at least one channel is ready, or `timeout` elapses.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<Vec<ReadyEvent>, LinkError> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LinkError::Resource(format!("mio::Poll::poll: {e}"))),
            }
        }
        Ok(self
            .events
            .iter()
            .map(|ev| ReadyEvent {
                token: ev.token(),
                readable: ev.is_readable(),
                hangup: ev.is_read_closed() || ev.is_write_closed(),
                error: ev.is_error(),
            })
            .collect())
    }
}
