//! Link-level error taxonomy (spec.md §7, classes (a), (b), (d): all fatal).

use thiserror::Error;

/// A fatal error that tears the link down. Handler/device errors (spec.md
/// §7 class (c)) are *not* represented here — those are reported back to
/// the proxy and logged by the dispatcher without killing the link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// (a) transport errors: read/write failure, unexpected hangup.
    #[error("transport error on {channel}: {source}")]
    Transport {
        channel: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// (a) the peer closed its end of the socket.
    #[error("{0} channel hung up")]
    Hangup(&'static str),

    /// (b) protocol errors: malformed frame, bad command, FD count mismatch.
    #[error("protocol error: {0}")]
    Protocol(#[from] remote_wire::WireError),

    /// (b) a received FD failed the liveness probe (spec.md §3: "every fd in
    /// fds[] must be open").
    #[error("received fd {0} is not open")]
    DeadFd(i32),

    /// (d) resource errors: allocation failure, FD exhaustion, reactor setup.
    #[error("resource error: {0}")]
    Resource(String),
}
