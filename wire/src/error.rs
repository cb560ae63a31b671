//! Errors that can occur while parsing or building a wire frame.

use thiserror::Error;

/// Failure while turning bytes into a [`crate::frame::Frame`] or back.
#[derive(Debug, Error)]
pub enum WireError {
    /// The `cmd` tag did not match any entry in [`crate::command::Command`].
    #[error("unknown command tag {0}")]
    UnknownCommand(u32),

    /// The header or payload buffer was shorter than required.
    #[error("truncated frame: expected at least {expected} bytes, got {got}")]
    Truncated {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually available.
        got: usize,
    },

    /// `size` did not match the fixed payload shape the command requires.
    #[error("bad payload size for {cmd:?}: expected {expected}, got {got}")]
    BadPayloadSize {
        /// The command whose shape was violated.
        cmd: crate::command::Command,
        /// Expected payload size in bytes.
        expected: usize,
        /// Size carried on the wire.
        got: usize,
    },

    /// `num_fds` exceeded [`crate::MAX_FDS`].
    #[error("fd count {0} exceeds MAX_FDS ({max})", max = crate::MAX_FDS)]
    TooManyFds(usize),

    /// `id` exceeded [`crate::MAX_DEVICES`].
    #[error("device id {0} exceeds MAX_DEVICES ({max})", max = crate::MAX_DEVICES)]
    DeviceIdOutOfRange(u64),
}
