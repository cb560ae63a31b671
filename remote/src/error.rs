//! Non-fatal handler/device errors (spec.md §7 class (c)).
//!
//! Unlike [`remote_link::LinkError`], nothing here tears the link down: the
//! dispatcher reports these back to the proxy (via the wait-fd status or an
//! MMIO reply) and keeps running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed device options: {0}")]
    BadOptions(#[from] serde_json::Error),

    #[error("device options missing required field {0:?}")]
    MissingField(&'static str),

    #[error("unknown driver {0:?}")]
    UnknownDriver(String),

    #[error("no device named {0:?}")]
    UnknownDeviceName(String),

    #[error("no device in slot {0}")]
    NoDeviceAtId(u64),

    #[error("device {0} not yet created (no SET_IRQFD seen)")]
    NotCreated(u64),

    #[error("bus access error: {0}")]
    BusAccess(String),

    #[error("sysmem reconfiguration failed: {0}")]
    SysmemReconfig(String),
}

impl HandlerError {
    /// The `REMOTE_OK`/`REMOTE_FAIL`-style status code handlers notify the
    /// wait-fd with on failure (spec.md §4.5's `DEV_OPTS` row).
    pub const REMOTE_OK: u64 = 0;
    pub const REMOTE_FAIL: u64 = u64::MAX;
}
