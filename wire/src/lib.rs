//! Wire format bindings for the remote-device control protocol.
//!
//! This crate plays the role `anvil-rpc` plays for `anvil-server`: it owns
//! the request/response shapes the transport crate (`remote-link`) moves
//! across the wire, with no I/O of its own.

pub mod command;
pub mod error;
pub mod frame;

pub use command::Command;
pub use error::WireError;
pub use frame::{BarAccess, Frame, Header, IrqFdInfo, MmioReturn, Payload, PciConfigAccess, PciInfo, RunState};

/// Largest device id the proxy may assign (spec.md §3).
pub const MAX_DEVICES: usize = 256;

/// Largest number of ancillary FDs a single frame may carry (spec.md §3).
pub const MAX_FDS: usize = 8;
