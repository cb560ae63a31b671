//! The coarse "I/O-thread" lock (spec.md §9: "model as a single mutex on a
//! `MachineState` value guarded for the duration of any PCI config / BAR /
//! reset operation").
//!
//! Always the innermost lock (spec.md §5): handlers take it for the
//! duration of the device call only, never across `sendmsg`, `read`, or a
//! wait-fd poll.

/// Host-side state a real device model would need serialized access to
/// (interrupt controller wiring, shared memory layout, ...). Empty here
/// since this crate's device models don't touch real host state (spec.md
/// §1's out-of-scope host memory-region infrastructure).
#[derive(Debug, Default)]
pub struct MachineState {
    pub runstate: u32,
}
