//! `SYNC_SYSMEM` delegate (spec.md §9: re-architecting the external
//! `sysmem_reconfig` primitive, since the host memory-region infrastructure
//! itself is out of scope, spec.md §1).

use std::os::unix::io::OwnedFd;

/// Installs guest-RAM-backed memfds into the remote's address space.
///
/// A failure here is fatal to the link (spec.md §4.5, §7 class (b)), unlike
/// ordinary device errors.
pub trait SysmemSync: Send {
    fn reconfig(&mut self, descriptor: &[u8], memfds: &[OwnedFd]) -> Result<(), String>;
}

/// Validates shape and logs; does not actually remap memory, since the host
/// address-space machinery this would drive is out of scope here (spec.md
/// §1, and documented caveat in spec.md §9(e): no active DMA arbitration is
/// performed — the proxy is expected to quiesce devices first).
#[derive(Default)]
pub struct NoopSysmem;

impl SysmemSync for NoopSysmem {
    fn reconfig(&mut self, descriptor: &[u8], memfds: &[OwnedFd]) -> Result<(), String> {
        if descriptor.is_empty() {
            return Err("empty sysmem descriptor".into());
        }
        if memfds.is_empty() {
            return Err("SYNC_SYSMEM with no memfds attached".into());
        }
        tracing::debug!(
            descriptor_len = descriptor.len(),
            memfds = memfds.len(),
            "sysmem sync accepted (no-op: host address space out of scope)"
        );
        Ok(())
    }
}
