//! Per-command handlers (spec.md §4.5, C7). Each module owns one family of
//! commands, matching the teacher's one-file-per-concern handler split.

pub mod bar;
pub mod config;
pub mod irq;
pub mod lifecycle;
pub mod migrate;
pub mod ping;
pub mod runstate;
pub mod sysmem;

use parking_lot::Mutex;
use remote_link::{LinkError, OwnedFrame, Waiter};

use crate::device::FactoryRegistry;
use crate::machine::MachineState;
use crate::registry::Registry;
use crate::sysmem::SysmemSync;

/// Everything a handler needs besides the inbound frame itself.
pub struct Ctx<'a> {
    pub registry: &'a mut Registry,
    pub factories: &'a FactoryRegistry,
    pub machine: &'a Mutex<MachineState>,
    pub wait_pool: &'a Mutex<remote_link::WaitPool>,
    pub sysmem: &'a mut dyn SysmemSync,
    pub pid: u32,
}

/// Takes the frame's wait-fd (conventionally the last fd it carries) and
/// checks it out of the pool, or returns a fatal resource error if the pool
/// is saturated (spec.md §4.3: "the fd is returned to a small pool after
/// use").
pub fn take_waiter(ctx: &Ctx, frame: &mut OwnedFrame, index: usize) -> Result<Waiter, LinkError> {
    let fd = frame
        .take_fd(index)
        .ok_or_else(|| LinkError::Resource(format!("expected a wait-fd at index {index}")))?;
    ctx.wait_pool
        .lock()
        .checkout(fd)
        .ok_or_else(|| LinkError::Resource("wait-fd pool exhausted".into()))
}

/// Notifies `waiter` and releases its pool slot, logging (not failing the
/// link) if the write itself errors — by the time we're replying, the
/// frame that requested it has already been fully processed.
pub fn notify_and_release(ctx: &Ctx, waiter: Waiter, value: u64) {
    if let Err(e) = waiter.notify(value) {
        tracing::warn!(error = %e, "failed to notify wait-fd");
    }
    ctx.wait_pool.lock().release();
}

pub use self::{
    bar::{handle_bar_read, handle_bar_write},
    config::{handle_get_pci_info, handle_pci_config_read, handle_pci_config_write},
    irq::handle_set_irqfd,
    lifecycle::{handle_dev_opts, handle_device_add, handle_device_del, handle_device_reset},
    migrate::{handle_start_mig_in, handle_start_mig_out},
    ping::handle_remote_ping,
    runstate::handle_runstate_set,
    sysmem::handle_sync_sysmem,
};
