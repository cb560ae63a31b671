//! The dispatcher (spec.md §4.5, C5): demultiplexes validated frames onto
//! their per-command handler.
//!
//! Validation steps 1 (enum range, per-command payload shape) already
//! happened upstream, in `wire::frame::Frame::parse` and
//! `link::codec::validate_size` — by the time a frame reaches here, `cmd`
//! is a real [`Command`] and `payload` is already the matching variant.
//! This module is left with step 2 (device lookup, delegated to the
//! per-command handler) and step 3 (invocation).

use parking_lot::Mutex;
use remote_link::{ChannelKind, Link, OwnedFrame, Verdict, WaitPool};
use remote_wire::Command;

use crate::device::FactoryRegistry;
use crate::handlers::{self, Ctx};
use crate::machine::MachineState;
use crate::registry::Registry;
use crate::sysmem::SysmemSync;

pub struct Dispatcher {
    registry: Registry,
    factories: FactoryRegistry,
    machine: Mutex<MachineState>,
    wait_pool: Mutex<WaitPool>,
    sysmem: Box<dyn SysmemSync>,
    pid: u32,
}

impl Dispatcher {
    pub fn new(factories: FactoryRegistry, sysmem: Box<dyn SysmemSync>) -> Self {
        Dispatcher {
            registry: Registry::new(),
            factories,
            machine: Mutex::new(MachineState::default()),
            wait_pool: Mutex::new(WaitPool::default()),
            sysmem,
            pid: std::process::id(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Installed as the [`Link`]'s dispatch callback (spec.md §4.6).
    pub fn process(&mut self, link: &Link, kind: ChannelKind, mut frame: OwnedFrame) -> Verdict {
        if kind == ChannelKind::Mmio {
            tracing::warn!(cmd = ?frame.frame.cmd, "frame received on mmio channel, which should only carry replies");
        }

        let mut ctx = Ctx {
            registry: &mut self.registry,
            factories: &self.factories,
            machine: &self.machine,
            wait_pool: &self.wait_pool,
            sysmem: self.sysmem.as_mut(),
            pid: self.pid,
        };

        let result = match frame.frame.cmd {
            Command::Init => Ok(()),
            Command::GetPciInfo => handlers::handle_get_pci_info(&mut ctx, link, frame.frame.id),
            Command::RetPciInfo | Command::MmioReturn => {
                tracing::warn!(cmd = ?frame.frame.cmd, "remote received a reply-only command");
                Ok(())
            }
            Command::PciConfigWrite => handlers::handle_pci_config_write(&mut ctx, &frame),
            Command::PciConfigRead => handlers::handle_pci_config_read(&mut ctx, &mut frame),
            Command::BarWrite => handlers::handle_bar_write(&mut ctx, &frame),
            Command::BarRead => handlers::handle_bar_read(&mut ctx, link, &frame),
            Command::SyncSysmem => handlers::handle_sync_sysmem(&mut ctx, &mut frame),
            Command::SetIrqfd => handlers::handle_set_irqfd(&mut ctx, &mut frame),
            Command::DevOpts => handlers::handle_dev_opts(&mut ctx, &mut frame),
            Command::DeviceAdd => handlers::handle_device_add(&mut ctx, &mut frame),
            Command::DeviceDel => handlers::handle_device_del(&mut ctx, &mut frame),
            Command::DeviceReset => handlers::handle_device_reset(&mut ctx, &mut frame),
            Command::RemotePing => handlers::handle_remote_ping(&mut ctx, &mut frame),
            Command::StartMigOut => handlers::handle_start_mig_out(&mut ctx, &mut frame),
            Command::StartMigIn => handlers::handle_start_mig_in(&mut ctx, &mut frame),
            Command::RunstateSet => handlers::handle_runstate_set(&mut ctx, &mut frame),
            Command::Max => unreachable!("MAX is rejected by Command::try_from before a Frame exists"),
        };

        match result {
            Ok(()) => Verdict::Keep,
            Err(e) => {
                tracing::error!(error = %e, "fatal dispatch error, tearing down link");
                Verdict::Remove
            }
        }
    }
}
