//! Bootstrap (spec.md §4.6, C8): `remote <control-fd> <mmio-fd>
//! [device-options…]`.

use std::os::unix::io::RawFd;

use clap::Parser;
use remote_link::Link;

use remote::device::FactoryRegistry;
use remote::devices::PciTestDevFactory;
use remote::dispatcher::Dispatcher;
use remote::sysmem::NoopSysmem;

#[derive(Parser, Debug)]
#[command(name = "remote", about = "Out-of-process PCI device emulator")]
struct Args {
    /// Pre-opened control-channel socket fd (spec.md §6).
    control_fd: RawFd,

    /// Pre-opened MMIO fast-path socket fd.
    mmio_fd: RawFd,

    /// Device-type modules to make available before the first `DEV_OPTS`
    /// (spec.md §4.6: "device-type modules can be registered before any
    /// devices are created").
    #[arg(trailing_var_arg = true)]
    device_options: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.device_options.is_empty() {
        tracing::debug!(options = ?args.device_options, "deferred device-option modules");
    }

    let mut factories = FactoryRegistry::new();
    factories.register(Box::new(PciTestDevFactory));

    let mut link = match Link::new(args.control_fd, args.mmio_fd) {
        Ok(link) => link,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct link");
            std::process::exit(1);
        }
    };

    let mut dispatcher = Dispatcher::new(factories, Box::new(NoopSysmem));

    let result = link.run(|link, kind, frame| dispatcher.process(link, kind, frame));
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "link terminated");
            std::process::exit(1);
        }
    }
}
