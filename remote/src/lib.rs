//! The remote (out-of-process device emulator) dispatcher, registry and
//! handlers (spec.md §2 components C5-C7).

pub mod device;
pub mod devices;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod machine;
pub mod registry;
pub mod sysmem;

pub use device::{Device, DeviceFactory, FactoryRegistry};
pub use dispatcher::Dispatcher;
pub use error::HandlerError;
pub use registry::Registry;
pub use sysmem::{NoopSysmem, SysmemSync};
