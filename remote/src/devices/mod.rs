//! Concrete device models. Currently only the test stub (spec.md §4.4's
//! expansion note): this crate does not claim to model any real PCI
//! device's register semantics (spec.md §1, explicitly out of scope).

pub mod testdev;

pub use testdev::PciTestDevFactory;
