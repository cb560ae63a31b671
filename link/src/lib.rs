//! The link layer (spec.md §2 components C2-C4): channel ownership, framed
//! I/O, the wait-fd primitive, and the single-threaded event loop that ties
//! them together.

pub mod channel;
pub mod codec;
pub mod error;
pub mod frame;
pub mod link;
pub mod reactor;
pub mod waitfd;

pub use channel::{Channel, ChannelKind};
pub use error::LinkError;
pub use frame::OwnedFrame;
pub use link::{Link, Verdict};
pub use reactor::{Reactor, ReadyEvent};
pub use waitfd::{Waiter, WaitPool};
