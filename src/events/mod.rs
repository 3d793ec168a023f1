//! Topic/subscriber events on top of the message bus.
//!
//! - [`Event`] topic plus string arguments.
//! - [`Subscriber`] named, multi-topic listener.
//! - [`EventBus`] per-module registry with `cast` (via mailbox) and `sync_cast`.

mod bus;
mod event;
mod subscriber;

pub use bus::EventBus;
pub use event::Event;
pub use subscriber::Subscriber;
