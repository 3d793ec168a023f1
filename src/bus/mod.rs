//! Typed message bus.
//!
//! - [`Bus`] receiver registry, casts and requests.
//! - [`CastOptions`] per-send modifiers.
//! - [`Responder`] one-shot completion for RPC handlers.
//! - [`Codec`] type-tagged JSON frames for cross-process payloads.
//! - [`Transport`] / [`MemoryTransport`] publish/subscribe collaborator.
//! - [`link`] module bridging the bus to a transport.

#[allow(clippy::module_inception)]
mod bus;
mod codec;
pub mod link;
mod message;
mod options;
mod registry;
mod rpc;
mod transport;

pub use bus::Bus;
pub use codec::{Codec, Decoded, Frame};
pub use message::Message;
pub use options::CastOptions;
pub use rpc::Responder;
pub use transport::{Delivery, MemoryTransport, Transport};
