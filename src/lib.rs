//! # modvisor
//!
//! **Modvisor** is the concurrency and message-routing core of a modular
//! server: independently running *modules*, each a single-threaded actor with
//! its own mailbox, wired together by a typed message bus.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │  Module "a"  │   │  Module "b"  │   │ Module "link"│──► Transport
//!   │ state + hooks│   │ state + hooks│   │ pending rpcs │◄── (subjects)
//!   └──────▲───────┘   └──────▲───────┘   └──────▲───────┘
//!          │ mailbox          │ mailbox          │ mailbox
//! ┌────────┴──────────────────┴──────────────────┴──────────────────┐
//! │  Bus                                                            │
//! │  - Registry (TypeId → receiving modules)                        │
//! │  - Codec (type-tagged JSON frames for remote payloads)          │
//! │  - cast / call (routing by CastOptions, rpc timeout)            │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                │
//!          ┌─────────────────────┴─────────────────────┐
//!          ▼                                           ▼
//!   ┌──────────────┐                           ┌──────────────┐
//!   │   Launcher   │◄──────────────────────────│ WorkerGroup  │
//!   │ tracked tasks│   drain loops per key     │ keyed lanes  │
//!   │ cancel+drain │                           │ FIFO per key │
//!   └──────────────┘                           └──────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! Server::new(cfg) ─► module(name, state) ─► register handlers/hooks ─► mount
//!
//! start():    Before(Init) → After(Init) → Before(Run) → Running → After(Run)
//! shutdown(): Before(Stop) → stop modules → After(Stop) → Launcher::drain
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                   |
//! |-------------------|---------------------------------------------------------------|--------------------------------------|
//! | **Runtime**       | Lifecycle driving, supervised launch, graceful drain.         | [`Server`], [`Launcher`], [`Config`] |
//! | **Modules**       | Actor with mailbox, hooks, async bridging.                    | [`Module`], [`Context`]              |
//! | **Message bus**   | Typed casts and requests, local or remote.                    | [`Bus`], [`CastOptions`], [`Responder`] |
//! | **Worker lanes**  | Serialized execution per key.                                 | [`WorkerGroup`]                      |
//! | **Events**        | Topic pub-sub on top of the bus.                              | [`EventBus`], [`Subscriber`]         |
//! | **Link**          | Cross-process bridge over a transport.                        | [`bus::link`], [`Transport`]         |
//! | **Errors**        | Typed errors for lifecycle, registration and rpc.             | [`RuntimeError`], [`RpcError`]       |
//!
//! ## Example
//! ```rust
//! use modvisor::{Config, Responder, Server};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Add(i64, i64);
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(Config::default());
//!
//!     let mut calc = server.module("calc", ());
//!     server
//!         .bus()
//!         .register_rpc(&mut calc, |_, Add(a, b): Add, responder: Responder, _| {
//!             responder.resolve(a + b)
//!         })?;
//!     server.mount(calc)?;
//!
//!     server.start().await?;
//!     let sum: i64 = server.bus().call(Add(2, 3), Default::default()).await?;
//!     assert_eq!(sum, 5);
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod bus;
mod error;
mod events;
mod module;
mod runtime;
mod workers;

// ---- Public re-exports ----

pub use bus::{Bus, CastOptions, Codec, Delivery, MemoryTransport, Message, Responder, Transport};
pub use error::{
    CodecError, EventError, MailboxError, RegistrationError, RpcError, RuntimeError, TransportError,
};
pub use events::{Event, EventBus, Subscriber};
pub use module::{Context, Module, ModuleHandle, Phase, ServerState, Stage};
pub use runtime::{Config, Launcher, Server};
pub use workers::{SubmitError, WorkerGroup};
