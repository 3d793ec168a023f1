//! Module actors.
//!
//! - [`Module`] single-threaded actor owning its state.
//! - [`ModuleHandle`] cloneable address used to deliver work.
//! - [`Context`] runtime services lent to handlers.
//! - [`ServerState`], [`Stage`], [`Phase`] lifecycle vocabulary.

mod actor;
mod context;
mod handle;
mod lifecycle;
pub(crate) mod mail;

pub use actor::Module;
pub use context::Context;
pub use handle::ModuleHandle;
pub use lifecycle::{Phase, ServerState, Stage};
