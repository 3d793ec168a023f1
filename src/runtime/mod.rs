//! Server runtime: configuration, supervised launch and lifecycle driving.
//!
//! - [`Config`] global settings with clamped accessors.
//! - [`Launcher`] tracked task launch and best-effort drain.
//! - [`Server`] owns the bus, the worker group and the mounted modules.

mod config;
pub(crate) mod launcher;
mod server;
mod signals;

pub use config::Config;
pub use launcher::Launcher;
pub use server::Server;
