//! # Cast options: named modifiers for a single send.
//!
//! Built fluently and consumed by [`Bus::cast`](crate::Bus::cast) and
//! [`Bus::call`](crate::Bus::call); never stored past the send.
//!
//! ## Routing
//! ```text
//! local()               → this process
//! server_type(t)        → one server of pool t (via link)
//! + broadcast()         → every server of pool t (casts only)
//! server_id(id != own)  → server id, stream subject unless nonuse_stream()
//! otherwise             → this process
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

/// Modifiers for one cast or request.
#[derive(Clone, Debug, Default)]
pub struct CastOptions {
    pub(crate) server_id: Option<u32>,
    pub(crate) server_type: Option<String>,
    pub(crate) one_of_mods: Option<String>,
    pub(crate) nonuse_stream: bool,
    pub(crate) broadcast: bool,
    pub(crate) expires: Option<Instant>,
    pub(crate) local: bool,
    pub(crate) headers: BTreeMap<String, String>,
}

impl CastOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets one server by id.
    pub fn server_id(mut self, id: u32) -> Self {
        self.server_id = Some(id);
        self
    }

    /// Targets the pool of servers sharing `server_type`.
    ///
    /// Each cast or request is handled by a single member of the pool.
    pub fn server_type(mut self, server_type: impl Into<String>) -> Self {
        self.server_type = Some(server_type.into());
        self
    }

    /// Restricts delivery to the module named `module`.
    pub fn one_of_mods(mut self, module: impl Into<String>) -> Self {
        self.one_of_mods = Some(module.into());
        self
    }

    /// Sends a remote cast on the plain subject instead of the stream subject.
    pub fn nonuse_stream(mut self) -> Self {
        self.nonuse_stream = true;
        self
    }

    /// Delivers a pool cast to every member instead of one.
    ///
    /// Requests ignore it: a request always has a single responder.
    pub fn broadcast(mut self) -> Self {
        self.broadcast = true;
        self
    }

    /// Drops the cast if it is still undelivered or undispatched after `ttl`.
    pub fn expires(mut self, ttl: Duration) -> Self {
        self.expires = Some(Instant::now() + ttl);
        self
    }

    /// Forces delivery inside this process regardless of other targets.
    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// Adds a header carried by remote casts.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Returns true once the expiry (if any) has passed.
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|at| Instant::now() >= at)
    }

    pub(crate) fn route(&self, own_id: u32) -> Route {
        if self.local {
            return Route::Local;
        }
        if let Some(pool) = &self.server_type {
            return Route::Remote(if self.broadcast {
                Remote::Broadcast(pool.clone())
            } else {
                Remote::Pool(pool.clone())
            });
        }
        match self.server_id {
            Some(id) if id != own_id => Route::Remote(Remote::Server {
                id,
                stream: !self.nonuse_stream,
            }),
            _ => Route::Local,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Local,
    Remote(Remote),
}

/// Destination of a package handed to the link module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Remote {
    Server { id: u32, stream: bool },
    /// One member of the pool.
    Pool(String),
    /// Every member of the pool.
    Broadcast(String),
}
