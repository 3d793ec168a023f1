//! # Message bus: typed routing between modules.
//!
//! The bus maps each message type to the modules that registered a handler
//! for it and delivers into their mailboxes. Remote targets are encoded and
//! handed to the link module as packages.
//!
//! ## Architecture
//! ```text
//! cast(msg, opts) ──► route(opts)
//!                      ├─ Local  → registry[T] (cast receivers, one_of_mods filter)
//!                      │            └─► try_send Mail::Cast to each mailbox
//!                      └─ Remote → codec.encode ─► CastPackage ─► link module
//!
//! call(msg, opts) ──► route(opts)
//!                      ├─ Local  → registry[T] (rpc receivers) → random pick
//!                      │            └─► Mail::Request { body, Responder }
//!                      └─ Remote → RpcPackage ─► link module (Responder kept there)
//!                 ──► timeout(rpc_timeout, oneshot) → exactly one outcome
//! ```
//!
//! ## Rules
//! - Duplicate (type, module) registration is an error at registration time.
//! - A cast without receivers is a silent no-op (debug log).
//! - A full mailbox drops the cast with a warning; requests fail with
//!   [`RpcError::Mailbox`].
//! - Handler panics stay inside the receiving module.

use std::any::{Any, TypeId, type_name};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use rand::seq::IndexedRandom;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{RegistrationError, RpcError};
use crate::module::mail::Mail;
use crate::module::{Context, Module};
use crate::runtime::Config;

use super::codec::{Codec, Frame};
use super::message::Message;
use super::options::{CastOptions, Remote, Route};
use super::registry::{Kind, Registry};
use super::rpc::{Outcome, Responder};

/// Remote cast handed to the link module.
pub(crate) struct CastPackage {
    pub(crate) target: Remote,
    pub(crate) frame: Frame,
    pub(crate) headers: BTreeMap<String, String>,
    pub(crate) expires: Option<Instant>,
}

/// Remote request handed to the link module.
pub(crate) struct RpcPackage {
    pub(crate) target: Remote,
    pub(crate) frame: Frame,
}

/// Typed router between modules. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    codec: Codec,
    server_id: u32,
    server_type: String,
    rpc_timeout: Duration,
}

impl Bus {
    pub(crate) fn new(cfg: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Registry::default(),
                codec: Codec::new(),
                server_id: cfg.server_id,
                server_type: cfg.server_type.clone(),
                rpc_timeout: cfg.rpc_timeout_clamped(),
            }),
        }
    }

    pub fn server_id(&self) -> u32 {
        self.inner.server_id
    }

    pub fn server_type(&self) -> &str {
        &self.inner.server_type
    }

    /// Deadline applied to every request.
    pub fn rpc_timeout(&self) -> Duration {
        self.inner.rpc_timeout
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    /// Registers `module` as a receiver of `T` casts.
    ///
    /// Wires the handler into the module and makes `T` decodable so remote
    /// casts can reach it.
    pub fn register_handler<S, T, F>(
        &self,
        module: &mut Module<S>,
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        S: Send + 'static,
        T: Message,
        F: FnMut(&mut S, &T, &Context<S>) + Send + 'static,
    {
        self.register_local_handler(module, handler)?;
        self.inner.codec.register::<T>();
        Ok(())
    }

    /// Registers `module` as a receiver of `T` requests.
    ///
    /// The handler must consume its [`Responder`]; dropping it answers
    /// [`RpcError::BrokenPromise`].
    pub fn register_rpc<S, T, F>(
        &self,
        module: &mut Module<S>,
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        S: Send + 'static,
        T: Message,
        F: FnMut(&mut S, T, Responder, &Context<S>) + Send + 'static,
    {
        self.register_local_rpc(module, handler)?;
        self.inner.codec.register::<T>();
        Ok(())
    }

    /// Registration without the codec, for in-process-only types.
    pub(crate) fn register_local_handler<S, T, F>(
        &self,
        module: &mut Module<S>,
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        S: Send + 'static,
        T: Send + Sync + 'static,
        F: FnMut(&mut S, &T, &Context<S>) + Send + 'static,
    {
        module.register_handler::<T, F>(handler)?;
        self.inner
            .registry
            .insert(TypeId::of::<T>(), type_name::<T>(), module.handle(), Kind::Cast)
            .inspect_err(|_| module.unregister::<T>())
    }

    pub(crate) fn register_local_rpc<S, T, F>(
        &self,
        module: &mut Module<S>,
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        S: Send + 'static,
        T: Send + 'static,
        F: FnMut(&mut S, T, Responder, &Context<S>) + Send + 'static,
    {
        module.register_rpc::<T, F>(handler)?;
        self.inner
            .registry
            .insert(TypeId::of::<T>(), type_name::<T>(), module.handle(), Kind::Rpc)
            .inspect_err(|_| module.unregister::<T>())
    }

    /// Names of the modules registered for `T`, in registration order.
    pub fn receivers<T: 'static>(&self) -> Vec<String> {
        self.inner.registry.names(TypeId::of::<T>())
    }

    /// Fire-and-forget delivery of `msg` to every receiver selected by `opts`.
    pub fn cast<T: Message>(&self, msg: T, opts: CastOptions) {
        match opts.route(self.inner.server_id) {
            Route::Local => {
                self.deliver(
                    TypeId::of::<T>(),
                    type_name::<T>(),
                    Arc::new(msg),
                    opts.one_of_mods.as_deref(),
                    opts.expires,
                );
            }
            Route::Remote(target) => match self.inner.codec.encode_frame(&msg) {
                Ok(frame) => {
                    let pkg = CastPackage {
                        target,
                        frame,
                        headers: opts.headers,
                        expires: opts.expires,
                    };
                    let delivered = self.deliver(
                        TypeId::of::<CastPackage>(),
                        type_name::<T>(),
                        Arc::new(pkg),
                        None,
                        opts.expires,
                    );
                    if delivered == 0 {
                        warn!(message = type_name::<T>(), "remote cast dropped: no link module");
                    }
                }
                Err(err) => {
                    warn!(message = type_name::<T>(), error = %err, "remote cast encode failed");
                }
            },
        }
    }

    /// Sends `msg` to exactly one receiver and waits for its answer.
    ///
    /// Resolves exactly once: with the response, a rejection, a delivery
    /// failure, or [`RpcError::Timeout`] after [`rpc_timeout`](Self::rpc_timeout).
    /// Routing happens before this returns; only the wait is deferred.
    pub fn call<Req, Resp>(&self, msg: Req, opts: CastOptions) -> BoxFuture<'static, Result<Resp, RpcError>>
    where
        Req: Message,
        Resp: Message,
    {
        let pending = match opts.route(self.inner.server_id) {
            Route::Local => self.route_request(
                TypeId::of::<Req>(),
                type_name::<Req>(),
                Box::new(msg),
                opts.one_of_mods.as_deref(),
            ),
            Route::Remote(target) => self.route_remote(target, &msg),
        };
        let outcome = self.wait(pending);
        async move { outcome.await?.into_value::<Resp>() }.boxed()
    }

    /// Local request with an already type-erased body.
    pub(crate) fn request_local(
        &self,
        tag: TypeId,
        name: &'static str,
        body: Box<dyn Any + Send>,
    ) -> BoxFuture<'static, Outcome> {
        self.wait(self.route_request(tag, name, body, None))
    }

    /// Local cast with an already type-erased body; returns the number of mailboxes reached.
    pub(crate) fn deliver(
        &self,
        tag: TypeId,
        name: &'static str,
        body: Arc<dyn Any + Send + Sync>,
        only: Option<&str>,
        expires: Option<Instant>,
    ) -> usize {
        if expires.is_some_and(|at| Instant::now() >= at) {
            debug!(message = name, "expired cast dropped");
            return 0;
        }
        let targets = self.inner.registry.lookup(tag, Kind::Cast, only);
        if targets.is_empty() {
            debug!(message = name, "no receiver, cast dropped");
            return 0;
        }

        let mut delivered = 0;
        for handle in targets {
            let mail = Mail::Cast {
                tag,
                name,
                body: body.clone(),
                expires,
            };
            match handle.post(mail) {
                Ok(()) => delivered += 1,
                Err((err, _)) => {
                    warn!(module = %handle.name(), message = name, error = %err, "cast not delivered");
                }
            }
        }
        delivered
    }

    fn route_remote<T: Message>(
        &self,
        target: Remote,
        msg: &T,
    ) -> Result<oneshot::Receiver<Outcome>, RpcError> {
        let frame = self.inner.codec.encode_frame(msg)?;
        self.route_request(
            TypeId::of::<RpcPackage>(),
            type_name::<RpcPackage>(),
            Box::new(RpcPackage { target, frame }),
            None,
        )
        .map_err(|err| match err {
            RpcError::NoReceiver { .. } => RpcError::Transport {
                message: "no link module mounted".to_string(),
            },
            other => other,
        })
    }

    fn route_request(
        &self,
        tag: TypeId,
        name: &'static str,
        body: Box<dyn Any + Send>,
        only: Option<&str>,
    ) -> Result<oneshot::Receiver<Outcome>, RpcError> {
        let candidates = self.inner.registry.lookup(tag, Kind::Rpc, only);
        let target = candidates
            .choose(&mut rand::rng())
            .ok_or_else(|| RpcError::NoReceiver {
                message: name.to_string(),
            })?;

        let (responder, rx) = Responder::new();
        let mail = Mail::Request {
            tag,
            name,
            body,
            responder,
        };
        if let Err((err, mail)) = target.post(mail) {
            warn!(module = %target.name(), message = name, error = %err, "request not delivered");
            mail.reject(RpcError::Mailbox(err));
        }
        Ok(rx)
    }

    fn wait(&self, pending: Result<oneshot::Receiver<Outcome>, RpcError>) -> BoxFuture<'static, Outcome> {
        let timeout = self.inner.rpc_timeout;
        async move {
            let rx = pending?;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(RpcError::BrokenPromise),
                Err(_) => Err(RpcError::Timeout { timeout }),
            }
        }
        .boxed()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("server_id", &self.inner.server_id)
            .field("server_type", &self.inner.server_type)
            .finish_non_exhaustive()
    }
}
