//! # Module: a single-threaded actor with a mailbox and lifecycle hooks.
//!
//! A [`Module<S>`] owns its state `S` and is driven by exactly one task. Every
//! handler, RPC handler, hook and callback receives `&mut S` from that task,
//! so module state never needs a lock.
//!
//! ## Architecture
//! ```text
//! ModuleHandle ──assign/cast/request──► mailbox (bounded) ──┐
//! Server ────────hooks/start──────────► control (unbounded) ┤
//!                                                           ▼
//!                                             run loop (one task)
//!                                               ├─ stop token    → exit
//!                                               ├─ Control::Hooks → run hooks, reply
//!                                               ├─ Control::Start → Running
//!                                               └─ Mail (only when Running)
//!                                                    ├─ Cast     → handler(&mut S, &T, ctx)
//!                                                    ├─ Request  → rpc(&mut S, T, Responder, ctx)
//!                                                    └─ Callback → cont(&mut S, ctx)
//! on exit: Draining → After(Stop) hooks → Stopped
//! ```
//!
//! ## Rules
//! - Items are dispatched one at a time in mailbox order.
//! - Casts whose expiry has passed are dropped before dispatch.
//! - A panicking handler is logged; the loop keeps running. A panicking RPC
//!   handler drops its responder, which answers `BrokenPromise`.
//! - Hooks run on the module task, in registration order; the first failure
//!   (error or panic) stops the remaining hooks of that stage.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;

use anyhow::Context as _;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::bus::{Bus, Responder};
use crate::error::{RegistrationError, RpcError};
use crate::runtime::Launcher;
use crate::runtime::launcher::panic_message;
use crate::workers::WorkerGroup;

use super::context::Context;
use super::handle::ModuleHandle;
use super::lifecycle::{Phase, ServerState, Stage};
use super::mail::{Continuation, Control, Mail};

type CastFn<S> = Box<dyn FnMut(&mut S, &(dyn Any + Send + Sync), &Context<S>) + Send>;
type RpcFn<S> = Box<dyn FnMut(&mut S, Box<dyn Any + Send>, Responder, &Context<S>) + Send>;
type Hook<S> = Box<dyn for<'a> FnMut(&'a mut S) -> BoxFuture<'a, anyhow::Result<()>> + Send>;

enum Dispatch<S> {
    Cast(CastFn<S>),
    Rpc(RpcFn<S>),
}

/// Single-threaded actor owning state `S`.
///
/// Built by [`Server::module`](crate::Server::module), configured with
/// handlers and hooks, then handed to [`Server::mount`](crate::Server::mount).
pub struct Module<S> {
    handle: ModuleHandle,
    rx: mpsc::Receiver<Mail>,
    control: mpsc::UnboundedReceiver<Control>,
    state: S,
    handlers: HashMap<TypeId, Dispatch<S>>,
    hooks: HashMap<(ServerState, Stage), Vec<Hook<S>>>,
    ctx: Context<S>,
}

impl<S> fmt::Debug for Module<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.handle.name())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl<S: Send + 'static> Module<S> {
    pub(crate) fn new(
        name: String,
        state: S,
        capacity: usize,
        bus: Bus,
        launcher: Launcher,
        workers: WorkerGroup,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control) = mpsc::unbounded_channel();
        let stop = launcher.token().child_token();
        let handle = ModuleHandle::new(name, tx, control_tx, stop);
        let ctx = Context::new(handle.clone(), bus, launcher, workers);
        Self {
            handle,
            rx,
            control,
            state,
            handlers: HashMap::new(),
            hooks: HashMap::new(),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Address of this module; valid before and after mounting.
    pub fn handle(&self) -> ModuleHandle {
        self.handle.clone()
    }

    /// Context handed to this module's handlers.
    pub fn context(&self) -> &Context<S> {
        &self.ctx
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Associates `T` with a handler for items delivered by
    /// [`ModuleHandle::assign`] or by a bus cast.
    ///
    /// Only local delivery is wired here; use
    /// [`Bus::register_handler`](crate::Bus::register_handler) to make `T`
    /// reachable through the bus.
    pub fn register_handler<T, F>(&mut self, mut handler: F) -> Result<(), RegistrationError>
    where
        T: Send + Sync + 'static,
        F: FnMut(&mut S, &T, &Context<S>) + Send + 'static,
    {
        let cast: CastFn<S> = Box::new(
            move |state: &mut S, body: &(dyn Any + Send + Sync), ctx: &Context<S>| {
                if let Some(msg) = body.downcast_ref::<T>() {
                    handler(state, msg, ctx);
                }
            },
        );
        self.insert::<T>(Dispatch::Cast(cast))
    }

    pub(crate) fn register_rpc<T, F>(&mut self, mut handler: F) -> Result<(), RegistrationError>
    where
        T: Send + 'static,
        F: FnMut(&mut S, T, Responder, &Context<S>) + Send + 'static,
    {
        let rpc: RpcFn<S> = Box::new(
            move |state: &mut S, body: Box<dyn Any + Send>, responder: Responder, ctx: &Context<S>| {
                match body.downcast::<T>() {
                    Ok(msg) => handler(state, *msg, responder, ctx),
                    Err(_) => responder.fail(RpcError::TypeMismatch {
                        expected: type_name::<T>().to_string(),
                    }),
                }
            },
        );
        self.insert::<T>(Dispatch::Rpc(rpc))
    }

    /// Drops the handler for `T`, undoing a registration the bus refused.
    pub(crate) fn unregister<T: 'static>(&mut self) {
        self.handlers.remove(&TypeId::of::<T>());
    }

    /// Returns true if this module has a handler for `T`.
    pub fn handles<T: 'static>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<T>())
    }

    /// Registers a hook that runs before the server enters `state`.
    ///
    /// Hooks of one `(state, stage)` run in registration order. A failing
    /// `Init`/`Run` hook aborts [`Server::start`](crate::Server::start);
    /// `Stop` hook failures are only logged.
    pub fn before<F>(&mut self, state: ServerState, hook: F)
    where
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, anyhow::Result<()>> + Send + 'static,
    {
        self.hooks
            .entry((state, Stage::Before))
            .or_default()
            .push(Box::new(hook));
    }

    /// Registers a hook that runs after the server entered `state`.
    pub fn after<F>(&mut self, state: ServerState, hook: F)
    where
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, anyhow::Result<()>> + Send + 'static,
    {
        self.hooks
            .entry((state, Stage::After))
            .or_default()
            .push(Box::new(hook));
    }

    /// Number of hooks registered for `(state, stage)`.
    pub fn hooks(&self, state: ServerState, stage: Stage) -> usize {
        self.hooks.get(&(state, stage)).map_or(0, Vec::len)
    }

    fn insert<T: 'static>(&mut self, dispatch: Dispatch<S>) -> Result<(), RegistrationError> {
        let tag = TypeId::of::<T>();
        if self.handlers.contains_key(&tag) {
            return Err(RegistrationError::DuplicateHandler {
                module: self.handle.name().to_string(),
                message: type_name::<T>(),
            });
        }
        self.handlers.insert(tag, dispatch);
        Ok(())
    }

    /// Drives the module until its stop token fires.
    pub(crate) async fn run(mut self) {
        let stop = self.handle.stop_token();
        let mut running = false;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                Some(control) = self.control.recv() => match control {
                    Control::Hooks { state, stage, done } => {
                        let result = self.run_hooks(state, stage).await;
                        let _ = done.send(result);
                    }
                    Control::Start => {
                        running = true;
                        self.handle.advance(Phase::Running);
                    }
                },
                Some(mail) = self.rx.recv(), if running => self.dispatch(mail),
            }
        }

        self.handle.advance(Phase::Draining);
        if let Err(err) = self.run_hooks(ServerState::Stop, Stage::After).await {
            warn!(module = %self.handle.name(), error = %err, "stop hook failed");
        }
        self.handle.advance(Phase::Stopped);
        debug!(module = %self.handle.name(), "module stopped");
    }

    async fn run_hooks(&mut self, server_state: ServerState, stage: Stage) -> anyhow::Result<()> {
        let Some(hooks) = self.hooks.get_mut(&(server_state, stage)) else {
            return Ok(());
        };
        let state = &mut self.state;
        for (index, hook) in hooks.iter_mut().enumerate() {
            let outcome = AssertUnwindSafe(async { hook(&mut *state).await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(result) => result.with_context(|| format!("hook #{index}"))?,
                Err(panic) => anyhow::bail!("hook #{index} panicked: {}", panic_message(&*panic)),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, mail: Mail) {
        let Module {
            handle,
            state,
            handlers,
            ctx,
            ..
        } = self;
        let module = handle.name();
        let ctx = &*ctx;

        match mail {
            Mail::Cast {
                tag,
                name,
                body,
                expires,
            } => {
                if expires.is_some_and(|at| Instant::now() >= at) {
                    debug!(module = %module, message = name, "expired cast dropped");
                    return;
                }
                match handlers.get_mut(&tag) {
                    Some(Dispatch::Cast(handler)) => {
                        guarded(module, name, || handler(state, &*body, ctx));
                    }
                    Some(Dispatch::Rpc(_)) => {
                        warn!(module = %module, message = name, "cast to an rpc handler dropped");
                    }
                    None => warn!(module = %module, message = name, "no handler, message dropped"),
                }
            }
            Mail::Request {
                tag,
                name,
                body,
                responder,
            } => match handlers.get_mut(&tag) {
                Some(Dispatch::Rpc(handler)) => {
                    guarded(module, name, || handler(state, body, responder, ctx));
                }
                _ => responder.fail(RpcError::NoReceiver {
                    message: name.to_string(),
                }),
            },
            Mail::Callback(cont) => match cont.downcast::<Continuation<S>>() {
                Ok(cont) => {
                    let cont: Continuation<S> = *cont;
                    guarded(module, "callback", move || cont(state, ctx));
                }
                Err(_) => error!(module = %module, "callback for another state type dropped"),
            },
        }
    }
}

/// Runs one dispatch, converting a panic into a logged failure.
fn guarded(module: &str, message: &str, f: impl FnOnce()) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            module = %module,
            message = message,
            panic = %panic_message(&*panic),
            "handler panicked"
        );
    }
}
