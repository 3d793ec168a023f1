//! Handler-side view of the runtime.
//!
//! A [`Context`] is lent to every handler, hook continuation and callback of a
//! module. Everything that completes later (blocking work, requests, timers)
//! re-enters the module through its own mailbox, so callbacks run on the actor
//! with `&mut S` like any other item.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use tracing::warn;

use crate::bus::{Bus, CastOptions, Message};
use crate::error::RpcError;
use crate::runtime::Launcher;
use crate::workers::WorkerGroup;

use super::handle::ModuleHandle;
use super::mail::{Continuation, Mail};

/// Runtime services available to the handlers of a module with state `S`.
pub struct Context<S> {
    handle: ModuleHandle,
    bus: Bus,
    launcher: Launcher,
    workers: WorkerGroup,
    _state: PhantomData<fn(&mut S)>,
}

impl<S> Clone for Context<S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            bus: self.bus.clone(),
            launcher: self.launcher.clone(),
            workers: self.workers.clone(),
            _state: PhantomData,
        }
    }
}

impl<S> fmt::Debug for Context<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("module", &self.handle.name())
            .finish_non_exhaustive()
    }
}

impl<S: 'static> Context<S> {
    pub(crate) fn new(
        handle: ModuleHandle,
        bus: Bus,
        launcher: Launcher,
        workers: WorkerGroup,
    ) -> Self {
        Self {
            handle,
            bus,
            launcher,
            workers,
            _state: PhantomData,
        }
    }

    /// Name of the owning module.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Address of the owning module.
    pub fn handle(&self) -> &ModuleHandle {
        &self.handle
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    pub fn workers(&self) -> &WorkerGroup {
        &self.workers
    }

    /// Shorthand for [`Bus::cast`].
    pub fn cast<T: Message>(&self, msg: T, opts: CastOptions) {
        self.bus.cast(msg, opts);
    }

    /// Runs `blocking` on the blocking pool, then `callback` on this module.
    ///
    /// `blocking` never runs on the actor task, so it must not touch the
    /// module state; anything it captures may be accessed concurrently.
    pub fn run_async<T, E, F, C>(&self, blocking: F, callback: C)
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
        C: FnOnce(&mut S, Result<T, E>, &Context<S>) + Send + 'static,
    {
        let handle = self.handle.clone();
        let launched = self.launcher.launch_blocking(move || {
            let result = blocking();
            let cont: Continuation<S> = Box::new(move |state, ctx| callback(state, result, ctx));
            if handle.blocking_send(Mail::callback(cont)).is_err() {
                warn!(module = %handle.name(), "async result dropped: module stopped");
            }
        });
        if !launched {
            warn!(module = %self.name(), "async call refused: runtime is draining");
        }
    }

    /// Sends a request and delivers its single outcome to `callback` on this module.
    ///
    /// The outcome is the response, a rejection, or [`RpcError::Timeout`]
    /// once the configured deadline passes.
    pub fn request<Req, Resp, C>(&self, msg: Req, opts: CastOptions, callback: C)
    where
        Req: Message,
        Resp: Message,
        C: FnOnce(&mut S, Result<Resp, RpcError>, &Context<S>) + Send + 'static,
    {
        let call = self.bus.call::<Req, Resp>(msg, opts);
        let handle = self.handle.clone();
        let launched = self.launcher.launch(async move {
            let result = call.await;
            let cont: Continuation<S> = Box::new(move |state, ctx| callback(state, result, ctx));
            if handle.send(Mail::callback(cont)).await.is_err() {
                warn!(module = %handle.name(), "rpc response dropped: module stopped");
            }
        });
        if !launched {
            warn!(module = %self.name(), "request refused: runtime is draining");
        }
    }

    /// Runs `callback` on this module after `delay`, unless the runtime drains first.
    pub fn after<C>(&self, delay: Duration, callback: C)
    where
        C: FnOnce(&mut S, &Context<S>) + Send + 'static,
    {
        let handle = self.handle.clone();
        self.launcher.launch_with_token(move |token| async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let cont: Continuation<S> = Box::new(callback);
                    let _ = handle.send(Mail::callback(cont)).await;
                }
            }
        });
    }
}
