//! Items carried by module mailboxes.

use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::bus::Responder;

use super::context::Context;
use super::lifecycle::{ServerState, Stage};

/// Work deferred onto the actor: runs with exclusive access to the state.
pub(crate) type Continuation<S> = Box<dyn FnOnce(&mut S, &Context<S>) + Send>;

/// One mailbox item.
pub(crate) enum Mail {
    /// Fire-and-forget message, possibly shared by several receivers.
    Cast {
        tag: TypeId,
        name: &'static str,
        body: Arc<dyn Any + Send + Sync>,
        expires: Option<Instant>,
    },
    /// Request that must be answered through its responder.
    Request {
        tag: TypeId,
        name: &'static str,
        body: Box<dyn Any + Send>,
        responder: Responder,
    },
    /// A type-erased [`Continuation`] for the receiving module.
    Callback(Box<dyn Any + Send>),
}

impl Mail {
    pub(crate) fn cast<T: Send + Sync + 'static>(msg: T, expires: Option<Instant>) -> Self {
        Mail::Cast {
            tag: TypeId::of::<T>(),
            name: type_name::<T>(),
            body: Arc::new(msg),
            expires,
        }
    }

    pub(crate) fn callback<S: 'static>(cont: Continuation<S>) -> Self {
        Mail::Callback(Box::new(cont))
    }

    /// Fails a request that could not be delivered; other items are dropped.
    pub(crate) fn reject(self, err: crate::RpcError) {
        if let Mail::Request { responder, .. } = self {
            responder.fail(err);
        }
    }
}

/// Lifecycle commands; travel outside the mailbox so they are never starved by it.
pub(crate) enum Control {
    Hooks {
        state: ServerState,
        stage: Stage,
        done: oneshot::Sender<anyhow::Result<()>>,
    },
    Start,
}
