//! Cloneable address of a mounted module.

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::MailboxError;

use super::lifecycle::{Phase, PhaseCell, ServerState, Stage};
use super::mail::{Control, Mail};

/// Address of one module: its name, mailbox and stop switch.
///
/// Handles are cheap to clone and stay valid after the module stops;
/// deliveries then fail with [`MailboxError::Closed`].
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    tx: mpsc::Sender<Mail>,
    control: mpsc::UnboundedSender<Control>,
    phase: PhaseCell,
    stop: CancellationToken,
}

impl ModuleHandle {
    pub(crate) fn new(
        name: String,
        tx: mpsc::Sender<Mail>,
        control: mpsc::UnboundedSender<Control>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                tx,
                control,
                phase: PhaseCell::new(),
                stop,
            }),
        }
    }

    /// Stable module name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.phase.get()
    }

    /// Enqueues `msg`, waiting while the mailbox is full.
    ///
    /// The module must have a handler for `T` (see
    /// [`Module::register_handler`](crate::Module::register_handler)).
    pub async fn assign<T: Send + Sync + 'static>(&self, msg: T) -> Result<(), MailboxError> {
        self.send(Mail::cast(msg, None))
            .await
            .map_err(|_| self.closed())
    }

    /// Enqueues `msg` without waiting.
    pub fn try_assign<T: Send + Sync + 'static>(&self, msg: T) -> Result<(), MailboxError> {
        self.post(Mail::cast(msg, None)).map_err(|(err, _)| err)
    }

    /// Asks the run loop to exit after the item in flight.
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.inner.stop.clone()
    }

    pub(crate) fn advance(&self, to: Phase) {
        self.inner.phase.advance(to);
    }

    /// Non-blocking delivery; the refused item is handed back.
    pub(crate) fn post(&self, mail: Mail) -> Result<(), (MailboxError, Mail)> {
        self.inner.tx.try_send(mail).map_err(|err| match err {
            mpsc::error::TrySendError::Full(mail) => (
                MailboxError::Full {
                    module: self.inner.name.clone(),
                },
                mail,
            ),
            mpsc::error::TrySendError::Closed(mail) => (self.closed(), mail),
        })
    }

    pub(crate) async fn send(&self, mail: Mail) -> Result<(), Mail> {
        self.inner.tx.send(mail).await.map_err(|err| err.0)
    }

    /// Delivery from the blocking pool.
    pub(crate) fn blocking_send(&self, mail: Mail) -> Result<(), Mail> {
        self.inner.tx.blocking_send(mail).map_err(|err| err.0)
    }

    pub(crate) fn start(&self) {
        let _ = self.inner.control.send(Control::Start);
    }

    /// Runs the hooks for `(state, stage)` on the module's own task.
    pub(crate) async fn run_hooks(&self, state: ServerState, stage: Stage) -> anyhow::Result<()> {
        let (done, wait) = oneshot::channel();
        self.inner
            .control
            .send(Control::Hooks { state, stage, done })
            .map_err(|_| anyhow!("module {} is not running", self.inner.name))?;
        wait.await
            .map_err(|_| anyhow!("module {} exited during hooks", self.inner.name))?
    }

    fn closed(&self) -> MailboxError {
        MailboxError::Closed {
            module: self.inner.name.clone(),
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .finish()
    }
}

