//! # Launcher: supervised task launch with a best-effort drain.
//!
//! Every task started through a [`Launcher`] is tracked by one shared
//! [`TaskTracker`] and can observe one shared [`CancellationToken`].
//!
//! ## Architecture
//! ```text
//! launch(fut) ───────────────┐
//! launch_with_token(|tok| ..)├──► TaskTracker::spawn(guarded(fut))
//! launch_blocking(fn) ───────┘          │
//!                                       └─► catch_unwind → error! on panic
//!
//! drain(max_wait):
//!   token.cancel() ─► tracker.close() ─► timeout(max_wait, tracker.wait())
//!                                          ├─ Ok  → true
//!                                          └─ Err → warn!(remaining) → false
//! ```
//!
//! ## Rules
//! - A task is counted **before** it starts and uncounted when it returns or panics.
//! - Panics never escape a launched task and never corrupt the count.
//! - `drain` is **best effort**: a task that ignores the token may outlive it.
//! - Once draining, new launches are refused (logged and dropped).

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

/// Cloneable handle over the runtime cancellation token and task accounting.
#[derive(Clone, Debug, Default)]
pub struct Launcher {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Launcher {
    /// Creates a launcher with a fresh token and an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the runtime cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Returns true once [`drain`](Self::drain) has been called.
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of launched tasks that have not returned yet.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Launches a future that does not observe cancellation.
    ///
    /// Returns `false` (and drops the future) if the launcher is draining.
    pub fn launch<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_draining() {
            warn!("launch refused: runtime is draining");
            return false;
        }
        self.tracker.spawn(guarded(fut));
        true
    }

    /// Launches a future built from the runtime cancellation token.
    ///
    /// The future must return promptly once the token is cancelled.
    pub fn launch_with_token<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.launch(f(self.token()))
    }

    /// Runs a blocking closure on the blocking pool under the same accounting.
    pub fn launch_blocking<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_draining() {
            warn!("blocking launch refused: runtime is draining");
            return false;
        }
        self.tracker.spawn_blocking(move || {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
                error!(panic = %panic_message(&*panic), "blocking task panicked");
            }
        });
        true
    }

    /// Cancels the token and waits up to `max_wait` for every launched task to exit.
    ///
    /// Returns `true` if all tasks exited in time. On timeout a diagnostic is
    /// logged and `false` is returned; the remaining tasks keep running.
    pub async fn drain(&self, max_wait: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();

        match tokio::time::timeout(max_wait, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_elapsed) => {
                warn!(
                    remaining = self.tracker.len(),
                    max_wait = ?max_wait,
                    "wait for launched tasks exit timeout"
                );
                false
            }
        }
    }
}

/// Runs `fut` and converts a panic into a logged failure.
async fn guarded<F>(fut: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        error!(panic = %panic_message(&*panic), "launched task panicked");
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_waits_for_cooperative_tasks() {
        let launcher = Launcher::new();
        let exited = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let exited = exited.clone();
            launcher.launch_with_token(|token| async move {
                token.cancelled().await;
                exited.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(launcher.running(), 3);

        assert!(launcher.drain(Duration::from_secs(1)).await);
        assert_eq!(exited.load(Ordering::SeqCst), 3);
        assert_eq!(launcher.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_after_max_wait() {
        let launcher = Launcher::new();
        for _ in 0..2 {
            launcher.launch(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }

        let started = tokio::time::Instant::now();
        assert!(!launcher.drain(Duration::from_millis(100)).await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(100));
        assert!(waited < Duration::from_secs(60));
        assert_eq!(launcher.running(), 2);
    }

    fn explode() {
        panic!("boom")
    }

    #[tokio::test]
    async fn panicking_task_keeps_accounting_intact() {
        let launcher = Launcher::new();
        launcher.launch(async { explode() });
        launcher.launch_blocking(explode);

        assert!(launcher.drain(Duration::from_secs(1)).await);
        assert_eq!(launcher.running(), 0);
    }

    #[tokio::test]
    async fn launch_is_refused_while_draining() {
        let launcher = Launcher::new();
        assert!(launcher.drain(Duration::from_millis(10)).await);
        assert!(!launcher.launch(async {}));
        assert!(!launcher.launch_blocking(|| {}));
    }

    #[test]
    fn panic_message_handles_common_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*s), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*s), "owned");
        let s: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*s), "unknown panic");
    }
}
