//! # Transport: the publish/subscribe collaborator behind the link module.
//!
//! [`Transport`] is the narrow contract the link needs from a messaging
//! system. [`MemoryTransport`] implements it in-process for tests and
//! single-node deployments.
//!
//! ## Architecture
//! ```text
//! publish(subject, payload)
//!     ├─► fanout: broadcast::Sender ─► every plain subscriber
//!     └─► groups: for each queue group
//!            └─► one live member (random start, skips full/closed)
//! ```
//!
//! ## Rules
//! - Publishing to a subject nobody listens on succeeds and drops the payload.
//! - A subscriber only sees payloads published after it subscribed.
//! - A queue group receives each payload once, on exactly one of its members.
//! - A lagging plain subscriber skips the oldest payloads (logged).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::error::TransportError;

/// One payload received from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
    /// Inbox to answer on, set by [`Transport::request`].
    pub reply_to: Option<String>,
}

/// Publish/subscribe messaging used for cross-process casts and requests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Publishes with a private inbox and waits for the first answer on it.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Receives every payload published on `subject`.
    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, Delivery>, TransportError>;

    /// Joins queue `group` on `subject`: each payload reaches one member of the group.
    async fn subscribe_queue(
        &self,
        subject: &str,
        group: &str,
    ) -> Result<BoxStream<'static, Delivery>, TransportError>;
}

/// In-process [`Transport`]. Clones share the same subjects.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    subjects: Mutex<HashMap<String, Subject>>,
    capacity: usize,
    next_inbox: AtomicU64,
}

struct Subject {
    fanout: broadcast::Sender<Delivery>,
    groups: HashMap<String, Vec<mpsc::Sender<Delivery>>>,
}

impl Subject {
    fn new(capacity: usize) -> Self {
        Self {
            fanout: broadcast::channel(capacity).0,
            groups: HashMap::new(),
        }
    }

    /// Hands `delivery` to every plain subscriber and one member per group.
    fn send(&mut self, delivery: Delivery) -> usize {
        let mut reached = 0;
        self.groups.retain(|group, members| {
            members.retain(|tx| !tx.is_closed());
            if members.is_empty() {
                return false;
            }
            let start = rand::rng().random_range(0..members.len());
            let accepted = (0..members.len())
                .map(|i| &members[(start + i) % members.len()])
                .any(|tx| tx.try_send(delivery.clone()).is_ok());
            if accepted {
                reached += 1;
            } else {
                warn!(subject = %delivery.subject, group = %group, "queue group saturated, payload dropped");
            }
            true
        });
        reached + self.fanout.send(delivery).unwrap_or(0)
    }

    fn listeners(&self) -> usize {
        self.fanout.receiver_count()
            + self
                .groups
                .values()
                .flatten()
                .filter(|tx| !tx.is_closed())
                .count()
    }
}

impl MemoryTransport {
    /// Creates a transport whose per-subscriber buffers hold `capacity` payloads (min 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subjects: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                next_inbox: AtomicU64::new(1),
            }),
        }
    }

    /// Number of live subscriptions on `subject`, queue members included.
    pub fn subscribers(&self, subject: &str) -> usize {
        self.subjects().get(subject).map_or(0, Subject::listeners)
    }

    fn send(&self, delivery: Delivery) -> usize {
        match self.subjects().get_mut(&delivery.subject) {
            Some(subject) => subject.send(delivery),
            None => 0,
        }
    }

    fn subject<R>(&self, subject: &str, f: impl FnOnce(&mut Subject) -> R) -> R {
        let mut subjects = self.subjects();
        let entry = subjects
            .entry(subject.to_string())
            .or_insert_with(|| Subject::new(self.inner.capacity));
        f(entry)
    }

    fn subjects(&self) -> MutexGuard<'_, HashMap<String, Subject>> {
        self.inner
            .subjects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("subjects", &self.subjects().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.send(Delivery {
            subject: subject.to_string(),
            payload,
            reply_to: None,
        });
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let inbox = format!(
            "_inbox.{}",
            self.inner.next_inbox.fetch_add(1, Ordering::Relaxed)
        );
        let mut answers = self.subject(&inbox, |s| s.fanout.subscribe());
        let sent = self.send(Delivery {
            subject: subject.to_string(),
            payload,
            reply_to: Some(inbox.clone()),
        });

        let result = if sent == 0 {
            Err(TransportError::NoResponders {
                subject: subject.to_string(),
            })
        } else {
            match tokio::time::timeout(timeout, answers.recv()).await {
                Ok(Ok(answer)) => Ok(answer.payload),
                Ok(Err(_)) => Err(TransportError::Closed),
                Err(_) => Err(TransportError::Timeout { timeout }),
            }
        };
        self.subjects().remove(&inbox);
        result
    }

    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, Delivery>, TransportError> {
        let rx = self.subject(subject, |s| s.fanout.subscribe());
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(delivery) => return Some((delivery, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory transport subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn subscribe_queue(
        &self,
        subject: &str,
        group: &str,
    ) -> Result<BoxStream<'static, Delivery>, TransportError> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        self.subject(subject, |s| {
            s.groups.entry(group.to_string()).or_default().push(tx)
        });
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(stream.boxed())
    }
}
