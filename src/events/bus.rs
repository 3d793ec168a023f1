//! # Topic event bus layered on the message bus.
//!
//! [`EventBus`] belongs to one module. It registers an [`Event`] handler on
//! that module and fans each event out to the subscribers of its topic.
//!
//! ## Architecture
//! ```text
//! cast(ev) ──► Bus::cast(ev, local + one_of_mods(owner)) ──► owner mailbox
//!                                                              │
//! sync_cast(ev) ────────────────────────────────────────┐      ▼
//!                                                       └─► dispatch(ev)
//!                                                             │ clone subs[ev.topic]
//!                                                             ├─► sub1.on_event (catch_unwind)
//!                                                             ├─► sub2.on_event (catch_unwind)
//!                                                             └─► ...
//! ```
//!
//! ## Rules
//! - Subscribers of a topic run in registration order, each exactly once per event.
//! - A panicking subscriber is logged; the rest still run.
//! - Duplicate subscriber names are refused with an `error!` log and an `Err`.
//! - The subscriber table lock is not held while handlers run, so a handler
//!   may (un)register subscribers.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::bus::{Bus, CastOptions};
use crate::error::RegistrationError;
use crate::module::{Context, Module};
use crate::runtime::launcher::panic_message;

use super::event::Event;
use super::subscriber::{FnSubscriber, Subscriber, handler_name};

type Table = HashMap<String, Vec<Arc<dyn Subscriber>>>;

/// Per-module topic/subscriber registry.
///
/// Cheap to clone; clones share the subscriber table.
#[derive(Clone)]
pub struct EventBus {
    subs: Arc<RwLock<Table>>,
    bus: Bus,
    module: String,
}

impl EventBus {
    /// Creates an event bus owned by `module` and registers its dispatcher.
    ///
    /// Fails if `module` already handles [`Event`].
    pub fn new<S: Send + 'static>(
        bus: &Bus,
        module: &mut Module<S>,
    ) -> Result<Self, RegistrationError> {
        let subs: Arc<RwLock<Table>> = Arc::default();
        let table = subs.clone();
        bus.register_handler(module, move |_: &mut S, event: &Event, _: &Context<S>| {
            dispatch(&table, event)
        })?;
        Ok(Self {
            subs,
            bus: bus.clone(),
            module: module.name().to_string(),
        })
    }

    /// Name of the owning module.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Adds `sub` to every topic it declares.
    pub fn register_subscriber<T: Subscriber>(&self, sub: T) -> Result<(), RegistrationError> {
        self.insert(Arc::new(sub))
    }

    /// Subscribes a plain function to one topic.
    ///
    /// The subscriber is named after the function type, so registering the
    /// same function twice is refused.
    pub fn register_handler<F>(&self, topic: impl Into<String>, handler: F) -> Result<(), RegistrationError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(Arc::new(FnSubscriber::new(topic, handler)))
    }

    /// Removes the subscriber named `name` from every topic.
    ///
    /// Returns true if anything was removed.
    pub fn unregister_subscriber(&self, name: &str) -> bool {
        let mut subs = self.subs.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        subs.retain(|_, list| {
            let before = list.len();
            list.retain(|sub| sub.name() != name);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Removes a function previously added with [`register_handler`](Self::register_handler).
    pub fn unregister_handler<F>(&self, _handler: &F) -> bool
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.unregister_subscriber(&handler_name::<F>())
    }

    /// Names of the subscribers of `topic`, in dispatch order.
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        self.subs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|list| list.iter().map(|sub| sub.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Routes `event` through the owning module's mailbox.
    pub fn cast(&self, event: Event) {
        self.bus
            .cast(event, CastOptions::new().local().one_of_mods(&self.module));
    }

    /// Dispatches `event` immediately on the calling thread.
    pub fn sync_cast(&self, event: &Event) {
        dispatch(&self.subs, event)
    }

    fn insert(&self, sub: Arc<dyn Subscriber>) -> Result<(), RegistrationError> {
        let mut subs = self.subs.write().unwrap_or_else(PoisonError::into_inner);
        let name = sub.name();
        if subs.values().flatten().any(|known| known.name() == name) {
            error!(module = %self.module, subscriber = %name, "subscriber has registered");
            return Err(RegistrationError::DuplicateSubscriber {
                name: name.to_string(),
            });
        }

        let mut topics = sub.topics();
        topics.sort_unstable();
        topics.dedup();
        for topic in topics {
            subs.entry(topic.to_string()).or_default().push(sub.clone());
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

fn dispatch(subs: &RwLock<Table>, event: &Event) {
    let list = subs
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&event.topic)
        .cloned()
        .unwrap_or_default();
    if list.is_empty() {
        debug!(topic = %event.topic, "event without subscribers");
        return;
    }

    for sub in list {
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| sub.on_event(event))) {
            error!(
                topic = %event.topic,
                subscriber = %sub.name(),
                panic = %panic_message(&*panic),
                "event subscriber panicked"
            );
        }
    }
}
