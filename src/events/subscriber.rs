//! # Event subscriber contract.
//!
//! A [`Subscriber`] declares a unique name and the topics it listens to.
//! Handlers run synchronously on the thread that dispatches the event (the
//! owning module's actor for [`EventBus::cast`](crate::EventBus::cast), the
//! caller for [`EventBus::sync_cast`](crate::EventBus::sync_cast)), so they
//! must not block.
//!
//! ## Example (skeleton)
//! ```rust
//! // use modvisor::{Event, Subscriber};
//! //
//! // struct Achievements;
//! // impl Subscriber for Achievements {
//! //     fn name(&self) -> &str { "achievements" }
//! //     fn topics(&self) -> Vec<&str> { vec!["player.levelup", "player.kill"] }
//! //     fn on_event(&self, event: &Event) {
//! //         // unlock something...
//! //     }
//! // }
//! ```

use std::any::{TypeId, type_name};

use super::event::Event;

/// Contract for event subscribers.
pub trait Subscriber: Send + Sync + 'static {
    /// Unique name; registering a second subscriber with the same name is rejected.
    fn name(&self) -> &str;

    /// Topics this subscriber receives.
    fn topics(&self) -> Vec<&str>;

    /// Handles one event. A panic is caught and logged by the dispatcher.
    fn on_event(&self, event: &Event);
}

/// Single-topic subscriber wrapping a plain function.
pub(crate) struct FnSubscriber<F> {
    name: String,
    topic: String,
    handler: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    pub(crate) fn new(topic: impl Into<String>, handler: F) -> Self {
        Self {
            name: handler_name::<F>(),
            topic: topic.into(),
            handler,
        }
    }
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn topics(&self) -> Vec<&str> {
        vec![self.topic.as_str()]
    }

    fn on_event(&self, event: &Event) {
        (self.handler)(event)
    }
}

/// Subscriber name derived from the handler type.
///
/// Closures in one function share a `type_name`, so the `TypeId` keeps them apart.
pub(crate) fn handler_name<F: 'static>() -> String {
    format!("{}#{:?}", type_name::<F>(), TypeId::of::<F>())
}
