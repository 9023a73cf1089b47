//! Event fan-out to subscribers.
//!
//! Listeners are keyed by subscription id and delivered to in registration
//! order. Delivery iterates a snapshot of the list, so cancelling a
//! subscription mid-delivery never affects the pass in progress.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, PoisonError, Weak},
};

use tracing::warn;

use pylon_protocol::EventBody;

pub type EventListener = Arc<dyn Fn(&EventBody) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    listeners: Vec<(u64, EventListener)>,
}

impl EventBus {
    pub fn subscribe(&mut self, listener: EventListener) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(entry_id, _)| *entry_id != id);
        self.listeners.len() != before
    }

    /// Clone the current listener list for a delivery pass.
    pub fn snapshot(&self) -> Vec<EventListener> {
        self.listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Deliver `event` to every listener in the snapshot. A panicking listener
/// is logged and skipped; the rest still receive the event.
pub fn deliver(snapshot: &[EventListener], event: &EventBody) {
    for listener in snapshot {
        if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            warn!(event = %event.event, "event listener panicked");
        }
    }
}

/// Capability to remove a registered listener.
///
/// Dropping the subscription leaves the listener registered; call
/// [`Subscription::cancel`] to remove it.
pub struct Subscription {
    id: u64,
    bus: Weak<Mutex<EventBus>>,
}

impl Subscription {
    pub(crate) fn new(id: u64, bus: Weak<Mutex<EventBus>>) -> Self {
        Self { id, bus }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .unsubscribe(self.id);
        }
    }
}
