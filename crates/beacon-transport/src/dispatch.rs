//! Callback tables for raw and lifecycle events.
//!
//! Each event name maps to an ordered list of listeners. Dispatch invokes
//! them in registration order on the caller's task. The list is snapshotted
//! before invocation, so a callback may register or remove listeners
//! (including itself) without deadlocking.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::traits::{ClientEvent, LifecycleEvent, RawEvent};

/// Callback for raw named events.
pub type EventCallback = Arc<dyn Fn(&RawEvent) + Send + Sync>;

/// Callback for lifecycle events.
pub type LifecycleCallback = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Handle to a registered listener, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone)]
enum ListenerKey {
    Event(String),
    Client(ClientEvent),
}

/// Registration tables for one transport.
pub struct Dispatcher {
    next_id: AtomicU64,
    events: DashMap<String, Vec<(ListenerId, EventCallback)>>,
    lifecycle: DashMap<ClientEvent, Vec<(ListenerId, LifecycleCallback)>>,
    index: DashMap<ListenerId, ListenerKey>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            events: DashMap::new(),
            lifecycle: DashMap::new(),
            index: DashMap::new(),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a listener for raw events named `event`.
    pub fn on(&self, event: &str, callback: EventCallback) -> ListenerId {
        let id = self.next_id();
        self.events
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        self.index.insert(id, ListenerKey::Event(event.to_string()));
        trace!(event = %event, listener = id.0, "Listener registered");
        id
    }

    /// Append a listener for a lifecycle event.
    pub fn on_client_event(&self, event: ClientEvent, callback: LifecycleCallback) -> ListenerId {
        let id = self.next_id();
        self.lifecycle.entry(event).or_default().push((id, callback));
        self.index.insert(id, ListenerKey::Client(event));
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the listener was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let Some((_, key)) = self.index.remove(&id) else {
            return false;
        };

        match key {
            ListenerKey::Event(name) => {
                if let Some(mut listeners) = self.events.get_mut(&name) {
                    listeners.retain(|(listener, _)| *listener != id);
                }
                self.events.remove_if(&name, |_, listeners| listeners.is_empty());
            }
            ListenerKey::Client(event) => {
                if let Some(mut listeners) = self.lifecycle.get_mut(&event) {
                    listeners.retain(|(listener, _)| *listener != id);
                }
                self.lifecycle
                    .remove_if(&event, |_, listeners| listeners.is_empty());
            }
        }
        true
    }

    /// Invoke every listener for `event.event`, in registration order.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, event: &RawEvent) -> usize {
        let listeners: Vec<EventCallback> = match self.events.get(&event.event) {
            Some(entry) => entry.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => {
                trace!(event = %event.event, "No listeners for event");
                return 0;
            }
        };

        for callback in &listeners {
            callback(event);
        }
        listeners.len()
    }

    /// Invoke every listener for a lifecycle event, in registration order.
    pub fn dispatch_lifecycle(&self, event: &LifecycleEvent) -> usize {
        let listeners: Vec<LifecycleCallback> = match self.lifecycle.get(&event.kind()) {
            Some(entry) => entry.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        for callback in &listeners {
            callback(event);
        }
        listeners.len()
    }

    /// Number of listeners for raw events named `event`.
    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.events.get(event).map(|l| l.len()).unwrap_or(0)
    }

    /// Total number of registered listeners of both kinds.
    #[must_use]
    pub fn total_listeners(&self) -> usize {
        self.index.len()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.events.len())
            .field("listeners", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_dispatch_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            dispatcher.on("Shipped", Arc::new(move |_: &RawEvent| seen.lock().push(tag)));
        }

        let count = dispatcher.dispatch(&RawEvent::new("Shipped", "orders", json!({})));
        assert_eq!(count, 3);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicU64::new(0));

        let h = Arc::clone(&hits);
        let a = dispatcher.on("Shipped", Arc::new(move |_: &RawEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let h = Arc::clone(&hits);
        dispatcher.on("Shipped", Arc::new(move |_: &RawEvent| {
            h.fetch_add(10, Ordering::SeqCst);
        }));

        assert!(dispatcher.off(a));
        assert!(!dispatcher.off(a));
        assert_eq!(dispatcher.listener_count("Shipped"), 1);

        dispatcher.dispatch(&RawEvent::new("Shipped", "orders", json!({})));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_callback_may_unregister_itself() {
        let dispatcher = Arc::new(Dispatcher::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicU64::new(0));

        let d = Arc::clone(&dispatcher);
        let s = Arc::clone(&slot);
        let h = Arc::clone(&hits);
        let id = dispatcher.on(
            "once",
            Arc::new(move |_: &RawEvent| {
                h.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = s.lock().take() {
                    d.off(id);
                }
            }),
        );
        *slot.lock() = Some(id);

        let event = RawEvent::new("once", "orders", json!(null));
        dispatcher.dispatch(&event);
        dispatcher.dispatch(&event);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.listener_count("once"), 0);
    }

    #[test]
    fn test_lifecycle_dispatch() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        dispatcher.on_client_event(
            ClientEvent::Connect,
            Arc::new(move |event: &LifecycleEvent| s.lock().push(event.clone())),
        );

        let connected = LifecycleEvent::Connected {
            session_id: "abc".into(),
        };
        assert_eq!(dispatcher.dispatch_lifecycle(&connected), 1);
        assert_eq!(
            dispatcher.dispatch_lifecycle(&LifecycleEvent::Disconnected {
                reason: "bye".into()
            }),
            0
        );
        assert_eq!(*seen.lock(), vec![connected]);
    }
}
