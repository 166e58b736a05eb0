//! Lifecycle event hooks
//!
//! Collaborators observe the connection through four named events. `open`
//! fires once, on the very first successful handshake; every later handshake
//! fires `reconnect` instead. Callbacks run on the reader thread, so they
//! must not block.

use parking_lot::Mutex;
use std::sync::Arc;

/// Lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// First successful handshake of this connection's lifetime
    Open,
    /// Any successful handshake after the first
    Reconnect,
    /// The link went down
    Close,
    /// A transport-level error occurred
    Error,
}

type EventCallback = Arc<dyn Fn() + Send + Sync>;

/// Registry of lifecycle callbacks
#[derive(Default)]
pub struct EventBus {
    open: Mutex<Vec<EventCallback>>,
    reconnect: Mutex<Vec<EventCallback>>,
    close: Mutex<Vec<EventCallback>>,
    error: Mutex<Vec<EventCallback>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, event: Event) -> &Mutex<Vec<EventCallback>> {
        match event {
            Event::Open => &self.open,
            Event::Reconnect => &self.reconnect,
            Event::Close => &self.close,
            Event::Error => &self.error,
        }
    }

    /// Register a callback for `event`
    pub fn register(&self, event: Event, callback: EventCallback) {
        self.slot(event).lock().push(callback);
    }

    /// Fire every callback registered for `event`.
    ///
    /// A panicking callback is logged and skipped; it never prevents the
    /// remaining callbacks from running.
    pub fn emit(&self, event: Event) {
        let callbacks: Vec<EventCallback> = self.slot(event).lock().clone();
        log::debug!("Event {:?}: notifying {} callback(s)", event, callbacks.len());
        for callback in callbacks {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback())).is_err() {
                log::error!("Event callback panicked during {:?}", event);
            }
        }
    }
}
