//! Outstanding `get` request correlation
//!
//! A `get` registers a one-shot callback keyed by topic path; the first
//! matching `Push` response consumes it. There is deliberately no timeout:
//! a request the server never answers stays pending for the life of the
//! connection, matching the wire peers this runtime talks to.

use crate::wire::TypedValue;
use parking_lot::Mutex;
use std::collections::HashMap;

type GetCallback = Box<dyn FnOnce(TypedValue) + Send>;

/// Pending one-shot request registry
#[derive(Default)]
pub struct RequestTracker {
    pending: Mutex<HashMap<String, GetCallback>>,
}

impl RequestTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `path`.
    ///
    /// A second registration for the same path before the first resolves
    /// replaces it: last writer wins, and the earlier callback never fires.
    /// Peers depend on this, so it is kept as-is.
    pub fn register(&self, path: &str, callback: GetCallback) {
        let mut pending = self.pending.lock();
        if pending.insert(path.to_string(), callback).is_some() {
            log::debug!("Replacing pending get for {}", path);
        }
    }

    /// Drop the pending callback for `path`, if any. Used to roll back a
    /// registration whose request frame failed to send.
    pub fn discard(&self, path: &str) {
        self.pending.lock().remove(path);
    }

    /// Resolve the pending request for `path`, invoking its callback exactly
    /// once. Returns whether a registration existed; responses with no
    /// registration are dropped silently by the caller.
    pub fn resolve(&self, path: &str, value: TypedValue) -> bool {
        let callback = self.pending.lock().remove(path);
        match callback {
            Some(cb) => {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(value))).is_err() {
                    log::error!("Get callback panicked for {}", path);
                }
                true
            }
            None => false,
        }
    }

    /// Number of requests still awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_resolve_fires_once_and_removes() {
        let tracker = RequestTracker::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        tracker.register(
            "/battery",
            Box::new(move |v| {
                assert_eq!(v, TypedValue::Int(87));
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(tracker.resolve("/battery", TypedValue::Int(87)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.pending_count(), 0);

        // Second response for the same path is unmatched
        assert!(!tracker.resolve("/battery", TypedValue::Int(90)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_writer_wins() {
        let tracker = RequestTracker::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        tracker.register("/topic", Box::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&second);
        tracker.register("/topic", Box::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.resolve("/topic", TypedValue::Bool(true));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unmatched_response_is_dropped() {
        let tracker = RequestTracker::new();
        assert!(!tracker.resolve("/nobody", TypedValue::Bool(false)));
    }

    #[test]
    fn test_discard_rolls_back_registration() {
        let tracker = RequestTracker::new();
        tracker.register("/x", Box::new(|_| panic!("must never fire")));
        tracker.discard("/x");
        assert!(!tracker.resolve("/x", TypedValue::Int(1)));
    }
}
