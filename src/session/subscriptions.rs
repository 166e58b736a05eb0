//! Subscription registry and inbound dispatch
//!
//! Two kinds of registration share this registry: topic subscriptions that
//! match inbound paths by string prefix, and addressed-channel listeners
//! keyed by an exact `(robotAddr, sensorAddr)` pair. Both are mutated by
//! collaborator threads (register/unregister) and read by the reader thread
//! (dispatch) under the same locks, and callbacks always run with every lock
//! released so a callback may re-enter the registry.

use crate::wire::TypedValue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle identifying one registration, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// How much context a channel listener wants with each update.
///
/// Collaborators pick the variant at registration time; there is no
/// signature inspection at dispatch.
#[derive(Clone)]
pub enum ChannelCallback {
    /// Receives the channel's value array
    OnValues(Arc<dyn Fn(&[f64]) + Send + Sync>),
    /// Receives the values and the robot address
    OnValuesWithRobot(Arc<dyn Fn(&[f64], u8) + Send + Sync>),
    /// Receives the values and the full channel address
    OnValuesWithChannel(Arc<dyn Fn(&[f64], u8, u8) + Send + Sync>),
}

impl ChannelCallback {
    fn invoke(&self, values: &[f64], robot_addr: u8, sensor_addr: u8) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| match self {
            ChannelCallback::OnValues(f) => f(values),
            ChannelCallback::OnValuesWithRobot(f) => f(values, robot_addr),
            ChannelCallback::OnValuesWithChannel(f) => f(values, robot_addr, sensor_addr),
        }));
        if result.is_err() {
            log::error!(
                "Channel listener panicked for ({}, {})",
                robot_addr,
                sensor_addr
            );
        }
    }
}

/// What a removed registration was, so the session can tell the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    /// A topic-prefix subscription
    Topic,
    /// An addressed-channel listener
    Channel {
        /// Robot address of the channel
        robot_addr: u8,
        /// Sensor address of the channel
        sensor_addr: u8,
    },
}

type TopicCallback = Arc<dyn Fn(&TypedValue) + Send + Sync>;

struct TopicSubscription {
    id: SubscriptionId,
    topic: String,
    callback: TopicCallback,
}

struct ChannelListener {
    id: SubscriptionId,
    robot_addr: u8,
    sensor_addr: u8,
    callback: ChannelCallback,
}

/// Registry of subscriptions, channel listeners, and last-seen values
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    topics: Mutex<Vec<TopicSubscription>>,
    listeners: Mutex<Vec<ChannelListener>>,
    /// Last value seen per topic path
    state: Mutex<HashMap<String, TypedValue>>,
    /// Channel buffers; size fixed at first observation, mutated in place
    channels: Mutex<HashMap<(u8, u8), Vec<f64>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a prefix subscription on `topic`
    pub fn add_topic(&self, topic: &str, callback: TopicCallback) -> SubscriptionId {
        let id = self.allocate_id();
        self.topics.lock().push(TopicSubscription {
            id,
            topic: topic.to_string(),
            callback,
        });
        id
    }

    /// Register a listener on the exact channel `(robot_addr, sensor_addr)`
    pub fn add_listener(
        &self,
        robot_addr: u8,
        sensor_addr: u8,
        callback: ChannelCallback,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.listeners.lock().push(ChannelListener {
            id,
            robot_addr,
            sensor_addr,
            callback,
        });
        id
    }

    /// Remove a registration of either kind
    pub fn remove(&self, id: SubscriptionId) -> Option<Removed> {
        let mut topics = self.topics.lock();
        if let Some(pos) = topics.iter().position(|s| s.id == id) {
            topics.remove(pos);
            return Some(Removed::Topic);
        }
        drop(topics);

        let mut listeners = self.listeners.lock();
        if let Some(pos) = listeners.iter().position(|l| l.id == id) {
            let listener = listeners.remove(pos);
            return Some(Removed::Channel {
                robot_addr: listener.robot_addr,
                sensor_addr: listener.sensor_addr,
            });
        }
        None
    }

    /// Dispatch an inbound topic value.
    ///
    /// Every subscription whose topic is a string prefix of `path` fires;
    /// multiple matches all fire. The last-value state is updated after the
    /// callbacks, preserving the order collaborators observe on the wire
    /// peers. Returns the number of callbacks invoked.
    pub fn dispatch_topic(&self, path: &str, value: &TypedValue) -> usize {
        let matching: Vec<TopicCallback> = {
            let topics = self.topics.lock();
            topics
                .iter()
                .filter(|s| path.starts_with(&s.topic))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };

        for callback in &matching {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(value))).is_err() {
                log::error!("Subscription callback panicked for {}", path);
            }
        }

        self.state.lock().insert(path.to_string(), value.clone());
        matching.len()
    }

    /// Ingest an addressed-channel push.
    ///
    /// The channel buffer is created with the push's size on first
    /// observation and mutated in place afterwards; a shorter push updates
    /// the leading slots only. Every listener on the exact channel then
    /// receives the full current array.
    pub fn ingest_push(&self, robot_addr: u8, sensor_addr: u8, values: &[f64]) {
        let snapshot: Vec<f64> = {
            let mut channels = self.channels.lock();
            let buffer = channels
                .entry((robot_addr, sensor_addr))
                .or_insert_with(|| {
                    log::debug!(
                        "New channel ({}, {}) with {} value(s)",
                        robot_addr,
                        sensor_addr,
                        values.len()
                    );
                    vec![0.0; values.len()]
                });
            let n = buffer.len().min(values.len());
            buffer[..n].copy_from_slice(&values[..n]);
            buffer.clone()
        };

        let matching: Vec<ChannelCallback> = {
            let listeners = self.listeners.lock();
            listeners
                .iter()
                .filter(|l| l.robot_addr == robot_addr && l.sensor_addr == sensor_addr)
                .map(|l| l.callback.clone())
                .collect()
        };

        for callback in matching {
            callback.invoke(&snapshot, robot_addr, sensor_addr);
        }
    }

    /// Last value seen on `path`, if any
    pub fn last_value(&self, path: &str) -> Option<TypedValue> {
        self.state.lock().get(path).cloned()
    }

    /// Current value array of a channel, if it has been observed
    pub fn channel_values(&self, robot_addr: u8, sensor_addr: u8) -> Option<Vec<f64>> {
        self.channels.lock().get(&(robot_addr, sensor_addr)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_topic_callback(counter: &Arc<AtomicUsize>) -> TopicCallback {
        let c = Arc::clone(counter);
        Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_prefix_matching_fires_all() {
        let registry = SubscriptionRegistry::new();
        let broad = Arc::new(AtomicUsize::new(0));
        let narrow = Arc::new(AtomicUsize::new(0));

        registry.add_topic("/gamepad1", counting_topic_callback(&broad));
        registry.add_topic("/gamepad1/leftX", counting_topic_callback(&narrow));

        let fired = registry.dispatch_topic("/gamepad1/leftX", &TypedValue::Double(0.5));
        assert_eq!(fired, 2);
        assert_eq!(broad.load(Ordering::SeqCst), 1);
        assert_eq!(narrow.load(Ordering::SeqCst), 1);

        let fired = registry.dispatch_topic("/other", &TypedValue::Double(1.0));
        assert_eq!(fired, 0);
        assert_eq!(broad.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_tracks_last_value() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.last_value("/x"), None);

        registry.dispatch_topic("/x", &TypedValue::Int(1));
        registry.dispatch_topic("/x", &TypedValue::Int(2));
        assert_eq!(registry.last_value("/x"), Some(TypedValue::Int(2)));
    }

    #[test]
    fn test_unsubscribe_topic() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = registry.add_topic("/t", counting_topic_callback(&hits));

        assert_eq!(registry.remove(id), Some(Removed::Topic));
        assert_eq!(registry.remove(id), None);

        registry.dispatch_topic("/t/x", &TypedValue::Bool(true));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_channel_push_updates_and_notifies() {
        let registry = SubscriptionRegistry::new();
        let seen: Arc<Mutex<Vec<(Vec<f64>, u8, u8)>>> = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        registry.add_listener(
            2,
            5,
            ChannelCallback::OnValuesWithChannel(Arc::new(move |values, robot, sensor| {
                s.lock().push((values.to_vec(), robot, sensor));
            })),
        );

        registry.ingest_push(2, 5, &[1.5, 2.5]);
        assert_eq!(registry.channel_values(2, 5), Some(vec![1.5, 2.5]));

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], (vec![1.5, 2.5], 2, 5));
    }

    #[test]
    fn test_channel_size_fixed_at_first_observation() {
        let registry = SubscriptionRegistry::new();
        registry.ingest_push(1, 1, &[1.0, 2.0, 3.0]);

        // Shorter push mutates leading slots in place
        registry.ingest_push(1, 1, &[9.0]);
        assert_eq!(registry.channel_values(1, 1), Some(vec![9.0, 2.0, 3.0]));
    }

    #[test]
    fn test_listener_on_other_channel_not_notified() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        registry.add_listener(
            3,
            3,
            ChannelCallback::OnValues(Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            })),
        );

        registry.ingest_push(2, 5, &[1.0]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        registry.ingest_push(3, 3, &[1.0]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_listeners_on_channel_fire() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let h = Arc::clone(&hits);
            registry.add_listener(
                2,
                5,
                ChannelCallback::OnValuesWithRobot(Arc::new(move |_, robot| {
                    assert_eq!(robot, 2);
                    h.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }

        registry.ingest_push(2, 5, &[4.0, 8.0]);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_channel_listener_reports_address() {
        let registry = SubscriptionRegistry::new();
        let id = registry.add_listener(7, 9, ChannelCallback::OnValues(Arc::new(|_| {})));
        assert_eq!(
            registry.remove(id),
            Some(Removed::Channel {
                robot_addr: 7,
                sensor_addr: 9
            })
        );
    }

    #[test]
    fn test_panicking_callback_does_not_stop_dispatch() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.add_topic("/p", Arc::new(|_| panic!("boom")));
        registry.add_topic("/p", counting_topic_callback(&hits));

        let fired = registry.dispatch_topic("/p/x", &TypedValue::Bool(true));
        assert_eq!(fired, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
