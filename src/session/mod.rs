//! Connection lifecycle and collaborator API
//!
//! One [`Connection`] owns a reader thread and a watchdog thread. The reader
//! dials, performs the handshake, then polls the transport and dispatches
//! decoded frames; the watchdog detects stale links and schedules redials.
//! Collaborator calls (`get`, `set`, `subscribe`, ...) run on the caller's
//! thread and serialize their writes through the shared transport lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::{HandshakeMode, LinkConfig};
use crate::error::{Error, Result};
use crate::transport::{Dialer, TcpDialer, Transport};
use crate::wire::frame::{
    encode_channel_subscribe, encode_sensor_update, handshake_request, heartbeat_pong,
};
use crate::wire::path::{self, Method};
use crate::wire::{Frame, Role, TypedValue};

mod events;
mod requests;
mod state;
mod subscriptions;

pub use events::Event;
pub use state::LinkState;
pub use subscriptions::{ChannelCallback, SubscriptionId};

use events::EventBus;
use requests::RequestTracker;
use subscriptions::{Removed, SubscriptionRegistry};

/// Poll interval of the reader when the transport has no data
const READ_IDLE: Duration = Duration::from_millis(2);
/// Watchdog wakeup interval
const WATCHDOG_TICK: Duration = Duration::from_millis(50);
/// How long the reader blocks waiting for a redial tick
const TICK_WAIT: Duration = Duration::from_millis(100);
/// Transport read chunk size
const READ_CHUNK: usize = 4096;

type GenerationCallback = Arc<dyn Fn(Option<f64>, &[f64]) + Send + Sync>;

/// Shared state between the reader, the watchdog, and collaborator threads
struct Inner {
    config: LinkConfig,
    state: Mutex<LinkState>,
    link: Mutex<Option<Box<dyn Transport>>>,
    requests: RequestTracker,
    registry: SubscriptionRegistry,
    events: EventBus,
    shutdown: AtomicBool,
    /// Set on the first successful handshake, never cleared
    connected_once: AtomicBool,
    last_heartbeat: Mutex<Option<Instant>>,
    generation_hooks: Mutex<Vec<GenerationCallback>>,
}

impl Inner {
    fn set_state(&self, next: LinkState) {
        let mut current = self.state.lock();
        if *current != next {
            log::debug!("Link state: {} -> {}", *current, next);
            *current = next;
        }
    }

    fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Write bytes regardless of link state; used for the handshake
    fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut link = self.link.lock();
        match link.as_mut() {
            Some(transport) => {
                transport.write(bytes)?;
                transport.flush()
            }
            None => Err(Error::NotConnected),
        }
    }

    /// Write bytes on an established link
    fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.state() != LinkState::Connected {
            return Err(Error::NotConnected);
        }
        self.write_raw(bytes)
    }

    fn record_heartbeat(&self) {
        *self.last_heartbeat.lock() = Some(Instant::now());
    }

    /// Close whatever transport is live. Safe from any thread; the reader
    /// observes the dead socket on its next poll.
    fn drop_link(&self) {
        if let Some(mut transport) = self.link.lock().take() {
            if let Err(e) = transport.shutdown() {
                log::debug!("Transport shutdown: {}", e);
            }
        }
    }

    /// Transition to `Connected` and fire the appropriate lifecycle event.
    /// The very first handshake of this connection's lifetime fires `open`;
    /// every later one fires `reconnect`.
    fn mark_connected(&self) {
        self.set_state(LinkState::Connected);
        self.record_heartbeat();
        if self.connected_once.swap(true, Ordering::SeqCst) {
            log::info!("Link to {} re-established", self.config.addr());
            self.events.emit(Event::Reconnect);
        } else {
            log::info!("Link to {} established", self.config.addr());
            self.events.emit(Event::Open);
        }
    }

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::HandshakeAck => {
                if self.state() == LinkState::Handshaking {
                    self.mark_connected();
                } else {
                    log::debug!("Unexpected handshake ack in state {}", self.state());
                }
            }
            Frame::HeartbeatPing => {
                self.record_heartbeat();
                if let Err(e) = self.send(&heartbeat_pong()) {
                    log::warn!("Failed to answer heartbeat: {}", e);
                }
            }
            Frame::HeartbeatPong => {
                self.record_heartbeat();
            }
            Frame::Topic {
                method: Method::Push | Method::Set,
                path,
                value: Some(value),
                ..
            } => {
                // A pending get on this exact path consumes the value first;
                // prefix subscriptions fire afterwards either way.
                self.requests.resolve(&path, value.clone());
                self.registry.dispatch_topic(&path, &value);
            }
            Frame::Topic { method, path, .. } => {
                log::debug!("Ignoring inbound {:?} for {}", method, path);
            }
            Frame::SensorPush {
                robot_addr,
                sensor_addr,
                values,
            } => {
                self.registry.ingest_push(robot_addr, sensor_addr, &values);
            }
            Frame::GenerationScores { generation, scores } => {
                let hooks: Vec<GenerationCallback> = self.generation_hooks.lock().clone();
                for hook in hooks {
                    hook(generation, &scores);
                }
            }
            Frame::Corrupted { error } => {
                log::warn!("Dropped corrupted frame: {}", error);
            }
        }
    }
}

/// A persistent protocol session with one server.
///
/// Cheap to share by reference; dropped or explicitly closed, it joins its
/// threads deterministically.
pub struct Connection {
    inner: Arc<Inner>,
    reader: Option<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
}

impl Connection {
    /// Connect over TCP using `config`.
    ///
    /// Returns as soon as the threads are running; use
    /// [`wait_for_connect`](Self::wait_for_connect) or an
    /// [`Event::Open`] callback to learn when the link is live.
    pub fn connect(config: LinkConfig) -> Result<Self> {
        let dialer = TcpDialer::new(config.addr(), config.connect_timeout());
        Self::with_dialer(config, Box::new(dialer))
    }

    /// Connect through a caller-supplied dialer. This is the seam tests use
    /// to drive a session over an in-memory transport.
    pub fn with_dialer(config: LinkConfig, dialer: Box<dyn Dialer>) -> Result<Self> {
        let inner = Arc::new(Inner {
            config,
            state: Mutex::new(LinkState::Disconnected),
            link: Mutex::new(None),
            requests: RequestTracker::new(),
            registry: SubscriptionRegistry::new(),
            events: EventBus::new(),
            shutdown: AtomicBool::new(false),
            connected_once: AtomicBool::new(false),
            last_heartbeat: Mutex::new(None),
            generation_hooks: Mutex::new(Vec::new()),
        });

        // Capacity 1: at most one redial attempt is ever queued
        let (tick_tx, tick_rx) = bounded::<()>(1);
        let _ = tick_tx.send(());

        let reader_inner = Arc::clone(&inner);
        let reader = thread::Builder::new()
            .name("setu-reader".to_string())
            .spawn(move || reader_loop(reader_inner, dialer, tick_rx))?;

        let watchdog_inner = Arc::clone(&inner);
        let watchdog = thread::Builder::new()
            .name("setu-watchdog".to_string())
            .spawn(move || watchdog_loop(watchdog_inner, tick_tx))?;

        Ok(Self {
            inner,
            reader: Some(reader),
            watchdog: Some(watchdog),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    /// Whether the link is currently live
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Declared role of this connection
    pub fn role(&self) -> Role {
        self.inner.config.role
    }

    /// Block until the link is live or `timeout` elapses
    pub fn wait_for_connect(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.is_connected() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        self.is_connected()
    }

    /// Request the current value of `path`.
    ///
    /// The callback fires once, with the first value the server pushes back
    /// on that exact path. A second `get` on the same path before the reply
    /// arrives replaces the first callback; only the newer one ever fires.
    pub fn get(
        &self,
        topic: &str,
        callback: impl FnOnce(TypedValue) + Send + 'static,
    ) -> Result<()> {
        let header = self.encode_path(Method::Get, topic)?;
        self.inner.requests.register(topic, Box::new(callback));
        if let Err(e) = self.inner.send(&header) {
            self.inner.requests.discard(topic);
            return Err(e);
        }
        Ok(())
    }

    /// Publish `value` on `path`
    pub fn set(&self, topic: &str, value: &TypedValue) -> Result<()> {
        let mut bytes = self.encode_path(Method::Set, topic)?;
        bytes.extend_from_slice(&value.encode());
        self.inner.send(&bytes)
    }

    /// Subscribe to every topic `topic` is a prefix of, at `interval_ms`.
    ///
    /// The callback fires on the reader thread for each matching inbound
    /// value. Returns a handle for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(
        &self,
        topic: &str,
        interval_ms: u32,
        callback: impl Fn(&TypedValue) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        let role = self.role();
        if !role.can_subscribe() {
            return Err(Error::RoleViolation {
                role,
                operation: "subscribe",
            });
        }
        let mut bytes = self.encode_path(Method::Subscribe, topic)?;
        bytes.extend_from_slice(&interval_ms.to_be_bytes());

        let id = self.inner.registry.add_topic(topic, Arc::new(callback));
        if let Err(e) = self.inner.send(&bytes) {
            self.inner.registry.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Listen to the addressed channel `(robot_addr, sensor_addr)`
    pub fn listen(
        &self,
        robot_addr: u8,
        sensor_addr: u8,
        callback: ChannelCallback,
    ) -> Result<SubscriptionId> {
        let role = self.role();
        if !role.can_subscribe() {
            return Err(Error::RoleViolation {
                role,
                operation: "listen",
            });
        }
        let id = self
            .inner
            .registry
            .add_listener(robot_addr, sensor_addr, callback);
        let bytes = encode_channel_subscribe(role, robot_addr, sensor_addr, true);
        if let Err(e) = self.inner.send(&bytes) {
            self.inner.registry.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Remove a subscription or channel listener.
    ///
    /// Channel listeners send an unsubscribe request to the server; topic
    /// subscriptions are removed locally, matching the wire peers.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        match self.inner.registry.remove(id) {
            Some(Removed::Topic) | None => Ok(()),
            Some(Removed::Channel {
                robot_addr,
                sensor_addr,
            }) => {
                let bytes = encode_channel_subscribe(self.role(), robot_addr, sensor_addr, false);
                self.inner.send(&bytes)
            }
        }
    }

    /// Push a sensor update for `sensor_addr` with an opaque payload
    pub fn update_channel(&self, sensor_addr: u8, payload: &[u8]) -> Result<()> {
        let role = self.role();
        if !role.can_publish() {
            return Err(Error::RoleViolation {
                role,
                operation: "update_channel",
            });
        }
        let bytes = encode_sensor_update(role, sensor_addr, payload);
        self.inner.send(&bytes)
    }

    /// Register a lifecycle callback.
    ///
    /// `open` fires at most once per connection lifetime. Registering an
    /// `open` callback while the link is currently open fires it
    /// immediately, so late registrants never miss it; registering while
    /// the link is down just records it.
    pub fn on(&self, event: Event, callback: impl Fn() + Send + Sync + 'static) {
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(callback);
        if event == Event::Open && self.is_connected() {
            callback();
            return;
        }
        self.inner.events.register(event, callback);
    }

    /// Register a callback for generation score summaries
    pub fn on_generation(&self, callback: impl Fn(Option<f64>, &[f64]) + Send + Sync + 'static) {
        self.inner.generation_hooks.lock().push(Arc::new(callback));
    }

    /// Last value seen on `path`, if any
    pub fn last_value(&self, topic: &str) -> Option<TypedValue> {
        self.inner.registry.last_value(topic)
    }

    /// Current value array of an addressed channel, if observed
    pub fn channel_values(&self, robot_addr: u8, sensor_addr: u8) -> Option<Vec<f64>> {
        self.inner.registry.channel_values(robot_addr, sensor_addr)
    }

    /// Time since the last heartbeat (or handshake) on the live link
    pub fn last_heartbeat_age(&self) -> Option<Duration> {
        self.inner.last_heartbeat.lock().map(|t| t.elapsed())
    }

    /// Tear the session down and join both threads.
    ///
    /// Fires `close` if the link was live. Dropping the connection does the
    /// same teardown.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let was_connected = self.inner.state() == LinkState::Connected;
        self.inner.drop_link();
        self.inner.set_state(LinkState::Disconnected);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }
        if was_connected {
            self.inner.events.emit(Event::Close);
        }
        log::info!("Link to {} closed", self.inner.config.addr());
    }

    fn encode_path(&self, method: Method, topic: &str) -> Result<Vec<u8>> {
        if self.inner.config.clamp_long_paths {
            Ok(path::encode_clamped(method, topic))
        } else {
            path::encode(method, topic)
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader thread: waits for a redial tick, dials, handshakes, then streams
fn reader_loop(inner: Arc<Inner>, mut dialer: Box<dyn Dialer>, ticks: Receiver<()>) {
    while !inner.shutdown.load(Ordering::SeqCst) {
        match ticks.recv_timeout(TICK_WAIT) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        inner.set_state(LinkState::Connecting);
        let transport = match dialer.dial() {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Dial to {} failed: {}", inner.config.addr(), e);
                inner.set_state(LinkState::Reconnecting);
                continue;
            }
        };
        *inner.link.lock() = Some(transport);

        match inner.config.handshake {
            HandshakeMode::RoleExchange => {
                inner.set_state(LinkState::Handshaking);
                if let Err(e) = inner.write_raw(&handshake_request(inner.config.role)) {
                    log::warn!("Handshake write failed: {}", e);
                    recycle(&inner, false);
                    continue;
                }
            }
            HandshakeMode::None => inner.mark_connected(),
        }

        let was_connected = stream_loop(&inner);
        recycle(&inner, was_connected);
    }

    inner.drop_link();
}

/// Poll the transport and dispatch frames until the link dies or the
/// connection shuts down. Returns whether the link reached `Connected`.
fn stream_loop(inner: &Inner) -> bool {
    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        // Hold the transport lock per poll so writers interleave freely
        let read = {
            let mut link = inner.link.lock();
            match link.as_mut() {
                Some(transport) => transport.read(&mut chunk),
                None => break,
            }
        };

        match read {
            Ok(0) => {
                thread::sleep(READ_IDLE);
                continue;
            }
            Ok(n) => {
                if log::log_enabled!(log::Level::Trace) {
                    log::trace!("Read {} byte(s): {:02X?}", n, &chunk[..n]);
                }
                buffer.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                if !inner.shutdown.load(Ordering::SeqCst) {
                    log::warn!("Link read failed: {}", e);
                    inner.events.emit(Event::Error);
                }
                break;
            }
        }

        loop {
            match Frame::decode(&buffer) {
                Ok(Some((frame, consumed))) => {
                    buffer.drain(..consumed);
                    inner.handle_frame(frame);
                }
                Ok(None) => break,
                Err(e) => {
                    // The stream position can no longer be trusted
                    log::error!("Unrecoverable decode error, recycling link: {}", e);
                    inner.events.emit(Event::Error);
                    return inner.state() == LinkState::Connected;
                }
            }
        }
    }

    inner.state() == LinkState::Connected
}

/// Tear down the dead link and queue the state machine for a redial
fn recycle(inner: &Inner, was_connected: bool) {
    inner.drop_link();
    if inner.shutdown.load(Ordering::SeqCst) {
        inner.set_state(LinkState::Disconnected);
        return;
    }
    inner.set_state(LinkState::Reconnecting);
    if was_connected {
        inner.events.emit(Event::Close);
    }
}

/// Watchdog thread: kills stale links and schedules redial ticks
fn watchdog_loop(inner: Arc<Inner>, ticks: Sender<()>) {
    let mut down_since = Instant::now();
    let timeout = inner.config.reconnect_timeout();

    while !inner.shutdown.load(Ordering::SeqCst) {
        thread::sleep(WATCHDOG_TICK);

        if inner.state() == LinkState::Connected {
            down_since = Instant::now();
            // Heartbeats only flow on the role-exchange dialect
            if inner.config.handshake == HandshakeMode::RoleExchange {
                let stale = inner
                    .last_heartbeat
                    .lock()
                    .map(|t| t.elapsed() > timeout)
                    .unwrap_or(false);
                if stale {
                    log::warn!(
                        "No heartbeat from {} in {:?}, dropping link",
                        inner.config.addr(),
                        timeout
                    );
                    inner.drop_link();
                }
            }
        } else if down_since.elapsed() >= timeout {
            // A redial may already be queued; that is fine
            inner.drop_link();
            let _ = ticks.try_send(());
            down_since = Instant::now();
        }
    }
}
