//! # Setu-Link
//!
//! Client runtime for a lightweight binary pub/sub and RPC protocol spoken
//! over a persistent TCP socket between control processes and a robot-hosted
//! server.
//!
//! The wire format is compact and big-endian throughout: typed values carry a
//! one-byte tag and a four-byte length, topic frames pack the method and path
//! length into a two-byte header, and control traffic (handshake, heartbeat)
//! rides on dedicated prefix bytes. See the [`wire`] module for the exact
//! layouts.
//!
//! ## Architecture
//!
//! - **Wire codec** ([`wire`]): typed values, path headers, frame assembly
//!   and incremental stream decoding
//! - **Transport** ([`transport`]): the byte-stream seam, with TCP for
//!   production and an in-memory mock for tests
//! - **Session** ([`session`]): the connection state machine, reader and
//!   watchdog threads, subscriptions, and lifecycle events
//! - **Config** ([`config`]): TOML-backed connection settings
//!
//! ## Example
//!
//! ```no_run
//! use setu_link::{Connection, Event, LinkConfig, Role, TypedValue};
//! use std::time::Duration;
//!
//! # fn main() -> setu_link::Result<()> {
//! let config = LinkConfig::new("192.168.1.30", 8080).with_role(Role::Listener);
//! let connection = Connection::connect(config)?;
//!
//! connection.on(Event::Open, || log::info!("link is up"));
//! connection.wait_for_connect(Duration::from_secs(5));
//!
//! connection.subscribe("/gamepad1", 50, |value| {
//!     log::info!("gamepad: {:?}", value);
//! })?;
//! connection.get("/battery", |value| {
//!     if let TypedValue::Int(level) = value {
//!         log::info!("battery at {}%", level);
//!     }
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod wire;

pub use config::{HandshakeMode, LinkConfig};
pub use error::{DecodeError, Error, Result};
pub use session::{ChannelCallback, Connection, Event, LinkState, SubscriptionId};
pub use transport::{Dialer, MockDialer, MockTransport, TcpDialer, Transport};
pub use wire::{Frame, Method, Role, TypedValue};
