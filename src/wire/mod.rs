//! Wire format for the Setu-Link protocol
//!
//! All integers on the wire are big-endian. Three frame families share the
//! stream:
//!
//! ```text
//! Control:      FF FF            handshake ack
//!               FF 00 / FF 01    heartbeat ping / pong
//!               FF rr 00         handshake request (rr = role byte)
//! Topic RPC:    (m<<4|lenHi) lenLo path...   header; Set/Push frames append
//!               a typed value [tag(1) len(4) payload], Subscribe frames
//!               append a 4-byte interval in milliseconds
//! Sensor:       C0 01 rr ss n <n x f64>     addressed-channel push
//!               C1 01 <f64...> / C3 <gen f64> <f64...>  generation scores
//! ```
//!
//! Every frame is self-delimiting, so a reader can decode them incrementally
//! from a growing byte buffer without an outer length prefix.

pub mod frame;
pub mod path;
pub mod value;

pub use frame::{Frame, Role};
pub use path::Method;
pub use value::TypedValue;
