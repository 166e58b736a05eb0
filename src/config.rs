//! Configuration for a Setu-Link connection
//!
//! Loads configuration from TOML with the minimal parameters needed to
//! establish and maintain one protocol session.

use crate::error::Result;
use crate::wire::Role;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Which handshake the connection performs after the socket opens.
///
/// The sensor dialect exchanges `[FF, role, 00]` / `[FF, FF]`; the topic-RPC
/// dialect has no handshake and is live as soon as the socket opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeMode {
    /// Send the role handshake and wait for the ack
    RoleExchange,
    /// No handshake; connected on socket open
    None,
}

impl Default for HandshakeMode {
    fn default() -> Self {
        HandshakeMode::RoleExchange
    }
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Server hostname or IP
    pub host: String,
    /// Server TCP port
    pub port: u16,
    /// Declared role, sent in the handshake and enforced locally
    #[serde(default)]
    pub role: Role,
    /// Handshake dialect
    #[serde(default)]
    pub handshake: HandshakeMode,
    /// Delay before a reconnect attempt once the link is down
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Clamp over-length topic paths to 4095 bytes instead of failing.
    ///
    /// Legacy peers clamp silently; leave this off unless exact legacy
    /// interop is required.
    #[serde(default)]
    pub clamp_long_paths: bool,
}

fn default_reconnect_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

impl LinkConfig {
    /// Configuration with defaults for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            role: Role::default(),
            handshake: HandshakeMode::default(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            clamp_long_paths: false,
        }
    }

    /// Same configuration with a different role
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: LinkConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// `host:port` dial string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
