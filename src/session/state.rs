//! Connection state machine states

/// Lifecycle state of one connection.
///
/// Transitions are driven by the reader thread (dial, handshake, stream
/// errors) and the watchdog (reconnect timeout). At most one live socket
/// exists per connection; a new one is opened only after the previous one is
/// fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No socket, no pending attempt
    Disconnected,
    /// Dial in progress
    Connecting,
    /// Socket open, handshake sent, waiting for the ack
    Handshaking,
    /// Link established and live
    Connected,
    /// Link lost; waiting for the watchdog to schedule a redial
    Reconnecting,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Handshaking => "handshaking",
            LinkState::Connected => "connected",
            LinkState::Reconnecting => "reconnecting",
        };
        write!(f, "{}", name)
    }
}
