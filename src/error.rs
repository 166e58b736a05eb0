//! Error types for Setu-Link

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Frame decoding errors
///
/// Produced by the wire codecs. The reader loop treats these as per-frame
/// failures; a decode error never kills the connection thread, although some
/// of them (unknown method nibble, unknown control byte) leave the stream
/// position untrustworthy and force the connection to be recycled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes available than the frame declared
    #[error("truncated frame: needed {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required to finish decoding
        needed: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Type tag is not one of the nine recognized codes
    #[error("unknown type tag: {0:#04x}")]
    UnknownType(u8),

    /// Method nibble is not Get/Set/Subscribe/Push
    #[error("unknown method nibble: {0:#03x}")]
    UnknownMethod(u8),

    /// Leading byte does not start any known frame
    #[error("unknown frame prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Declared payload length exceeds the frame size cap
    #[error("oversized frame: {0} bytes declared")]
    Oversized(usize),

    /// Declared payload length does not match the fixed width of the type
    #[error("length mismatch for tag {tag:#04x}: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Type tag being decoded
        tag: u8,
        /// Byte count the type requires
        expected: usize,
        /// Byte count the frame declared
        actual: usize,
    },

    /// Invalid UTF-8 in a path or string payload
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
}

/// Setu-Link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame decoding failed
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Path exceeds the 4095-byte wire limit
    #[error("path too long: {0} bytes (max 4095)")]
    PathTooLong(usize),

    /// Operation requires an established connection
    #[error("not connected")]
    NotConnected,

    /// Operation not permitted for this connection's role
    #[error("role violation: {role} may not {operation}")]
    RoleViolation {
        /// Role the connection was opened with
        role: crate::wire::Role,
        /// Operation that was refused
        operation: &'static str,
    },

    /// TOML parse error
    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("config serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
