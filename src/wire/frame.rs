//! Frame-level codec
//!
//! Builds outbound control/sensor frames and incrementally decodes the
//! inbound byte stream into [`Frame`] values. Decoding is driven from a
//! growing buffer: [`Frame::decode`] returns `Ok(None)` while a frame is
//! still incomplete, so a truncated tail never aborts the reader until the
//! peer actually closes the stream.

use serde::{Deserialize, Serialize};

use super::path::{self, Method};
use super::value::TypedValue;
use crate::error::DecodeError;

/// Leading byte of control frames (handshake, heartbeat)
pub const CONTROL_PREFIX: u8 = 0xFF;
/// Leading byte of addressed-channel pushes
pub const SENSOR_PREFIX: u8 = 0xC0;
/// Leading byte of generation-score frames, variant A
pub const GEN_SCORES_A: u8 = 0xC1;
/// Leading byte of generation-score frames, variant B
pub const GEN_SCORES_B: u8 = 0xC3;
/// Sensor-data kind byte inside `0xC0` frames
pub const SENSOR_DATA_KIND: u8 = 0x01;
/// Opcode for channel subscribe/unsubscribe requests
pub const CHANNEL_SUBSCRIBE_OP: u8 = 0x11;
/// Opcode for speaker sensor updates
pub const SENSOR_UPDATE_OP: u8 = 0x01;

/// Declared role of a connection.
///
/// The role is sent in the handshake and gates which operations the peer
/// accepts: a speaker pushes sensor data and may not subscribe, a listener
/// subscribes and may not push, a passive connection does both and prefixes
/// each outbound sensor-dialect frame with a marker byte saying which hat it
/// is wearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    /// Pushes sensor data, may not subscribe
    Speaker = 0x01,
    /// Subscribes to data, may not push sensor updates
    Listener = 0x02,
    /// May both push and subscribe
    Passive = 0x03,
}

impl Role {
    /// Wire byte for this role
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Whether this role may subscribe to topics or channels
    pub fn can_subscribe(self) -> bool {
        self != Role::Speaker
    }

    /// Whether this role may push sensor updates
    pub fn can_publish(self) -> bool {
        self != Role::Listener
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Passive
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Speaker => write!(f, "speaker"),
            Role::Listener => write!(f, "listener"),
            Role::Passive => write!(f, "passive"),
        }
    }
}

/// One decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `FF FF` - the peer accepted our handshake
    HandshakeAck,
    /// `FF 00` - keep-alive ping, must be answered with a pong
    HeartbeatPing,
    /// `FF 01` - keep-alive reply (not expected inbound; decoded for symmetry)
    HeartbeatPong,
    /// Path-addressed topic frame
    Topic {
        /// Method nibble from the header
        method: Method,
        /// Slash-delimited topic path
        path: String,
        /// Typed value, present on `Set`/`Push` frames
        value: Option<TypedValue>,
        /// Update interval, present on `Subscribe` frames
        interval_ms: Option<u32>,
    },
    /// `C0 01` - addressed-channel value push
    SensorPush {
        /// Robot address of the channel
        robot_addr: u8,
        /// Sensor address of the channel
        sensor_addr: u8,
        /// Channel values in index order
        values: Vec<f64>,
    },
    /// `C1 01` / `C3` - per-generation score summary from the simulator
    GenerationScores {
        /// Generation number (variant B only)
        generation: Option<f64>,
        /// One score per agent
        scores: Vec<f64>,
    },
    /// A frame whose extent was readable but whose contents were not.
    ///
    /// The reader logs and drops these, resuming at the next byte boundary.
    Corrupted {
        /// What went wrong
        error: DecodeError,
    },
}

// ===== Outbound builders =====

/// `[FF, role, 00]` - opens the role handshake
pub fn handshake_request(role: Role) -> [u8; 3] {
    [CONTROL_PREFIX, role.byte(), 0x00]
}

/// `[FF, FF]` - handshake acceptance (sent by the server side)
pub fn handshake_ack() -> [u8; 2] {
    [CONTROL_PREFIX, 0xFF]
}

/// `[FF, 00]` - keep-alive ping (sent by the server side)
pub fn heartbeat_ping() -> [u8; 2] {
    [CONTROL_PREFIX, 0x00]
}

/// `[FF, 01]` - keep-alive reply
pub fn heartbeat_pong() -> [u8; 2] {
    [CONTROL_PREFIX, 0x01]
}

/// Channel subscribe/unsubscribe request.
///
/// Passive connections prefix the frame with a listener marker byte;
/// listeners send it bare.
pub fn encode_channel_subscribe(role: Role, robot_addr: u8, sensor_addr: u8, subscribe: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    if role == Role::Passive {
        out.push(Role::Listener.byte());
    }
    out.push(CHANNEL_SUBSCRIBE_OP);
    out.push(robot_addr);
    out.push(sensor_addr);
    out.push(u8::from(subscribe));
    out
}

/// Speaker sensor update carrying an opaque payload.
///
/// Passive connections prefix the frame with a speaker marker byte;
/// speakers send it bare.
pub fn encode_sensor_update(role: Role, sensor_addr: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + payload.len());
    if role == Role::Passive {
        out.push(Role::Speaker.byte());
    }
    out.push(SENSOR_UPDATE_OP);
    out.push(sensor_addr);
    out.extend_from_slice(payload);
    out
}

/// `[C0, 01, robot, sensor, n, n x f64]` - addressed-channel push
/// (sent by the server side; exposed for loopback tests)
pub fn encode_sensor_push(robot_addr: u8, sensor_addr: u8, values: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + values.len() * 8);
    out.push(SENSOR_PREFIX);
    out.push(SENSOR_DATA_KIND);
    out.push(robot_addr);
    out.push(sensor_addr);
    out.push(values.len() as u8);
    for v in values {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

/// `[C3, generation f64, scores f64...]` - generation summary, variant B
pub fn encode_generation_scores(generation: f64, scores: &[f64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + scores.len() * 8);
    out.push(GEN_SCORES_B);
    out.extend_from_slice(&generation.to_be_bytes());
    for s in scores {
        out.extend_from_slice(&s.to_be_bytes());
    }
    out
}

// ===== Inbound decode =====

impl Frame {
    /// Decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(Some((frame, consumed)))` when a complete frame was
    /// decoded, `Ok(None)` when more bytes are needed, and `Err` when the
    /// stream position can no longer be trusted (unknown prefix or method,
    /// or an oversized declared length) and the connection must be recycled.
    pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        if buf.is_empty() {
            return Ok(None);
        }

        match buf[0] {
            CONTROL_PREFIX => Self::decode_control(buf),
            SENSOR_PREFIX => Self::decode_sensor_push(buf),
            GEN_SCORES_A => Self::decode_scores_a(buf),
            GEN_SCORES_B => Self::decode_scores_b(buf),
            _ => Self::decode_topic(buf),
        }
    }

    fn decode_control(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        match buf[1] {
            0xFF => Ok(Some((Frame::HandshakeAck, 2))),
            0x00 => Ok(Some((Frame::HeartbeatPing, 2))),
            0x01 => Ok(Some((Frame::HeartbeatPong, 2))),
            other => Err(DecodeError::UnknownPrefix(other)),
        }
    }

    fn decode_sensor_push(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        if buf.len() < 5 {
            return Ok(None);
        }
        if buf[1] != SENSOR_DATA_KIND {
            return Err(DecodeError::UnknownPrefix(buf[1]));
        }
        let robot_addr = buf[2];
        let sensor_addr = buf[3];
        let n = buf[4] as usize;
        let total = 5 + n * 8;
        if buf.len() < total {
            return Ok(None);
        }
        let values = decode_doubles(&buf[5..total]);
        Ok(Some((
            Frame::SensorPush {
                robot_addr,
                sensor_addr,
                values,
            },
            total,
        )))
    }

    // Variant A carries no count. The frame is delimited by the peer's write
    // boundary, so the decoder consumes every complete 8-byte group currently
    // buffered; a trailing partial group stays for the next pass.
    fn decode_scores_a(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        if buf[1] != SENSOR_DATA_KIND {
            return Err(DecodeError::UnknownPrefix(buf[1]));
        }
        let groups = (buf.len() - 2) / 8;
        if groups == 0 {
            return Ok(None);
        }
        let total = 2 + groups * 8;
        let scores = decode_doubles(&buf[2..total]);
        Ok(Some((
            Frame::GenerationScores {
                generation: None,
                scores,
            },
            total,
        )))
    }

    fn decode_scores_b(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        if buf.len() < 9 {
            return Ok(None);
        }
        let mut gen_bytes = [0u8; 8];
        gen_bytes.copy_from_slice(&buf[1..9]);
        let generation = f64::from_be_bytes(gen_bytes);
        let groups = (buf.len() - 9) / 8;
        let total = 9 + groups * 8;
        let scores = decode_doubles(&buf[9..total]);
        Ok(Some((
            Frame::GenerationScores {
                generation: Some(generation),
                scores,
            },
            total,
        )))
    }

    fn decode_topic(buf: &[u8]) -> Result<Option<(Frame, usize)>, DecodeError> {
        let nibble = buf[0] >> 4;
        let method = Method::from_nibble(nibble).ok_or(DecodeError::UnknownMethod(nibble))?;

        if buf.len() < 2 {
            return Ok(None);
        }
        let header_len = 2 + ((((buf[0] & 0x0F) as usize) << 8) | buf[1] as usize);
        if buf.len() < header_len {
            return Ok(None);
        }

        // Path parse failures are recoverable: the frame extent is known, so
        // the bad frame is reported and skipped.
        let path = match path::decode(buf) {
            Ok((_, p, _)) => p.to_string(),
            Err(error @ DecodeError::InvalidUtf8(_)) => {
                return Self::skip_topic_tail(buf, method, header_len, error);
            }
            Err(DecodeError::Truncated { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        match method {
            Method::Get => Ok(Some((
                Frame::Topic {
                    method,
                    path,
                    value: None,
                    interval_ms: None,
                },
                header_len,
            ))),
            Method::Subscribe => {
                let total = header_len + 4;
                if buf.len() < total {
                    return Ok(None);
                }
                let interval = u32::from_be_bytes([
                    buf[header_len],
                    buf[header_len + 1],
                    buf[header_len + 2],
                    buf[header_len + 3],
                ]);
                Ok(Some((
                    Frame::Topic {
                        method,
                        path,
                        value: None,
                        interval_ms: Some(interval),
                    },
                    total,
                )))
            }
            Method::Set | Method::Push => match TypedValue::decode(&buf[header_len..]) {
                Ok((value, used)) => Ok(Some((
                    Frame::Topic {
                        method,
                        path,
                        value: Some(value),
                        interval_ms: None,
                    },
                    header_len + used,
                ))),
                Err(DecodeError::Truncated { .. }) => Ok(None),
                Err(e @ DecodeError::Oversized(_)) => Err(e),
                // Unknown tag, width mismatch, bad UTF-8: the length prefix
                // still tells us the frame extent, so drop just this frame.
                Err(error) => Self::skip_topic_tail(buf, method, header_len, error),
            },
        }
    }

    /// Compute the full extent of an unparseable topic frame so the reader
    /// can resume at the next byte boundary.
    fn skip_topic_tail(
        buf: &[u8],
        method: Method,
        header_len: usize,
        error: DecodeError,
    ) -> Result<Option<(Frame, usize)>, DecodeError> {
        let total = match method {
            Method::Get => header_len,
            Method::Subscribe => header_len + 4,
            Method::Set | Method::Push => match TypedValue::declared_size(&buf[header_len..]) {
                Some(size) => header_len + size,
                None => return Ok(None),
            },
        };
        if buf.len() < total {
            return Ok(None);
        }
        Ok(Some((Frame::Corrupted { error }, total)))
    }
}

fn decode_doubles(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            f64::from_be_bytes(raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(buf: &[u8]) -> (Frame, usize) {
        Frame::decode(buf).unwrap().expect("complete frame")
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(decode_one(&[0xFF, 0xFF]), (Frame::HandshakeAck, 2));
        assert_eq!(decode_one(&[0xFF, 0x00]), (Frame::HeartbeatPing, 2));
        assert_eq!(decode_one(&[0xFF, 0x01]), (Frame::HeartbeatPong, 2));
        assert_eq!(Frame::decode(&[0xFF]).unwrap(), None);
        assert!(Frame::decode(&[0xFF, 0x42]).is_err());
    }

    #[test]
    fn test_handshake_request_layout() {
        assert_eq!(handshake_request(Role::Speaker), [0xFF, 0x01, 0x00]);
        assert_eq!(handshake_request(Role::Listener), [0xFF, 0x02, 0x00]);
        assert_eq!(handshake_request(Role::Passive), [0xFF, 0x03, 0x00]);
    }

    #[test]
    fn test_sensor_push_round_trip() {
        // Channel (2,5) with two doubles
        let d0 = 1.25f64;
        let d1 = -3.5f64;
        let bytes = encode_sensor_push(0x02, 0x05, &[d0, d1]);
        assert_eq!(&bytes[..5], &[0xC0, 0x01, 0x02, 0x05, 0x02]);

        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            frame,
            Frame::SensorPush {
                robot_addr: 2,
                sensor_addr: 5,
                values: vec![d0, d1],
            }
        );
    }

    #[test]
    fn test_sensor_push_incremental() {
        let bytes = encode_sensor_push(1, 2, &[9.0]);
        for cut in 1..bytes.len() {
            assert_eq!(Frame::decode(&bytes[..cut]).unwrap(), None);
        }
        assert!(Frame::decode(&bytes).unwrap().is_some());
    }

    #[test]
    fn test_topic_push_with_value() {
        let mut bytes = path::encode(Method::Push, "/gamepad1/leftX").unwrap();
        bytes.extend_from_slice(&TypedValue::Double(0.75).encode());

        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, bytes.len());
        match frame {
            Frame::Topic {
                method: Method::Push,
                path,
                value: Some(TypedValue::Double(v)),
                interval_ms: None,
            } => {
                assert_eq!(path, "/gamepad1/leftX");
                assert_eq!(v, 0.75);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // Value split across reads
        assert_eq!(Frame::decode(&bytes[..bytes.len() - 1]).unwrap(), None);
    }

    #[test]
    fn test_topic_subscribe_with_interval() {
        let mut bytes = path::encode(Method::Subscribe, "/imu").unwrap();
        bytes.extend_from_slice(&50u32.to_be_bytes());

        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            frame,
            Frame::Topic {
                method: Method::Subscribe,
                path: "/imu".to_string(),
                value: None,
                interval_ms: Some(50),
            }
        );
    }

    #[test]
    fn test_topic_get_header_only() {
        let bytes = path::encode(Method::Get, "/battery").unwrap();
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            frame,
            Frame::Topic {
                method: Method::Get,
                path: "/battery".to_string(),
                value: None,
                interval_ms: None,
            }
        );
    }

    #[test]
    fn test_corrupted_value_is_skipped_not_fatal() {
        let mut bytes = path::encode(Method::Push, "/bad").unwrap();
        // Unknown tag 0x0A with a 2-byte payload, then a valid heartbeat
        bytes.extend_from_slice(&[0x0A, 0, 0, 0, 2, 0xAA, 0xBB]);
        let frame_len = bytes.len();
        bytes.extend_from_slice(&heartbeat_ping());

        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, frame_len);
        assert!(matches!(
            frame,
            Frame::Corrupted {
                error: DecodeError::UnknownType(0x0A)
            }
        ));

        // The stream resumes cleanly at the heartbeat
        let (frame, _) = decode_one(&bytes[consumed..]);
        assert_eq!(frame, Frame::HeartbeatPing);
    }

    #[test]
    fn test_unknown_method_is_fatal() {
        assert_eq!(
            Frame::decode(&[0x70, 0x00]),
            Err(DecodeError::UnknownMethod(0x07))
        );
    }

    #[test]
    fn test_generation_scores_variant_b() {
        let bytes = encode_generation_scores(12.0, &[0.5, 0.25, -1.0]);
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            frame,
            Frame::GenerationScores {
                generation: Some(12.0),
                scores: vec![0.5, 0.25, -1.0],
            }
        );
    }

    #[test]
    fn test_generation_scores_variant_a() {
        let mut bytes = vec![0xC1, 0x01];
        for v in [2.0f64, 4.0] {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let (frame, consumed) = decode_one(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            frame,
            Frame::GenerationScores {
                generation: None,
                scores: vec![2.0, 4.0],
            }
        );
    }

    #[test]
    fn test_channel_subscribe_markers() {
        // Passive prefixes the listener marker, listener sends it bare
        assert_eq!(
            encode_channel_subscribe(Role::Passive, 2, 5, true),
            vec![0x02, 0x11, 2, 5, 1]
        );
        assert_eq!(
            encode_channel_subscribe(Role::Listener, 2, 5, false),
            vec![0x11, 2, 5, 0]
        );
    }

    #[test]
    fn test_sensor_update_markers() {
        assert_eq!(
            encode_sensor_update(Role::Passive, 0xDD, &[1, 2]),
            vec![0x01, 0x01, 0xDD, 1, 2]
        );
        assert_eq!(
            encode_sensor_update(Role::Speaker, 0xDD, &[1, 2]),
            vec![0x01, 0xDD, 1, 2]
        );
    }

    #[test]
    fn test_coalesced_frames_decode_in_sequence() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&handshake_ack());
        stream.extend_from_slice(&heartbeat_ping());
        stream.extend_from_slice(&encode_sensor_push(1, 1, &[7.0]));

        let (f1, c1) = decode_one(&stream);
        assert_eq!(f1, Frame::HandshakeAck);
        let (f2, c2) = decode_one(&stream[c1..]);
        assert_eq!(f2, Frame::HeartbeatPing);
        let (f3, _) = decode_one(&stream[c1 + c2..]);
        assert!(matches!(f3, Frame::SensorPush { .. }));
    }
}
