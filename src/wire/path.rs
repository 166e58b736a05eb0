//! Topic path header codec
//!
//! A topic frame starts with a compact 2-byte header: the high nibble of the
//! first byte is the method, the remaining 12 bits are the UTF-8 byte length
//! of the path that follows.
//!
//! ```text
//! [ (method << 4) | len_hi, len_lo, path bytes... ]
//! ```

use crate::error::{DecodeError, Error, Result};

/// Maximum encodable path length in bytes (12-bit length field)
pub const MAX_PATH_LEN: usize = 4095;

/// Method nibble of a topic frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    /// One-shot value request
    Get = 0x01,
    /// Value update (client to server)
    Set = 0x02,
    /// Subscription request, followed by a 4-byte interval in milliseconds
    Subscribe = 0x03,
    /// Value pushed by the server (get responses and subscription updates)
    Push = 0x08,
}

impl Method {
    /// Decode a method nibble
    pub fn from_nibble(nibble: u8) -> Option<Method> {
        match nibble {
            0x01 => Some(Method::Get),
            0x02 => Some(Method::Set),
            0x03 => Some(Method::Subscribe),
            0x08 => Some(Method::Push),
            _ => None,
        }
    }
}

/// Encode a path header, failing with [`Error::PathTooLong`] when the UTF-8
/// form of `path` exceeds 4095 bytes.
pub fn encode(method: Method, path: &str) -> Result<Vec<u8>> {
    let bytes = path.as_bytes();
    if bytes.len() > MAX_PATH_LEN {
        return Err(Error::PathTooLong(bytes.len()));
    }
    Ok(encode_unchecked(method, bytes))
}

/// Encode a path header, silently clamping over-length paths to the largest
/// char boundary at or below 4095 bytes.
///
/// Legacy peers clamp instead of failing; this variant exists for exact
/// interop with them and is selected through `LinkConfig::clamp_long_paths`.
pub fn encode_clamped(method: Method, path: &str) -> Vec<u8> {
    let mut end = MAX_PATH_LEN.min(path.len());
    while !path.is_char_boundary(end) {
        end -= 1;
    }
    encode_unchecked(method, path[..end].as_bytes())
}

fn encode_unchecked(method: Method, path: &[u8]) -> Vec<u8> {
    let len = path.len();
    let mut out = Vec::with_capacity(2 + len);
    out.push(((method as u8) << 4) | ((len >> 8) as u8));
    out.push((len & 0xFF) as u8);
    out.extend_from_slice(path);
    out
}

/// Decode a path header from the front of `buf`.
///
/// Returns the method, the borrowed path, and the total header length
/// (2 + path bytes).
pub fn decode(buf: &[u8]) -> std::result::Result<(Method, &str, usize), DecodeError> {
    if buf.len() < 2 {
        return Err(DecodeError::Truncated {
            needed: 2,
            available: buf.len(),
        });
    }

    let nibble = buf[0] >> 4;
    let method = Method::from_nibble(nibble).ok_or(DecodeError::UnknownMethod(nibble))?;
    let len = (((buf[0] & 0x0F) as usize) << 8) | buf[1] as usize;

    let total = 2 + len;
    if buf.len() < total {
        return Err(DecodeError::Truncated {
            needed: total,
            available: buf.len(),
        });
    }

    let path = std::str::from_utf8(&buf[2..total])
        .map_err(|_| DecodeError::InvalidUtf8("topic path"))?;
    Ok((method, path, total))
}
