//! Mock transport for testing

use super::{Dialer, Transport};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// In-memory transport for unit tests.
///
/// Clones share the same buffers, so a test keeps one handle to script the
/// peer while the session owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    closed: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject bytes the session will read next
    pub fn inject_read(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.read_buffer.extend(data);
    }

    /// All bytes the session has written so far
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Drain and return the written bytes
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().write_buffer)
    }

    /// Simulate the peer closing the stream: pending bytes drain, then
    /// reads fail with `UnexpectedEof` and writes with `BrokenPipe`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Whether the transport has been shut down from either side
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let available = inner.read_buffer.len().min(buf.len());
        if available == 0 {
            if inner.closed {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "mock peer closed",
                )
                .into());
            }
            return Ok(0);
        }
        for item in buf.iter_mut().take(available) {
            *item = inner.read_buffer.pop_front().unwrap();
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mock peer closed").into(),
            );
        }
        inner.write_buffer.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}

/// Dialer that hands out a scripted sequence of [`MockTransport`]s.
///
/// Each dial pops the next transport; an empty script dials like a refused
/// connection, which is how tests exercise reconnect backoff.
#[derive(Clone, Default)]
pub struct MockDialer {
    script: Arc<Mutex<VecDeque<MockTransport>>>,
}

impl MockDialer {
    /// Create an empty dialer script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport for the next connection attempt
    pub fn push(&self, transport: MockTransport) {
        self.script.lock().push_back(transport);
    }
}

impl Dialer for MockDialer {
    fn dial(&mut self) -> Result<Box<dyn Transport>> {
        match self.script.lock().pop_front() {
            Some(t) => Ok(Box::new(t)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no scripted transport",
            )
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mock = MockTransport::new();
        mock.inject_read(&[1, 2, 3]);

        let mut session_side = mock.clone();
        let mut buf = [0u8; 8];
        assert_eq!(session_side.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(session_side.read(&mut buf).unwrap(), 0);

        session_side.write(&[9, 9]).unwrap();
        assert_eq!(mock.take_written(), vec![9, 9]);
        assert!(mock.written().is_empty());
    }

    #[test]
    fn test_close_drains_then_eof() {
        let mock = MockTransport::new();
        mock.inject_read(&[7]);
        mock.close();

        let mut session_side = mock.clone();
        let mut buf = [0u8; 8];
        assert_eq!(session_side.read(&mut buf).unwrap(), 1);
        assert!(session_side.read(&mut buf).is_err());
        assert!(session_side.write(&[1]).is_err());
    }

    #[test]
    fn test_dialer_script() {
        let dialer = MockDialer::new();
        dialer.push(MockTransport::new());

        let mut d = dialer.clone();
        assert!(d.dial().is_ok());
        assert!(d.dial().is_err());
    }
}
