//! Transport layer for I/O abstraction

use crate::error::Result;

mod mock;
mod tcp;

pub use mock::{MockDialer, MockTransport};
pub use tcp::{TcpDialer, TcpTransport};

/// Byte transport carrying one protocol session.
///
/// Implementations are polled by the reader thread: `read` returns `Ok(0)`
/// when no data is currently available (timeout / would-block) and an
/// `UnexpectedEof` I/O error once the peer has closed the stream.
pub trait Transport: Send {
    /// Read available data into `buf`, returning the number of bytes read.
    /// `Ok(0)` means no data right now, not end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write the whole buffer
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any pending writes
    fn flush(&mut self) -> Result<()>;

    /// Tear down both directions; subsequent reads and writes fail.
    /// Must be callable from a thread other than the reader.
    fn shutdown(&mut self) -> Result<()>;
}

/// Produces a fresh [`Transport`] per connection attempt.
///
/// The session owns one dialer for its whole life and re-dials through it on
/// every reconnect, which is also the seam tests use to script connections.
pub trait Dialer: Send {
    /// Open a new transport to the peer
    fn dial(&mut self) -> Result<Box<dyn Transport>>;
}
