//! TCP transport

use super::{Dialer, Transport};
use crate::error::Result;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Read timeout used to turn blocking reads into short polls so the reader
/// thread can observe shutdown and reconnect signals.
const READ_TIMEOUT: Duration = Duration::from_millis(5);

/// TCP stream transport
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap a connected stream, configuring it for polled reads
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            // A zero-byte read on TCP means the peer closed the stream
            Ok(0) => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed connection",
            )
            .into()),
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush()?;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

/// Dials a fixed `host:port` with a connect timeout
pub struct TcpDialer {
    addr: String,
    connect_timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer for `addr` (e.g. "192.168.1.30:8080")
    pub fn new(addr: String, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
        }
    }
}

impl Dialer for TcpDialer {
    fn dial(&mut self) -> Result<Box<dyn Transport>> {
        let sock_addr = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no address resolved for {}", self.addr),
                )
            })?;

        log::debug!("Dialing {} (timeout {:?})", self.addr, self.connect_timeout);
        let stream = TcpStream::connect_timeout(&sock_addr, self.connect_timeout)?;
        Ok(Box::new(TcpTransport::new(stream)?))
    }
}
