//! Non-blocking byte transport under a session.
//!
//! Sessions never await socket readiness: the gateway loop polls every
//! session once per tick, so reads and writes must return `WouldBlock`
//! instead of parking the task.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, sleep};

/// Pause between retries while a write would block.
pub(crate) const RETRY_PAUSE: Duration = Duration::from_millis(1);

/// Readiness-free stream I/O.
pub trait Transport: Send {
    /// Reads available bytes. `Ok(0)` means end of stream, `WouldBlock`
    /// means nothing is available right now.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, including `WouldBlock`.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes as many bytes as the stream accepts without blocking.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error, including `WouldBlock`.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Remote address, for logging.
    fn peer(&self) -> Option<SocketAddr> {
        None
    }
}

impl Transport for TcpStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.peer_addr().ok()
    }
}

/// Writes all of `bytes`, sleeping briefly while the stream is full.
///
/// # Errors
///
/// Returns `TimedOut` if the stream stays full past `timeout`, `WriteZero`
/// if it stops accepting bytes, or the underlying I/O error.
pub(crate) async fn write_all<T: Transport>(
    transport: &mut T,
    mut bytes: &[u8],
    timeout: Duration,
) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    while !bytes.is_empty() {
        match transport.try_write(bytes) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => bytes = bytes.get(n..).unwrap_or_default(),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(io::ErrorKind::TimedOut.into());
                }
                sleep(RETRY_PAUSE).await;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
