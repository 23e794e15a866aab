//! TLS handshake deadlines
//!
//! The handshake itself is performed by OpenSSL's `Ssl::accept()` and
//! `Ssl::connect()` on a blocking socket. A peer that stalls mid-handshake
//! would otherwise pin the session thread forever, so the socket carries
//! read/write timeouts for the duration of the handshake only.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound every blocking read and write on `stream` by `timeout`
pub fn arm_deadline(stream: &TcpStream, timeout: Duration) -> io::Result<()> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))
}

/// Remove the handshake deadline once the session is established
pub fn disarm_deadline(stream: &TcpStream) -> io::Result<()> {
    stream.set_read_timeout(None)?;
    stream.set_write_timeout(None)
}
