//! Byte transport underneath the HTTP/2 engine
//!
//! `SessionOps` is what a connection must offer: readiness polling,
//! non-blocking reads and writes, and a close. `FdSessionOps` covers plain
//! TCP; `tls::TlsSessionOps` covers OpenSSL. `HttpSession` adds the waiting
//! and timeout handling the engine and the client share.

use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Operations a transport provides to `HttpSession`
pub trait SessionOps {
    /// Wait for readiness; `Ok(false)` when `timeout` elapsed first
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()>;

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()>;
}

/// Readiness to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// `poll(2)` on a single descriptor
///
/// An interrupted wait reports "not ready" so callers simply loop.
pub(crate) fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: match events {
            PollEvents::Read => libc::POLLIN,
            PollEvents::Write => libc::POLLOUT,
        },
        revents: 0,
    };
    let timeout_ms = match timeout {
        Some(d) => i32::try_from(d.as_millis()).unwrap_or(i32::MAX),
        None => -1,
    };

    // SAFETY: `pfd` is a valid pollfd for the duration of the call
    let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ready >= 0 {
        return Ok(ready > 0);
    }

    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::Interrupted {
        Ok(false)
    } else {
        Err(Error::Io(err))
    }
}

/// Transport plus the timeout applied to blocking operations
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
}

impl<S: SessionOps> HttpSession<S> {
    /// Wraps `session` with a 10 second timeout
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    /// `None` waits forever
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Wait up to the session timeout for data, then read it
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if !self.session.poll(PollEvents::Read, self.timeout)? {
                return Err(Error::Timeout);
            }
            match self.session.read(buf) {
                Err(e) if e.is_would_block() => continue,
                other => return other,
            }
        }
    }

    pub fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        self.session.poll(PollEvents::Read, timeout)
    }

    /// `Ok(None)` when nothing is buffered yet, `Ok(Some(0))` at end of stream
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.session.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.is_would_block() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write everything in `buf`, waiting out back-pressure up to the timeout
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.session.write(buf) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => buf = &buf[n..],
                Err(e) if e.is_would_block() => {
                    if !self.session.poll(PollEvents::Write, self.timeout)? {
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        self.session.flush()
    }

    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    pub fn get_ref(&self) -> &S {
        &self.session
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// Plain TCP transport
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }
}

/// Shut down both directions; a peer that already left is not an error
pub(crate) fn shutdown_tcp(stream: &TcpStream) -> Result<()> {
    match stream.shutdown(Shutdown::Both) {
        Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::Io(e)),
        _ => Ok(()),
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.stream.write(buf)?)
    }

    fn close(&mut self) -> Result<()> {
        shutdown_tcp(&self.stream)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        Ok(self.stream.set_nonblocking(nonblocking)?)
    }
}
