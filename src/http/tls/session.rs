//! OpenSSL-backed `SessionOps`

use super::config::{TlsConfig, TlsError};
use super::handshake::{arm_deadline, disarm_deadline};
use super::vars::TlsVars;
use crate::http::session::{poll_fd, shutdown_tcp, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{Ssl, SslStream};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// An established TLS connection
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    vars: TlsVars,
    /// Set on the first hard I/O error; skips close_notify on close
    failed: bool,
}

impl TlsSessionOps {
    /// Client side handshake, bounded by the configured handshake timeout
    pub fn connect(tcp_stream: TcpStream, config: TlsConfig) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;
        if let Some(servername) = &config.servername {
            ssl.set_hostname(servername)?;
        }

        arm_deadline(&tcp_stream, config.handshake_timeout)?;
        let stream = ssl
            .connect(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("connect: {}", e)))?;
        Self::established(stream)
    }

    /// Server side handshake, bounded by the configured handshake timeout
    pub fn accept(tcp_stream: TcpStream, config: TlsConfig) -> Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        arm_deadline(&tcp_stream, config.handshake_timeout)?;
        let stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("accept: {}", e)))?;
        Self::established(stream)
    }

    fn established(stream: SslStream<TcpStream>) -> Result<Self, TlsError> {
        disarm_deadline(stream.get_ref())?;
        Ok(TlsSessionOps {
            vars: TlsVars::from_ssl(stream.ssl()),
            stream,
            failed: false,
        })
    }

    /// What the handshake negotiated
    pub fn vars(&self) -> &TlsVars {
        &self.vars
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    fn check<T>(&mut self, result: io::Result<T>) -> HttpResult<T> {
        result.map_err(|e| {
            if e.kind() != io::ErrorKind::WouldBlock {
                self.failed = true;
            }
            Error::Io(e)
        })
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Records already decrypted by OpenSSL never show up on the socket
        if events == PollEvents::Read && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        let result = self.stream.read(buf);
        self.check(result)
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        let result = self.stream.write(buf);
        self.check(result)
    }

    fn flush(&mut self) -> HttpResult<()> {
        let result = self.stream.flush();
        self.check(result)
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            // best effort close_notify
            let _ = self.stream.shutdown();
        }
        shutdown_tcp(self.stream.get_ref())
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> HttpResult<()> {
        Ok(self.stream.get_ref().set_nonblocking(nonblocking)?)
    }
}
