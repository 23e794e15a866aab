//! Transport and protocol layers
//!
//! `h2` only ever sees a `SessionOps`. `FdSessionOps` carries plain TCP (used
//! by the engine tests) and `tls::TlsSessionOps` carries OpenSSL sessions.

pub mod h2;
pub mod headers;
pub mod session;
pub mod tls;

pub use headers::Headers;
pub use session::{FdSessionOps, HttpSession, PollEvents, SessionOps};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// True when a non-blocking operation could not make progress yet
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}

/// Fields kept per header block; the rest are dropped
pub const MAX_HEADERS: usize = 64;
