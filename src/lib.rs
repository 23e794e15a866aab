//! h2longpoll - HTTP/2 multipart long-polling demonstration server
//!
//! This crate accepts TLS-secured HTTP/2 sessions and routes each new stream
//! by its request path:
//!
//! - `/longPolling` answers with a `multipart/related` response, writes one
//!   boundary line and ends the stream after a fixed delay.
//! - `/post` answers immediately, logs every uploaded chunk and ends the
//!   stream after a shorter fixed delay.
//! - Any other path is logged and left unanswered.
//!
//! The HTTP/2 engine, TLS layer and session abstraction live under [`http`];
//! the two lifecycle handlers and the route table live under [`routes`].
//!
//! # Examples
//!
//! ```no_run
//! use h2longpoll::{Server, ServerConfig};
//!
//! let server = Server::bind(ServerConfig::default())?;
//! server.serve()?;
//! # Ok::<(), h2longpoll::Error>(())
//! ```

pub mod config;
pub mod http;
pub mod routes;
pub mod server;

pub use config::ServerConfig;
pub use server::Server;

/// Result type for server startup and accept-loop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server-level errors
///
/// Per-session failures are logged by the accept loop and end only the
/// affected session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] http::tls::TlsError),

    #[error("Transport error: {0}")]
    Transport(#[from] http::Error),

    #[error("HTTP/2 error: {0}")]
    H2(#[from] http::h2::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
