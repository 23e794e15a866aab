//! OpenSSL transport for HTTP/2
//!
//! `TlsConfig` holds a built context; `accept` and `connect` run the
//! handshake and hand back a `TlsSessionOps`, which the HTTP/2 engine drives
//! like any other `SessionOps`. The listener only speaks HTTP/2 on sessions
//! whose ALPN result is [`ALPN_H2`].
//!
//! ```no_run
//! use h2longpoll::http::tls::{TlsConfig, TlsVersion, ALPN_H2};
//! use std::net::TcpListener;
//!
//! let tls = TlsConfig::server()?
//!     .key_file("./server.key")?
//!     .cert_file("./server.crt")?
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)?
//!     .alpn(&[ALPN_H2])
//!     .build()?;
//!
//! let listener = TcpListener::bind("127.0.0.1:8081")?;
//! let (tcp_stream, _) = listener.accept()?;
//! let session = tls.accept(tcp_stream)?;
//! println!("negotiated {:?}", session.vars().alpn);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builtin_cert;
pub mod config;
pub mod handshake;
pub mod session;
pub mod vars;

pub use config::{ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use session::TlsSessionOps;
pub use vars::TlsVars;

pub type Result<T> = std::result::Result<T, TlsError>;

/// ALPN identifier of HTTP/2 over TLS
pub const ALPN_H2: &str = "h2";
