//! HTTP/2 protocol implementation
//!
//! A small, synchronous HTTP/2 engine built directly on the frame layer.
//!
//! # Architecture
//!
//! - `frames`, `codec`: frame types and their wire encoding (RFC 9113 §4, §6)
//! - `settings`, `flow_control`, `stream`: connection parameters, windows and
//!   the per-stream state machine
//! - `handler`, `timer`: the interface application code implements and the
//!   per-session timer queue that drives deferred stream actions
//! - `server`: the connection driver, one per accepted session
//! - `client`: a blocking client used by the demo binary and the tests
//!
//! HPACK is provided by the `hpack` crate; everything else lives here.
//!
//! # Example
//!
//! ```no_run
//! use h2longpoll::http::h2::{Dispatch, H2Server, StreamHandler, StreamId};
//! use h2longpoll::http::{FdSessionOps, Headers, SessionOps};
//! use std::net::TcpListener;
//! use std::sync::Arc;
//!
//! struct Nobody;
//!
//! impl Dispatch for Nobody {
//!     fn dispatch(&self, _id: StreamId, _headers: &Headers) -> Option<Box<dyn StreamHandler>> {
//!         None
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = TcpListener::bind("127.0.0.1:8081")?;
//! let (tcp_stream, _) = listener.accept()?;
//! let mut session = FdSessionOps::new(tcp_stream);
//! session.set_nonblocking(true)?;
//!
//! H2Server::new(session, Arc::new(Nobody)).serve()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod handler;
pub mod server;
pub mod settings;
pub mod stream;
pub mod timer;

pub use client::{ClientEvent, H2Client, H2ClientBuilder, H2Response};
pub use error::{Error, ErrorCode, Result};
pub use frames::{Frame, FrameFlags, FrameType};
pub use handler::{Dispatch, StreamCommand, StreamContext, StreamHandler, Subscriptions};
pub use server::H2Server;
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 9113 Section 3.4:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
