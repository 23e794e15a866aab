//! Stream handlers
//!
//! Application code sees a stream only through a `StreamHandler`. Callbacks
//! never touch the socket: they record `StreamCommand`s in a `StreamContext`
//! and the connection applies them once the callback returns. This keeps
//! handlers plain state machines that can be driven directly in unit tests.

use super::error::ErrorCode;
use super::stream::StreamId;
use crate::http::Headers;
use bytes::Bytes;
use std::time::Duration;

/// Events a handler wants delivered after `on_open`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscriptions {
    /// Inbound DATA payloads
    pub data: bool,
    /// Stream closure
    pub close: bool,
    /// RST_STREAM with an error code
    pub error: bool,
}

impl Subscriptions {
    /// No stream events
    pub fn none() -> Self {
        Self::default()
    }

    /// Every stream event
    pub fn all() -> Self {
        Subscriptions {
            data: true,
            close: true,
            error: true,
        }
    }
}

/// Action requested by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamCommand {
    /// Send response HEADERS
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// Send body data, optionally ending the stream
    Data { payload: Bytes, end_stream: bool },
    /// Call `on_timer` once `delay` has elapsed
    ArmTimer(Duration),
}

/// Command sink passed to every handler callback
#[derive(Debug)]
pub struct StreamContext {
    stream_id: StreamId,
    writable: bool,
    commands: Vec<StreamCommand>,
}

impl StreamContext {
    /// Context for a stream whose send side is currently `writable`
    pub fn new(stream_id: StreamId, writable: bool) -> Self {
        StreamContext {
            stream_id,
            writable,
            commands: Vec::new(),
        }
    }

    /// Stream this context belongs to
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// True while the stream can still carry data to the peer
    ///
    /// Accounts for an end of stream already requested in this callback.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Send response headers with the given status
    pub fn respond(&mut self, status: u16, headers: &[(&str, &str)]) {
        self.commands.push(StreamCommand::Respond {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        });
    }

    /// Write body data
    pub fn write(&mut self, payload: impl Into<Bytes>) {
        self.push_data(payload.into(), false);
    }

    /// Write a final body chunk and end the stream
    pub fn end(&mut self, payload: impl Into<Bytes>) {
        self.push_data(payload.into(), true);
    }

    fn push_data(&mut self, payload: Bytes, end_stream: bool) {
        self.commands.push(StreamCommand::Data {
            payload,
            end_stream,
        });
        if end_stream {
            self.writable = false;
        }
    }

    /// Schedule `on_timer` after `delay`
    pub fn arm_timer(&mut self, delay: Duration) {
        self.commands.push(StreamCommand::ArmTimer(delay));
    }

    /// Commands issued so far, in order
    pub fn commands(&self) -> &[StreamCommand] {
        &self.commands
    }

    /// Consume the context, yielding its commands
    pub fn into_commands(self) -> Vec<StreamCommand> {
        self.commands
    }
}

/// Per-stream application logic
pub trait StreamHandler: Send {
    /// Stream opened; returns the events to deliver from now on
    fn on_open(&mut self, headers: &Headers, ctx: &mut StreamContext) -> Subscriptions;

    /// Inbound DATA payload (only when subscribed)
    fn on_data(&mut self, _data: &[u8], _ctx: &mut StreamContext) {}

    /// Stream fully closed (only when subscribed)
    fn on_close(&mut self, _ctx: &mut StreamContext) {}

    /// Stream reset by the peer with an error code (only when subscribed)
    fn on_error(&mut self, _code: ErrorCode, _ctx: &mut StreamContext) {}

    /// A timer armed through the context expired
    fn on_timer(&mut self, _ctx: &mut StreamContext) {}
}

/// Chooses a handler for each new stream
///
/// Returning `None` leaves the stream unhandled: no response is sent and the
/// stream stays open until the peer or transport ends it.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, stream_id: StreamId, headers: &Headers) -> Option<Box<dyn StreamHandler>>;
}
