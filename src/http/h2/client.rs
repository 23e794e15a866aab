//! HTTP/2 client
//!
//! A blocking client that multiplexes several streams over one session and
//! reports what arrives as a sequence of `ClientEvent`s. It backs the demo
//! client binary and the integration tests.

use super::codec::{self, FrameCodec};
use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::frames::*;
use super::settings::{Settings, SettingsBuilder};
use super::stream::{StreamId, StreamManager};
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID};
use crate::http::{Headers, HttpSession, SessionOps};
use bytes::{Bytes, BytesMut};
use hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder};
use std::collections::VecDeque;
use std::time::Duration;

/// Something the server sent on a stream or the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Response headers (or trailers, which carry no status)
    Headers {
        stream_id: StreamId,
        status: Option<u16>,
        headers: Headers,
        end_stream: bool,
    },
    /// One DATA frame, padding removed
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    /// Stream reset by the server
    Reset { stream_id: StreamId, code: ErrorCode },
    /// Server is shutting the connection down
    GoAway {
        last_stream_id: StreamId,
        code: ErrorCode,
    },
}

impl ClientEvent {
    /// Stream the event belongs to (0 for GOAWAY)
    pub fn stream_id(&self) -> StreamId {
        match self {
            ClientEvent::Headers { stream_id, .. }
            | ClientEvent::Data { stream_id, .. }
            | ClientEvent::Reset { stream_id, .. } => *stream_id,
            ClientEvent::GoAway { .. } => CONNECTION_STREAM_ID,
        }
    }

    /// True when no further events will follow on this stream
    pub fn ends_stream(&self) -> bool {
        match self {
            ClientEvent::Headers { end_stream, .. } | ClientEvent::Data { end_stream, .. } => {
                *end_stream
            }
            ClientEvent::Reset { .. } => true,
            ClientEvent::GoAway { .. } => false,
        }
    }
}

struct PendingHeaderBlock {
    stream_id: StreamId,
    end_stream: bool,
    fragment: BytesMut,
}

/// HTTP/2 client
pub struct H2Client<S: SessionOps> {
    session: HttpSession<S>,
    codec: FrameCodec,
    streams: StreamManager,
    flow_control: FlowControl,
    hpack_encoder: HpackEncoder<'static>,
    hpack_decoder: HpackDecoder<'static>,
    local_settings: Settings,
    remote_settings: Settings,
    settings_received: bool,
    authority: String,
    header_block: Option<PendingHeaderBlock>,
    events: VecDeque<ClientEvent>,
}

impl<S: SessionOps> H2Client<S> {
    /// Create a client with default settings
    pub fn new(session: S) -> Result<Self> {
        H2ClientBuilder::new().build(session)
    }

    /// Perform the connection preface and wait for the server's SETTINGS
    pub fn connect(&mut self) -> Result<()> {
        let mut preface = BytesMut::from(CONNECTION_PREFACE);
        preface.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
            self.local_settings.clone(),
        )));
        self.session.write_all(&preface)?;

        while !self.settings_received {
            self.read_one()?;
        }
        Ok(())
    }

    /// Underlying transport
    pub fn session(&self) -> &S {
        self.session.get_ref()
    }

    /// Settings announced by the server
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Timeout for each blocking read or write
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.session.set_timeout(timeout);
    }

    /// Open a stream with a request
    ///
    /// With `end_stream` the request has no body; otherwise follow up with
    /// `send_data`.
    pub fn open_stream(
        &mut self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        end_stream: bool,
    ) -> Result<StreamId> {
        let stream_id = self.streams.create_stream()?;

        let mut fields: Vec<(&[u8], &[u8])> = vec![
            (b":method", method.as_bytes()),
            (b":scheme", b"https"),
            (b":authority", self.authority.as_bytes()),
            (b":path", path.as_bytes()),
        ];
        fields.extend(headers.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())));
        let block = Bytes::from(self.hpack_encoder.encode(fields));

        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.send_headers(end_stream)?;
        }

        let max_frame_size = self.remote_settings.get_max_frame_size() as usize;
        let frames = FrameCodec::encode_header_block(stream_id, block, end_stream, max_frame_size);
        self.session.write_all(&frames)?;
        Ok(stream_id)
    }

    /// Open a GET stream without a body
    pub fn get(&mut self, path: &str) -> Result<StreamId> {
        self.open_stream("GET", path, &[], true)
    }

    /// Send request body data, blocking while the server's windows are
    /// exhausted
    ///
    /// Events that arrive in the meantime are kept for `next_event`.
    pub fn send_data(&mut self, stream_id: StreamId, data: &[u8], end_stream: bool) -> Result<()> {
        self.streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?
            .queue_data(data, end_stream)?;

        loop {
            let max_frame_size = self.remote_settings.get_max_frame_size() as usize;
            let mut out = BytesMut::new();
            let pending = match self.streams.get_stream_mut(stream_id) {
                Some(stream) => {
                    while let Some((chunk, end)) =
                        stream.next_chunk(max_frame_size, self.flow_control.send_capacity())
                    {
                        self.flow_control.consume_send_window(chunk.len());
                        out.extend_from_slice(&FrameCodec::encode_data_frame(&DataFrame::new(
                            stream_id, chunk, end,
                        )));
                    }
                    stream.has_pending()
                }
                None => false,
            };

            if !out.is_empty() {
                self.session.write_all(&out)?;
            }
            if !pending {
                return Ok(());
            }
            self.read_one()?;
        }
    }

    /// Reset a stream
    pub fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) -> Result<()> {
        let frame = RstStreamFrame {
            stream_id,
            error_code,
        };
        self.session
            .write_all(&FrameCodec::encode_rst_stream_frame(&frame))?;

        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.reset();
        }
        Ok(())
    }

    /// Send a PING
    pub fn ping(&mut self, data: [u8; 8]) -> Result<()> {
        self.session
            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::new(data)))?;
        Ok(())
    }

    /// Next event from the server
    ///
    /// Waits up to `timeout` (`None` waits forever) and returns `Ok(None)` if
    /// nothing arrived in time.
    pub fn next_event(&mut self, timeout: Option<Duration>) -> Result<Option<ClientEvent>> {
        let saved = self.session.timeout();
        self.session.set_timeout(timeout);

        let result = loop {
            if let Some(event) = self.events.pop_front() {
                break Ok(Some(event));
            }
            match self.read_one() {
                Ok(()) => {}
                Err(Error::Transport(crate::http::Error::Timeout)) => break Ok(None),
                Err(e) => break Err(e),
            }
        };

        self.session.set_timeout(saved);
        result
    }

    /// Read events until `stream_id` ends, collecting its response
    ///
    /// Events for other streams stay queued, in order, for `next_event`.
    pub fn collect_response(&mut self, stream_id: StreamId) -> Result<H2Response> {
        let mut response = H2Response {
            stream_id,
            status: 0,
            headers: Headers::new(),
            body: BytesMut::new(),
            data_frames: 0,
            reset: None,
        };
        let mut others = VecDeque::new();
        let timeout = self.session.timeout();

        let result = loop {
            let event = match self.next_event(timeout) {
                Ok(Some(event)) => event,
                Ok(None) => break Err(Error::Timeout),
                Err(e) => break Err(e),
            };
            if event.stream_id() != stream_id {
                others.push_back(event);
                continue;
            }

            let done = event.ends_stream();
            match event {
                ClientEvent::Headers {
                    status, headers, ..
                } => match status {
                    Some(status) => {
                        response.status = status;
                        response.headers = headers;
                    }
                    None => {
                        for (name, value) in headers.iter() {
                            response.headers.insert(name, value);
                        }
                    }
                },
                ClientEvent::Data { data, .. } => {
                    response.data_frames += 1;
                    response.body.extend_from_slice(&data);
                }
                ClientEvent::Reset { code, .. } => response.reset = Some(code),
                ClientEvent::GoAway { .. } => {}
            }
            if done {
                break Ok(());
            }
        };

        while let Some(event) = others.pop_back() {
            self.events.push_front(event);
        }
        self.streams.cleanup_closed_streams();
        result.map(|()| response)
    }

    fn read_one(&mut self) -> Result<()> {
        let frame = self.codec.read_frame(&mut self.session)?;
        self.handle_frame(frame)
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if let Some(block) = &self.header_block {
            if frame.frame_type != Some(FrameType::Continuation) || frame.stream_id != block.stream_id {
                return Err(Error::Protocol("expected CONTINUATION".into()));
            }
        }

        match frame.frame_type {
            Some(FrameType::Data) => self.on_data(frame),
            Some(FrameType::Headers) => {
                let headers = codec::decode_headers_payload(frame.flags, frame.payload)?;
                if headers.end_headers {
                    self.on_header_block(frame.stream_id, &headers.header_block, headers.end_stream)
                } else {
                    self.header_block = Some(PendingHeaderBlock {
                        stream_id: frame.stream_id,
                        end_stream: headers.end_stream,
                        fragment: BytesMut::from(&headers.header_block[..]),
                    });
                    Ok(())
                }
            }
            Some(FrameType::Continuation) => {
                let mut block = self
                    .header_block
                    .take()
                    .ok_or_else(|| Error::Protocol("CONTINUATION without HEADERS".into()))?;
                block.fragment.extend_from_slice(&frame.payload);
                if frame.flags.is_end_headers() {
                    self.on_header_block(block.stream_id, &block.fragment, block.end_stream)
                } else {
                    self.header_block = Some(block);
                    Ok(())
                }
            }
            Some(FrameType::RstStream) => {
                let code = codec::decode_rst_stream(&frame.payload)?;
                if let Some(stream) = self.streams.get_stream_mut(frame.stream_id) {
                    stream.reset();
                }
                self.events.push_back(ClientEvent::Reset {
                    stream_id: frame.stream_id,
                    code,
                });
                Ok(())
            }
            Some(FrameType::Settings) => self.on_settings(frame),
            Some(FrameType::Ping) => {
                let data = codec::decode_ping(&frame.payload)?;
                if !frame.flags.is_ack() {
                    self.session
                        .write_all(&FrameCodec::encode_ping_frame(&PingFrame::ack(data)))?;
                }
                Ok(())
            }
            Some(FrameType::Goaway) => {
                let goaway = codec::decode_goaway(&frame.payload)?;
                self.events.push_back(ClientEvent::GoAway {
                    last_stream_id: goaway.last_stream_id,
                    code: goaway.error_code,
                });
                Ok(())
            }
            Some(FrameType::WindowUpdate) => {
                let increment = codec::decode_window_update(&frame.payload)?;
                if frame.stream_id == CONNECTION_STREAM_ID {
                    self.flow_control.increase_send_window(increment)?;
                } else if let Some(stream) = self.streams.get_stream_mut(frame.stream_id) {
                    stream.flow_control_mut().increase_send_window(increment)?;
                }
                Ok(())
            }
            Some(FrameType::PushPromise) => Err(Error::Protocol("push is disabled".into())),
            Some(FrameType::Priority) | None => Ok(()),
        }
    }

    fn on_data(&mut self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id;
        let flow_len = frame.payload_len();
        let end_stream = frame.flags.is_end_stream();

        self.flow_control.consume_recv_window(flow_len)?;
        let data = codec::strip_padding(frame.flags, frame.payload)?;

        let mut out = BytesMut::new();
        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.receive_data(flow_len, end_stream)?;
            if !end_stream {
                if let Some(increment) = stream.flow_control().should_send_window_update() {
                    stream.flow_control_mut().send_window_update(increment)?;
                    out.extend_from_slice(&FrameCodec::encode_window_update_frame(
                        &WindowUpdateFrame::new(stream_id, increment),
                    ));
                }
            }
        }
        if let Some(increment) = self.flow_control.should_send_window_update() {
            self.flow_control.send_window_update(increment)?;
            out.extend_from_slice(&FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment),
            ));
        }
        if !out.is_empty() {
            self.session.write_all(&out)?;
        }

        self.events.push_back(ClientEvent::Data {
            stream_id,
            data,
            end_stream,
        });
        Ok(())
    }

    fn on_header_block(&mut self, stream_id: StreamId, block: &[u8], end_stream: bool) -> Result<()> {
        let decoded = self
            .hpack_decoder
            .decode(block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

        let mut status = None;
        let mut headers = Headers::new();
        for (name, value) in decoded {
            let name = String::from_utf8_lossy(&name).into_owned();
            let value = String::from_utf8_lossy(&value).into_owned();
            if name == ":status" {
                status = value.parse().ok();
            } else {
                headers.insert(name, value);
            }
        }

        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.receive_headers(end_stream)?;
        }

        self.events.push_back(ClientEvent::Headers {
            stream_id,
            status,
            headers,
            end_stream,
        });
        Ok(())
    }

    fn on_settings(&mut self, frame: Frame) -> Result<()> {
        if frame.stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol("SETTINGS on a stream".into()));
        }
        if frame.flags.is_ack() {
            return Ok(());
        }

        let settings = Settings::decode(&frame.payload)?;
        if let Some(size) = settings.initial_window_size {
            self.streams.update_initial_send_window(size)?;
        }
        if settings.max_concurrent_streams.is_some() {
            self.streams
                .set_remote_max_concurrent(settings.max_concurrent_streams);
        }
        self.remote_settings.merge(&settings);
        self.settings_received = true;

        self.session
            .write_all(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()))?;
        Ok(())
    }
}

/// Complete response to one stream
#[derive(Debug, Clone)]
pub struct H2Response {
    /// Stream ID
    pub stream_id: StreamId,
    /// Status code (0 if no response headers arrived)
    pub status: u16,
    /// Response headers and trailers, without `:status`
    pub headers: Headers,
    /// Concatenated body
    pub body: BytesMut,
    /// Number of DATA frames that made up the body
    pub data_frames: usize,
    /// Error code if the stream was reset
    pub reset: Option<ErrorCode>,
}

impl H2Response {
    /// Get status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Get header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Get body as bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded as UTF-8, lossily
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP/2 client builder
pub struct H2ClientBuilder {
    settings: SettingsBuilder,
    authority: String,
    timeout: Option<Duration>,
}

impl H2ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        H2ClientBuilder {
            settings: SettingsBuilder::new()
                .header_table_size(4096)
                .enable_push(false)
                .initial_window_size(65535)
                .max_frame_size(16384),
            authority: "localhost".to_string(),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Value sent as `:authority`
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Timeout for blocking reads and writes
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client
    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Client<S>> {
        let local_settings = self.settings.build()?;
        let remote_settings = Settings::default();

        let mut codec = FrameCodec::new();
        codec.set_max_frame_size(local_settings.get_max_frame_size() as usize);

        let mut session = HttpSession::new(session);
        session.set_timeout(self.timeout);

        Ok(H2Client {
            session,
            codec,
            streams: StreamManager::new(
                true,
                remote_settings.get_initial_window_size(),
                local_settings.get_initial_window_size(),
            ),
            flow_control: FlowControl::default(),
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: HpackDecoder::new(),
            local_settings,
            remote_settings,
            settings_received: false,
            authority: self.authority,
            header_block: None,
            events: VecDeque::new(),
        })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_stream_ids() {
        let data = ClientEvent::Data {
            stream_id: 3,
            data: Bytes::from_static(b"x"),
            end_stream: true,
        };
        assert_eq!(data.stream_id(), 3);
        assert!(data.ends_stream());

        let goaway = ClientEvent::GoAway {
            last_stream_id: 7,
            code: ErrorCode::NoError,
        };
        assert_eq!(goaway.stream_id(), 0);
        assert!(!goaway.ends_stream());

        let reset = ClientEvent::Reset {
            stream_id: 5,
            code: ErrorCode::Cancel,
        };
        assert!(reset.ends_stream());
    }

    #[test]
    fn test_response_accessors() {
        let response = H2Response {
            stream_id: 1,
            status: 200,
            headers: [("content-type", "text/plain")].into_iter().collect(),
            body: BytesMut::from(&b"Hello"[..]),
            data_frames: 1,
            reset: None,
        };

        assert_eq!(response.status(), 200);
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.body(), b"Hello");
        assert_eq!(response.body_string(), "Hello");
    }
}
