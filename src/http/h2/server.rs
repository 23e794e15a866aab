//! HTTP/2 server connection driver
//!
//! `H2Server` owns one session and runs a single-threaded event loop over it:
//! it waits for the socket or the earliest stream timer, decodes whatever
//! frames arrived, hands stream events to the `StreamHandler` chosen by the
//! `Dispatch` and writes out the frames those handlers asked for.
//!
//! The session must be switched to non-blocking mode before `serve` is
//! called. Each wakeup reads until the transport reports `WouldBlock` or
//! `READ_BUDGET` bytes are buffered, whichever comes first.

use super::codec::{self, FrameCodec};
use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::frames::*;
use super::handler::{Dispatch, StreamCommand, StreamContext, StreamHandler, Subscriptions};
use super::settings::{Settings, DEFAULT_MAX_HEADER_LIST_SIZE};
use super::stream::{H2Stream, StreamId, StreamManager};
use super::timer::TimerQueue;
use super::{CONNECTION_PREFACE, CONNECTION_STREAM_ID};
use crate::http::{Headers, HttpSession, SessionOps};
use bytes::{Bytes, BytesMut};
use hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Bytes read per wakeup before the buffered frames are handled
const READ_BUDGET: usize = 256 * 1024;

/// Handler bound to a stream plus the bookkeeping the driver needs for it
struct HandledStream {
    handler: Box<dyn StreamHandler>,
    subscriptions: Subscriptions,
    responded: bool,
    closed: bool,
    /// Armed timers not yet delivered
    timers: usize,
}

/// Header block being reassembled from HEADERS + CONTINUATION
struct PendingHeaderBlock {
    stream_id: StreamId,
    end_stream: bool,
    /// HEADERS declared a dependency on its own stream
    self_dependent: bool,
    fragment: BytesMut,
}

/// HTTP/2 server side of one connection
pub struct H2Server<S: SessionOps> {
    session: HttpSession<S>,
    codec: FrameCodec,
    streams: StreamManager,
    handlers: HashMap<StreamId, HandledStream>,
    timers: TimerQueue,
    flow_control: FlowControl,
    hpack_encoder: HpackEncoder<'static>,
    hpack_decoder: HpackDecoder<'static>,
    local_settings: Settings,
    remote_settings: Settings,
    dispatch: Arc<dyn Dispatch>,
    header_block: Option<PendingHeaderBlock>,
    preface_received: bool,
    out: BytesMut,
}

impl<S: SessionOps> H2Server<S> {
    /// Create a driver announcing the default server settings
    pub fn new(session: S, dispatch: Arc<dyn Dispatch>) -> Self {
        Self::with_settings(session, dispatch, Settings::server_preface())
    }

    /// Create a driver announcing `local_settings`
    pub fn with_settings(session: S, dispatch: Arc<dyn Dispatch>, local_settings: Settings) -> Self {
        let mut codec = FrameCodec::new();
        codec.set_max_frame_size(local_settings.get_max_frame_size() as usize);

        let remote_settings = Settings::default();
        let mut streams = StreamManager::new(
            false,
            remote_settings.get_initial_window_size(),
            local_settings.get_initial_window_size(),
        );
        streams.set_local_max_concurrent(local_settings.get_max_concurrent_streams());

        H2Server {
            session: HttpSession::new(session),
            codec,
            streams,
            handlers: HashMap::new(),
            timers: TimerQueue::new(),
            flow_control: FlowControl::default(),
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: HpackDecoder::new(),
            local_settings,
            remote_settings,
            dispatch,
            header_block: None,
            preface_received: false,
            out: BytesMut::new(),
        }
    }

    /// Settings announced by the peer so far
    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// Run the connection until the peer disconnects or a connection error
    /// occurs
    ///
    /// A clean or abrupt disconnect returns `Ok`. On a protocol error GOAWAY
    /// is sent before the error is returned. Either way every handled stream
    /// still open gets its close notification and the session is closed.
    pub fn serve(mut self) -> Result<()> {
        let result = self.run();

        let result = match result {
            Err(e) if e.is_disconnect() => Ok(()),
            Err(e) => {
                self.send_goaway(e.code(), &e.to_string());
                Err(e)
            }
            ok => ok,
        };

        self.close_all_streams();
        if let Err(e) = self.session.close() {
            debug!("session close: {}", e);
        }

        result
    }

    fn run(&mut self) -> Result<()> {
        self.queue(FrameCodec::encode_settings_frame(&SettingsFrame::new(
            self.local_settings.clone(),
        )));
        self.flush()?;

        let mut buf = vec![0u8; 16 * 1024];
        loop {
            self.fire_timers()?;
            self.flush()?;

            let timeout = self.timers.poll_timeout(Instant::now());
            if !self.session.wait_readable(timeout)? {
                continue;
            }

            let mut eof = false;
            while self.codec.buffered() < READ_BUDGET {
                match self.session.try_read(&mut buf)? {
                    None => break,
                    Some(0) => {
                        eof = true;
                        break;
                    }
                    Some(n) => self.codec.push(&buf[..n]),
                }
            }

            if self.read_preface()? {
                while let Some(frame) = self.codec.decode_frame()? {
                    self.handle_frame(frame)?;
                }
            }
            self.flush()?;

            if eof {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Consume the client connection preface once it is buffered
    fn read_preface(&mut self) -> Result<bool> {
        if self.preface_received {
            return Ok(true);
        }

        let seen = self.codec.peek(CONNECTION_PREFACE.len());
        if !CONNECTION_PREFACE.starts_with(seen) {
            return Err(Error::MissingPreface);
        }

        match self.codec.take_raw(CONNECTION_PREFACE.len()) {
            Some(_) => {
                self.preface_received = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if let Some(block) = &self.header_block {
            if frame.frame_type != Some(FrameType::Continuation) || frame.stream_id != block.stream_id {
                return Err(Error::Protocol(format!(
                    "expected CONTINUATION for stream {}",
                    block.stream_id
                )));
            }
        }

        let frame_type = match frame.frame_type {
            Some(frame_type) => frame_type,
            None => {
                debug!("ignoring frame of unknown type 0x{:x}", frame.raw_type);
                return Ok(());
            }
        };
        debug!(
            "recv {} stream={} flags=0x{:x} len={}",
            frame_type.name(),
            frame.stream_id,
            frame.flags.as_u8(),
            frame.payload_len()
        );

        match frame_type {
            FrameType::Data => self.on_data(frame),
            FrameType::Headers => self.on_headers(frame),
            FrameType::Continuation => self.on_continuation(frame),
            FrameType::Priority => {
                require_stream(&frame)?;
                Ok(())
            }
            FrameType::RstStream => self.on_rst_stream(frame),
            FrameType::Settings => self.on_settings(frame),
            FrameType::PushPromise => Err(Error::Protocol("client sent PUSH_PROMISE".into())),
            FrameType::Ping => self.on_ping(frame),
            FrameType::Goaway => self.on_goaway(frame),
            FrameType::WindowUpdate => self.on_window_update(frame),
        }
    }

    fn on_data(&mut self, frame: Frame) -> Result<()> {
        let id = require_stream(&frame)?;
        let flow_len = frame.payload_len();
        let end_stream = frame.flags.is_end_stream();

        self.flow_control.consume_recv_window(flow_len)?;
        let data = codec::strip_padding(frame.flags, frame.payload)?;

        if self.streams.is_idle_peer_stream(id) {
            return Err(Error::Protocol(format!("DATA on idle stream {}", id)));
        }

        let received = match self.streams.get_stream_mut(id) {
            Some(stream) => stream.receive_data(flow_len, end_stream).and_then(|()| {
                if end_stream {
                    return Ok(None);
                }
                match stream.flow_control().should_send_window_update() {
                    Some(increment) => {
                        stream.flow_control_mut().send_window_update(increment)?;
                        Ok(Some(increment))
                    }
                    None => Ok(None),
                }
            }),
            None => {
                debug!("stream {}: DATA after close dropped", id);
                Ok(None)
            }
        };

        match received {
            Ok(update) => {
                if let Some(increment) = update {
                    self.queue(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                        id, increment,
                    )));
                }
                if !data.is_empty() && self.subscribed(id, |s| s.data) {
                    self.with_handler(id, |handler, ctx| handler.on_data(&data, ctx))?;
                }
                if self.is_closed(id) {
                    self.finish_stream(id)?;
                }
            }
            Err(e) => self.reset_stream(id, e.code())?,
        }

        self.replenish_connection_window()
    }

    fn on_headers(&mut self, frame: Frame) -> Result<()> {
        let id = require_stream(&frame)?;
        let headers = codec::decode_headers_payload(frame.flags, frame.payload)?;
        let self_dependent = headers
            .priority
            .as_ref()
            .map_or(false, |priority| priority.stream_dependency == id);

        let block = PendingHeaderBlock {
            stream_id: id,
            end_stream: headers.end_stream,
            self_dependent,
            fragment: BytesMut::from(&headers.header_block[..]),
        };
        self.check_header_block(&block)?;
        if headers.end_headers {
            self.process_header_block(block)
        } else {
            self.header_block = Some(block);
            Ok(())
        }
    }

    fn on_continuation(&mut self, frame: Frame) -> Result<()> {
        let mut block = self
            .header_block
            .take()
            .ok_or_else(|| Error::Protocol("CONTINUATION without HEADERS".into()))?;

        block.fragment.extend_from_slice(&frame.payload);
        self.check_header_block(&block)?;
        if frame.flags.is_end_headers() {
            self.process_header_block(block)
        } else {
            self.header_block = Some(block);
            Ok(())
        }
    }

    /// Encoded block size is held to the announced header list limit
    fn check_header_block(&self, block: &PendingHeaderBlock) -> Result<()> {
        let limit = self
            .local_settings
            .get_max_header_list_size()
            .unwrap_or(DEFAULT_MAX_HEADER_LIST_SIZE) as usize;
        if block.fragment.len() > limit {
            return Err(Error::HeaderBlockTooLarge(block.fragment.len()));
        }
        Ok(())
    }

    fn process_header_block(&mut self, block: PendingHeaderBlock) -> Result<()> {
        let (id, end_stream) = (block.stream_id, block.end_stream);

        // Always decode so the HPACK table stays in sync, even for streams
        // that are about to be refused or reset
        let decoded = self
            .hpack_decoder
            .decode(&block.fragment)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;

        if block.self_dependent {
            if self.streams.is_idle_peer_stream(id) {
                match self.streams.accept_stream(id) {
                    Ok(_) | Err(Error::RefusedStream(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            return self.reset_stream(id, ErrorCode::ProtocolError);
        }

        if let Some(stream) = self.streams.get_stream_mut(id) {
            return match stream.receive_headers(end_stream) {
                Ok(()) if self.is_closed(id) => self.finish_stream(id),
                Ok(()) => Ok(()),
                Err(e) => self.reset_stream(id, e.code()),
            };
        }

        if !self.streams.is_idle_peer_stream(id) {
            return Err(Error::StreamClosed(id));
        }

        match self.streams.accept_stream(id) {
            Ok(stream) => stream.receive_headers(end_stream)?,
            Err(Error::RefusedStream(_)) => {
                warn!("stream {}: refused, concurrency limit reached", id);
                self.queue(FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
                    stream_id: id,
                    error_code: ErrorCode::RefusedStream,
                }));
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let headers: Headers = decoded
            .into_iter()
            .map(|(name, value)| {
                (
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect();

        let mut handler = match self.dispatch.dispatch(id, &headers) {
            Some(handler) => handler,
            None => return Ok(()),
        };

        let writable = self.streams.get_stream(id).map_or(false, H2Stream::is_writable);
        let mut ctx = StreamContext::new(id, writable);
        let subscriptions = handler.on_open(&headers, &mut ctx);
        self.handlers.insert(
            id,
            HandledStream {
                handler,
                subscriptions,
                responded: false,
                closed: false,
                timers: 0,
            },
        );

        self.apply_commands(id, ctx.into_commands())?;
        if self.is_closed(id) {
            self.finish_stream(id)?;
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: Frame) -> Result<()> {
        let id = require_stream(&frame)?;
        let code = codec::decode_rst_stream(&frame.payload)?;

        if self.streams.is_idle_peer_stream(id) {
            return Err(Error::Protocol(format!("RST_STREAM on idle stream {}", id)));
        }

        let stream = match self.streams.get_stream_mut(id) {
            Some(stream) => stream,
            None => return Ok(()),
        };
        debug!("stream {}: reset by peer with {}", id, code);
        stream.reset();

        if code != ErrorCode::NoError && self.subscribed(id, |s| s.error) {
            self.with_handler(id, |handler, ctx| handler.on_error(code, ctx))?;
        }
        self.finish_stream(id)
    }

    fn on_settings(&mut self, frame: Frame) -> Result<()> {
        if frame.stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol("SETTINGS on a stream".into()));
        }
        if !codec::settings_length_ok(frame.flags, frame.payload_len()) {
            return Err(Error::FrameSize(format!(
                "SETTINGS length {}",
                frame.payload_len()
            )));
        }
        if frame.flags.is_ack() {
            return Ok(());
        }

        let settings = Settings::decode(&frame.payload)?;
        if let Some(size) = settings.initial_window_size {
            self.streams.update_initial_send_window(size)?;
        }
        self.remote_settings.merge(&settings);

        self.queue(FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        self.flush_all_streams()
    }

    fn on_ping(&mut self, frame: Frame) -> Result<()> {
        if frame.stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol("PING on a stream".into()));
        }
        let data = codec::decode_ping(&frame.payload)?;
        if !frame.flags.is_ack() {
            self.queue(FrameCodec::encode_ping_frame(&PingFrame::ack(data)));
        }
        Ok(())
    }

    fn on_goaway(&mut self, frame: Frame) -> Result<()> {
        if frame.stream_id != CONNECTION_STREAM_ID {
            return Err(Error::Protocol("GOAWAY on a stream".into()));
        }
        let goaway = codec::decode_goaway(&frame.payload)?;
        info!(
            "peer sent GOAWAY: last stream {}, {}",
            goaway.last_stream_id, goaway.error_code
        );
        Ok(())
    }

    fn on_window_update(&mut self, frame: Frame) -> Result<()> {
        let increment = codec::decode_window_update(&frame.payload)?;
        let id = frame.stream_id;

        if id == CONNECTION_STREAM_ID {
            self.flow_control.increase_send_window(increment)?;
            return self.flush_all_streams();
        }

        if self.streams.is_idle_peer_stream(id) {
            return Err(Error::Protocol(format!("WINDOW_UPDATE on idle stream {}", id)));
        }

        let result = match self.streams.get_stream_mut(id) {
            Some(stream) => stream.flow_control_mut().increase_send_window(increment),
            None => return Ok(()),
        };
        match result {
            Ok(_) => self.flush_stream(id),
            Err(e) => self.reset_stream(id, e.code()),
        }
    }

    fn apply_commands(&mut self, id: StreamId, commands: Vec<StreamCommand>) -> Result<()> {
        for command in commands {
            match command {
                StreamCommand::Respond { status, headers } => self.send_response(id, status, &headers)?,
                StreamCommand::Data {
                    payload,
                    end_stream,
                } => self.send_body(id, payload, end_stream)?,
                StreamCommand::ArmTimer(delay) => {
                    if let Some(entry) = self.handlers.get_mut(&id) {
                        entry.timers += 1;
                        self.timers.arm(id, delay);
                    }
                }
            }
        }
        Ok(())
    }

    fn send_response(&mut self, id: StreamId, status: u16, headers: &[(String, String)]) -> Result<()> {
        let writable = self.streams.get_stream(id).map_or(false, H2Stream::is_writable);
        let entry = match self.handlers.get_mut(&id) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        if entry.responded {
            warn!("stream {}: response headers already sent", id);
            return Ok(());
        }
        if !writable {
            debug!("stream {}: not writable, response dropped", id);
            return Ok(());
        }
        entry.responded = true;

        let status = status.to_string();
        let date = httpdate::fmt_http_date(SystemTime::now());
        let lowered: Vec<(String, &str)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .collect();

        let mut fields: Vec<(&[u8], &[u8])> = Vec::with_capacity(lowered.len() + 2);
        fields.push((&b":status"[..], status.as_bytes()));
        for (name, value) in &lowered {
            fields.push((name.as_bytes(), value.as_bytes()));
        }
        fields.push((&b"date"[..], date.as_bytes()));
        let block = Bytes::from(self.hpack_encoder.encode(fields));

        if let Some(stream) = self.streams.get_stream_mut(id) {
            stream.send_headers(false)?;
        }
        let max_frame_size = self.remote_settings.get_max_frame_size() as usize;
        let frames = FrameCodec::encode_header_block(id, block, false, max_frame_size);
        self.out.extend_from_slice(&frames);
        Ok(())
    }

    fn send_body(&mut self, id: StreamId, payload: Bytes, end_stream: bool) -> Result<()> {
        if !self.handlers.get(&id).map_or(false, |entry| entry.responded) {
            warn!("stream {}: body written before response headers, dropped", id);
            return Ok(());
        }

        match self.streams.get_stream_mut(id) {
            Some(stream) if stream.is_writable() => stream.queue_data(&payload, end_stream)?,
            _ => {
                debug!(
                    "stream {}: no longer writable, dropping {} bytes",
                    id,
                    payload.len()
                );
                return Ok(());
            }
        }

        self.flush_stream(id)
    }

    /// Frame as much queued data for `id` as the windows allow
    fn flush_stream(&mut self, id: StreamId) -> Result<()> {
        let max_frame_size = self.remote_settings.get_max_frame_size() as usize;

        let closed = match self.streams.get_stream_mut(id) {
            Some(stream) => {
                while let Some((chunk, end_stream)) =
                    stream.next_chunk(max_frame_size, self.flow_control.send_capacity())
                {
                    self.flow_control.consume_send_window(chunk.len());
                    self.out.extend_from_slice(&FrameCodec::encode_data_frame(&DataFrame::new(
                        id, chunk, end_stream,
                    )));
                }
                stream.state().is_closed()
            }
            None => false,
        };

        if closed {
            self.finish_stream(id)?;
        }
        Ok(())
    }

    fn flush_all_streams(&mut self) -> Result<()> {
        for id in self.streams.stream_ids() {
            self.flush_stream(id)?;
        }
        Ok(())
    }

    /// Send RST_STREAM and close the stream locally
    fn reset_stream(&mut self, id: StreamId, code: ErrorCode) -> Result<()> {
        debug!("stream {}: resetting with {}", id, code);
        self.queue(FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
            stream_id: id,
            error_code: code,
        }));
        if let Some(stream) = self.streams.get_stream_mut(id) {
            stream.reset();
        }
        self.finish_stream(id)
    }

    /// Drop a closed stream and notify its handler once
    fn finish_stream(&mut self, id: StreamId) -> Result<()> {
        self.streams.remove_stream(id);

        let notify = match self.handlers.get_mut(&id) {
            Some(entry) if !entry.closed => {
                entry.closed = true;
                entry.subscriptions.close
            }
            _ => false,
        };
        if notify {
            self.with_handler(id, |handler, ctx| handler.on_close(ctx))?;
        }

        self.reap(id);
        Ok(())
    }

    /// Forget a handler once its stream is closed and no timer is pending
    fn reap(&mut self, id: StreamId) {
        if self
            .handlers
            .get(&id)
            .map_or(false, |entry| entry.closed && entry.timers == 0)
        {
            self.handlers.remove(&id);
        }
    }

    fn fire_timers(&mut self) -> Result<()> {
        for id in self.timers.expired(Instant::now()) {
            match self.handlers.get_mut(&id) {
                Some(entry) => entry.timers = entry.timers.saturating_sub(1),
                None => continue,
            }
            self.with_handler(id, |handler, ctx| handler.on_timer(ctx))?;
            self.reap(id);
        }
        Ok(())
    }

    /// Run one handler callback and apply the commands it issued
    fn with_handler<F>(&mut self, id: StreamId, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn StreamHandler, &mut StreamContext),
    {
        let writable = self.streams.get_stream(id).map_or(false, H2Stream::is_writable);
        let commands = match self.handlers.get_mut(&id) {
            Some(entry) => {
                let mut ctx = StreamContext::new(id, writable);
                f(entry.handler.as_mut(), &mut ctx);
                ctx.into_commands()
            }
            None => return Ok(()),
        };
        self.apply_commands(id, commands)
    }

    fn subscribed(&self, id: StreamId, event: impl Fn(&Subscriptions) -> bool) -> bool {
        self.handlers
            .get(&id)
            .map_or(false, |entry| !entry.closed && event(&entry.subscriptions))
    }

    fn is_closed(&self, id: StreamId) -> bool {
        self.streams
            .get_stream(id)
            .map_or(false, |stream| stream.state().is_closed())
    }

    fn replenish_connection_window(&mut self) -> Result<()> {
        if let Some(increment) = self.flow_control.should_send_window_update() {
            self.flow_control.send_window_update(increment)?;
            self.queue(FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(
                CONNECTION_STREAM_ID,
                increment,
            )));
        }
        Ok(())
    }

    /// Close every stream still open because the session is ending
    fn close_all_streams(&mut self) {
        for id in self.streams.stream_ids() {
            if let Some(stream) = self.streams.get_stream_mut(id) {
                stream.reset();
            }
            if let Err(e) = self.finish_stream(id) {
                debug!("stream {}: close on session end: {}", id, e);
            }
        }
        self.handlers.clear();
    }

    fn send_goaway(&mut self, code: ErrorCode, reason: &str) {
        warn!("connection error, sending GOAWAY {}: {}", code, reason);
        self.out.clear();
        self.queue(FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            self.streams.last_peer_stream_id(),
            code,
            Bytes::copy_from_slice(reason.as_bytes()),
        )));
        if let Err(e) = self.flush() {
            debug!("GOAWAY not delivered: {}", e);
        }
    }

    fn queue(&mut self, frame: Bytes) {
        self.out.extend_from_slice(&frame);
    }

    fn flush(&mut self) -> Result<()> {
        if !self.out.is_empty() {
            self.session.write_all(&self.out)?;
            self.out.clear();
        }
        Ok(())
    }
}

/// Stream ID of a frame that must belong to a stream
fn require_stream(frame: &Frame) -> Result<StreamId> {
    if frame.stream_id == CONNECTION_STREAM_ID {
        let name = frame.frame_type.map_or("frame", |t| t.name());
        return Err(Error::Protocol(format!("{} on stream 0", name)));
    }
    Ok(frame.stream_id)
}
