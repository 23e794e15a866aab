//! Stream lifecycle (RFC 9113 §5.1)
//!
//! Each `H2Stream` tracks its state, its flow-control windows and the
//! response bytes still waiting for window. `StreamManager` owns the streams
//! of one connection and enforces identifier ordering and concurrency.

use super::error::{Error, Result};
use super::flow_control::FlowControl;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;

pub type StreamId = u32;

/// Push is never used, so the reserved states are absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// END_STREAM sent
    HalfClosedLocal,
    /// END_STREAM received
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(&self) -> bool {
        *self == StreamState::Closed
    }
}

#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    flow_control: FlowControl,
    /// Response body accepted from the application but not yet framed
    pending: BytesMut,
    /// END_STREAM goes out once `pending` drains
    pending_end: bool,
    headers_received: bool,
}

impl H2Stream {
    pub fn with_window_sizes(id: StreamId, send_size: u32, recv_size: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow_control: FlowControl::with_initial_sizes(send_size, recv_size),
            pending: BytesMut::new(),
            pending_end: false,
            headers_received: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn flow_control(&self) -> &FlowControl {
        &self.flow_control
    }

    pub fn flow_control_mut(&mut self) -> &mut FlowControl {
        &mut self.flow_control
    }

    /// True while more data may still be queued for the peer
    pub fn is_writable(&self) -> bool {
        self.state.can_send() && !self.pending_end
    }

    /// Queued data or a queued END_STREAM is waiting to go out
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.pending_end
    }

    /// Process an incoming HEADERS block
    ///
    /// Any block after the first carries trailers and must end the stream.
    pub fn receive_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => self.state = StreamState::Open,
            StreamState::Open | StreamState::HalfClosedLocal => {
                if self.headers_received && !end_stream {
                    return Err(Error::Protocol(format!(
                        "stream {}: trailers without END_STREAM",
                        self.id
                    )));
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::StreamClosed(self.id));
            }
        }

        self.headers_received = true;
        if end_stream {
            self.remote_end();
        }

        Ok(())
    }

    /// Process an incoming DATA frame of `flow_len` flow-controlled octets
    pub fn receive_data(&mut self, flow_len: usize, end_stream: bool) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        self.flow_control.consume_recv_window(flow_len)?;

        if end_stream {
            self.remote_end();
        }

        Ok(())
    }

    fn remote_end(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
    }

    /// Prepare to send HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
            }
            StreamState::Open | StreamState::HalfClosedRemote => {
                if end_stream {
                    self.local_end();
                }
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "Cannot send HEADERS in state {:?}",
                    self.state
                )));
            }
        }

        Ok(())
    }

    fn local_end(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Queue response data; `end_stream` closes our side once it drains
    pub fn queue_data(&mut self, data: &[u8], end_stream: bool) -> Result<()> {
        if !self.is_writable() {
            return Err(Error::StreamClosed(self.id));
        }

        self.pending.extend_from_slice(data);
        self.pending_end = end_stream;
        Ok(())
    }

    /// Take the next DATA frame payload that fits `max_frame_size`, this
    /// stream's window and `conn_capacity`
    ///
    /// Returns the payload and whether it carries END_STREAM. `None` when
    /// nothing can be sent right now.
    pub fn next_chunk(&mut self, max_frame_size: usize, conn_capacity: usize) -> Option<(Bytes, bool)> {
        if !self.state.can_send() || !self.has_pending() {
            return None;
        }

        let limit = self
            .pending
            .len()
            .min(max_frame_size)
            .min(self.flow_control.send_capacity())
            .min(conn_capacity);

        let drains = limit == self.pending.len();
        if limit == 0 && !(drains && self.pending_end) {
            return None;
        }

        self.flow_control.consume_send_window(limit);
        let chunk = self.pending.split_to(limit).freeze();

        let end = drains && self.pending_end;
        if end {
            self.pending_end = false;
            self.local_end();
        }

        Some((chunk, end))
    }

    /// Close the stream, dropping anything still queued
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.pending.clear();
        self.pending_end = false;
    }
}

/// Streams of one connection
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Next locally initiated stream ID (client: odd)
    next_stream_id: StreamId,
    /// Highest stream ID the peer has opened
    last_peer_stream_id: StreamId,
    /// Limit on streams the peer may open (our SETTINGS)
    local_max_concurrent: Option<u32>,
    /// Limit on streams we may open (peer SETTINGS)
    remote_max_concurrent: Option<u32>,
    initial_send_window: u32,
    initial_recv_window: u32,
}

impl StreamManager {
    /// `is_client` selects odd identifiers for locally opened streams
    pub fn new(is_client: bool, initial_send_window: u32, initial_recv_window: u32) -> Self {
        StreamManager {
            streams: HashMap::new(),
            next_stream_id: if is_client { 1 } else { 2 },
            last_peer_stream_id: 0,
            local_max_concurrent: None,
            remote_max_concurrent: None,
            initial_send_window,
            initial_recv_window,
        }
    }

    /// Limit the number of concurrent streams the peer may open
    pub fn set_local_max_concurrent(&mut self, max: Option<u32>) {
        self.local_max_concurrent = max;
    }

    /// Limit announced by the peer for streams we open
    pub fn set_remote_max_concurrent(&mut self, max: Option<u32>) {
        self.remote_max_concurrent = max;
    }

    /// Highest stream ID opened by the peer
    pub fn last_peer_stream_id(&self) -> StreamId {
        self.last_peer_stream_id
    }

    /// Allocate next local stream ID and create stream
    pub fn create_stream(&mut self) -> Result<StreamId> {
        if let Some(max) = self.remote_max_concurrent {
            if self.active_stream_count() >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id += 2;

        self.streams.insert(
            stream_id,
            H2Stream::with_window_sizes(stream_id, self.initial_send_window, self.initial_recv_window),
        );

        Ok(stream_id)
    }

    /// Register a stream opened by a HEADERS frame from the peer
    ///
    /// IDs must be odd and strictly increasing (RFC 9113 Section 5.1.1).
    /// Past the concurrency limit the ID is consumed but the stream is
    /// refused.
    pub fn accept_stream(&mut self, stream_id: StreamId) -> Result<&mut H2Stream> {
        if stream_id % 2 == 0 {
            return Err(Error::Protocol(format!(
                "client opened even stream {}",
                stream_id
            )));
        }
        if stream_id <= self.last_peer_stream_id {
            return Err(Error::Protocol(format!(
                "stream {} is not greater than {}",
                stream_id, self.last_peer_stream_id
            )));
        }
        self.last_peer_stream_id = stream_id;

        if let Some(max) = self.local_max_concurrent {
            if self.active_stream_count() >= max as usize {
                return Err(Error::RefusedStream(stream_id));
            }
        }

        let (send, recv) = (self.initial_send_window, self.initial_recv_window);
        let stream = self
            .streams
            .entry(stream_id)
            .or_insert_with(|| H2Stream::with_window_sizes(stream_id, send, recv));
        Ok(stream)
    }

    /// True for a peer stream ID that was never opened
    pub fn is_idle_peer_stream(&self, stream_id: StreamId) -> bool {
        stream_id % 2 == 1 && stream_id > self.last_peer_stream_id
    }

    /// Get a stream by ID
    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    /// Remove a stream
    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&stream_id)
    }

    /// Apply a new SETTINGS_INITIAL_WINDOW_SIZE from the peer to every stream
    pub fn update_initial_send_window(&mut self, size: u32) -> Result<()> {
        self.initial_send_window = size;
        for stream in self.streams.values_mut() {
            stream.flow_control_mut().send_window_mut().update_initial_size(size)?;
        }
        Ok(())
    }

    /// Get number of active streams
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    /// Get all stream IDs, in ascending order
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Clean up closed streams
    pub fn cleanup_closed_streams(&mut self) {
        self.streams.retain(|_, stream| !stream.state().is_closed());
    }
}
