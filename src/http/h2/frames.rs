//! Frame definitions (RFC 9113 §6)
//!
//! Plain data carriers; the wire format lives in `codec`.

use super::error::ErrorCode;
use super::settings::Settings;
use super::stream::StreamId;
use bytes::Bytes;
use std::fmt;

/// Frame type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    Goaway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// Known types, indexed by their type byte
const FRAME_TYPES: [(FrameType, &str); 10] = [
    (FrameType::Data, "DATA"),
    (FrameType::Headers, "HEADERS"),
    (FrameType::Priority, "PRIORITY"),
    (FrameType::RstStream, "RST_STREAM"),
    (FrameType::Settings, "SETTINGS"),
    (FrameType::PushPromise, "PUSH_PROMISE"),
    (FrameType::Ping, "PING"),
    (FrameType::Goaway, "GOAWAY"),
    (FrameType::WindowUpdate, "WINDOW_UPDATE"),
    (FrameType::Continuation, "CONTINUATION"),
];

impl FrameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// `None` for extension types, which receivers must ignore
    pub fn from_u8(byte: u8) -> Option<Self> {
        FRAME_TYPES.get(byte as usize).map(|(frame_type, _)| *frame_type)
    }

    /// Name as written in the RFC
    pub fn name(&self) -> &'static str {
        FRAME_TYPES[*self as usize].1
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// Flags byte of a frame header
///
/// Bit meanings depend on the frame type, so the constants overlap
/// (`END_STREAM` and `ACK` are both 0x1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;

    pub fn empty() -> Self {
        FrameFlags(0)
    }

    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    fn has(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn is_end_stream(&self) -> bool {
        self.has(Self::END_STREAM)
    }

    pub fn is_ack(&self) -> bool {
        self.has(Self::ACK)
    }

    pub fn is_end_headers(&self) -> bool {
        self.has(Self::END_HEADERS)
    }

    pub fn is_padded(&self) -> bool {
        self.has(Self::PADDED)
    }

    pub fn is_priority(&self) -> bool {
        self.has(Self::PRIORITY)
    }
}

/// A frame as read off the wire, payload still encoded
#[derive(Debug, Clone)]
pub struct Frame {
    /// `None` when `raw_type` is not a type this crate knows
    pub frame_type: Option<FrameType>,
    pub raw_type: u8,
    pub flags: FrameFlags,
    pub stream_id: StreamId,
    pub payload: Bytes,
}

impl Frame {
    /// Payload length, padding included (what flow control counts)
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// DATA (§6.1)
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub data: Bytes,
    pub end_stream: bool,
    pub padding: Option<u8>,
}

impl DataFrame {
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Payload length on the wire, pad length byte and padding included
    pub fn payload_len(&self) -> usize {
        self.data.len() + self.padding.map_or(0, |pad| 1 + pad as usize)
    }
}

/// HEADERS (§6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    /// HPACK-encoded fragment
    pub header_block: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<PrioritySpec>,
    pub padding: Option<u8>,
}

impl HeadersFrame {
    pub fn new(stream_id: StreamId, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }
}

/// Priority fields of a HEADERS frame
///
/// RFC 9113 deprecates the scheme; the fields are parsed only so a stream
/// that depends on itself can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    pub stream_dependency: StreamId,
    pub exclusive: bool,
    /// Wire value, one less than the effective weight
    pub weight: u8,
}

impl PrioritySpec {
    pub fn new(stream_dependency: StreamId, exclusive: bool, weight: u8) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }
}

/// RST_STREAM (§6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub error_code: ErrorCode,
}

/// SETTINGS (§6.5); an ACK carries no parameters
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Settings,
}

impl SettingsFrame {
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

/// PING (§6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    pub ack: bool,
    pub data: [u8; 8],
}

impl PingFrame {
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Reply echoing `data`
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }
}

/// GOAWAY (§6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    /// Highest peer stream the sender processed
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

impl GoawayFrame {
    pub fn new(last_stream_id: StreamId, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }
}

/// WINDOW_UPDATE (§6.9); stream 0 targets the connection window
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    pub fn new(stream_id: StreamId, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_table_matches_discriminants() {
        for (index, (frame_type, _)) in FRAME_TYPES.iter().enumerate() {
            assert_eq!(frame_type.as_u8() as usize, index);
        }
        assert_eq!(FrameType::from_u8(0x1), Some(FrameType::Headers));
        assert_eq!(FrameType::from_u8(0xa), None);
        assert_eq!(FrameType::from_u8(0xff), None);
    }

    #[test]
    fn test_frame_type_display() {
        assert_eq!(FrameType::Goaway.to_string(), "GOAWAY (0x7)");
        assert_eq!(FrameType::RstStream.name(), "RST_STREAM");
    }

    #[test]
    fn test_frame_flags() {
        let mut flags = FrameFlags::empty();
        assert!(!flags.is_end_stream());

        flags.set(FrameFlags::END_STREAM);
        flags.set(FrameFlags::END_HEADERS);
        assert!(flags.is_end_stream());
        assert!(flags.is_end_headers());
        assert!(!flags.is_padded());
        assert!(!flags.is_priority());
        assert_eq!(flags.as_u8(), 0x5);
    }

    #[test]
    fn test_data_payload_len_counts_padding() {
        let plain = DataFrame::new(1, Bytes::from_static(b"abc"), false);
        assert_eq!(plain.payload_len(), 3);
        assert_eq!(plain.with_padding(4).payload_len(), 8);
    }

    #[test]
    fn test_ack_shares_end_stream_bit() {
        let flags = FrameFlags::from_u8(FrameFlags::ACK);
        assert!(flags.is_ack());
        assert!(flags.is_end_stream());
    }
}
