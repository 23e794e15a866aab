//! HTTP/2 frame encoding and decoding
//!
//! Encoding is a set of pure functions producing complete frames. Decoding is
//! buffered: bytes are pushed in as they arrive from the transport and whole
//! frames are taken out once their payload is complete.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::settings::{DEFAULT_MAX_FRAME_SIZE, SETTING_ENTRY_SIZE};
use crate::http::{HttpSession, SessionOps};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length
    pub length: usize,
    /// Raw frame type byte
    pub raw_type: u8,
    /// Frame flags
    pub flags: FrameFlags,
    /// Stream ID with the reserved bit cleared
    pub stream_id: u32,
}

impl FrameHeader {
    /// Known frame type, `None` for extension types
    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.raw_type)
    }
}

/// Frame codec for encoding/decoding HTTP/2 frames
pub struct FrameCodec {
    read_buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec accepting the default maximum frame size
    pub fn new() -> Self {
        FrameCodec {
            read_buffer: BytesMut::with_capacity(16 * 1024),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
        }
    }

    /// Largest payload accepted from the peer (our SETTINGS_MAX_FRAME_SIZE)
    pub fn set_max_frame_size(&mut self, size: usize) {
        self.max_frame_size = size;
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.read_buffer.extend_from_slice(bytes);
    }

    /// Look at up to `n` buffered bytes without consuming them
    pub fn peek(&self, n: usize) -> &[u8] {
        &self.read_buffer[..n.min(self.read_buffer.len())]
    }

    /// Take exactly `n` raw bytes off the front of the buffer
    ///
    /// Used for the client connection preface, which is not framed.
    pub fn take_raw(&mut self, n: usize) -> Option<Bytes> {
        if self.read_buffer.len() < n {
            return None;
        }
        Some(self.read_buffer.split_to(n).freeze())
    }

    /// Decode the next complete frame, if one is buffered
    pub fn decode_frame(&mut self) -> Result<Option<Frame>> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
        let header = Self::decode_header(&raw);

        if header.length > self.max_frame_size {
            return Err(Error::FrameSize(format!(
                "{} byte frame exceeds maximum of {}",
                header.length, self.max_frame_size
            )));
        }

        if self.read_buffer.len() < FRAME_HEADER_SIZE + header.length {
            return Ok(None);
        }

        self.read_buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.read_buffer.split_to(header.length).freeze();

        Ok(Some(Frame {
            frame_type: header.frame_type(),
            raw_type: header.raw_type,
            flags: header.flags,
            stream_id: header.stream_id,
            payload,
        }))
    }

    /// Block on `session` until a whole frame is available
    pub fn read_frame<S: SessionOps>(&mut self, session: &mut HttpSession<S>) -> Result<Frame> {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            if let Some(frame) = self.decode_frame()? {
                return Ok(frame);
            }
            let n = session.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.push(&chunk[..n]);
        }
    }

    /// Encode a frame header
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit is 0)
        header[5..9].copy_from_slice(&(stream_id & 0x7FFFFFFF).to_be_bytes());

        header
    }

    /// Decode a frame header
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7FFFFFFF;

        FrameHeader {
            length,
            raw_type: bytes[3],
            flags: FrameFlags::from_u8(bytes[4]),
            stream_id,
        }
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload_len());
        buf.put_slice(&Self::encode_header(
            FrameType::Data,
            flags,
            frame.stream_id,
            frame.payload_len(),
        ));

        if let Some(pad_len) = frame.padding {
            buf.put_u8(pad_len);
            buf.put_slice(&frame.data);
            buf.put_bytes(0, pad_len as usize);
        } else {
            buf.put_slice(&frame.data);
        }

        buf.freeze()
    }

    /// Encode a HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut payload_len = frame.header_block.len();
        let mut flags = FrameFlags::empty();

        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        if frame.priority.is_some() {
            flags.set(FrameFlags::PRIORITY);
            payload_len += 5;
        }
        if let Some(pad_len) = frame.padding {
            flags.set(FrameFlags::PADDED);
            payload_len += 1 + pad_len as usize;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Headers,
            flags,
            frame.stream_id,
            payload_len,
        ));

        if let Some(pad_len) = frame.padding {
            buf.put_u8(pad_len);
        }

        if let Some(priority) = &frame.priority {
            let mut dep = priority.stream_dependency;
            if priority.exclusive {
                dep |= 0x80000000;
            }
            buf.put_u32(dep);
            buf.put_u8(priority.weight);
        }

        buf.put_slice(&frame.header_block);

        if let Some(pad_len) = frame.padding {
            buf.put_bytes(0, pad_len as usize);
        }

        buf.freeze()
    }

    /// Encode a CONTINUATION frame
    pub fn encode_continuation_frame(stream_id: u32, fragment: &[u8], end_headers: bool) -> Bytes {
        let mut flags = FrameFlags::empty();
        if end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + fragment.len());
        buf.put_slice(&Self::encode_header(
            FrameType::Continuation,
            flags,
            stream_id,
            fragment.len(),
        ));
        buf.put_slice(fragment);
        buf.freeze()
    }

    /// Encode a header block as HEADERS plus as many CONTINUATION frames as
    /// `max_frame_size` requires
    pub fn encode_header_block(
        stream_id: u32,
        block: Bytes,
        end_stream: bool,
        max_frame_size: usize,
    ) -> BytesMut {
        let mut out = BytesMut::new();
        let first_len = block.len().min(max_frame_size);
        let first = block.slice(..first_len);
        let fits = first_len == block.len();

        out.extend_from_slice(&Self::encode_headers_frame(&HeadersFrame::new(
            stream_id, first, end_stream, fits,
        )));

        let mut rest = block.slice(first_len..);
        while !rest.is_empty() {
            let n = rest.len().min(max_frame_size);
            let fragment = rest.split_to(n);
            out.extend_from_slice(&Self::encode_continuation_frame(
                stream_id,
                &fragment,
                rest.is_empty(),
            ));
        }

        out
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let mut payload = BytesMut::new();
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            frame.settings.encode(&mut payload);
            FrameFlags::empty()
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.put_slice(&Self::encode_header(FrameType::Settings, flags, 0, payload.len()));
        buf.put_slice(&payload);
        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, 0, 8));
        buf.put_slice(&frame.data);
        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Goaway,
            FrameFlags::empty(),
            0,
            payload_len,
        ));
        buf.put_u32(frame.last_stream_id & 0x7FFFFFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);
        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.size_increment & 0x7FFFFFFF);
        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::RstStream,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.error_code.as_u32());
        buf.freeze()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove padding from a DATA or HEADERS payload when PADDED is set
pub fn strip_padding(flags: FrameFlags, mut payload: Bytes) -> Result<Bytes> {
    if !flags.is_padded() {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::Protocol("PADDED frame without pad length".into()));
    }

    let pad_len = payload.get_u8() as usize;
    if pad_len > payload.len() {
        return Err(Error::Protocol(format!(
            "padding of {} exceeds remaining payload of {}",
            pad_len,
            payload.len()
        )));
    }

    payload.truncate(payload.len() - pad_len);
    Ok(payload)
}

/// Parse a HEADERS payload into its priority block and header block fragment
pub fn decode_headers_payload(flags: FrameFlags, payload: Bytes) -> Result<HeadersFrame> {
    let mut body = strip_padding(flags, payload)?;

    let priority = if flags.is_priority() {
        if body.len() < 5 {
            return Err(Error::FrameSize("HEADERS priority block truncated".into()));
        }
        let dep = body.get_u32();
        let weight = body.get_u8();
        Some(PrioritySpec::new(dep & 0x7FFFFFFF, dep & 0x80000000 != 0, weight))
    } else {
        None
    };

    Ok(HeadersFrame {
        stream_id: 0,
        header_block: body,
        end_stream: flags.is_end_stream(),
        end_headers: flags.is_end_headers(),
        priority,
        padding: None,
    })
}

/// Parse a RST_STREAM payload
pub fn decode_rst_stream(payload: &[u8]) -> Result<ErrorCode> {
    let raw: [u8; 4] = payload
        .try_into()
        .map_err(|_| Error::FrameSize(format!("RST_STREAM length {}", payload.len())))?;
    Ok(ErrorCode::from_wire(u32::from_be_bytes(raw)))
}

/// Parse a WINDOW_UPDATE payload into its increment
pub fn decode_window_update(payload: &[u8]) -> Result<u32> {
    let raw: [u8; 4] = payload
        .try_into()
        .map_err(|_| Error::FrameSize(format!("WINDOW_UPDATE length {}", payload.len())))?;
    Ok(u32::from_be_bytes(raw) & 0x7FFFFFFF)
}

/// Parse a PING payload
pub fn decode_ping(payload: &[u8]) -> Result<[u8; 8]> {
    payload
        .try_into()
        .map_err(|_| Error::FrameSize(format!("PING length {}", payload.len())))
}

/// Parse a GOAWAY payload
pub fn decode_goaway(payload: &Bytes) -> Result<GoawayFrame> {
    if payload.len() < 8 {
        return Err(Error::FrameSize(format!("GOAWAY length {}", payload.len())));
    }
    let mut body = payload.clone();
    let last_stream_id = body.get_u32() & 0x7FFFFFFF;
    let error_code = ErrorCode::from_wire(body.get_u32());
    Ok(GoawayFrame::new(last_stream_id, error_code, body))
}

/// True when a SETTINGS payload length is well-formed for its ACK flag
pub fn settings_length_ok(flags: FrameFlags, length: usize) -> bool {
    if flags.is_ack() {
        length == 0
    } else {
        length % SETTING_ENTRY_SIZE == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::settings::SettingsBuilder;

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = FrameCodec::encode_header(FrameType::Headers, flags, 42, 1234);
        let decoded = FrameCodec::decode_header(&header);

        assert_eq!(decoded.frame_type(), Some(FrameType::Headers));
        assert_eq!(decoded.flags, flags);
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.length, 1234);
    }

    #[test]
    fn test_decode_header_keeps_unknown_type() {
        let mut header = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 1, 0);
        header[3] = 0xfa;
        let decoded = FrameCodec::decode_header(&header);
        assert_eq!(decoded.raw_type, 0xfa);
        assert_eq!(decoded.frame_type(), None);
    }

    #[test]
    fn test_decode_header_clears_reserved_bit() {
        let mut header = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 3, 0);
        header[5] |= 0x80;
        assert_eq!(FrameCodec::decode_header(&header).stream_id, 3);
    }

    #[test]
    fn test_encode_data_frame() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true);
        let encoded = FrameCodec::encode_data_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 5]);
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]);
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_encode_data_frame_with_padding() {
        let frame = DataFrame::new(1, Bytes::from("Hi"), false).with_padding(10);
        let encoded = FrameCodec::encode_data_frame(&frame);

        // 1 (pad length) + 2 (data) + 10 (padding)
        assert_eq!(encoded[0..3], [0, 0, 13]);
        assert_eq!(encoded[4] & FrameFlags::PADDED, FrameFlags::PADDED);
        assert_eq!(encoded[9], 10);
        assert_eq!(&encoded[10..12], b"Hi");
        assert_eq!(&encoded[12..22], &[0u8; 10]);
    }

    #[test]
    fn test_encode_settings_frame() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let encoded = FrameCodec::encode_settings_frame(&SettingsFrame::new(settings));

        assert_eq!(encoded[3], FrameType::Settings.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);
        assert_eq!(encoded[0..3], [0, 0, 18]);

        let ack = FrameCodec::encode_settings_frame(&SettingsFrame::ack());
        assert_eq!(ack[0..3], [0, 0, 0]);
        assert_eq!(ack[4], FrameFlags::ACK);
    }

    #[test]
    fn test_encode_window_update() {
        let encoded = FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(42, 1000));

        assert_eq!(encoded[0..3], [0, 0, 4]);
        assert_eq!(encoded[3], FrameType::WindowUpdate.as_u8());
        assert_eq!(&encoded[5..9], &[0, 0, 0, 42]);
        assert_eq!(decode_window_update(&encoded[9..]).unwrap(), 1000);
    }

    #[test]
    fn test_decoder_waits_for_whole_frame() {
        let encoded = FrameCodec::encode_ping_frame(&PingFrame::new([7; 8]));
        let mut codec = FrameCodec::new();

        codec.push(&encoded[..4]);
        assert!(codec.decode_frame().unwrap().is_none());
        codec.push(&encoded[4..12]);
        assert!(codec.decode_frame().unwrap().is_none());
        codec.push(&encoded[12..]);

        let frame = codec.decode_frame().unwrap().unwrap();
        assert_eq!(frame.frame_type, Some(FrameType::Ping));
        assert_eq!(decode_ping(&frame.payload).unwrap(), [7; 8]);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_decoder_yields_back_to_back_frames() {
        let mut codec = FrameCodec::new();
        codec.push(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        codec.push(&FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
            stream_id: 5,
            error_code: ErrorCode::Cancel,
        }));

        let first = codec.decode_frame().unwrap().unwrap();
        assert_eq!(first.frame_type, Some(FrameType::Settings));
        assert!(first.flags.is_ack());

        let second = codec.decode_frame().unwrap().unwrap();
        assert_eq!(second.stream_id, 5);
        assert_eq!(decode_rst_stream(&second.payload).unwrap(), ErrorCode::Cancel);
        assert!(codec.decode_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_rejects_oversized_frame() {
        let mut codec = FrameCodec::new();
        codec.push(&FrameCodec::encode_header(
            FrameType::Data,
            FrameFlags::empty(),
            1,
            16_385,
        ));
        assert!(matches!(codec.decode_frame(), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_strip_padding() {
        let flags = FrameFlags::from_u8(FrameFlags::PADDED);
        let payload = Bytes::from_static(&[2, b'o', b'k', 0, 0]);
        assert_eq!(strip_padding(flags, payload).unwrap(), Bytes::from_static(b"ok"));

        let bad = Bytes::from_static(&[9, b'x']);
        assert!(matches!(strip_padding(flags, bad), Err(Error::Protocol(_))));

        let plain = Bytes::from_static(b"raw");
        assert_eq!(strip_padding(FrameFlags::empty(), plain.clone()).unwrap(), plain);
    }

    #[test]
    fn test_headers_payload_with_priority_and_padding() {
        let frame = HeadersFrame::new(1, Bytes::from_static(b"\x82"), true, true)
            .with_priority(PrioritySpec::new(0, true, 15))
            .with_padding(3);
        let encoded = FrameCodec::encode_headers_frame(&frame);
        let header = FrameCodec::decode_header(encoded[..9].try_into().unwrap());

        let decoded =
            decode_headers_payload(header.flags, Bytes::copy_from_slice(&encoded[9..])).unwrap();
        assert_eq!(decoded.header_block, Bytes::from_static(b"\x82"));
        assert_eq!(decoded.priority, Some(PrioritySpec::new(0, true, 15)));
        assert!(decoded.end_stream);
        assert!(decoded.end_headers);
    }

    #[test]
    fn test_large_header_block_is_split_into_continuations() {
        let block = Bytes::from(vec![0u8; 40_000]);
        let encoded = FrameCodec::encode_header_block(3, block, false, 16_384);

        let mut codec = FrameCodec::new();
        codec.push(&encoded);

        let headers = codec.decode_frame().unwrap().unwrap();
        assert_eq!(headers.frame_type, Some(FrameType::Headers));
        assert!(!headers.flags.is_end_headers());

        let first = codec.decode_frame().unwrap().unwrap();
        assert_eq!(first.frame_type, Some(FrameType::Continuation));
        assert!(!first.flags.is_end_headers());

        let last = codec.decode_frame().unwrap().unwrap();
        assert!(last.flags.is_end_headers());
        assert_eq!(headers.payload_len() + first.payload_len() + last.payload_len(), 40_000);
    }

    #[test]
    fn test_goaway_round_trip_fields() {
        let encoded = FrameCodec::encode_goaway_frame(&GoawayFrame::new(
            7,
            ErrorCode::ProtocolError,
            Bytes::from_static(b"bad"),
        ));
        let goaway = decode_goaway(&Bytes::copy_from_slice(&encoded[9..])).unwrap();
        assert_eq!(goaway.last_stream_id, 7);
        assert_eq!(goaway.error_code, ErrorCode::ProtocolError);
        assert_eq!(goaway.debug_data, Bytes::from_static(b"bad"));
    }

    #[test]
    fn test_settings_length_checks() {
        assert!(settings_length_ok(FrameFlags::from_u8(FrameFlags::ACK), 0));
        assert!(!settings_length_ok(FrameFlags::from_u8(FrameFlags::ACK), 6));
        assert!(settings_length_ok(FrameFlags::empty(), 12));
        assert!(!settings_length_ok(FrameFlags::empty(), 7));
    }
}
