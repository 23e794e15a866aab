//! Connection errors and wire error codes (RFC 9113 §7)

use std::fmt;
use std::io;

/// Error that ends an HTTP/2 connection or a client call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::http::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Flow control error: {0}")]
    FlowControl(String),

    #[error("Stream {0} is closed")]
    StreamClosed(u32),

    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// HPACK state can no longer be trusted
    #[error("Compression error: {0}")]
    Compression(String),

    /// Header block reassembly passed the announced limit
    #[error("Header block of {0} bytes exceeds the limit")]
    HeaderBlockTooLarge(usize),

    #[error("Stream {0} refused")]
    RefusedStream(u32),

    /// Opening a stream would exceed the peer's SETTINGS_MAX_CONCURRENT_STREAMS
    #[error("Too many concurrent streams")]
    TooManyStreams,

    #[error("Unknown stream {0}")]
    StreamNotFound(u32),

    #[error("Invalid setting: {0}")]
    InvalidSettings(String),

    #[error("Timed out waiting for the peer")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Client did not send the connection preface")]
    MissingPreface,
}

impl Error {
    /// Code carried by the GOAWAY this error ends the connection with
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) | Error::MissingPreface | Error::InvalidSettings(_) => {
                ErrorCode::ProtocolError
            }
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::RefusedStream(_) => ErrorCode::RefusedStream,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::HeaderBlockTooLarge(_) => ErrorCode::EnhanceYourCalm,
            Error::ConnectionClosed => ErrorCode::NoError,
            _ => ErrorCode::InternalError,
        }
    }

    /// The peer went away, cleanly or not
    pub fn is_disconnect(&self) -> bool {
        let kind = match self {
            Error::ConnectionClosed | Error::Transport(crate::http::Error::ConnectionClosed) => {
                return true
            }
            Error::Io(e) | Error::Transport(crate::http::Error::Io(e)) => e.kind(),
            _ => return false,
        };
        matches!(
            kind,
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        )
    }
}

/// Error code carried by RST_STREAM and GOAWAY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

/// Registered codes, indexed by value
const ERROR_CODES: [(ErrorCode, &str); 14] = [
    (ErrorCode::NoError, "NO_ERROR"),
    (ErrorCode::ProtocolError, "PROTOCOL_ERROR"),
    (ErrorCode::InternalError, "INTERNAL_ERROR"),
    (ErrorCode::FlowControlError, "FLOW_CONTROL_ERROR"),
    (ErrorCode::SettingsTimeout, "SETTINGS_TIMEOUT"),
    (ErrorCode::StreamClosed, "STREAM_CLOSED"),
    (ErrorCode::FrameSizeError, "FRAME_SIZE_ERROR"),
    (ErrorCode::RefusedStream, "REFUSED_STREAM"),
    (ErrorCode::Cancel, "CANCEL"),
    (ErrorCode::CompressionError, "COMPRESSION_ERROR"),
    (ErrorCode::ConnectError, "CONNECT_ERROR"),
    (ErrorCode::EnhanceYourCalm, "ENHANCE_YOUR_CALM"),
    (ErrorCode::InadequateSecurity, "INADEQUATE_SECURITY"),
    (ErrorCode::Http11Required, "HTTP_1_1_REQUIRED"),
];

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|index| ERROR_CODES.get(index))
            .map(|(error_code, _)| *error_code)
    }

    /// Unknown codes read as INTERNAL_ERROR (§7)
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    pub fn name(&self) -> &'static str {
        ERROR_CODES[*self as usize].1
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_table_matches_discriminants() {
        for (index, (code, _)) in ERROR_CODES.iter().enumerate() {
            assert_eq!(code.as_u32() as usize, index);
        }
        assert_eq!(ErrorCode::from_u32(0x8), Some(ErrorCode::Cancel));
        assert_eq!(ErrorCode::from_u32(0xff), None);
        assert_eq!(ErrorCode::from_wire(0xff), ErrorCode::InternalError);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Cancel.to_string(), "CANCEL (0x8)");
        assert_eq!(ErrorCode::Http11Required.name(), "HTTP_1_1_REQUIRED");
    }

    #[test]
    fn test_goaway_code_for_error() {
        assert_eq!(Error::MissingPreface.code(), ErrorCode::ProtocolError);
        assert_eq!(Error::FrameSize("x".into()).code(), ErrorCode::FrameSizeError);
        assert_eq!(Error::Compression("x".into()).code(), ErrorCode::CompressionError);
        assert_eq!(Error::HeaderBlockTooLarge(70_000).code(), ErrorCode::EnhanceYourCalm);
        assert_eq!(Error::TooManyStreams.code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_disconnect_detection() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(Error::Io(eof).is_disconnect());
        assert!(Error::Transport(crate::http::Error::ConnectionClosed).is_disconnect());
        assert!(!Error::Protocol("bad".into()).is_disconnect());
    }
}
