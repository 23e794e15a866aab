//! What a completed handshake negotiated

use openssl::ssl::{NameType, SslRef};

/// Logged per session; `alpn` decides whether HTTP/2 may be spoken
#[derive(Debug, Clone, Default)]
pub struct TlsVars {
    /// e.g. "TLSv1.3"
    pub version: String,
    pub cipher: String,
    /// SNI sent by the client
    pub servername: Option<String>,
    pub alpn: Option<String>,
}

impl TlsVars {
    pub fn from_ssl(ssl: &SslRef) -> Self {
        TlsVars {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map_or_else(|| "<undef>".to_string(), |c| c.name().to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(str::to_string),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|proto| String::from_utf8_lossy(proto).into_owned()),
        }
    }
}
