//! Client and server TLS contexts

use super::handshake::DEFAULT_HANDSHAKE_TIMEOUT;
use super::TlsSessionOps;
use openssl::pkey::PKey;
use openssl::ssl::{select_next_proto, AlpnError, SslContext, SslContextBuilder, SslMethod};
use openssl::ssl::{SslVerifyMode, SslVersion};
use openssl::x509::X509;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

/// Protocol versions a context can be limited to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl From<TlsVersion> for SslVersion {
    fn from(version: TlsVersion) -> Self {
        match version {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("ALPN negotiation failed: expected {expected}, got {got:?}")]
    AlpnFailed { expected: String, got: Option<String> },
}

/// Built context plus the per-connection options
///
/// Cheap to clone; every accepted connection gets its own copy.
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
    pub(crate) handshake_timeout: Duration,
}

impl TlsConfig {
    pub fn client() -> Result<ClientConfigBuilder, TlsError> {
        Ok(ClientConfigBuilder {
            ctx_builder: SslContextBuilder::new(SslMethod::tls_client())?,
            servername: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
        .verify_peer(false))
    }

    pub fn server() -> Result<ServerConfigBuilder, TlsError> {
        Ok(ServerConfigBuilder {
            ctx_builder: SslContextBuilder::new(SslMethod::tls_server())?,
            has_cert: false,
            has_key: false,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Client handshake over `stream`
    pub fn connect(&self, stream: TcpStream) -> Result<TlsSessionOps, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig("server context used to connect".into()));
        }
        TlsSessionOps::connect(stream, self.clone())
    }

    /// Server handshake over `stream`
    pub fn accept(&self, stream: TcpStream) -> Result<TlsSessionOps, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig("client context used to accept".into()));
        }
        TlsSessionOps::accept(stream, self.clone())
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

/// Length-prefixed protocol list, as ALPN puts it on the wire
pub(crate) fn alpn_wire(protocols: &[&str]) -> Vec<u8> {
    protocols
        .iter()
        .flat_map(|proto| std::iter::once(proto.len() as u8).chain(proto.bytes()))
        .collect()
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))
}

fn limit_versions(
    ctx_builder: &mut SslContextBuilder,
    min: TlsVersion,
    max: TlsVersion,
) -> Result<(), TlsError> {
    ctx_builder.set_min_proto_version(Some(min.into()))?;
    ctx_builder.set_max_proto_version(Some(max.into()))?;
    Ok(())
}

pub struct ClientConfigBuilder {
    ctx_builder: SslContextBuilder,
    servername: Option<String>,
    handshake_timeout: Duration,
}

impl ClientConfigBuilder {
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        limit_versions(&mut self.ctx_builder, min, max)?;
        Ok(self)
    }

    /// Protocols offered in the ClientHello
    pub fn alpn(mut self, protocols: &[&str]) -> Result<Self, TlsError> {
        self.ctx_builder.set_alpn_protos(&alpn_wire(protocols))?;
        Ok(self)
    }

    /// SNI host name
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Off by default; the demo server runs on self-signed certificates
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.ctx_builder.set_verify(if verify {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<TlsConfig, TlsError> {
        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: false,
            servername: self.servername,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

pub struct ServerConfigBuilder {
    ctx_builder: SslContextBuilder,
    has_cert: bool,
    has_key: bool,
    handshake_timeout: Duration,
}

impl ServerConfigBuilder {
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        limit_versions(&mut self.ctx_builder, min, max)?;
        Ok(self)
    }

    /// Protocols the server is willing to select, most preferred first
    ///
    /// A client that offers none of them still completes the handshake,
    /// with no protocol selected.
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        let ours: &'static [u8] = Box::leak(alpn_wire(protocols).into_boxed_slice());
        self.ctx_builder
            .set_alpn_select_callback(move |_ssl, offered| {
                select_next_proto(ours, offered).ok_or(AlpnError::NOACK)
            });
        self
    }

    /// Leaf certificate first, any chain certificates after it
    pub fn cert_file(mut self, path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let path = path.as_ref();
        let mut chain = X509::stack_from_pem(&read_pem(path)?)
            .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?;
        if chain.is_empty() {
            return Err(TlsError::Certificate(format!(
                "{}: no certificate found",
                path.display()
            )));
        }

        self.ctx_builder.set_certificate(&chain.remove(0))?;
        for cert in chain {
            self.ctx_builder.add_extra_chain_cert(cert)?;
        }
        self.has_cert = true;
        Ok(self)
    }

    pub fn key_file(mut self, path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let path = path.as_ref();
        let key = PKey::private_key_from_pem(&read_pem(path)?)
            .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?;
        self.ctx_builder.set_private_key(&key)?;
        self.has_key = true;
        Ok(self)
    }

    /// Self-signed pair compiled into the binary, for tests
    pub fn builtin_cert(mut self) -> Result<Self, TlsError> {
        let pem = super::builtin_cert::BUILTIN_CERT.as_bytes();
        let cert = X509::from_pem(pem)
            .map_err(|e| TlsError::Certificate(format!("built-in certificate: {}", e)))?;
        let key = PKey::private_key_from_pem(pem)
            .map_err(|e| TlsError::Certificate(format!("built-in key: {}", e)))?;

        self.ctx_builder.set_certificate(&cert)?;
        self.ctx_builder.set_private_key(&key)?;
        self.has_cert = true;
        self.has_key = true;
        Ok(self)
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Fails unless a matching certificate and key were loaded
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        match (self.has_cert, self.has_key) {
            (false, _) => return Err(TlsError::InvalidConfig("no server certificate".into())),
            (_, false) => return Err(TlsError::InvalidConfig("no server private key".into())),
            _ => {}
        }
        self.ctx_builder
            .check_private_key()
            .map_err(|e| TlsError::Certificate(format!("key does not match certificate: {}", e)))?;

        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: true,
            servername: None,
            handshake_timeout: self.handshake_timeout,
        })
    }
}
