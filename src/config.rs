//! Server configuration

use crate::routes::Timings;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8081;

/// Everything `Server::bind` needs to start listening
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_addr: IpAddr,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// PEM private key
    pub key_path: PathBuf,
    /// PEM certificate, optionally followed by its chain
    pub cert_path: PathBuf,
    /// Delay before a long-polling stream is ended
    pub long_poll_delay: Duration,
    /// Delay before a post stream is ended
    pub post_delay: Duration,
    /// Upper bound on each TLS handshake
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let timings = Timings::default();
        ServerConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            key_path: PathBuf::from("./server.key"),
            cert_path: PathBuf::from("./server.crt"),
            long_poll_delay: timings.long_poll_delay,
            post_delay: timings.post_delay,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Socket address to bind
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Handler delays
    pub fn timings(&self) -> Timings {
        Timings {
            long_poll_delay: self.long_poll_delay,
            post_delay: self.post_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8081");
        assert_eq!(config.key_path, PathBuf::from("./server.key"));
        assert_eq!(config.cert_path, PathBuf::from("./server.crt"));
        assert_eq!(config.timings(), Timings::default());
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }
}
