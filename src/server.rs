//! Listener and per-session driver
//!
//! The accept loop runs on the caller's thread. Every accepted connection gets
//! its own thread that completes the TLS handshake, checks that `h2` was
//! negotiated and then runs an `H2Server` over the session until it ends.

use crate::config::ServerConfig;
use crate::http::h2::H2Server;
use crate::http::tls::{TlsConfig, TlsError, TlsVersion, ALPN_H2};
use crate::http::SessionOps;
use crate::routes::Router;
use crate::{Error, Result};
use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

const LISTEN_BACKLOG: i32 = 128;

/// HTTP/2-over-TLS server
pub struct Server {
    listener: TcpListener,
    tls: TlsConfig,
    router: Arc<Router>,
}

impl Server {
    /// Load the key and certificate named in `config` and start listening
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let tls = TlsConfig::server()?
            .key_file(&config.key_path)?
            .cert_file(&config.cert_path)?
            .version_range(TlsVersion::Tls12, TlsVersion::Tls13)?
            .alpn(&[ALPN_H2])
            .handshake_timeout(config.handshake_timeout)
            .build()?;

        Self::with_tls(&config, tls)
    }

    /// Start listening with an already built TLS configuration
    ///
    /// `tls` must be a server configuration; the key and certificate paths in
    /// `config` are ignored.
    pub fn with_tls(config: &ServerConfig, tls: TlsConfig) -> Result<Self> {
        if !tls.is_server() {
            return Err(Error::Config("client TLS configuration given to server".into()));
        }

        let addr = config.socket_addr();
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        let listener: TcpListener = socket.into();
        info!("listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            tls,
            router: Arc::new(Router::new(config.timings())),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    ///
    /// Failures on a single connection are logged and never end the loop.
    pub fn serve(&self) -> Result<()> {
        loop {
            let (tcp_stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };

            let tls = self.tls.clone();
            let router = Arc::clone(&self.router);
            let spawned = thread::Builder::new()
                .name(format!("session-{}", peer))
                .spawn(move || {
                    if let Err(e) = run_session(tcp_stream, peer, &tls, router) {
                        warn!("session {}: {}", peer, e);
                    }
                });
            if let Err(e) = spawned {
                warn!("failed to start session thread for {}: {}", peer, e);
            }
        }
    }
}

fn run_session(tcp_stream: TcpStream, peer: SocketAddr, tls: &TlsConfig, router: Arc<Router>) -> Result<()> {
    let mut session = tls.accept(tcp_stream)?;
    info!("---- new session ---- {}", peer);

    let vars = session.vars();
    debug!(
        "session {}: {} {} alpn={:?}",
        peer, vars.version, vars.cipher, vars.alpn
    );

    let alpn = vars.alpn.clone();
    if alpn.as_deref() != Some(ALPN_H2) {
        if let Err(e) = session.close() {
            debug!("session {}: close: {}", peer, e);
        }
        return Err(TlsError::AlpnFailed {
            expected: ALPN_H2.to_string(),
            got: alpn,
        }
        .into());
    }

    session.set_nonblocking(true)?;
    H2Server::new(session, router).serve()?;
    debug!("session {} ended", peer);
    Ok(())
}
