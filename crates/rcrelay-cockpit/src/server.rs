//! [`CockpitServer`] – the relay's single listening socket.
//!
//! Listens on `0.0.0.0:80` (configurable via [`CockpitServer::with_port`]).
//!
//! * WebSocket upgrades → Socket.IO channel ([`crate::socket`]).
//! * Everything else → one HTTP request/response ([`crate::http`]).

use std::net::SocketAddr;
use std::path::PathBuf;

use rcrelay_kernel::SessionHandle;
use rcrelay_middleware::EventBus;
use rcrelay_types::RelayError;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::http::{HttpContext, handle_http};
use crate::socket::{Heartbeat, handle_ws};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 80;

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

pub struct CockpitServer {
    session: SessionHandle,
    bus: EventBus,
    port: u16,
    public_dir: Option<PathBuf>,
    heartbeat: Heartbeat,
}

impl CockpitServer {
    /// Serve `session`, forwarding statuses published on `bus`.
    pub fn new(session: SessionHandle, bus: EventBus) -> Self {
        Self {
            session,
            bus,
            port: DEFAULT_PORT,
            public_dir: None,
            heartbeat: Heartbeat::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Serve static files from `dir` for unmatched `GET` paths.
    pub fn with_public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_dir = Some(dir.into());
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), RelayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Transport(format!("bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RelayError> {
        let local = listener
            .local_addr()
            .map_err(|e| RelayError::Transport(format!("listener address: {e}")))?;
        info!(addr = %local, "relay listening");

        let http = HttpContext {
            session: self.session.clone(),
            public_dir: self.public_dir.clone(),
        };

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let http = http.clone();
                    let bus = self.bus.clone();
                    let heartbeat = self.heartbeat;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, http, bus, heartbeat).await {
                            warn!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection dispatch
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    http: HttpContext,
    bus: EventBus,
    heartbeat: Heartbeat,
) -> Result<(), RelayError> {
    // `peek` leaves the bytes in place for whichever handler runs next.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| RelayError::Transport(format!("peek error from {peer}: {e}")))?;

    if is_ws_upgrade(&buf[..n]) {
        debug!(%peer, "websocket upgrade");
        handle_ws(stream, peer, http.session, bus, heartbeat).await
    } else {
        handle_http(stream, &http).await
    }
}

fn is_ws_upgrade(head: &[u8]) -> bool {
    String::from_utf8_lossy(head).lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
