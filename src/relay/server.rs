//! Relay WebSocket server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 RelayServer                  │
//! │  accept loop ──► connection task (per client)│
//! │                    │  ▲                      │
//! │                    ▼  │ Outbound channel     │
//! │          Arc<RwLock<SessionRegistry>>        │
//! │                    ▲                         │
//! │  maintenance task ─┘    lobby thread ─┘      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Each connection task owns the socket, the client's outbound channel and
//! a [`Reassembler`] for frames addressed to the relay itself.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::frame::Reassembler;
use crate::identifiers::{SocketId, StreamLabel};
use crate::protocol::{ControlMessage, Emit, ObjectMessage, decode_routed};

use super::http::LobbyServer;
use super::registry::{Outbound, SessionRegistry};

// ============================================================================
// RelayServer
// ============================================================================

/// Room relay: WebSocket listener, maintenance task and lobby.
///
/// # Example
///
/// ```no_run
/// use fmsocket::{RelayConfig, RelayServer};
///
/// # async fn example() -> fmsocket::Result<()> {
/// let server = RelayServer::bind(RelayConfig::default()).await?;
/// println!("relay on {}", server.ws_url());
/// server.closed().await;
/// # Ok(())
/// # }
/// ```
pub struct RelayServer {
    addr: SocketAddr,
    config: RelayConfig,
    registry: Arc<RwLock<SessionRegistry>>,
    shutdown: CancellationToken,
    lobby: Mutex<Option<LobbyServer>>,
    lobby_addr: Option<SocketAddr>,
}

// ============================================================================
// RelayServer - Constructor
// ============================================================================

impl RelayServer {
    /// Binds the relay and starts serving.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Io`] if the WebSocket port cannot be bound
    /// - [`Error::Connection`] if the lobby port cannot be bound
    pub async fn bind(config: RelayConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let listener = TcpListener::bind(config.ws_addr()).await?;
        let addr = listener.local_addr()?;

        let registry = Arc::new(RwLock::new(SessionRegistry::from_config(&config)?));

        let lobby = match config.http_addr() {
            Some(http_addr) => Some(LobbyServer::start(http_addr, Arc::clone(&registry))?),
            None => None,
        };
        let lobby_addr = lobby.as_ref().map(LobbyServer::local_addr);

        let server = Arc::new(Self {
            addr,
            config,
            registry,
            shutdown: CancellationToken::new(),
            lobby: Mutex::new(lobby),
            lobby_addr,
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));
        tokio::spawn(Arc::clone(&server).maintenance_loop());

        info!(%addr, lobby = ?lobby_addr, "Relay started");

        Ok(server)
    }
}

// ============================================================================
// RelayServer - Public API
// ============================================================================

impl RelayServer {
    /// Address the WebSocket listener is bound to.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// WebSocket URL clients connect to.
    #[must_use]
    pub fn ws_url(&self) -> String {
        if self.addr.ip().is_unspecified() {
            format!("ws://127.0.0.1:{}", self.addr.port())
        } else {
            format!("ws://{}", self.addr)
        }
    }

    /// Address of the lobby HTTP server, if enabled.
    #[inline]
    #[must_use]
    pub fn lobby_addr(&self) -> Option<SocketAddr> {
        self.lobby_addr
    }

    /// Shared session registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<RwLock<SessionRegistry>> {
        &self.registry
    }

    /// Number of connected clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.registry.read().client_count()
    }

    /// Resolves once [`RelayServer::shutdown`] has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }

    /// Stops accepting, closes every connection and stops the lobby.
    pub async fn shutdown(&self) {
        info!("Relay shutting down");

        self.shutdown.cancel();
        self.registry.read().close_all();

        let lobby = self.lobby.lock().take();
        if let Some(lobby) = lobby
            && tokio::task::spawn_blocking(move || drop(lobby)).await.is_err()
        {
            warn!("Lobby shutdown task failed");
        }

        info!("Relay shutdown complete");
    }
}

// ============================================================================
// RelayServer - Background Tasks
// ============================================================================

impl RelayServer {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, addr).await {
                                warn!(error = %e, ?addr, "Connection handling failed");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Accept failed"),
                },
            }
        }

        debug!("Accept loop terminated");
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.registry
                        .write()
                        .maintain(Instant::now(), self.config.stale_master_timeout);
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let socket_id = SocketId::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.registry
            .write()
            .connect(socket_id.clone(), tx, Instant::now());

        debug!(socket_id = %socket_id, ?addr, "WebSocket connection established");

        let mut reassembler = Reassembler::new(self.config.reassembly_timeout);
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = ws_write.close().await;
                    break;
                }

                outbound = rx.recv() => {
                    let message = match outbound {
                        Some(Outbound::Text(text)) => Message::Text(text.into()),
                        Some(Outbound::Binary(data)) => Message::Binary(data),
                        Some(Outbound::Close) | None => {
                            let _ = ws_write.close().await;
                            break;
                        }
                    };
                    if let Err(e) = ws_write.send(message).await {
                        debug!(socket_id = %socket_id, error = %e, "Send failed");
                        break;
                    }
                }

                inbound = ws_read.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        self.on_text(&socket_id, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.on_binary(&socket_id, &data, &mut reassembler);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(socket_id = %socket_id, "WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(socket_id = %socket_id, error = %e, "WebSocket error");
                        break;
                    }
                    // Ping/Pong are answered by tungstenite.
                    Some(Ok(_)) => {}
                },
            }
        }

        self.registry.write().disconnect(&socket_id, Instant::now());
        Ok(())
    }

    fn on_text(&self, socket_id: &SocketId, text: &str) {
        let message = match ControlMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(socket_id = %socket_id, error = %e, "Unparsable control message");
                return;
            }
        };

        let now = Instant::now();
        let mut registry = self.registry.write();
        registry.touch(socket_id, now);
        if let Err(e) = registry.handle_control(socket_id, message, now) {
            debug!(socket_id = %socket_id, error = %e, "Control message rejected");
        }
    }

    fn on_binary(&self, socket_id: &SocketId, raw: &[u8], reassembler: &mut Reassembler) {
        let (emit, chunk) = match decode_routed(raw) {
            Ok(routed) => routed,
            Err(e) => {
                trace!(socket_id = %socket_id, error = %e, "Dropping unroutable message");
                return;
            }
        };

        let now = Instant::now();

        if emit != Emit::Server {
            let mut registry = self.registry.write();
            registry.touch(socket_id, now);
            registry.route(socket_id, &emit, chunk);
            return;
        }

        reassembler.evict_idle(now);
        let Some(payload) = reassembler.on_chunk(socket_id, chunk, now) else {
            return;
        };

        if payload.label != StreamLabel::OBJECT_CONTROL {
            trace!(socket_id = %socket_id, label = %payload.label, "Ignoring relay-bound payload");
            return;
        }

        let message = match ObjectMessage::decode(&payload.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(socket_id = %socket_id, error = %e, "Undecodable object message");
                return;
            }
        };

        let mut registry = self.registry.write();
        registry.touch(socket_id, now);
        if let Err(e) = registry.handle_object_message(socket_id, message, now) {
            debug!(socket_id = %socket_id, error = %e, "Object message rejected");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
