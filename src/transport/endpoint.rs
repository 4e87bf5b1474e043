//! Client endpoint.
//!
//! An [`Endpoint`] owns a supervisor task that connects to the relay,
//! runs the link loop and reconnects after a fixed delay when the link is
//! lost. Application code sends through the endpoint and reads [`Event`]s
//! from the receiver returned by [`Endpoint::connect`].
//!
//! Frames sent while disconnected are rejected with
//! [`Error::ConnectionClosed`]; frames queued when a link drops are
//! discarded, not replayed on the next connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::AudioPacket;
use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::frame::{FrameEncoder, PayloadFormat, Reassembler};
use crate::identifiers::{SocketId, StreamLabel};
use crate::protocol::{ControlMessage, Emit, encode_routed};

use super::connection::{Event, LinkCommand, LinkExit, LinkState, RelayStream, run_link};

// ============================================================================
// Constants
// ============================================================================

/// How long [`Endpoint::close`] waits for the supervisor to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Endpoint
// ============================================================================

/// Connection to a relay.
///
/// # Example
///
/// ```no_run
/// use fmsocket::{Emit, Endpoint, EndpointConfig, StreamLabel};
/// use fmsocket::transport::Event;
///
/// # async fn example() -> fmsocket::Result<()> {
/// let config = EndpointConfig::builder()
///     .url("ws://127.0.0.1:3000")
///     .room("lobby")
///     .build()?;
/// let (endpoint, mut events) = Endpoint::connect(config)?;
///
/// while let Some(event) = events.recv().await {
///     if let Event::Connected { .. } = event {
///         endpoint.send_string(StreamLabel::FIRST_APPLICATION, &Emit::Others, "hello")?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Endpoint {
    commands: mpsc::UnboundedSender<LinkCommand>,
    state: Arc<Mutex<LinkState>>,
    encoder: Mutex<FrameEncoder>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Endpoint")
            .field("socket_id", &state.socket_id)
            .field("connected", &state.connected)
            .field("room", &state.room)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Endpoint - Lifecycle
// ============================================================================

impl Endpoint {
    /// Starts connecting in the background.
    ///
    /// Must be called from within a Tokio runtime. Connection progress is
    /// reported on the returned event receiver.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if called outside a Tokio runtime
    /// - [`Error::InvalidArgument`] if the chunk size cannot hold a frame
    pub fn connect(config: EndpointConfig) -> Result<(Self, mpsc::UnboundedReceiver<Event>)> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::config("Endpoint::connect requires a Tokio runtime"))?;

        let encoder = FrameEncoder::new(config.chunk_size, config.compression)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(LinkState {
            room: config.room.clone(),
            ..LinkState::default()
        }));
        let cancel = CancellationToken::new();

        let supervisor = runtime.spawn(supervise(
            config,
            command_rx,
            event_tx,
            Arc::clone(&state),
            cancel.clone(),
        ));

        Ok((
            Self {
                commands: command_tx,
                state,
                encoder: Mutex::new(encoder),
                cancel,
                supervisor: Mutex::new(Some(supervisor)),
            },
            event_rx,
        ))
    }

    /// Closes the endpoint.
    ///
    /// A room master hands the role off before the socket closes. No
    /// reconnect follows.
    pub async fn close(&self) {
        let connected = self.state.lock().connected;
        if !connected || self.commands.send(LinkCommand::Close).is_err() {
            self.cancel.cancel();
        }

        let supervisor = self.supervisor.lock().take();
        if let Some(supervisor) = supervisor
            && timeout(CLOSE_TIMEOUT, supervisor).await.is_err()
        {
            warn!("Endpoint supervisor did not stop in time");
            self.cancel.cancel();
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Endpoint - State
// ============================================================================

impl Endpoint {
    /// Socket id assigned by the relay on the current connection.
    #[must_use]
    pub fn socket_id(&self) -> Option<SocketId> {
        self.state.lock().socket_id.clone()
    }

    /// Whether a link is up and welcomed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Room joined, or to be joined after the next connect.
    #[must_use]
    pub fn room(&self) -> Option<String> {
        self.state.lock().room.clone()
    }

    /// Whether this client is master of its room.
    #[must_use]
    pub fn is_room_master(&self) -> bool {
        self.state.lock().is_room_master
    }
}

// ============================================================================
// Endpoint - Rooms
// ============================================================================

impl Endpoint {
    /// Joins a room, leaving the current one.
    ///
    /// The room is remembered and rejoined after every reconnect. While
    /// disconnected, only the remembered room changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty room name.
    pub fn join(&self, room: impl Into<String>) -> Result<()> {
        let room = room.into();
        if room.is_empty() {
            return Err(Error::invalid_argument("room name must not be empty"));
        }

        let connected = {
            let mut state = self.state.lock();
            state.room = Some(room.clone());
            state.connected
        };

        if connected {
            self.send_control(&ControlMessage::Join { room })?;
        }
        Ok(())
    }

    /// Leaves the current room.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the endpoint has shut down.
    pub fn leave(&self) -> Result<()> {
        let connected = {
            let mut state = self.state.lock();
            state.room = None;
            state.is_room_master = false;
            state.connected
        };

        if connected {
            self.send_control(&ControlMessage::Leave)?;
        }
        Ok(())
    }

    /// Sets this client's display name in the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] while disconnected.
    pub fn rename(&self, username: impl Into<String>) -> Result<()> {
        self.require_connected()?;
        self.send_control(&ControlMessage::Rename {
            username: username.into(),
        })
    }

    /// Gives up the room master role.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] while disconnected.
    pub fn request_master_handoff(&self) -> Result<()> {
        self.require_connected()?;
        self.send_control(&ControlMessage::MasterHandoff)
    }

    /// Sends a control envelope as-is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the endpoint has shut down.
    pub fn send_control(&self, message: &ControlMessage) -> Result<()> {
        let json = message.to_json()?;
        self.commands
            .send(LinkCommand::Text(json))
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Endpoint - Frames
// ============================================================================

impl Endpoint {
    /// Splits a payload into frames and sends them to `emit`.
    ///
    /// Returns the number of chunks sent.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] while disconnected
    /// - [`Error::InvalidArgument`] if the payload is too large to frame
    pub fn send(
        &self,
        label: StreamLabel,
        format: PayloadFormat,
        emit: &Emit,
        payload: &[u8],
    ) -> Result<usize> {
        self.require_connected()?;

        // Held until every chunk is queued so sets on one label never interleave.
        let mut encoder = self.encoder.lock();
        let routed = encoder
            .encode(label, format, payload)?
            .iter()
            .map(|chunk| encode_routed(emit, chunk))
            .collect::<Result<Vec<_>>>()?;
        let count = routed.len();

        for chunk in routed {
            self.commands
                .send(LinkCommand::Binary(chunk))
                .map_err(|_| Error::ConnectionClosed)?;
        }
        drop(encoder);

        Ok(count)
    }

    /// Sends raw bytes.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::send`].
    #[inline]
    pub fn send_bytes(&self, label: StreamLabel, emit: &Emit, data: &[u8]) -> Result<usize> {
        self.send(label, PayloadFormat::Binary, emit, data)
    }

    /// Sends UTF-8 text.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::send`].
    #[inline]
    pub fn send_string(&self, label: StreamLabel, emit: &Emit, text: &str) -> Result<usize> {
        self.send(label, PayloadFormat::Text, emit, text.as_bytes())
    }

    /// Sends one PCM16 audio packet on the audio stream.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::send`].
    pub fn send_audio(&self, emit: &Emit, packet: &AudioPacket) -> Result<usize> {
        self.send(
            StreamLabel::AUDIO,
            PayloadFormat::Audio,
            emit,
            &packet.encode(),
        )
    }

    fn require_connected(&self) -> Result<()> {
        if self.state.lock().connected {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

async fn supervise(
    config: EndpointConfig,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<Event>,
    state: Arc<Mutex<LinkState>>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = open(&config) => result,
        };

        let exit = match connected {
            Ok(ws_stream) => {
                attempt = 0;
                let mut reassembler = Reassembler::new(config.reassembly_timeout);
                run_link(
                    ws_stream,
                    &mut commands,
                    &events,
                    &state,
                    &mut reassembler,
                    &cancel,
                )
                .await
            }
            Err(e) => LinkExit::Lost(e.to_string()),
        };

        let LinkExit::Lost(reason) = exit else {
            break;
        };
        if cancel.is_cancelled() {
            break;
        }

        warn!(%reason, "Relay link lost");
        let _ = events.send(Event::Disconnected { reason });

        if !config.auto_reconnect || discard_queued(&mut commands) {
            break;
        }

        attempt = attempt.saturating_add(1);
        let _ = events.send(Event::Reconnecting { attempt });
        debug!(attempt, delay_ms = config.reconnect_delay.as_millis() as u64, "Reconnect scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(config.reconnect_delay) => {}
        }
    }

    state.lock().connected = false;
    let _ = events.send(Event::Closed);
    info!("Endpoint closed");
}

async fn open(config: &EndpointConfig) -> Result<RelayStream> {
    let url = config.url.as_str();
    debug!(url, "Connecting to relay");

    let connect = tokio_tungstenite::connect_async(url);
    match timeout(config.connect_timeout, connect).await {
        Ok(Ok((ws_stream, _response))) => Ok(ws_stream),
        Ok(Err(e)) => Err(Error::connection(format!("failed to connect to {url}: {e}"))),
        Err(_) => Err(Error::connection_timeout(
            config.connect_timeout.as_millis() as u64
        )),
    }
}

/// Drops commands queued for a dead link. Returns `true` if a close was
/// among them or the endpoint is gone.
fn discard_queued(commands: &mut mpsc::UnboundedReceiver<LinkCommand>) -> bool {
    let mut dropped = 0usize;

    loop {
        match commands.try_recv() {
            Ok(LinkCommand::Close) => return true,
            Ok(_) => dropped += 1,
            Err(mpsc::error::TryRecvError::Empty) => break,
            Err(mpsc::error::TryRecvError::Disconnected) => return true,
        }
    }

    if dropped > 0 {
        debug!(dropped, "Discarded frames queued for lost link");
    }
    false
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> EndpointConfig {
        EndpointConfig::builder()
            .url(url)
            .auto_reconnect(false)
            .connect_timeout(Duration::from_millis(500))
            .build()
            .expect("config")
    }

    #[test]
    fn test_connect_requires_runtime() {
        let err = Endpoint::connect(config("ws://127.0.0.1:1")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_relay_reports_and_closes() {
        let (endpoint, mut events) = Endpoint::connect(config("ws://127.0.0.1:1")).unwrap();

        assert!(matches!(
            events.recv().await,
            Some(Event::Disconnected { .. })
        ));
        assert!(matches!(events.recv().await, Some(Event::Closed)));
        assert!(!endpoint.is_connected());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let (endpoint, _events) = Endpoint::connect(config("ws://127.0.0.1:1")).unwrap();
        let err = endpoint
            .send_bytes(StreamLabel::FIRST_APPLICATION, &Emit::All, b"x")
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_join_while_disconnected_is_remembered() {
        let (endpoint, _events) = Endpoint::connect(config("ws://127.0.0.1:1")).unwrap();
        endpoint.join("arena").unwrap();
        assert_eq!(endpoint.room().as_deref(), Some("arena"));
        assert!(endpoint.join("").is_err());

        endpoint.leave().unwrap();
        assert!(endpoint.room().is_none());
    }

    /// An endpoint with no supervisor whose commands land in the receiver.
    fn linked() -> (Endpoint, mpsc::UnboundedReceiver<LinkCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let endpoint = Endpoint {
            commands,
            state: Arc::new(Mutex::new(LinkState {
                connected: true,
                ..LinkState::default()
            })),
            encoder: Mutex::new(FrameEncoder::new(64, false).unwrap()),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        };
        (endpoint, rx)
    }

    #[test]
    fn test_concurrent_sends_keep_chunk_sets_contiguous() {
        use crate::frame::FrameHeader;
        use crate::protocol::decode_routed;

        let (endpoint, mut rx) = linked();
        std::thread::scope(|scope| {
            for fill in [1u8, 2] {
                let endpoint = &endpoint;
                scope.spawn(move || {
                    for _ in 0..50 {
                        endpoint
                            .send_bytes(StreamLabel::FIRST_APPLICATION, &Emit::Others, &[fill; 500])
                            .unwrap();
                    }
                });
            }
        });

        let mut sequences = Vec::new();
        while let Ok(LinkCommand::Binary(raw)) = rx.try_recv() {
            let (emit, chunk) = decode_routed(&raw).unwrap();
            assert_eq!(emit, Emit::Others);
            sequences.push(FrameHeader::parse(chunk).unwrap().0.sequence);
        }

        // 500 bytes at 50 per chunk: ten consecutive chunks per payload.
        assert_eq!(sequences.len(), 100 * 10);
        for set in sequences.chunks(10) {
            assert!(set.iter().all(|s| *s == set[0]));
        }
    }

    #[test]
    fn test_discard_queued_stops_on_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(LinkCommand::Text("a".into())).unwrap();
        tx.send(LinkCommand::Close).unwrap();
        assert!(discard_queued(&mut rx));

        tx.send(LinkCommand::Text("b".into())).unwrap();
        assert!(!discard_queued(&mut rx));
    }
}
