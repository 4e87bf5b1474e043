//! One live WebSocket connection to the relay.
//!
//! The endpoint supervisor runs [`run_link`] once per successful connect.
//! The loop multiplexes:
//!
//! - commands from the [`Endpoint`](super::Endpoint) API (frames, control
//!   envelopes, close)
//! - incoming control envelopes, tracked for socket id and master status
//! - incoming delivery-prefixed chunks, reassembled per sender
//!
//! It returns when the socket drops, the endpoint is closed or cancelled.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::frame::{CompletePayload, Reassembler};
use crate::identifiers::SocketId;
use crate::protocol::{ControlMessage, decode_delivery};
use crate::relay::RELAY_SENDER;

// ============================================================================
// Types
// ============================================================================

pub(crate) type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type RelaySink = SplitSink<RelayStream, Message>;

/// Internal commands for the link loop.
#[derive(Debug)]
pub(crate) enum LinkCommand {
    /// Routed frame chunk.
    Binary(Bytes),
    /// Control envelope.
    Text(String),
    /// Close the connection, handing off the master role first if held.
    Close,
}

/// Why a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkExit {
    /// Closed through the endpoint.
    Closed,
    /// Lost; the supervisor may reconnect.
    Lost(String),
}

/// Notifications delivered to the application.
#[derive(Debug, Clone)]
pub enum Event {
    /// The relay accepted the connection and assigned an id.
    Connected {
        /// Assigned socket id.
        socket_id: SocketId,
    },
    /// The connection dropped.
    Disconnected {
        /// What happened.
        reason: String,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A control envelope other than `Welcome`.
    Control(ControlMessage),
    /// A reassembled payload.
    Payload {
        /// Client that sent it, or the relay.
        sender: SocketId,
        /// The payload.
        payload: CompletePayload,
    },
    /// The endpoint is closed for good.
    Closed,
}

// ============================================================================
// LinkState
// ============================================================================

/// Session facts shared between the link loop and the endpoint API.
#[derive(Debug, Default)]
pub(crate) struct LinkState {
    pub(crate) socket_id: Option<SocketId>,
    pub(crate) connected: bool,
    pub(crate) room: Option<String>,
    pub(crate) is_room_master: bool,
}

impl LinkState {
    fn observe(&mut self, message: &ControlMessage) {
        match message {
            ControlMessage::Roster(roster) => {
                if self.room.as_deref() == Some(roster.room.as_str()) {
                    self.is_room_master =
                        roster.master.is_some() && roster.master == self.socket_id;
                }
            }
            ControlMessage::MasterChanged { master } => {
                self.is_room_master = master.is_some() && *master == self.socket_id;
            }
            _ => {}
        }
    }
}

// ============================================================================
// Link Loop
// ============================================================================

/// Drives one connection until it ends.
pub(crate) async fn run_link(
    ws_stream: RelayStream,
    commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    events: &mpsc::UnboundedSender<Event>,
    state: &Arc<Mutex<LinkState>>,
    reassembler: &mut Reassembler,
    cancel: &CancellationToken,
) -> LinkExit {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let exit = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.close().await;
                break LinkExit::Closed;
            }

            command = commands.recv() => match command {
                Some(LinkCommand::Binary(data)) => {
                    if let Err(e) = ws_write.send(Message::Binary(data)).await {
                        break LinkExit::Lost(format!("send failed: {e}"));
                    }
                }
                Some(LinkCommand::Text(text)) => {
                    if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                        break LinkExit::Lost(format!("send failed: {e}"));
                    }
                }
                Some(LinkCommand::Close) | None => {
                    hand_off_if_master(&mut ws_write, state).await;
                    let _ = ws_write.close().await;
                    break LinkExit::Closed;
                }
            },

            message = ws_read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = on_text(text.as_str(), events, state, reassembler)
                        && let Err(e) = ws_write.send(Message::Text(reply.into())).await
                    {
                        break LinkExit::Lost(format!("send failed: {e}"));
                    }
                }
                Some(Ok(Message::Binary(data))) => on_binary(&data, events, reassembler),
                Some(Ok(Message::Close(frame))) => {
                    break LinkExit::Lost(format!("closed by relay: {frame:?}"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break LinkExit::Lost(format!("websocket error: {e}")),
                None => break LinkExit::Lost("stream ended".to_string()),
            },
        }
    };

    {
        let mut state = state.lock();
        state.connected = false;
        state.is_room_master = false;
    }

    debug!(?exit, "Link loop terminated");
    exit
}

/// Handles a control envelope; returns a reply to send, if any.
fn on_text(
    text: &str,
    events: &mpsc::UnboundedSender<Event>,
    state: &Arc<Mutex<LinkState>>,
    reassembler: &mut Reassembler,
) -> Option<String> {
    let message = match ControlMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Unparsable control message from relay");
            return None;
        }
    };

    match message {
        ControlMessage::Welcome { socket_id } => {
            let rejoin = {
                let mut state = state.lock();
                state.socket_id = Some(socket_id.clone());
                state.connected = true;
                state.is_room_master = false;
                state.room.clone()
            };

            debug!(socket_id = %socket_id, "Welcome received");
            let _ = events.send(Event::Connected { socket_id });

            rejoin.and_then(|room| ControlMessage::Join { room }.to_json().ok())
        }
        ControlMessage::Ping => ControlMessage::Pong.to_json().ok(),
        ControlMessage::Roster(roster) => {
            let dropped = reassembler
                .retain_sources(|s| s.as_str() == RELAY_SENDER || roster.members.contains(s));
            if dropped > 0 {
                debug!(dropped, room = %roster.room, "Dropped chunk sets of departed peers");
            }
            let message = ControlMessage::Roster(roster);
            state.lock().observe(&message);
            let _ = events.send(Event::Control(message));
            None
        }
        other => {
            state.lock().observe(&other);
            let _ = events.send(Event::Control(other));
            None
        }
    }
}

fn on_binary(raw: &[u8], events: &mpsc::UnboundedSender<Event>, reassembler: &mut Reassembler) {
    let (sender, chunk) = match decode_delivery(raw) {
        Ok(delivered) => delivered,
        Err(e) => {
            trace!(error = %e, "Dropping message without delivery prefix");
            return;
        }
    };

    let now = Instant::now();
    reassembler.evict_idle(now);

    if let Some(payload) = reassembler.on_chunk(&sender, chunk, now) {
        let _ = events.send(Event::Payload { sender, payload });
    }
}

async fn hand_off_if_master(ws_write: &mut RelaySink, state: &Arc<Mutex<LinkState>>) {
    if !state.lock().is_room_master {
        return;
    }

    if let Ok(json) = ControlMessage::MasterHandoff.to_json()
        && let Err(e) = ws_write.send(Message::Text(json.into())).await
    {
        debug!(error = %e, "Failed to send master handoff before close");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::frame::{FrameEncoder, PayloadFormat};
    use crate::identifiers::StreamLabel;
    use crate::protocol::RoomRoster;

    fn state_with(id: &str, room: &str) -> LinkState {
        LinkState {
            socket_id: Some(SocketId::new(id)),
            connected: true,
            room: Some(room.to_string()),
            is_room_master: false,
        }
    }

    #[test]
    fn test_roster_sets_master_flag() {
        let mut state = state_with("a", "lobby");
        state.observe(&ControlMessage::Roster(RoomRoster {
            room: "lobby".into(),
            master: Some(SocketId::new("a")),
            members: vec![SocketId::new("a")],
        }));
        assert!(state.is_room_master);

        state.observe(&ControlMessage::MasterChanged {
            master: Some(SocketId::new("b")),
        });
        assert!(!state.is_room_master);
    }

    #[test]
    fn test_vacant_master_is_not_us() {
        let mut state = LinkState::default();
        state.observe(&ControlMessage::MasterChanged { master: None });
        assert!(!state.is_room_master);
    }

    #[test]
    fn test_welcome_triggers_rejoin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(LinkState {
            room: Some("lobby".into()),
            ..LinkState::default()
        }));

        let welcome = ControlMessage::Welcome {
            socket_id: SocketId::new("x"),
        }
        .to_json()
        .unwrap();
        let reply = on_text(&welcome, &tx, &state, &mut Reassembler::default()).unwrap();

        assert_eq!(
            ControlMessage::from_json(&reply).unwrap(),
            ControlMessage::Join {
                room: "lobby".into()
            }
        );
        assert!(state.lock().connected);
        assert!(matches!(rx.try_recv(), Ok(Event::Connected { .. })));
    }

    #[test]
    fn test_ping_answered() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(LinkState::default()));
        let reply = on_text(r#"{"SocketType":"Ping"}"#, &tx, &state, &mut Reassembler::default()).unwrap();
        assert_eq!(ControlMessage::from_json(&reply).unwrap(), ControlMessage::Pong);
    }

    #[test]
    fn test_roster_drops_chunk_sets_of_departed_peers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(state_with("a", "lobby")));
        let mut reassembler = Reassembler::default();
        let mut encoder = FrameEncoder::new(64, false).unwrap();
        let chunks = encoder
            .encode(StreamLabel::FIRST_APPLICATION, PayloadFormat::Binary, &[1u8; 200])
            .unwrap();
        let now = Instant::now();
        for sender in ["b", "gone", RELAY_SENDER] {
            reassembler.on_chunk(&SocketId::new(sender), &chunks[0], now);
        }

        let roster = ControlMessage::Roster(RoomRoster {
            room: "lobby".into(),
            master: Some(SocketId::new("a")),
            members: vec![SocketId::new("a"), SocketId::new("b")],
        })
        .to_json()
        .unwrap();
        assert!(on_text(&roster, &tx, &state, &mut reassembler).is_none());

        assert_eq!(reassembler.pending_sets(), 2);
        assert!(state.lock().is_room_master);
        assert!(matches!(rx.try_recv(), Ok(Event::Control(ControlMessage::Roster(_)))));
    }
}
