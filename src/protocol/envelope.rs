//! JSON control envelope for room lifecycle messages.
//!
//! Control messages travel as WebSocket text frames.
//!
//! # Format
//!
//! ```json
//! { "SocketType": "Join", "Data": { "room": "lobby" } }
//! ```
//!
//! Unit messages omit `Data`:
//!
//! ```json
//! { "SocketType": "MasterHandoff" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{from_str, to_string};

use crate::error::Result;
use crate::identifiers::SocketId;

// ============================================================================
// RoomRoster
// ============================================================================

/// Membership snapshot broadcast to a room on every join or leave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRoster {
    /// Room name.
    pub room: String,
    /// Current master, `None` while the slot is vacant.
    pub master: Option<SocketId>,
    /// Members in join order.
    pub members: Vec<SocketId>,
}

impl RoomRoster {
    /// Returns `true` if `socket_id` is a member.
    #[inline]
    #[must_use]
    pub fn contains(&self, socket_id: &SocketId) -> bool {
        self.members.contains(socket_id)
    }
}

// ============================================================================
// ControlMessage
// ============================================================================

/// Room lifecycle messages exchanged between clients and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "SocketType", content = "Data")]
pub enum ControlMessage {
    /// Relay → client: the id assigned to this connection.
    Welcome {
        /// Assigned socket id.
        socket_id: SocketId,
    },

    /// Client → relay: join (or create) a room.
    Join {
        /// Room name.
        room: String,
    },

    /// Client → relay: leave the current room.
    Leave,

    /// Client → relay: change the displayed name.
    Rename {
        /// New display name.
        username: String,
    },

    /// Relay → room: updated membership.
    Roster(RoomRoster),

    /// Relay → master: a client joined the master's room.
    ClientJoined {
        /// The newcomer.
        socket_id: SocketId,
    },

    /// Client → relay: the current master hands its role to the next member.
    MasterHandoff,

    /// Relay → room: the master role moved.
    MasterChanged {
        /// New master, `None` if the room has no members left to take it.
        master: Option<SocketId>,
    },

    /// Marker undo, forwarded to the other room members.
    MarkerUndo {
        /// Originating client, filled in by the relay.
        #[serde(default)]
        from: Option<SocketId>,
    },

    /// Marker redo, forwarded to the other room members.
    MarkerRedo {
        /// Originating client, filled in by the relay.
        #[serde(default)]
        from: Option<SocketId>,
    },

    /// Keep-alive request.
    Ping,

    /// Keep-alive reply.
    Pong,
}

impl ControlMessage {
    /// Serializes the message to its JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if serialization fails.
    #[inline]
    pub fn to_json(&self) -> Result<String> {
        Ok(to_string(self)?)
    }

    /// Parses a JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] for unknown types or malformed data.
    #[inline]
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(from_str(text)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    #[test]
    fn test_join_envelope_shape() {
        let msg = ControlMessage::Join {
            room: "lobby".into(),
        };
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({ "SocketType": "Join", "Data": { "room": "lobby" } }));
    }

    #[test]
    fn test_unit_envelope_without_data() {
        let msg = ControlMessage::from_json(r#"{"SocketType":"MasterHandoff"}"#).unwrap();
        assert_eq!(msg, ControlMessage::MasterHandoff);
    }

    #[test]
    fn test_roster_round_trip() {
        let msg = ControlMessage::Roster(RoomRoster {
            room: "lobby".into(),
            master: Some(SocketId::new("a")),
            members: vec![SocketId::new("a"), SocketId::new("b")],
        });
        let parsed = ControlMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_marker_without_from() {
        let msg = ControlMessage::from_json(r#"{"SocketType":"MarkerUndo","Data":{}}"#).unwrap();
        assert_eq!(msg, ControlMessage::MarkerUndo { from: None });
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(ControlMessage::from_json(r#"{"SocketType":"Nope"}"#).is_err());
    }
}
