//! Binary networked-object control messages.
//!
//! Sent on [`StreamLabel::OBJECT_CONTROL`](crate::identifiers::StreamLabel::OBJECT_CONTROL)
//! with [`PayloadFormat::Object`](crate::frame::PayloadFormat::Object). The
//! first byte is a family symbol:
//!
//! | Symbol | Message | Fields |
//! |--------|---------|--------|
//! | `S` | [`ObjectMessage::SpawnRequest`] | owner, pending, prefab |
//! | `R` | [`ObjectMessage::SpawnResponse`] | owner, pending, prefab, global |
//! | `O` | [`ObjectMessage::OwnershipClaim`] | global, owner |
//! | `D` | [`ObjectMessage::Despawn`] | global |
//! | `F` | [`ObjectMessage::FullSync`] | count, records |

// ============================================================================
// Imports
// ============================================================================

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::identifiers::{PendingId, SocketId, ViewId};

use super::wire::{ensure, get_i32, get_socket_id, get_str, put_str};

// ============================================================================
// ViewRecord
// ============================================================================

/// Directory entry describing one live networked view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRecord {
    /// Global view id.
    pub view: ViewId,
    /// Current owner.
    pub owner: SocketId,
    /// Prefab key used to instantiate the representation.
    pub prefab: String,
}

// ============================================================================
// ObjectMessage
// ============================================================================

/// Spawn, ownership and registry messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectMessage {
    /// Client → relay: allocate a global id for a pending view.
    SpawnRequest {
        /// Requesting owner.
        owner: SocketId,
        /// Requester-local placeholder id.
        pending: PendingId,
        /// Prefab key.
        prefab: String,
    },

    /// Relay → room: a global id was allocated.
    SpawnResponse {
        /// Requesting owner.
        owner: SocketId,
        /// Requester-local placeholder id.
        pending: PendingId,
        /// Prefab key.
        prefab: String,
        /// Allocated global id.
        global: ViewId,
    },

    /// Ownership of a view moved to `owner`.
    OwnershipClaim {
        /// View being claimed.
        view: ViewId,
        /// New owner.
        owner: SocketId,
    },

    /// A view was destroyed by its owner.
    Despawn {
        /// Destroyed view.
        view: ViewId,
    },

    /// Relay → joiner: every live view in the room.
    FullSync {
        /// Live views.
        records: Vec<ViewRecord>,
    },
}

impl ObjectMessage {
    const SPAWN_REQUEST: u8 = b'S';
    const SPAWN_RESPONSE: u8 = b'R';
    const OWNERSHIP_CLAIM: u8 = b'O';
    const DESPAWN: u8 = b'D';
    const FULL_SYNC: u8 = b'F';

    /// Encodes the message.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);

        match self {
            Self::SpawnRequest {
                owner,
                pending,
                prefab,
            } => {
                buf.put_u8(Self::SPAWN_REQUEST);
                put_str(&mut buf, owner.as_str());
                buf.put_i32_le(pending.as_i32());
                put_str(&mut buf, prefab);
            }
            Self::SpawnResponse {
                owner,
                pending,
                prefab,
                global,
            } => {
                buf.put_u8(Self::SPAWN_RESPONSE);
                put_str(&mut buf, owner.as_str());
                buf.put_i32_le(pending.as_i32());
                put_str(&mut buf, prefab);
                buf.put_i32_le(global.as_i32());
            }
            Self::OwnershipClaim { view, owner } => {
                buf.put_u8(Self::OWNERSHIP_CLAIM);
                buf.put_i32_le(view.as_i32());
                put_str(&mut buf, owner.as_str());
            }
            Self::Despawn { view } => {
                buf.put_u8(Self::DESPAWN);
                buf.put_i32_le(view.as_i32());
            }
            Self::FullSync { records } => {
                buf.put_u8(Self::FULL_SYNC);
                let count = records.len().min(u16::MAX as usize);
                buf.put_u16_le(count as u16);
                for record in records.iter().take(count) {
                    buf.put_i32_le(record.view.as_i32());
                    put_str(&mut buf, record.owner.as_str());
                    put_str(&mut buf, &record.prefab);
                }
            }
        }

        buf
    }

    /// Decodes a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for unknown symbols or truncated fields.
    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        ensure(&raw, 1, "object message")?;
        let symbol = raw.get_u8();
        let buf = &mut raw;

        let message = match symbol {
            Self::SPAWN_REQUEST => Self::SpawnRequest {
                owner: get_socket_id(buf, "owner")?,
                pending: PendingId::new(get_i32(buf, "pending id")?),
                prefab: get_str(buf, "prefab")?,
            },
            Self::SPAWN_RESPONSE => Self::SpawnResponse {
                owner: get_socket_id(buf, "owner")?,
                pending: PendingId::new(get_i32(buf, "pending id")?),
                prefab: get_str(buf, "prefab")?,
                global: ViewId::new(get_i32(buf, "global id")?),
            },
            Self::OWNERSHIP_CLAIM => Self::OwnershipClaim {
                view: ViewId::new(get_i32(buf, "view id")?),
                owner: get_socket_id(buf, "owner")?,
            },
            Self::DESPAWN => Self::Despawn {
                view: ViewId::new(get_i32(buf, "view id")?),
            },
            Self::FULL_SYNC => {
                ensure(&*buf, 2, "record count")?;
                let count = buf.get_u16_le() as usize;
                let mut records = Vec::with_capacity(count);
                for _ in 0..count {
                    records.push(ViewRecord {
                        view: ViewId::new(get_i32(buf, "view id")?),
                        owner: get_socket_id(buf, "owner")?,
                        prefab: get_str(buf, "prefab")?,
                    });
                }
                Self::FullSync { records }
            }
            other => {
                return Err(Error::protocol(format!(
                    "unknown object message symbol: {other:#04x}"
                )));
            }
        };

        Ok(message)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_request_layout() {
        let msg = ObjectMessage::SpawnRequest {
            owner: SocketId::new("ab"),
            pending: PendingId::new(1),
            prefab: "Marker".into(),
        };
        let raw = msg.encode();

        assert_eq!(raw[0], b'S');
        assert_eq!(&raw[1..3], &2u16.to_le_bytes());
        assert_eq!(&raw[3..5], b"ab");
        assert_eq!(&raw[5..9], &1i32.to_le_bytes());
        assert_eq!(ObjectMessage::decode(&raw).unwrap(), msg);
    }

    #[test]
    fn test_full_sync_decodes_records() {
        let msg = ObjectMessage::FullSync {
            records: vec![
                ViewRecord {
                    view: ViewId::new(0),
                    owner: SocketId::new("a"),
                    prefab: "Marker".into(),
                },
                ViewRecord {
                    view: ViewId::new(3),
                    owner: SocketId::new("b"),
                    prefab: "Arrow".into(),
                },
            ],
        };
        assert_eq!(ObjectMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_unknown_symbol() {
        assert!(ObjectMessage::decode(b"Zxyz").is_err());
        assert!(ObjectMessage::decode(&[]).is_err());
    }

    #[test]
    fn test_truncated_response() {
        let msg = ObjectMessage::SpawnResponse {
            owner: SocketId::new("a"),
            pending: PendingId::new(1),
            prefab: "Marker".into(),
            global: ViewId::new(4),
        };
        let raw = msg.encode();
        assert!(ObjectMessage::decode(&raw[..raw.len() - 1]).is_err());
    }
}
