//! Emit modes and the routing prefixes around frame chunks.
//!
//! # Client → relay
//!
//! ```text
//! [mode:u8] ([target_len:u8][target utf-8])? [frame chunk...]
//! ```
//!
//! The target id is present only for [`Emit::Target`].
//!
//! # Relay → client
//!
//! ```text
//! [sender_len:u8][sender utf-8] [frame chunk...]
//! ```
//!
//! Receivers key reassembly by sender so that concurrent senders on the same
//! stream label never interleave into one chunk set.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::identifiers::SocketId;

// ============================================================================
// Emit
// ============================================================================

/// Selects the recipients of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Emit {
    /// Every member of the sender's room, sender included.
    All,
    /// The relay itself; never forwarded.
    Server,
    /// Every room member except the sender.
    Others,
    /// One specific client.
    Target(SocketId),
    /// The sender's current room master.
    RoomMaster,
}

impl Emit {
    const ALL: u8 = 0;
    const SERVER: u8 = 1;
    const OTHERS: u8 = 2;
    const TARGET: u8 = 3;
    const ROOM_MASTER: u8 = 4;

    /// Returns the wire byte for this mode.
    #[must_use]
    pub const fn mode_byte(&self) -> u8 {
        match self {
            Self::All => Self::ALL,
            Self::Server => Self::SERVER,
            Self::Others => Self::OTHERS,
            Self::Target(_) => Self::TARGET,
            Self::RoomMaster => Self::ROOM_MASTER,
        }
    }
}

impl fmt::Display for Emit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Server => f.write_str("server"),
            Self::Others => f.write_str("others"),
            Self::Target(id) => write!(f, "target:{id}"),
            Self::RoomMaster => f.write_str("room-master"),
        }
    }
}

// ============================================================================
// Client → Relay
// ============================================================================

/// Wraps a frame chunk with its routing prefix.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if a target id exceeds 255 bytes.
pub fn encode_routed(emit: &Emit, chunk: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(chunk.len() + 2);
    buf.put_u8(emit.mode_byte());

    if let Emit::Target(target) = emit {
        let id = target.as_str().as_bytes();
        let len = u8::try_from(id.len())
            .map_err(|_| Error::invalid_argument(format!("target id too long: {target}")))?;
        buf.put_u8(len);
        buf.put_slice(id);
    }

    buf.put_slice(chunk);
    Ok(buf.freeze())
}

/// Splits a routed message into its emit mode and frame chunk.
///
/// # Errors
///
/// Returns [`Error::Protocol`] on an unknown mode or truncated target id.
pub fn decode_routed(raw: &[u8]) -> Result<(Emit, &[u8])> {
    let (&mode, rest) = raw
        .split_first()
        .ok_or_else(|| Error::protocol("empty routed message"))?;

    let emit = match mode {
        Emit::ALL => Emit::All,
        Emit::SERVER => Emit::Server,
        Emit::OTHERS => Emit::Others,
        Emit::ROOM_MASTER => Emit::RoomMaster,
        Emit::TARGET => {
            let (id, rest) = split_id(rest, "target id")?;
            return Ok((Emit::Target(id), rest));
        }
        other => return Err(Error::protocol(format!("unknown emit mode: {other}"))),
    };

    Ok((emit, rest))
}

// ============================================================================
// Relay → Client
// ============================================================================

/// Prefixes a frame chunk with the id of the client that sent it.
#[must_use]
pub fn encode_delivery(sender: &SocketId, chunk: &[u8]) -> Bytes {
    let id = sender.as_str().as_bytes();
    let len = id.len().min(u8::MAX as usize);

    let mut buf = BytesMut::with_capacity(1 + len + chunk.len());
    buf.put_u8(len as u8);
    buf.put_slice(&id[..len]);
    buf.put_slice(chunk);
    buf.freeze()
}

/// Splits a delivered message into sender id and frame chunk.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the sender prefix is truncated.
pub fn decode_delivery(raw: &[u8]) -> Result<(SocketId, &[u8])> {
    split_id(raw, "sender id")
}

fn split_id<'a>(raw: &'a [u8], what: &str) -> Result<(SocketId, &'a [u8])> {
    let (&len, rest) = raw
        .split_first()
        .ok_or_else(|| Error::protocol(format!("missing {what}")))?;
    let len = len as usize;

    if rest.len() < len {
        return Err(Error::protocol(format!("truncated {what}")));
    }

    let (id, rest) = rest.split_at(len);
    let id = std::str::from_utf8(id).map_err(|_| Error::protocol(format!("{what} is not UTF-8")))?;
    Ok((SocketId::new(id), rest))
}

// ============================================================================
// Tests
// ============================================================================
