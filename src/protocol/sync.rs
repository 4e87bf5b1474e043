//! Transform snapshots and their batched wire format.
//!
//! Owners send batches on [`StreamLabel::OBJECT_SYNC`](crate::identifiers::StreamLabel::OBJECT_SYNC):
//!
//! ```text
//! 'T' [timestamp:f64] [count:u16] snapshot*
//! snapshot = [view:i32] [mask:u8] [position:3×f32]? [rotation:4×f32]? [scale:3×f32]? [owner:str]?
//! ```
//!
//! Fields appear only when their [`SyncMask`] bit is set, in the order above.

// ============================================================================
// Imports
// ============================================================================

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use glam::{Quat, Vec3};

use crate::error::{Error, Result};
use crate::identifiers::{SocketId, ViewId};

use super::wire::{ensure, get_f32, get_i32, get_socket_id, put_str};

// ============================================================================
// Constants
// ============================================================================

/// Leading symbol of a sync batch.
pub const SYNC_SYMBOL: u8 = b'T';

/// Bytes taken by the batch header (symbol, timestamp, count).
const BATCH_HEADER_LEN: usize = 1 + 8 + 2;

// ============================================================================
// SyncMask
// ============================================================================

bitflags! {
    /// Which fields a snapshot carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncMask: u8 {
        /// Position present.
        const POSITION = 0b0001;
        /// Rotation present.
        const ROTATION = 0b0010;
        /// Scale present.
        const SCALE = 0b0100;
        /// Owner id present.
        const OWNER = 0b1000;

        /// Position, rotation and scale.
        const TRANSFORM = Self::POSITION.bits() | Self::ROTATION.bits() | Self::SCALE.bits();
        /// Transform plus owner.
        const FULL = Self::TRANSFORM.bits() | Self::OWNER.bits();
    }
}

impl SyncMask {
    /// Position alone.
    pub const POSITION_ONLY: Self = Self::POSITION;
    /// Rotation alone.
    pub const ROTATION_ONLY: Self = Self::ROTATION;
    /// Owner id alone, sent after an ownership claim.
    pub const OWNER_INFO: Self = Self::OWNER;

    /// Returns `true` if the mask carries any transform component.
    #[inline]
    #[must_use]
    pub fn has_transform(self) -> bool {
        self.intersects(Self::TRANSFORM)
    }
}

// ============================================================================
// Transform
// ============================================================================

/// Position, rotation and scale of a networked view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// World position.
    pub position: Vec3,
    /// World rotation.
    pub rotation: Quat,
    /// Local scale.
    pub scale: Vec3,
}

impl Transform {
    /// Origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Creates a transform with unit scale.
    #[inline]
    #[must_use]
    pub const fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    /// Blends towards `target` by `step` in `[0, 1]`.
    ///
    /// Position and scale interpolate linearly; rotation uses slerp.
    #[must_use]
    pub fn interpolate(&self, target: &Self, step: f32) -> Self {
        Self {
            position: self.position.lerp(target.position, step),
            rotation: self.rotation.slerp(target.rotation, step),
            scale: self.scale.lerp(target.scale, step),
        }
    }

    /// Returns a copy with the fields selected by `mask` taken from `other`.
    #[must_use]
    pub fn merged(&self, other: &Self, mask: SyncMask) -> Self {
        Self {
            position: if mask.contains(SyncMask::POSITION) {
                other.position
            } else {
                self.position
            },
            rotation: if mask.contains(SyncMask::ROTATION) {
                other.rotation
            } else {
                self.rotation
            },
            scale: if mask.contains(SyncMask::SCALE) {
                other.scale
            } else {
                self.scale
            },
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// SyncSnapshot
// ============================================================================

/// State of one view as broadcast by its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    /// View the snapshot describes.
    pub view: ViewId,
    /// Fields present.
    pub mask: SyncMask,
    /// Transform; fields outside `mask` are ignored.
    pub transform: Transform,
    /// Owner id, present when `mask` has [`SyncMask::OWNER`].
    pub owner: Option<SocketId>,
}

impl SyncSnapshot {
    /// Creates a snapshot carrying the transform fields in `mask`.
    #[must_use]
    pub fn new(view: ViewId, mask: SyncMask, transform: Transform) -> Self {
        Self {
            view,
            mask: mask.difference(SyncMask::OWNER),
            transform,
            owner: None,
        }
    }

    /// Adds owner info to the snapshot.
    #[must_use]
    pub fn with_owner(mut self, owner: SocketId) -> Self {
        self.mask.insert(SyncMask::OWNER);
        self.owner = Some(owner);
        self
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.put_i32_le(self.view.as_i32());
        buf.put_u8(self.mask.bits());

        let t = &self.transform;
        if self.mask.contains(SyncMask::POSITION) {
            for v in t.position.to_array() {
                buf.put_f32_le(v);
            }
        }
        if self.mask.contains(SyncMask::ROTATION) {
            for v in t.rotation.to_array() {
                buf.put_f32_le(v);
            }
        }
        if self.mask.contains(SyncMask::SCALE) {
            for v in t.scale.to_array() {
                buf.put_f32_le(v);
            }
        }
        if self.mask.contains(SyncMask::OWNER) {
            let owner = self.owner.as_ref().map(SocketId::as_str).unwrap_or_default();
            put_str(buf, owner);
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let view = ViewId::new(get_i32(buf, "view id")?);
        ensure(&*buf, 1, "sync mask")?;
        let bits = buf.get_u8();
        let mask = SyncMask::from_bits(bits)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::protocol(format!("invalid sync mask: {bits:#04x}")))?;

        let mut transform = Transform::IDENTITY;
        if mask.contains(SyncMask::POSITION) {
            transform.position = read_vec3(buf, "position")?;
        }
        if mask.contains(SyncMask::ROTATION) {
            let mut q = [0.0; 4];
            for v in &mut q {
                *v = get_f32(buf, "rotation")?;
            }
            transform.rotation = Quat::from_array(q).normalize();
        }
        if mask.contains(SyncMask::SCALE) {
            transform.scale = read_vec3(buf, "scale")?;
        }
        let owner = if mask.contains(SyncMask::OWNER) {
            Some(get_socket_id(buf, "owner")?)
        } else {
            None
        };

        Ok(Self {
            view,
            mask,
            transform,
            owner,
        })
    }
}

fn read_vec3(buf: &mut &[u8], what: &str) -> Result<Vec3> {
    Ok(Vec3::new(
        get_f32(buf, what)?,
        get_f32(buf, what)?,
        get_f32(buf, what)?,
    ))
}

// ============================================================================
// SyncBatch
// ============================================================================

/// A timestamped group of snapshots from one owner.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBatch {
    /// Sender clock in seconds.
    pub timestamp: f64,
    /// Snapshots in the batch.
    pub snapshots: Vec<SyncSnapshot>,
}

impl SyncBatch {
    /// Encodes snapshots into one or more batches of at most `max_len` bytes.
    ///
    /// A single snapshot larger than `max_len` still gets a batch of its own.
    #[must_use]
    pub fn encode_split(timestamp: f64, snapshots: &[SyncSnapshot], max_len: usize) -> Vec<Vec<u8>> {
        let mut batches = Vec::new();
        let mut body = Vec::with_capacity(max_len);
        let mut count: u16 = 0;
        let mut scratch = Vec::with_capacity(64);

        for snapshot in snapshots {
            scratch.clear();
            snapshot.encode_into(&mut scratch);

            let full = BATCH_HEADER_LEN + body.len() + scratch.len() > max_len;
            if count > 0 && (full || count == u16::MAX) {
                batches.push(Self::finish(timestamp, count, &body));
                body.clear();
                count = 0;
            }

            body.extend_from_slice(&scratch);
            count += 1;
        }

        if count > 0 {
            batches.push(Self::finish(timestamp, count, &body));
        }

        batches
    }

    fn finish(timestamp: f64, count: u16, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BATCH_HEADER_LEN + body.len());
        buf.put_u8(SYNC_SYMBOL);
        buf.put_f64_le(timestamp);
        buf.put_u16_le(count);
        buf.put_slice(body);
        buf
    }

    /// Decodes a batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on a wrong symbol, invalid mask or
    /// truncated snapshot.
    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        ensure(&raw, BATCH_HEADER_LEN, "sync batch header")?;
        let symbol = raw.get_u8();
        if symbol != SYNC_SYMBOL {
            return Err(Error::protocol(format!("not a sync batch: {symbol:#04x}")));
        }

        let timestamp = raw.get_f64_le();
        let count = raw.get_u16_le() as usize;

        let mut snapshots = Vec::with_capacity(count);
        for _ in 0..count {
            snapshots.push(SyncSnapshot::decode_from(&mut raw)?);
        }

        Ok(Self {
            timestamp,
            snapshots,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
