//! Type-safe identifiers for transport and registry entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Wraps | Scope |
//! |------|-------|-------|
//! | [`SocketId`] | `String` | One WebSocket client, assigned by the relay |
//! | [`StreamLabel`] | `u16` | One multiplexed logical stream |
//! | [`SequenceId`] | `u16` | One logical payload on a stream, wraps at 1024 |
//! | [`ViewId`] | `i32` | Global id of a networked view (`-1` while pending) |
//! | [`PendingId`] | `i32` | Requester-local placeholder id for a spawn |
//! | [`ViewHandle`] | `u64` | Local handle returned by `spawn`, stable across resolution |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// SocketId
// ============================================================================

/// Identifier of a connected client, assigned by the relay on connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(String);

impl SocketId {
    /// Creates a socket id from an existing string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random socket id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SocketId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// StreamLabel
// ============================================================================

/// 16-bit label multiplexing independent streams over one connection.
///
/// Labels below [`StreamLabel::FIRST_APPLICATION`] are reserved for
/// internal control streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamLabel(u16);

impl StreamLabel {
    /// Spawn, ownership, despawn and full-registry messages.
    pub const OBJECT_CONTROL: Self = Self(10);

    /// Batched transform snapshots.
    pub const OBJECT_SYNC: Self = Self(11);

    /// PCM16 audio packets.
    pub const AUDIO: Self = Self(20);

    /// First label available to applications.
    pub const FIRST_APPLICATION: Self = Self(1000);

    /// Creates a label from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw label value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` if the label is in the reserved control range.
    #[inline]
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_APPLICATION.0
    }
}

impl fmt::Display for StreamLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SequenceId
// ============================================================================

/// Per-label payload counter.
///
/// Deliberately small: it wraps back to zero after [`SequenceId::MAX`],
/// so it only distinguishes payloads that are close in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SequenceId(u16);

impl SequenceId {
    /// Largest sequence value before wrapping.
    pub const MAX: u16 = 1024;

    /// Creates a sequence id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the following sequence id, wrapping to zero after [`Self::MAX`].
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        if self.0 >= Self::MAX {
            Self(0)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ViewId
// ============================================================================

/// Global identifier of a networked view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(i32);

impl ViewId {
    /// Placeholder value while the spawn round trip is in flight.
    pub const PENDING: Self = Self(-1);

    /// Creates a view id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` while the view has no global id yet.
    #[inline]
    #[must_use]
    pub const fn is_pending(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// PendingId
// ============================================================================

/// Requester-local placeholder id, unique per owner only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingId(i32);

impl PendingId {
    /// Creates a pending id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ViewHandle
// ============================================================================

/// Process-wide counter for view handles.
static NEXT_VIEW_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Local handle to a networked view.
///
/// Unlike [`ViewId`], a handle exists from the moment a view is created
/// locally and never changes when the global id is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewHandle(u64);

impl ViewHandle {
    /// Allocates the next unique handle.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_VIEW_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_id_generate_unique() {
        let a = SocketId::generate();
        let b = SocketId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_socket_id_serde_transparent() {
        let id = SocketId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }

    #[test]
    fn test_stream_label_reserved_range() {
        assert!(StreamLabel::OBJECT_CONTROL.is_reserved());
        assert!(StreamLabel::new(999).is_reserved());
        assert!(!StreamLabel::FIRST_APPLICATION.is_reserved());
    }

    #[test]
    fn test_sequence_wraps_after_max() {
        let seq = SequenceId::new(SequenceId::MAX - 1);
        assert_eq!(seq.next().as_u16(), SequenceId::MAX);
        assert_eq!(seq.next().next().as_u16(), 0);
    }

    #[test]
    fn test_view_id_pending() {
        assert!(ViewId::PENDING.is_pending());
        assert!(!ViewId::new(0).is_pending());
    }

    #[test]
    fn test_view_handles_increase() {
        let a = ViewHandle::next();
        let b = ViewHandle::next();
        assert!(b > a);
    }
}
