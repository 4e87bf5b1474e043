//! Wire message types carried inside frames and text messages.
//!
//! # Protocol Overview
//!
//! | Message | Transport | Stream | Purpose |
//! |---------|-----------|--------|---------|
//! | [`ControlMessage`] | text frame | - | Room lifecycle, JSON envelope |
//! | [`ObjectMessage`] | binary frame | `OBJECT_CONTROL` | Spawn, ownership, despawn |
//! | [`SyncBatch`] | binary frame | `OBJECT_SYNC` | Transform snapshots |
//! | application payload | binary frame | `>= 1000` | Anything the application sends |
//!
//! Every binary WebSocket message is one frame chunk wrapped in a routing
//! prefix (client → relay) or a delivery prefix (relay → client). See
//! [`routing`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | JSON control envelope |
//! | `object` | Binary networked-object messages |
//! | `routing` | Emit modes and routing prefixes |
//! | `sync` | Transform snapshots and batches |

// ============================================================================
// Submodules
// ============================================================================

/// JSON control envelope.
pub mod envelope;

/// Networked-object control messages.
pub mod object;

/// Emit modes and routing prefixes.
pub mod routing;

/// Transform snapshot batches.
pub mod sync;

mod wire;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{ControlMessage, RoomRoster};
pub use object::{ObjectMessage, ViewRecord};
pub use routing::{Emit, decode_delivery, decode_routed, encode_delivery, encode_routed};
pub use sync::{SyncBatch, SyncMask, SyncSnapshot, Transform};
