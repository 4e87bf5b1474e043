//! Networked objects.
//!
//! Client and relay each hold part of the picture:
//!
//! | Side | Type | Role |
//! |------|------|------|
//! | client | [`ObjectRegistry`] | Local views, spawn round trip, ownership, snapshot replication |
//! | relay | [`ObjectDirectory`] | Per-room id allocation and ownership table |
//!
//! # Spawn Round Trip
//!
//! ```text
//! owner                       relay                       room
//!   │  SpawnRequest (Server)    │                           │
//!   │──────────────────────────►│ allocate smallest free id │
//!   │       SpawnResponse (All) │                           │
//!   │◄──────────────────────────┼──────────────────────────►│
//!   │ resolve placeholder       │            instantiate    │
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Smallest-free id allocator with quarantine.
pub mod allocator;

/// Relay-side per-room object directory.
pub mod directory;

/// Snapshot interpolation.
pub mod interpolation;

/// Client-side object registry.
pub mod registry;

/// Client-side view state.
pub mod view;

// ============================================================================
// Re-exports
// ============================================================================

pub use allocator::IdAllocator;
pub use directory::ObjectDirectory;
pub use interpolation::Interpolator;
pub use registry::{ObjectRegistry, Outgoing, ViewHost};
pub use view::NetworkView;
