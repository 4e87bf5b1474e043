//! Room relay.
//!
//! Clients connect over WebSocket, join named rooms and exchange frames
//! through the relay. The relay routes by [`Emit`](crate::protocol::Emit)
//! mode, elects room masters and keeps each room's object directory.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `registry` | Clients, rooms, routing and master election |
//! | `server` | WebSocket listener and per-connection tasks |
//! | `http` | Lobby HTTP surface |

// ============================================================================
// Submodules
// ============================================================================

/// Lobby HTTP surface.
pub mod http;

/// Session registry.
pub mod registry;

/// WebSocket relay server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use http::LobbyServer;
pub use registry::{ClientInfo, Outbound, RELAY_SENDER, RoomInfo, SessionRegistry};
pub use server::RelayServer;
