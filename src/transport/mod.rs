//! Client transport.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                             ┌──────────────────┐
//! │  Endpoint (API)  │                             │      Relay       │
//! │        │         │         WebSocket           │                  │
//! │        ▼         │◄───────────────────────────►│  SessionRegistry │
//! │   supervisor     │  text: control envelopes    │                  │
//! │   └─ link loop   │  binary: routed frames      │                  │
//! └──────────────────┘                             └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. [`Endpoint::connect`] spawns the supervisor
//! 2. The supervisor opens the socket and runs the link loop
//! 3. `Welcome` assigns the socket id; the remembered room is joined
//! 4. On loss, [`Event::Disconnected`] then [`Event::Reconnecting`] after
//!    the configured delay, unless auto-reconnect is off
//! 5. [`Endpoint::close`] hands off the master role and ends the session
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Link loop and [`Event`] |
//! | `endpoint` | Public [`Endpoint`] API and supervisor |

// ============================================================================
// Submodules
// ============================================================================

/// Link loop.
pub mod connection;

/// Client endpoint.
pub mod endpoint;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Event;
pub use endpoint::Endpoint;
