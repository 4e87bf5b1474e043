//! fmsocket - chunked, multiplexed WebSocket transport for shared scenes.
//!
//! Clients connect to a room relay, exchange labelled payloads split into
//! fixed-size frames, and keep a set of networked objects in sync.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   routed frames / JSON control   ┌──────────────────┐
//! │   Session    │◄────────────────────────────────►│   RelayServer    │
//! │  ├ Endpoint  │            WebSocket             │  ├ registry      │
//! │  └ Objects   │                                  │  ├ directories   │
//! └──────────────┘                                  │  └ lobby (HTTP)  │
//!                                                   └──────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Payloads are split into frames with a 14-byte header and reassembled
//!   per (sender, label)
//! - The relay only reads frames addressed to it; everything else is routed
//!   by the emit mode in the routing prefix
//! - Global view ids are allocated by the relay, per room, with quarantine
//!   before reuse
//! - Object state changes are applied on the thread that calls
//!   [`Session::update`]
//!
//! # Quick Start
//!
//! ```no_run
//! use fmsocket::{Emit, Endpoint, EndpointConfig, RelayConfig, RelayServer, Result, StreamLabel};
//! use fmsocket::transport::Event;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let relay = RelayServer::bind(RelayConfig::default()).await?;
//!
//!     let config = EndpointConfig::builder()
//!         .url(relay.ws_url())
//!         .room("lobby")
//!         .build()?;
//!     let (endpoint, mut events) = Endpoint::connect(config)?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let Event::Connected { socket_id } = event {
//!             println!("connected as {socket_id}");
//!             endpoint.send_string(StreamLabel::FIRST_APPLICATION, &Emit::Others, "hello")?;
//!             break;
//!         }
//!     }
//!
//!     endpoint.close().await;
//!     relay.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`audio`] | PCM16 payloads and capture queue |
//! | [`config`] | Endpoint, object and relay configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`frame`] | Frame header, encoder and reassembler |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`network`] | Networked-object registry and interpolation |
//! | [`protocol`] | Control envelopes, routing prefixes, object and sync messages |
//! | [`relay`] | Room relay server and lobby |
//! | [`session`] | Update-loop scheduler |
//! | [`transport`] | Client endpoint with auto-reconnect |

// ============================================================================
// Modules
// ============================================================================

/// PCM16 audio payloads.
pub mod audio;

/// Configuration types.
///
/// Endpoints use builders; the relay also loads TOML.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Frame codec.
pub mod frame;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Networked objects.
pub mod network;

/// Wire messages.
pub mod protocol;

/// Room relay.
pub mod relay;

/// Update-loop scheduler.
pub mod session;

/// Client transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Audio
pub use audio::{AudioPacket, AudioQueue, AudioSender};

// Configuration
pub use config::{EndpointConfig, EndpointConfigBuilder, ObjectConfig, RelayConfig, RelayConfigBuilder};

// Error types
pub use error::{Error, Result};

// Frames
pub use frame::{CompletePayload, FrameEncoder, PayloadFormat, Reassembler};

// Identifier types
pub use identifiers::{PendingId, SequenceId, SocketId, StreamLabel, ViewHandle, ViewId};

// Objects
pub use network::{NetworkView, ObjectRegistry, ViewHost};

// Protocol
pub use protocol::{ControlMessage, Emit, RoomRoster, SyncMask, Transform};

// Relay
pub use relay::{RelayServer, SessionRegistry};

// Session & transport
pub use session::Session;
pub use transport::{Endpoint, Event};
