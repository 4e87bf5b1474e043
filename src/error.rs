//! Error types for fmsocket.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use fmsocket::{Endpoint, EndpointConfig, Result};
//!
//! async fn example() -> Result<()> {
//!     let config = EndpointConfig::builder().url("ws://127.0.0.1:3000").build()?;
//!     let (endpoint, _events) = Endpoint::connect(config)?;
//!     endpoint.join("lobby")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidArgument`], [`Error::MalformedFrame`] |
//! | Registry | [`Error::RoomNotFound`], [`Error::ClientNotFound`], [`Error::ViewNotFound`], [`Error::NotRoomMaster`], [`Error::NotOwner`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Toml`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{SocketId, ViewId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when endpoint or relay configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection attempt did not complete in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed, either explicitly or by the remote end.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// Protocol violation or undecodable message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Frame header could not be parsed.
    ///
    /// The reassembler never surfaces this upward; it drops the chunk.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// What was wrong with the frame.
        message: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Room does not exist.
    #[error("Room not found: {room}")]
    RoomNotFound {
        /// The missing room name.
        room: String,
    },

    /// Client is not connected.
    #[error("Client not found: {socket_id}")]
    ClientNotFound {
        /// The unknown socket id.
        socket_id: SocketId,
    },

    /// Networked view is not registered.
    #[error("View not found: {view_id}")]
    ViewNotFound {
        /// The missing view id.
        view_id: ViewId,
    },

    /// Operation requires the room master role.
    #[error("Client {socket_id} is not the room master")]
    NotRoomMaster {
        /// The client that attempted the operation.
        socket_id: SocketId,
    },

    /// Operation requires ownership of the view.
    #[error("View {view_id} is not owned locally")]
    NotOwner {
        /// The view the operation targeted.
        view_id: ViewId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// TOML configuration parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates a room not found error.
    #[inline]
    pub fn room_not_found(room: impl Into<String>) -> Self {
        Self::RoomNotFound { room: room.into() }
    }

    /// Creates a client not found error.
    #[inline]
    pub fn client_not_found(socket_id: SocketId) -> Self {
        Self::ClientNotFound { socket_id }
    }

    /// Creates a view not found error.
    #[inline]
    pub fn view_not_found(view_id: ViewId) -> Self {
        Self::ViewNotFound { view_id }
    }

    /// Creates a not room master error.
    #[inline]
    pub fn not_room_master(socket_id: SocketId) -> Self {
        Self::NotRoomMaster { socket_id }
    }

    /// Creates a not owner error.
    #[inline]
    pub fn not_owner(view_id: ViewId) -> Self {
        Self::NotOwner { view_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry or after reconnecting.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("chunk size too small");
        assert_eq!(err.to_string(), "Configuration error: chunk size too small");
    }

    #[test]
    fn test_registry_error_display() {
        let err = Error::view_not_found(ViewId::new(7));
        assert_eq!(err.to_string(), "View not found: 7");

        let err = Error::room_not_found("lobby");
        assert_eq!(err.to_string(), "Room not found: lobby");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::connection_timeout(5000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::connection_timeout(1000).is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::connection_timeout(1000).is_recoverable());
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(!Error::not_owner(ViewId::new(1)).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
