//! Endpoint, object-sync and relay configuration.
//!
//! Client configuration is built in code:
//!
//! ```no_run
//! use std::time::Duration;
//! use fmsocket::EndpointConfig;
//!
//! # fn example() -> fmsocket::Result<()> {
//! let config = EndpointConfig::builder()
//!     .url("ws://127.0.0.1:3000")
//!     .room("lobby")
//!     .reconnect_delay(Duration::from_millis(500))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! Relay configuration is usually read from TOML. Durations are given in
//! milliseconds:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 3000
//! http_port = 3001
//! quarantine_ms = 5000
//! stale_master_timeout_ms = 3000
//! log_level = "info"
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::frame::HEADER_LEN;

// ============================================================================
// Defaults
// ============================================================================

/// Default frame size, header included.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default cap on one encoded sync batch.
pub const DEFAULT_MAX_SYNC_BATCH: usize = 1350;

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_OWNERSHIP_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_QUARANTINE: Duration = Duration::from_secs(5);
const DEFAULT_STALE_MASTER_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size <= HEADER_LEN {
        return Err(Error::config(format!(
            "chunk_size must exceed the {HEADER_LEN}-byte frame header, got {chunk_size}"
        )));
    }
    if chunk_size > i32::MAX as usize {
        return Err(Error::config(format!("chunk_size too large: {chunk_size}")));
    }
    Ok(())
}

// ============================================================================
// ObjectConfig
// ============================================================================

/// Timing of networked-object replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectConfig {
    /// Interval between outgoing snapshot batches.
    pub sync_interval: Duration,
    /// Window after taking ownership during which incoming snapshots for
    /// the view are ignored.
    pub ownership_grace: Duration,
    /// Largest encoded sync batch in bytes.
    pub max_sync_batch: usize,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            ownership_grace: DEFAULT_OWNERSHIP_GRACE,
            max_sync_batch: DEFAULT_MAX_SYNC_BATCH,
        }
    }
}

impl ObjectConfig {
    /// Checks the values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero interval or a batch cap too
    /// small to hold a batch header.
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(Error::config("sync_interval must be non-zero"));
        }
        if self.max_sync_batch < 64 {
            return Err(Error::config(format!(
                "max_sync_batch must be at least 64 bytes, got {}",
                self.max_sync_batch
            )));
        }
        Ok(())
    }
}

// ============================================================================
// EndpointConfig
// ============================================================================

/// Client endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Relay WebSocket URL (`ws://` or `wss://`).
    pub url: Url,
    /// Frame size including the header.
    pub chunk_size: usize,
    /// Deflate payloads at or above the compression threshold.
    pub compression: bool,
    /// Reconnect after the connection drops.
    pub auto_reconnect: bool,
    /// Pause between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Limit on one connect attempt.
    pub connect_timeout: Duration,
    /// Idle limit for incomplete chunk sets; `None` keeps them forever.
    pub reassembly_timeout: Option<Duration>,
    /// Room joined after every (re)connect.
    pub room: Option<String>,
    /// Object replication timing.
    pub objects: ObjectConfig,
}

impl EndpointConfig {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> EndpointConfigBuilder {
        EndpointConfigBuilder::default()
    }
}

/// Fluent builder for [`EndpointConfig`].
#[derive(Debug, Clone)]
pub struct EndpointConfigBuilder {
    url: Option<String>,
    chunk_size: usize,
    compression: bool,
    auto_reconnect: bool,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    reassembly_timeout: Option<Duration>,
    room: Option<String>,
    objects: ObjectConfig,
}

impl Default for EndpointConfigBuilder {
    fn default() -> Self {
        Self {
            url: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: true,
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reassembly_timeout: Some(DEFAULT_REASSEMBLY_TIMEOUT),
            room: None,
            objects: ObjectConfig::default(),
        }
    }
}

impl EndpointConfigBuilder {
    /// Sets the relay URL.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the frame size, header included.
    #[inline]
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enables or disables payload compression.
    #[inline]
    #[must_use]
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Enables or disables auto-reconnect.
    #[inline]
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Sets the pause between reconnect attempts.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the reassembly idle timeout; `None` disables eviction.
    #[inline]
    #[must_use]
    pub fn reassembly_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Sets the room joined after connecting.
    #[inline]
    #[must_use]
    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    /// Sets the object replication timing.
    #[inline]
    #[must_use]
    pub fn objects(mut self, objects: ObjectConfig) -> Self {
        self.objects = objects;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL is missing, unparsable or not `ws`/`wss`
    /// - [`Error::Config`] if `chunk_size` cannot hold a frame header
    /// - [`Error::Config`] if the object timing is invalid
    pub fn build(self) -> Result<EndpointConfig> {
        let url = self.validate_url()?;
        validate_chunk_size(self.chunk_size)?;
        self.objects.validate()?;

        if let Some(room) = &self.room
            && room.is_empty()
        {
            return Err(Error::config("room name must not be empty"));
        }

        Ok(EndpointConfig {
            url,
            chunk_size: self.chunk_size,
            compression: self.compression,
            auto_reconnect: self.auto_reconnect,
            reconnect_delay: self.reconnect_delay,
            connect_timeout: self.connect_timeout,
            reassembly_timeout: self.reassembly_timeout,
            room: self.room,
            objects: self.objects,
        })
    }

    fn validate_url(&self) -> Result<Url> {
        let raw = self.url.as_deref().ok_or_else(|| {
            Error::config(
                "Relay URL is required. Use .url() to set it.\n\
                 Example: EndpointConfig::builder().url(\"ws://127.0.0.1:3000\")",
            )
        })?;

        let url = Url::parse(raw).map_err(|e| Error::config(format!("invalid URL {raw}: {e}")))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::config(format!(
                "unsupported URL scheme {other}, expected ws or wss"
            ))),
        }
    }
}

// ============================================================================
// RelayConfig
// ============================================================================

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address both listeners bind to.
    pub bind: IpAddr,
    /// WebSocket port; `0` picks a free port.
    pub port: u16,
    /// Lobby HTTP port; `None` disables the lobby.
    pub http_port: Option<u16>,
    /// Frame size for relay-originated messages.
    pub chunk_size: usize,
    /// How long a freed view id stays unusable.
    #[serde(rename = "quarantine_ms", with = "millis")]
    pub quarantine: Duration,
    /// How long a room may go without a master before one is promoted.
    #[serde(rename = "stale_master_timeout_ms", with = "millis")]
    pub stale_master_timeout: Duration,
    /// Period of the maintenance task.
    #[serde(rename = "maintenance_interval_ms", with = "millis")]
    pub maintenance_interval: Duration,
    /// Idle limit for incomplete chunk sets addressed to the relay.
    #[serde(rename = "reassembly_timeout_ms", with = "opt_millis")]
    pub reassembly_timeout: Option<Duration>,
    /// Default `tracing` filter, overridden by `RUST_LOG`.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            http_port: Some(3001),
            chunk_size: DEFAULT_CHUNK_SIZE,
            quarantine: DEFAULT_QUARANTINE,
            stale_master_timeout: DEFAULT_STALE_MASTER_TIMEOUT,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            reassembly_timeout: Some(DEFAULT_REASSEMBLY_TIMEOUT),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Creates a builder starting from the defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Reads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Toml`] if it is not valid configuration
    /// - [`Error::Config`] if a value is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::load`] minus IO.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unusable chunk size, a zero
    /// maintenance interval or an HTTP port clashing with the WebSocket port.
    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size)?;

        if self.maintenance_interval.is_zero() {
            return Err(Error::config("maintenance_interval must be non-zero"));
        }

        if let Some(http_port) = self.http_port
            && http_port != 0
            && http_port == self.port
        {
            return Err(Error::config(format!(
                "http_port and port must differ, both are {http_port}"
            )));
        }

        Ok(())
    }

    /// WebSocket listen address.
    #[inline]
    #[must_use]
    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Lobby listen address, if enabled.
    #[inline]
    #[must_use]
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_port.map(|port| SocketAddr::new(self.bind, port))
    }
}

/// Fluent builder for [`RelayConfig`].
#[derive(Debug, Clone, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn bind(mut self, ip: IpAddr) -> Self {
        self.config.bind = ip;
        self
    }

    /// Sets the WebSocket port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the lobby port; `None` disables the lobby.
    #[inline]
    #[must_use]
    pub fn http_port(mut self, port: Option<u16>) -> Self {
        self.config.http_port = port;
        self
    }

    /// Sets the frame size for relay-originated messages.
    #[inline]
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    /// Sets the id quarantine.
    #[inline]
    #[must_use]
    pub fn quarantine(mut self, quarantine: Duration) -> Self {
        self.config.quarantine = quarantine;
        self
    }

    /// Sets the stale-master timeout.
    #[inline]
    #[must_use]
    pub fn stale_master_timeout(mut self, timeout: Duration) -> Self {
        self.config.stale_master_timeout = timeout;
        self
    }

    /// Sets the maintenance period.
    #[inline]
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    /// Sets the log filter.
    #[inline]
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// See [`RelayConfig::validate`].
    pub fn build(self) -> Result<RelayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let config = EndpointConfig::builder()
            .url("ws://127.0.0.1:3000")
            .build()
            .unwrap();

        assert_eq!(config.chunk_size, 1024);
        assert!(config.compression);
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.reassembly_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.objects.sync_interval, Duration::from_millis(50));
        assert_eq!(config.objects.max_sync_batch, 1350);
    }

    #[test]
    fn test_endpoint_requires_url() {
        let err = EndpointConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_endpoint_rejects_http_scheme() {
        let result = EndpointConfig::builder().url("http://localhost").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint_rejects_tiny_chunks() {
        let result = EndpointConfig::builder()
            .url("ws://localhost:3000")
            .chunk_size(14)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_relay_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.http_port, Some(3001));
        assert_eq!(config.quarantine, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relay_from_toml() {
        let config = RelayConfig::from_toml_str(
            r#"
            bind = "127.0.0.1"
            port = 4000
            quarantine_ms = 250
            reassembly_timeout_ms = 1500
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.http_port, Some(3001));
        assert_eq!(config.quarantine, Duration::from_millis(250));
        assert_eq!(config.reassembly_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_relay_unknown_key() {
        let err = RelayConfig::from_toml_str("prot = 1").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn test_relay_port_clash() {
        let result = RelayConfig::builder()
            .port(4000)
            .http_port(Some(4000))
            .build();
        assert!(result.is_err());
    }
}
