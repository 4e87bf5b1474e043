//! Single-threaded scheduler binding an [`Endpoint`] to an
//! [`ObjectRegistry`].
//!
//! The application drives two tick boundaries from the thread that owns
//! its scene:
//!
//! | Call | Does |
//! |------|------|
//! | [`Session::update`] | drains transport events, applies object traffic, runs deferred destroys, sends due snapshots |
//! | [`Session::late_update`] | advances interpolation of remote views |
//!
//! Events that are not object traffic are handed back to the caller.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::audio::AudioQueue;
use crate::config::{EndpointConfig, ObjectConfig};
use crate::error::Result;
use crate::identifiers::{StreamLabel, ViewHandle, ViewId};
use crate::network::{ObjectRegistry, ViewHost};
use crate::protocol::{ControlMessage, Emit, ObjectMessage, SyncBatch};
use crate::transport::{Endpoint, Event};

// ============================================================================
// Session
// ============================================================================

/// Networked scene session.
///
/// # Example
///
/// ```ignore
/// let config = EndpointConfig::builder()
///     .url("ws://127.0.0.1:3000")
///     .room("lobby")
///     .build()?;
/// let mut session = Session::connect(config, scene)?;
///
/// loop {
///     for event in session.update(Instant::now()) {
///         // application traffic
///     }
///     session.late_update(frame_time);
/// }
/// ```
pub struct Session<H: ViewHost> {
    endpoint: Endpoint,
    events: mpsc::UnboundedReceiver<Event>,
    objects: ObjectRegistry<H>,
}

impl<H: ViewHost> Session<H> {
    /// Connects an endpoint and wraps it in a session.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::connect`] and [`ObjectConfig::validate`].
    pub fn connect(config: EndpointConfig, host: H) -> Result<Self> {
        let objects = config.objects.clone();
        objects.validate()?;
        let (endpoint, events) = Endpoint::connect(config)?;
        Ok(Self::new(endpoint, events, host, objects, Instant::now()))
    }

    /// Wraps an existing endpoint and its event receiver.
    pub fn new(
        endpoint: Endpoint,
        events: mpsc::UnboundedReceiver<Event>,
        host: H,
        config: ObjectConfig,
        now: Instant,
    ) -> Self {
        Self {
            endpoint,
            events,
            objects: ObjectRegistry::new(host, config, now),
        }
    }

    /// Underlying endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Object registry.
    #[inline]
    #[must_use]
    pub fn objects(&self) -> &ObjectRegistry<H> {
        &self.objects
    }

    /// Object registry, mutably.
    #[inline]
    pub fn objects_mut(&mut self) -> &mut ObjectRegistry<H> {
        &mut self.objects
    }

    /// Closes the endpoint.
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}

// ============================================================================
// Session - Tick Boundaries
// ============================================================================

impl<H: ViewHost> Session<H> {
    /// Runs one update tick and returns events for the application.
    pub fn update(&mut self, now: Instant) -> Vec<Event> {
        let mut passthrough = Vec::new();

        while let Ok(event) = self.events.try_recv() {
            if let Some(event) = self.handle_event(event, now) {
                passthrough.push(event);
            }
        }

        let destroyed = self.objects.update();
        if destroyed > 0 {
            trace!(destroyed, "Deferred destroys applied");
        }

        self.objects.tick(now);
        self.flush();

        passthrough
    }

    /// Advances interpolation of remote views by `dt`.
    pub fn late_update(&mut self, dt: Duration) {
        self.objects.late_update(dt);
    }

    /// Applies one transport event; returns it if the application should
    /// see it.
    pub(crate) fn handle_event(&mut self, event: Event, now: Instant) -> Option<Event> {
        match event {
            Event::Connected { ref socket_id } => {
                self.objects.set_local_id(socket_id.clone());
                Some(event)
            }

            Event::Control(ControlMessage::Roster(ref roster)) => {
                self.objects.on_roster(roster);
                Some(event)
            }

            Event::Control(ControlMessage::ClientJoined { ref socket_id }) => {
                debug!(socket_id = %socket_id, "Client joined, resending full state");
                self.objects.resend_full_state();
                Some(event)
            }

            Event::Payload {
                ref sender,
                ref payload,
            } if payload.label == StreamLabel::OBJECT_CONTROL => {
                match ObjectMessage::decode(&payload.data) {
                    Ok(message) => self.objects.handle_object_message(message),
                    Err(e) => warn!(sender = %sender, error = %e, "Undecodable object message"),
                }
                None
            }

            Event::Payload {
                ref sender,
                ref payload,
            } if payload.label == StreamLabel::OBJECT_SYNC => {
                match SyncBatch::decode(&payload.data) {
                    Ok(batch) => self.objects.handle_sync(batch, now),
                    Err(e) => debug!(sender = %sender, error = %e, "Undecodable sync batch"),
                }
                None
            }

            other => Some(other),
        }
    }

    fn flush(&mut self) {
        for out in self.objects.drain_outgoing() {
            if let Err(e) = self
                .endpoint
                .send(out.label, out.format, &out.emit, &out.payload)
            {
                debug!(label = %out.label, error = %e, "Outgoing object traffic dropped");
            }
        }
    }
}

// ============================================================================
// Session - Objects & Audio
// ============================================================================

impl<H: ViewHost> Session<H> {
    /// Spawns a locally owned view. The request goes out on the next update.
    ///
    /// # Errors
    ///
    /// See [`ObjectRegistry::spawn`].
    pub fn spawn(&mut self, prefab: &str) -> Result<ViewHandle> {
        self.objects.spawn(prefab)
    }

    /// Despawns an owned view for the whole room.
    ///
    /// # Errors
    ///
    /// See [`ObjectRegistry::despawn`].
    pub fn despawn(&mut self, view: ViewId) -> Result<()> {
        self.objects.despawn(view)
    }

    /// Takes ownership of a view.
    ///
    /// # Errors
    ///
    /// See [`ObjectRegistry::take_ownership`].
    pub fn take_ownership(&mut self, view: ViewId, now: Instant) -> Result<()> {
        self.objects.take_ownership(view, now)
    }

    /// Sends every packet queued by the capture thread. Returns how many
    /// were sent.
    pub fn flush_audio(&self, queue: &AudioQueue, emit: &Emit) -> usize {
        let mut sent = 0;
        for packet in queue.drain() {
            match self.endpoint.send_audio(emit, &packet) {
                Ok(_) => sent += 1,
                Err(e) => trace!(error = %e, "Audio packet dropped"),
            }
        }
        sent
    }
}

// ============================================================================
// Tests
// ============================================================================
