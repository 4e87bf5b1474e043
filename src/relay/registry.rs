//! Clients, rooms and routing on the relay.
//!
//! The registry is plain data behind a `parking_lot::RwLock`; connection
//! tasks, the maintenance task and the lobby thread all go through it.
//! Sends never block: each client owns an unbounded channel drained by its
//! connection task.
//!
//! # Room Lifecycle
//!
//! ```text
//!            join (creates, joiner is master)
//!   Empty ───────────────────────────────────► Active
//!     ▲                                          │ master leaves: slot vacant
//!     │       last member leaves                 │ stale timeout: first member promoted
//!     └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::frame::{FrameEncoder, PayloadFormat};
use crate::identifiers::{SocketId, StreamLabel};
use crate::network::ObjectDirectory;
use crate::protocol::{ControlMessage, Emit, ObjectMessage, RoomRoster, encode_delivery};

// ============================================================================
// Constants
// ============================================================================

/// Sender id stamped on messages the relay originates.
pub const RELAY_SENDER: &str = "relay";

// ============================================================================
// Outbound
// ============================================================================

/// A message queued for one client's connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON control envelope.
    Text(String),
    /// Delivery-prefixed frame chunk.
    Binary(Bytes),
    /// Close the connection.
    Close,
}

// ============================================================================
// Client / Room
// ============================================================================

#[derive(Debug)]
struct Client {
    room: Option<String>,
    username: String,
    connected_at: Instant,
    last_seen: Instant,
    tx: mpsc::UnboundedSender<Outbound>,
}

#[derive(Debug)]
struct Room {
    master: Option<SocketId>,
    members: Vec<SocketId>,
    created_at: Instant,
    master_vacant_since: Option<Instant>,
    objects: ObjectDirectory,
}

impl Room {
    fn roster(&self, name: &str) -> RoomRoster {
        RoomRoster {
            room: name.to_string(),
            master: self.master.clone(),
            members: self.members.clone(),
        }
    }
}

// ============================================================================
// Lobby Snapshots
// ============================================================================

/// Lobby view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    /// Room name.
    pub name: String,
    /// Current master, if any.
    pub master: Option<SocketId>,
    /// Members in join order.
    pub members: Vec<SocketId>,
    /// Live networked views.
    pub objects: usize,
    /// Seconds since the room was created.
    pub age_secs: u64,
}

/// Lobby view of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    /// Socket id.
    pub wsid: SocketId,
    /// Display name, empty until set.
    pub username: String,
    /// Current room.
    pub room: Option<String>,
    /// Whether the client is master of its room.
    pub is_room_master: bool,
    /// Seconds since the client connected.
    pub connected_secs: u64,
    /// Seconds since the client last sent anything.
    pub idle_secs: u64,
}

// ============================================================================
// SessionRegistry
// ============================================================================

/// Connected clients and their rooms.
pub struct SessionRegistry {
    clients: FxHashMap<SocketId, Client>,
    rooms: BTreeMap<String, Room>,
    encoder: FrameEncoder,
    quarantine: Duration,
    relay_id: SocketId,
}

// ============================================================================
// SessionRegistry - Construction & Lifecycle
// ============================================================================

impl SessionRegistry {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `chunk_size` cannot hold a
    /// frame header.
    pub fn new(chunk_size: usize, quarantine: Duration) -> Result<Self> {
        Ok(Self {
            clients: FxHashMap::default(),
            rooms: BTreeMap::new(),
            encoder: FrameEncoder::new(chunk_size, true)?,
            quarantine,
            relay_id: SocketId::new(RELAY_SENDER),
        })
    }

    /// Creates a registry from relay configuration.
    ///
    /// # Errors
    ///
    /// See [`SessionRegistry::new`].
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.quarantine)
    }

    /// Registers a connection and sends it its id.
    pub fn connect(&mut self, socket_id: SocketId, tx: mpsc::UnboundedSender<Outbound>, now: Instant) {
        let welcome = ControlMessage::Welcome {
            socket_id: socket_id.clone(),
        };
        if let Ok(json) = welcome.to_json() {
            let _ = tx.send(Outbound::Text(json));
        }

        self.clients.insert(
            socket_id.clone(),
            Client {
                room: None,
                username: String::new(),
                connected_at: now,
                last_seen: now,
                tx,
            },
        );

        info!(socket_id = %socket_id, clients = self.clients.len(), "Client connected");
    }

    /// Removes a client.
    ///
    /// A departing master leaves the master slot vacant; no successor is
    /// elected here. Returns `false` for an unknown client.
    pub fn disconnect(&mut self, socket_id: &SocketId, now: Instant) -> bool {
        self.remove_from_room(socket_id, now);

        let removed = self.clients.remove(socket_id).is_some();
        if removed {
            info!(socket_id = %socket_id, clients = self.clients.len(), "Client disconnected");
        }
        removed
    }

    /// Records activity from a client.
    pub fn touch(&mut self, socket_id: &SocketId, now: Instant) {
        if let Some(client) = self.clients.get_mut(socket_id) {
            client.last_seen = now;
        }
    }

    /// Sets a client's display name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientNotFound`] for an unknown client.
    pub fn rename(&mut self, socket_id: &SocketId, username: impl Into<String>) -> Result<()> {
        let client = self
            .clients
            .get_mut(socket_id)
            .ok_or_else(|| Error::client_not_found(socket_id.clone()))?;
        client.username = username.into();
        debug!(socket_id = %socket_id, username = %client.username, "Client renamed");
        Ok(())
    }
}

// ============================================================================
// SessionRegistry - Rooms
// ============================================================================

impl SessionRegistry {
    /// Adds a client to a room, creating it if needed.
    ///
    /// A client in another room leaves it first. The joiner receives the
    /// room's object directory; the master is told about the newcomer.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientNotFound`] for an unknown client
    /// - [`Error::InvalidArgument`] for an empty room name
    pub fn join(&mut self, socket_id: &SocketId, room: &str, now: Instant) -> Result<()> {
        if room.is_empty() {
            return Err(Error::invalid_argument("room name must not be empty"));
        }

        let current = self
            .clients
            .get(socket_id)
            .ok_or_else(|| Error::client_not_found(socket_id.clone()))?
            .room
            .clone();

        if current.as_deref() != Some(room) {
            if current.is_some() {
                self.remove_from_room(socket_id, now);
            }

            let quarantine = self.quarantine;
            let entry = self.rooms.entry(room.to_string()).or_insert_with(|| {
                info!(room, master = %socket_id, "Room created");
                Room {
                    master: Some(socket_id.clone()),
                    members: Vec::new(),
                    created_at: now,
                    master_vacant_since: None,
                    objects: ObjectDirectory::new(quarantine),
                }
            });
            entry.members.push(socket_id.clone());

            if let Some(client) = self.clients.get_mut(socket_id) {
                client.room = Some(room.to_string());
            }

            debug!(socket_id = %socket_id, room, "Client joined room");
        }

        self.broadcast_roster(room);

        let (master, records) = match self.rooms.get(room) {
            Some(r) => (r.master.clone(), r.objects.records()),
            None => return Ok(()),
        };

        if let Some(master) = master
            && &master != socket_id
        {
            self.send_control(
                &master,
                &ControlMessage::ClientJoined {
                    socket_id: socket_id.clone(),
                },
            );
        }

        self.send_object(
            std::slice::from_ref(socket_id),
            &ObjectMessage::FullSync { records },
        );

        Ok(())
    }

    /// Removes a client from its room.
    ///
    /// Returns the room left, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientNotFound`] for an unknown client.
    pub fn leave(&mut self, socket_id: &SocketId, now: Instant) -> Result<Option<String>> {
        if !self.clients.contains_key(socket_id) {
            return Err(Error::client_not_found(socket_id.clone()));
        }
        Ok(self.remove_from_room(socket_id, now))
    }

    fn remove_from_room(&mut self, socket_id: &SocketId, now: Instant) -> Option<String> {
        let name = self.clients.get_mut(socket_id)?.room.take()?;
        let room = self.rooms.get_mut(&name)?;

        room.members.retain(|m| m != socket_id);
        room.objects.retire_owner(socket_id, now);

        if room.master.as_ref() == Some(socket_id) {
            room.master = None;
            room.master_vacant_since = Some(now);
            debug!(room = %name, socket_id = %socket_id, "Master left, slot vacant");
        }

        if room.members.is_empty() {
            self.rooms.remove(&name);
            info!(room = %name, "Room destroyed");
        } else {
            self.broadcast_roster(&name);
        }

        debug!(socket_id = %socket_id, room = %name, "Client left room");
        Some(name)
    }

    /// Hands the master role to the next member in join order.
    ///
    /// Returns the new master, or `None` if nobody else is in the room.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientNotFound`] for an unknown client
    /// - [`Error::NotRoomMaster`] if `from` is not its room's master
    pub fn request_master_handoff(&mut self, from: &SocketId) -> Result<Option<SocketId>> {
        let name = self
            .clients
            .get(from)
            .ok_or_else(|| Error::client_not_found(from.clone()))?
            .room
            .clone()
            .ok_or_else(|| Error::not_room_master(from.clone()))?;

        let room = self
            .rooms
            .get_mut(&name)
            .ok_or_else(|| Error::room_not_found(name.clone()))?;

        if room.master.as_ref() != Some(from) {
            return Err(Error::not_room_master(from.clone()));
        }

        let Some(successor) = room.members.iter().find(|m| *m != from).cloned() else {
            debug!(room = %name, "Handoff requested with no other members");
            return Ok(None);
        };

        room.master = Some(successor.clone());
        room.master_vacant_since = None;
        info!(room = %name, from = %from, to = %successor, "Master handed off");

        self.announce_master(&name);
        Ok(Some(successor))
    }

    /// Promotes the first member of every room whose master slot has been
    /// vacant for at least `timeout`.
    ///
    /// Returns `(room, new master)` for every promotion.
    pub fn promote_stale_masters(&mut self, now: Instant, timeout: Duration) -> Vec<(String, SocketId)> {
        let mut promoted = Vec::new();

        for (name, room) in &mut self.rooms {
            let Some(since) = room.master_vacant_since else {
                continue;
            };
            if now.saturating_duration_since(since) < timeout {
                continue;
            }
            if let Some(first) = room.members.first().cloned() {
                room.master = Some(first.clone());
                room.master_vacant_since = None;
                info!(room = %name, master = %first, "Stale master slot filled");
                promoted.push((name.clone(), first));
            }
        }

        for (name, _) in &promoted {
            self.announce_master(name);
        }

        promoted
    }

    /// Periodic upkeep: master promotion and quarantine expiry.
    pub fn maintain(&mut self, now: Instant, stale_master_timeout: Duration) {
        self.promote_stale_masters(now, stale_master_timeout);
        for room in self.rooms.values_mut() {
            room.objects.maintain(now);
        }
    }

    fn announce_master(&self, name: &str) {
        let Some(room) = self.rooms.get(name) else {
            return;
        };
        let changed = ControlMessage::MasterChanged {
            master: room.master.clone(),
        };
        for member in &room.members {
            self.send_control(member, &changed);
        }
        self.broadcast_roster(name);
    }

    fn broadcast_roster(&self, name: &str) {
        let Some(room) = self.rooms.get(name) else {
            return;
        };
        let roster = ControlMessage::Roster(room.roster(name));
        for member in &room.members {
            self.send_control(member, &roster);
        }
    }
}

// ============================================================================
// SessionRegistry - Routing
// ============================================================================

impl SessionRegistry {
    /// Resolves the recipients of a message from `sender`.
    ///
    /// `Server` and senders outside a room yield nobody, except for
    /// `Target` which reaches any connected client.
    #[must_use]
    pub fn recipients(&self, sender: &SocketId, emit: &Emit) -> Vec<SocketId> {
        if let Emit::Target(target) = emit {
            return if self.clients.contains_key(target) {
                vec![target.clone()]
            } else {
                trace!(target = %target, "Target not connected, dropping");
                Vec::new()
            };
        }

        let Some(room) = self
            .clients
            .get(sender)
            .and_then(|c| c.room.as_ref())
            .and_then(|name| self.rooms.get(name))
        else {
            return Vec::new();
        };

        match emit {
            Emit::All => room.members.clone(),
            Emit::Others => room.members.iter().filter(|m| *m != sender).cloned().collect(),
            Emit::RoomMaster => room.master.iter().cloned().collect(),
            Emit::Server | Emit::Target(_) => Vec::new(),
        }
    }

    /// Forwards a frame chunk from `sender`. Returns the delivered count.
    pub fn route(&self, sender: &SocketId, emit: &Emit, chunk: &[u8]) -> usize {
        let recipients = self.recipients(sender, emit);
        if recipients.is_empty() {
            return 0;
        }

        let delivery = encode_delivery(sender, chunk);
        let delivered = recipients
            .iter()
            .filter(|id| self.send(id, Outbound::Binary(delivery.clone())))
            .count();

        trace!(sender = %sender, %emit, delivered, "Chunk routed");
        delivered
    }

    /// Forwards a control message from `sender`. Returns the delivered count.
    pub fn route_control(&self, sender: &SocketId, emit: &Emit, message: &ControlMessage) -> usize {
        let Ok(json) = message.to_json() else {
            return 0;
        };
        self.recipients(sender, emit)
            .iter()
            .filter(|id| self.send(id, Outbound::Text(json.clone())))
            .count()
    }

    /// Applies a control message sent by a client.
    ///
    /// # Errors
    ///
    /// Propagates registry errors such as [`Error::NotRoomMaster`].
    pub fn handle_control(&mut self, sender: &SocketId, message: ControlMessage, now: Instant) -> Result<()> {
        match message {
            ControlMessage::Join { room } => self.join(sender, &room, now),
            ControlMessage::Leave => self.leave(sender, now).map(|_| ()),
            ControlMessage::Rename { username } => self.rename(sender, username),
            ControlMessage::MasterHandoff => self.request_master_handoff(sender).map(|_| ()),
            ControlMessage::MarkerUndo { .. } => {
                let forwarded = ControlMessage::MarkerUndo {
                    from: Some(sender.clone()),
                };
                self.route_control(sender, &Emit::Others, &forwarded);
                Ok(())
            }
            ControlMessage::MarkerRedo { .. } => {
                let forwarded = ControlMessage::MarkerRedo {
                    from: Some(sender.clone()),
                };
                self.route_control(sender, &Emit::Others, &forwarded);
                Ok(())
            }
            ControlMessage::Ping => {
                self.send_control(sender, &ControlMessage::Pong);
                Ok(())
            }
            ControlMessage::Pong => Ok(()),
            other => {
                debug!(sender = %sender, ?other, "Ignoring relay-bound control message");
                Ok(())
            }
        }
    }

    /// Applies an object-control message addressed to the relay.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the sender is not in a room
    /// - [`Error::ViewNotFound`] for claims or despawns of unknown views
    pub fn handle_object_message(&mut self, sender: &SocketId, message: ObjectMessage, now: Instant) -> Result<()> {
        let name = self
            .clients
            .get(sender)
            .and_then(|c| c.room.clone())
            .ok_or_else(|| Error::protocol(format!("object message from {sender} outside a room")))?;
        let room = self
            .rooms
            .get_mut(&name)
            .ok_or_else(|| Error::room_not_found(name.clone()))?;

        match message {
            ObjectMessage::SpawnRequest {
                owner,
                pending,
                prefab,
            } => {
                if &owner != sender {
                    warn!(sender = %sender, claimed = %owner, "Spawn request owner mismatch, using sender");
                }
                let response = room.objects.spawn(sender.clone(), pending, prefab, now);
                let members = room.members.clone();
                self.send_object(&members, &response);
            }

            ObjectMessage::OwnershipClaim { view, .. } => {
                room.objects.claim(view, sender.clone())?;
                let others = self.recipients(sender, &Emit::Others);
                self.send_object(
                    &others,
                    &ObjectMessage::OwnershipClaim {
                        view,
                        owner: sender.clone(),
                    },
                );
            }

            ObjectMessage::Despawn { view } => {
                let record = room
                    .objects
                    .get(view)
                    .ok_or_else(|| Error::view_not_found(view))?;
                if &record.owner != sender {
                    return Err(Error::not_owner(view));
                }
                room.objects.despawn(view, now)?;
                let others = self.recipients(sender, &Emit::Others);
                self.send_object(&others, &ObjectMessage::Despawn { view });
            }

            other => {
                debug!(sender = %sender, ?other, "Ignoring client-bound object message");
            }
        }

        Ok(())
    }

    fn send(&self, id: &SocketId, message: Outbound) -> bool {
        self.clients
            .get(id)
            .is_some_and(|client| client.tx.send(message).is_ok())
    }

    fn send_control(&self, id: &SocketId, message: &ControlMessage) {
        match message.to_json() {
            Ok(json) => {
                self.send(id, Outbound::Text(json));
            }
            Err(e) => warn!(error = %e, "Failed to serialize control message"),
        }
    }

    fn send_object(&mut self, recipients: &[SocketId], message: &ObjectMessage) {
        if recipients.is_empty() {
            return;
        }

        let chunks = match self.encoder.encode(
            StreamLabel::OBJECT_CONTROL,
            PayloadFormat::Object,
            &message.encode(),
        ) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "Failed to encode object message");
                return;
            }
        };

        for chunk in &chunks {
            let delivery = encode_delivery(&self.relay_id, chunk);
            for id in recipients {
                self.send(id, Outbound::Binary(delivery.clone()));
            }
        }
    }
}

// ============================================================================
// SessionRegistry - Snapshots
// ============================================================================

impl SessionRegistry {
    /// Number of connected clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of rooms.
    #[inline]
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Membership of one room.
    #[must_use]
    pub fn roster(&self, room: &str) -> Option<RoomRoster> {
        self.rooms.get(room).map(|r| r.roster(room))
    }

    /// All rooms in name order.
    #[must_use]
    pub fn rooms(&self, now: Instant) -> Vec<RoomInfo> {
        self.rooms
            .iter()
            .map(|(name, room)| RoomInfo {
                name: name.clone(),
                master: room.master.clone(),
                members: room.members.clone(),
                objects: room.objects.len(),
                age_secs: now.saturating_duration_since(room.created_at).as_secs(),
            })
            .collect()
    }

    /// All clients, ordered by id.
    #[must_use]
    pub fn clients(&self, now: Instant) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .clients
            .keys()
            .filter_map(|id| self.client(id, now))
            .collect();
        clients.sort_by(|a, b| a.wsid.cmp(&b.wsid));
        clients
    }

    /// One client.
    #[must_use]
    pub fn client(&self, socket_id: &SocketId, now: Instant) -> Option<ClientInfo> {
        let client = self.clients.get(socket_id)?;
        let is_room_master = client
            .room
            .as_ref()
            .and_then(|name| self.rooms.get(name))
            .is_some_and(|room| room.master.as_ref() == Some(socket_id));

        Some(ClientInfo {
            wsid: socket_id.clone(),
            username: client.username.clone(),
            room: client.room.clone(),
            is_room_master,
            connected_secs: now.saturating_duration_since(client.connected_at).as_secs(),
            idle_secs: now.saturating_duration_since(client.last_seen).as_secs(),
        })
    }

    /// Asks every connection task to close.
    pub fn close_all(&self) {
        for client in self.clients.values() {
            let _ = client.tx.send(Outbound::Close);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
