//! Client-side networked-object registry.
//!
//! The registry owns every [`NetworkView`] this client knows about and
//! drives the spawn round trip, ownership claims and snapshot replication.
//! It never touches the network directly: outgoing messages accumulate in an
//! outbox that the [`Session`](crate::Session) flushes to the endpoint.
//!
//! # Threading
//!
//! Everything here runs on the application thread. Views removed because of
//! network events are queued and only handed to [`ViewHost::destroy`] from
//! [`ObjectRegistry::update`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::config::ObjectConfig;
use crate::error::{Error, Result};
use crate::frame::PayloadFormat;
use crate::identifiers::{PendingId, SocketId, StreamLabel, ViewHandle, ViewId};
use crate::protocol::{
    Emit, ObjectMessage, RoomRoster, SyncBatch, SyncMask, SyncSnapshot, Transform, ViewRecord,
};

use super::view::NetworkView;

// ============================================================================
// ViewHost
// ============================================================================

/// Scene-side collaborator that owns the visible representations.
pub trait ViewHost {
    /// Creates the representation for `prefab`.
    ///
    /// Returns `false` if the prefab is unknown.
    fn instantiate(&mut self, handle: ViewHandle, view: ViewId, prefab: &str) -> bool;

    /// Removes a representation.
    fn destroy(&mut self, handle: ViewHandle);

    /// Reads the current transform of a locally owned view.
    fn read_transform(&self, handle: ViewHandle) -> Option<Transform>;

    /// Writes an interpolated transform to a remote view.
    fn apply_transform(&mut self, handle: ViewHandle, transform: &Transform);
}

// ============================================================================
// Outgoing
// ============================================================================

/// A payload the registry wants sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    /// Stream label.
    pub label: StreamLabel,
    /// Payload format.
    pub format: PayloadFormat,
    /// Recipients.
    pub emit: Emit,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

impl Outgoing {
    fn control(message: &ObjectMessage) -> Self {
        Self {
            label: StreamLabel::OBJECT_CONTROL,
            format: PayloadFormat::Object,
            emit: Emit::Server,
            payload: message.encode(),
        }
    }
}

// ============================================================================
// ObjectRegistry
// ============================================================================

/// Networked views known to this client.
pub struct ObjectRegistry<H: ViewHost> {
    host: H,
    config: ObjectConfig,
    local_id: Option<SocketId>,
    views: FxHashMap<ViewHandle, NetworkView>,
    by_global: BTreeMap<i32, ViewHandle>,
    next_pending: i32,
    /// Pending spawns shut down before their response arrived.
    abandoned: FxHashSet<PendingId>,
    destroy_queue: Vec<ViewHandle>,
    outbox: VecDeque<Outgoing>,
    started: Instant,
    next_sync: Instant,
    member_count: usize,
}

// ============================================================================
// ObjectRegistry - Construction & Accessors
// ============================================================================

impl<H: ViewHost> ObjectRegistry<H> {
    /// Creates an empty registry. `now` anchors the snapshot clock.
    pub fn new(host: H, config: ObjectConfig, now: Instant) -> Self {
        Self {
            host,
            config,
            local_id: None,
            views: FxHashMap::default(),
            by_global: BTreeMap::new(),
            next_pending: 1,
            abandoned: FxHashSet::default(),
            destroy_queue: Vec::new(),
            outbox: VecDeque::new(),
            started: now,
            next_sync: now,
            member_count: 0,
        }
    }

    /// Sets the socket id assigned by the relay.
    pub fn set_local_id(&mut self, id: SocketId) {
        debug!(socket_id = %id, "Registry bound to socket id");
        self.local_id = Some(id);
    }

    /// Socket id of this client, once welcomed.
    #[inline]
    #[must_use]
    pub fn local_id(&self) -> Option<&SocketId> {
        self.local_id.as_ref()
    }

    /// Looks up a view by handle.
    #[inline]
    #[must_use]
    pub fn view(&self, handle: ViewHandle) -> Option<&NetworkView> {
        self.views.get(&handle)
    }

    /// Looks up a view by global id.
    #[must_use]
    pub fn view_by_id(&self, view: ViewId) -> Option<&NetworkView> {
        self.by_global
            .get(&view.as_i32())
            .and_then(|handle| self.views.get(handle))
    }

    /// Handle of the view with the given global id.
    #[inline]
    #[must_use]
    pub fn handle_of(&self, view: ViewId) -> Option<ViewHandle> {
        self.by_global.get(&view.as_i32()).copied()
    }

    /// Number of views, pending ones included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Returns `true` if no views are known.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Views queued for destruction.
    #[inline]
    #[must_use]
    pub fn pending_destroy(&self) -> usize {
        self.destroy_queue.len()
    }

    /// The scene collaborator.
    #[inline]
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The scene collaborator, mutably.
    #[inline]
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Takes every queued outgoing payload.
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        self.outbox.drain(..).collect()
    }

    fn clock(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started).as_secs_f64()
    }

    fn require_local_id(&self) -> Result<SocketId> {
        self.local_id
            .clone()
            .ok_or_else(|| Error::connection("no socket id assigned yet"))
    }

    fn unregister(&mut self, handle: ViewHandle) -> Option<NetworkView> {
        let view = self.views.remove(&handle)?;
        if view.is_resolved() {
            self.by_global.remove(&view.global.as_i32());
        }
        Some(view)
    }
}

// ============================================================================
// ObjectRegistry - Local Operations
// ============================================================================

impl<H: ViewHost> ObjectRegistry<H> {
    /// Spawns a locally owned view and requests its global id.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] before the relay assigned a socket id
    /// - [`Error::InvalidArgument`] if the host does not know the prefab
    pub fn spawn(&mut self, prefab: &str) -> Result<ViewHandle> {
        let owner = self.require_local_id()?;
        let handle = ViewHandle::next();

        if !self.host.instantiate(handle, ViewId::PENDING, prefab) {
            return Err(Error::invalid_argument(format!("unknown prefab: {prefab}")));
        }

        let pending = PendingId::new(self.next_pending);
        self.next_pending = self.next_pending.wrapping_add(1).max(1);

        self.outbox.push_back(Outgoing::control(&ObjectMessage::SpawnRequest {
            owner: owner.clone(),
            pending,
            prefab: prefab.to_string(),
        }));
        self.views.insert(
            handle,
            NetworkView::local(handle, pending, owner, prefab.to_string()),
        );

        debug!(%handle, %pending, prefab, "Spawn requested");
        Ok(handle)
    }

    /// Tears down a local view.
    ///
    /// A resolved, owned view is despawned for the whole room; a pending one
    /// is despawned once its spawn response arrives. Returns `false` for an
    /// unknown handle.
    pub fn shutdown(&mut self, handle: ViewHandle) -> bool {
        let Some(view) = self.unregister(handle) else {
            return false;
        };

        if view.is_owner && view.is_resolved() {
            self.outbox
                .push_back(Outgoing::control(&ObjectMessage::Despawn { view: view.global }));
        } else if let Some(pending) = view.pending.filter(|_| view.is_owner && !view.is_resolved()) {
            self.abandoned.insert(pending);
        }

        self.host.destroy(handle);
        debug!(%handle, view = %view.global, "View shut down");
        true
    }

    /// Despawns an owned view for the whole room.
    ///
    /// # Errors
    ///
    /// - [`Error::ViewNotFound`] for an unknown id
    /// - [`Error::NotOwner`] if another client owns the view
    pub fn despawn(&mut self, view: ViewId) -> Result<()> {
        let handle = self
            .handle_of(view)
            .ok_or_else(|| Error::view_not_found(view))?;

        if !self.views.get(&handle).is_some_and(|v| v.is_owner) {
            return Err(Error::not_owner(view));
        }

        self.shutdown(handle);
        Ok(())
    }

    /// Claims ownership of a view.
    ///
    /// Incoming snapshots for the view are ignored for the configured grace
    /// window, and the next outgoing snapshot carries owner info.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] before the relay assigned a socket id
    /// - [`Error::ViewNotFound`] for an unknown id
    pub fn take_ownership(&mut self, view: ViewId, now: Instant) -> Result<()> {
        let owner = self.require_local_id()?;
        let grace = self.config.ownership_grace;

        let entry = self
            .by_global
            .get(&view.as_i32())
            .and_then(|handle| self.views.get_mut(handle))
            .ok_or_else(|| Error::view_not_found(view))?;

        entry.owner = owner.clone();
        entry.is_owner = true;
        entry.grace_until = Some(now + grace);
        entry.force_owner_info = true;
        entry.last_sent = None;
        entry.interpolator.reset();

        self.outbox
            .push_back(Outgoing::control(&ObjectMessage::OwnershipClaim { view, owner }));

        debug!(%view, "Ownership taken");
        Ok(())
    }
}

// ============================================================================
// ObjectRegistry - Network Input
// ============================================================================

impl<H: ViewHost> ObjectRegistry<H> {
    /// Applies an object-control message from the relay or a peer.
    pub fn handle_object_message(&mut self, message: ObjectMessage) {
        match message {
            ObjectMessage::SpawnResponse {
                owner,
                pending,
                prefab,
                global,
            } => self.on_spawn_response(owner, pending, prefab, global),

            ObjectMessage::OwnershipClaim { view, owner } => self.on_claim(view, owner),

            ObjectMessage::Despawn { view } => {
                if let Some(handle) = self.handle_of(view) {
                    self.unregister(handle);
                    self.destroy_queue.push(handle);
                    debug!(%view, "Remote despawn queued");
                }
            }

            ObjectMessage::FullSync { records } => {
                debug!(count = records.len(), "Full registry sync received");
                for record in records {
                    self.on_record(record);
                }
            }

            ObjectMessage::SpawnRequest { .. } => {
                trace!("Ignoring spawn request addressed to the relay");
            }
        }
    }

    fn on_spawn_response(
        &mut self,
        owner: SocketId,
        pending: PendingId,
        prefab: String,
        global: ViewId,
    ) {
        if self.local_id.as_ref() == Some(&owner) {
            let placeholder = self
                .views
                .values_mut()
                .find(|v| v.pending == Some(pending) && !v.is_resolved());

            if let Some(view) = placeholder {
                view.global = global;
                let handle = view.handle;
                self.by_global.insert(global.as_i32(), handle);
                debug!(%handle, %pending, view = %global, "Spawn resolved");
            } else if self.abandoned.remove(&pending) {
                debug!(%pending, view = %global, "Spawn resolved after shutdown, despawning");
                self.outbox
                    .push_back(Outgoing::control(&ObjectMessage::Despawn { view: global }));
            } else {
                trace!(%pending, view = %global, "No placeholder for own spawn response");
            }
            return;
        }

        self.on_record(ViewRecord {
            view: global,
            owner,
            prefab,
        });
    }

    fn on_record(&mut self, record: ViewRecord) {
        if let Some(view) = self
            .by_global
            .get(&record.view.as_i32())
            .and_then(|handle| self.views.get_mut(handle))
        {
            if view.owner != record.owner {
                view.interpolator.reset();
            }
            view.is_owner = self.local_id.as_ref() == Some(&record.owner);
            view.owner = record.owner;
            return;
        }

        let handle = ViewHandle::next();
        if !self.host.instantiate(handle, record.view, &record.prefab) {
            warn!(view = %record.view, prefab = %record.prefab, "Unresolvable prefab, skipping spawn");
            return;
        }

        let mut view = NetworkView::remote(handle, record.view, record.owner, record.prefab);
        view.is_owner = self.local_id.as_ref() == Some(&view.owner);

        debug!(%handle, view = %record.view, owner = %view.owner, "Remote view instantiated");
        self.by_global.insert(record.view.as_i32(), handle);
        self.views.insert(handle, view);
    }

    fn on_claim(&mut self, view: ViewId, owner: SocketId) {
        let is_self = self.local_id.as_ref() == Some(&owner);
        let Some(entry) = self
            .by_global
            .get(&view.as_i32())
            .and_then(|handle| self.views.get_mut(handle))
        else {
            trace!(%view, "Claim for unknown view");
            return;
        };

        if is_self {
            return;
        }

        // Each owner stamps snapshots with its own clock.
        if entry.is_owner || entry.owner != owner {
            entry.interpolator.reset();
        }
        entry.owner = owner;
        entry.is_owner = false;
        entry.grace_until = None;
        entry.force_owner_info = false;
        debug!(%view, owner = %entry.owner, "Ownership moved to peer");
    }

    /// Applies a snapshot batch received from a peer.
    pub fn handle_sync(&mut self, batch: SyncBatch, now: Instant) {
        let local_id = self.local_id.clone();

        for snapshot in batch.snapshots {
            let Some(view) = self
                .by_global
                .get(&snapshot.view.as_i32())
                .and_then(|handle| self.views.get_mut(handle))
            else {
                continue;
            };

            if view.in_grace(now) {
                trace!(view = %snapshot.view, "Snapshot ignored during ownership grace");
                continue;
            }

            if let Some(owner) = snapshot.owner
                && Some(&owner) != local_id.as_ref()
            {
                if view.is_owner {
                    debug!(view = %snapshot.view, owner = %owner, "Ownership lost to later claim");
                    view.interpolator.reset();
                    view.is_owner = false;
                } else if view.owner != owner {
                    trace!(view = %snapshot.view, owner = %owner, "Owner changed, restarting interpolation");
                    view.interpolator.reset();
                }
                view.owner = owner;
            }

            if view.is_owner || !snapshot.mask.has_transform() {
                continue;
            }

            let base = view
                .interpolator
                .target()
                .copied()
                .or_else(|| self.host.read_transform(view.handle))
                .unwrap_or_default();
            let target = base.merged(&snapshot.transform, snapshot.mask);
            view.interpolator.push(batch.timestamp, target);
        }
    }

    /// Removes views whose owner left the room.
    ///
    /// Removal is deferred to [`ObjectRegistry::update`].
    pub fn on_roster(&mut self, roster: &RoomRoster) {
        let orphaned: Vec<ViewHandle> = self
            .views
            .values()
            .filter(|v| v.is_resolved() && !roster.contains(&v.owner))
            .map(|v| v.handle)
            .collect();

        for handle in orphaned {
            if let Some(view) = self.unregister(handle) {
                debug!(%handle, view = %view.global, owner = %view.owner, "Owner left, view queued for removal");
                self.destroy_queue.push(handle);
            }
        }

        if roster.members.len() > self.member_count {
            self.resend_full_state();
        }
        self.member_count = roster.members.len();
    }

    /// Forces full snapshots for every owned view on the next tick.
    ///
    /// Called when a client joins so it receives complete state.
    pub fn resend_full_state(&mut self) {
        for view in self.views.values_mut().filter(|v| v.is_owner) {
            view.last_sent = None;
        }
    }
}

// ============================================================================
// ObjectRegistry - Ticks
// ============================================================================

impl<H: ViewHost> ObjectRegistry<H> {
    /// Destroys views queued by network events. Returns how many.
    pub fn update(&mut self) -> usize {
        let queued = std::mem::take(&mut self.destroy_queue);
        let count = queued.len();
        for handle in queued {
            self.host.destroy(handle);
        }
        count
    }

    /// Collects snapshots of owned views once per sync interval.
    ///
    /// Returns the number of snapshots queued.
    pub fn tick(&mut self, now: Instant) -> usize {
        if now < self.next_sync {
            return 0;
        }
        self.next_sync = now + self.config.sync_interval;

        let Some(local_id) = self.local_id.clone() else {
            return 0;
        };

        let mut snapshots = Vec::new();
        for view in self.views.values_mut() {
            if !view.is_owner || !view.is_resolved() {
                continue;
            }
            let Some(current) = self.host.read_transform(view.handle) else {
                continue;
            };

            let mask = changed_fields(view.last_sent.as_ref(), &current);
            if mask.is_empty() && !view.force_owner_info {
                continue;
            }

            let mut snapshot = SyncSnapshot::new(view.global, mask, current);
            if view.force_owner_info {
                snapshot = snapshot.with_owner(local_id.clone());
                view.force_owner_info = false;
            }

            trace!(view = %view.global, mask = ?snapshot.mask, "Snapshot collected");
            view.last_sent = Some(current);
            snapshots.push(snapshot);
        }

        if snapshots.is_empty() {
            return 0;
        }

        snapshots.sort_by_key(|s| s.view);
        let count = snapshots.len();
        let timestamp = self.clock(now);

        for payload in SyncBatch::encode_split(timestamp, &snapshots, self.config.max_sync_batch) {
            self.outbox.push_back(Outgoing {
                label: StreamLabel::OBJECT_SYNC,
                format: PayloadFormat::Sync,
                emit: Emit::Others,
                payload,
            });
        }

        count
    }

    /// Advances interpolation and writes transforms of remote views.
    pub fn late_update(&mut self, dt: Duration) {
        for view in self.views.values_mut() {
            if view.is_owner {
                continue;
            }
            if let Some(transform) = view.interpolator.advance(dt) {
                self.host.apply_transform(view.handle, &transform);
            }
        }
    }
}

fn changed_fields(previous: Option<&Transform>, current: &Transform) -> SyncMask {
    let Some(previous) = previous else {
        return SyncMask::TRANSFORM;
    };

    let mut mask = SyncMask::empty();
    if previous.position != current.position {
        mask |= SyncMask::POSITION;
    }
    if previous.rotation != current.rotation {
        mask |= SyncMask::ROTATION;
    }
    if previous.scale != current.scale {
        mask |= SyncMask::SCALE;
    }
    mask
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use glam::Vec3;

    use crate::network::ObjectDirectory;

    /// Records host calls; every prefab except "Unknown" resolves.
    #[derive(Default)]
    struct SceneStub {
        live: FxHashMap<ViewHandle, Transform>,
        destroyed: Vec<ViewHandle>,
        applied: Vec<(ViewHandle, Transform)>,
    }

    impl ViewHost for SceneStub {
        fn instantiate(&mut self, handle: ViewHandle, _view: ViewId, prefab: &str) -> bool {
            if prefab == "Unknown" {
                return false;
            }
            self.live.insert(handle, Transform::IDENTITY);
            true
        }

        fn destroy(&mut self, handle: ViewHandle) {
            self.live.remove(&handle);
            self.destroyed.push(handle);
        }

        fn read_transform(&self, handle: ViewHandle) -> Option<Transform> {
            self.live.get(&handle).copied()
        }

        fn apply_transform(&mut self, handle: ViewHandle, transform: &Transform) {
            self.applied.push((handle, *transform));
        }
    }

    fn registry(id: &str, now: Instant) -> ObjectRegistry<SceneStub> {
        let mut reg = ObjectRegistry::new(SceneStub::default(), ObjectConfig::default(), now);
        reg.set_local_id(SocketId::new(id));
        reg
    }

    fn roster(members: &[&str]) -> RoomRoster {
        RoomRoster {
            room: "lobby".into(),
            master: members.first().map(|m| SocketId::new(*m)),
            members: members.iter().map(|m| SocketId::new(*m)).collect(),
        }
    }

    /// Relays spawn requests through a directory and returns the responses.
    fn relay_spawns(
        dir: &mut ObjectDirectory,
        out: Vec<Outgoing>,
        now: Instant,
    ) -> Vec<ObjectMessage> {
        out.into_iter()
            .filter_map(|o| match ObjectMessage::decode(&o.payload).ok()? {
                ObjectMessage::SpawnRequest {
                    owner,
                    pending,
                    prefab,
                } => Some(dir.spawn(owner, pending, prefab, now)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_spawn_requires_socket_id() {
        let now = Instant::now();
        let mut reg = ObjectRegistry::new(SceneStub::default(), ObjectConfig::default(), now);
        assert!(reg.spawn("Marker").is_err());
    }

    #[test]
    fn test_spawn_unknown_prefab() {
        let now = Instant::now();
        let mut reg = registry("a", now);
        assert!(reg.spawn("Unknown").is_err());
        assert!(reg.drain_outgoing().is_empty());
    }

    #[test]
    fn test_spawn_queues_request() {
        let now = Instant::now();
        let mut reg = registry("a", now);
        let handle = reg.spawn("Marker").unwrap();

        let view = reg.view(handle).unwrap();
        assert!(!view.is_resolved());
        assert_eq!(view.pending_id(), Some(PendingId::new(1)));

        let out = reg.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].emit, Emit::Server);
        assert_eq!(out[0].label, StreamLabel::OBJECT_CONTROL);
    }

    #[test]
    fn test_two_owners_resolve_only_their_own() {
        let now = Instant::now();
        let mut dir = ObjectDirectory::new(Duration::from_secs(5));
        let mut a = registry("a", now);
        let mut b = registry("b", now);

        let ha = a.spawn("Marker").unwrap();
        let hb = b.spawn("Marker").unwrap();

        let mut responses = relay_spawns(&mut dir, a.drain_outgoing(), now);
        responses.extend(relay_spawns(&mut dir, b.drain_outgoing(), now));

        for response in responses {
            a.handle_object_message(response.clone());
            b.handle_object_message(response);
        }

        assert_eq!(a.view(ha).unwrap().global_id(), ViewId::new(0));
        assert_eq!(b.view(hb).unwrap().global_id(), ViewId::new(1));

        // Each side sees the other's view as a remote instance.
        assert_eq!(a.len(), 2);
        assert!(!a.view_by_id(ViewId::new(1)).unwrap().is_owner());
        assert!(!b.view_by_id(ViewId::new(0)).unwrap().is_owner());
        assert!(a.view_by_id(ViewId::new(0)).unwrap().is_owner());
    }

    #[test]
    fn test_unresolvable_prefab_skipped() {
        let now = Instant::now();
        let mut reg = registry("a", now);
        reg.handle_object_message(ObjectMessage::SpawnResponse {
            owner: SocketId::new("b"),
            pending: PendingId::new(1),
            prefab: "Unknown".into(),
            global: ViewId::new(0),
        });
        assert!(reg.is_empty());
    }

    #[test]
    fn test_ownership_exclusive_after_grace() {
        let start = Instant::now();
        let mut a = registry("a", start);
        let mut b = registry("b", start);
        let record = ViewRecord {
            view: ViewId::new(0),
            owner: SocketId::new("a"),
            prefab: "Marker".into(),
        };
        a.handle_object_message(ObjectMessage::FullSync {
            records: vec![record.clone()],
        });
        b.handle_object_message(ObjectMessage::FullSync {
            records: vec![record],
        });
        assert!(a.view_by_id(ViewId::new(0)).unwrap().is_owner());

        // A sends a stale snapshot with owner info just as B claims.
        let stale = SyncBatch {
            timestamp: 0.1,
            snapshots: vec![
                SyncSnapshot::new(ViewId::new(0), SyncMask::POSITION, Transform::IDENTITY)
                    .with_owner(SocketId::new("a")),
            ],
        };

        b.take_ownership(ViewId::new(0), start).unwrap();
        let claim = b.drain_outgoing().remove(0);
        let claim = ObjectMessage::decode(&claim.payload).unwrap();

        b.handle_sync(stale.clone(), start + Duration::from_millis(100));
        assert!(b.view_by_id(ViewId::new(0)).unwrap().is_owner());

        a.handle_object_message(claim);
        let after = start + Duration::from_secs(2);
        assert!(!a.view_by_id(ViewId::new(0)).unwrap().is_owner());
        assert!(b.view_by_id(ViewId::new(0)).unwrap().is_owner());

        // A no longer sends snapshots for the view.
        a.tick(after);
        assert!(a.drain_outgoing().is_empty());
    }

    #[test]
    fn test_claimed_view_sends_owner_info() {
        let now = Instant::now();
        let mut reg = registry("b", now);
        reg.handle_object_message(ObjectMessage::FullSync {
            records: vec![ViewRecord {
                view: ViewId::new(3),
                owner: SocketId::new("a"),
                prefab: "Marker".into(),
            }],
        });
        reg.take_ownership(ViewId::new(3), now).unwrap();
        reg.drain_outgoing();

        assert_eq!(reg.tick(now), 1);
        let out = reg.drain_outgoing();
        assert_eq!(out[0].emit, Emit::Others);
        let batch = SyncBatch::decode(&out[0].payload).unwrap();
        assert_eq!(batch.snapshots[0].mask, SyncMask::FULL);
        assert_eq!(batch.snapshots[0].owner, Some(SocketId::new("b")));
    }

    #[test]
    fn test_tick_respects_interval_and_changes() {
        let now = Instant::now();
        let mut reg = registry("a", now);
        let handle = reg.spawn("Marker").unwrap();
        reg.drain_outgoing();
        reg.handle_object_message(ObjectMessage::SpawnResponse {
            owner: SocketId::new("a"),
            pending: PendingId::new(1),
            prefab: "Marker".into(),
            global: ViewId::new(0),
        });

        assert_eq!(reg.tick(now), 1);
        assert_eq!(reg.tick(now + Duration::from_millis(10)), 0);
        // Unchanged transform, nothing to send.
        assert_eq!(reg.tick(now + Duration::from_millis(60)), 0);

        reg.host_mut().live.insert(
            handle,
            Transform {
                position: Vec3::X,
                ..Transform::IDENTITY
            },
        );
        reg.drain_outgoing();
        assert_eq!(reg.tick(now + Duration::from_millis(120)), 1);
        let batch = SyncBatch::decode(&reg.drain_outgoing()[0].payload).unwrap();
        assert_eq!(batch.snapshots[0].mask, SyncMask::POSITION);
    }

    #[test]
    fn test_remote_snapshots_interpolate_in_late_update() {
        let now = Instant::now();
        let mut reg = registry("b", now);
        reg.handle_object_message(ObjectMessage::FullSync {
            records: vec![ViewRecord {
                view: ViewId::new(0),
                owner: SocketId::new("a"),
                prefab: "Marker".into(),
            }],
        });

        let snap = |x: f32| SyncSnapshot::new(
            ViewId::new(0),
            SyncMask::POSITION,
            Transform {
                position: Vec3::new(x, 0.0, 0.0),
                ..Transform::IDENTITY
            },
        );
        reg.handle_sync(SyncBatch { timestamp: 1.0, snapshots: vec![snap(0.0)] }, now);
        reg.handle_sync(SyncBatch { timestamp: 1.1, snapshots: vec![snap(1.0)] }, now);

        // Only the late phase writes transforms.
        assert!(reg.host().applied.is_empty());

        reg.late_update(Duration::from_millis(50));
        let (_, t) = reg.host().applied[0];
        assert!((t.position.x - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_roster_defers_destroy() {
        let now = Instant::now();
        let mut reg = registry("b", now);
        reg.handle_object_message(ObjectMessage::FullSync {
            records: vec![
                ViewRecord {
                    view: ViewId::new(0),
                    owner: SocketId::new("a"),
                    prefab: "Marker".into(),
                },
                ViewRecord {
                    view: ViewId::new(1),
                    owner: SocketId::new("b"),
                    prefab: "Marker".into(),
                },
            ],
        });

        reg.on_roster(&roster(&["b"]));
        assert_eq!(reg.len(), 1);
        assert!(reg.host().destroyed.is_empty());
        assert_eq!(reg.pending_destroy(), 1);

        assert_eq!(reg.update(), 1);
        assert_eq!(reg.host().destroyed.len(), 1);
    }

    #[test]
    fn test_despawn_requires_ownership() {
        let now = Instant::now();
        let mut reg = registry("b", now);
        reg.handle_object_message(ObjectMessage::FullSync {
            records: vec![ViewRecord {
                view: ViewId::new(0),
                owner: SocketId::new("a"),
                prefab: "Marker".into(),
            }],
        });

        assert!(matches!(reg.despawn(ViewId::new(0)), Err(Error::NotOwner { .. })));
        assert!(matches!(reg.despawn(ViewId::new(9)), Err(Error::ViewNotFound { .. })));
    }

    #[test]
    fn test_shutdown_pending_despawns_on_response() {
        let now = Instant::now();
        let mut dir = ObjectDirectory::new(Duration::from_secs(5));
        let mut reg = registry("a", now);
        let handle = reg.spawn("Marker").unwrap();
        let requests = reg.drain_outgoing();

        assert!(reg.shutdown(handle));
        assert!(reg.drain_outgoing().is_empty());
        assert!(!reg.shutdown(handle));

        for response in relay_spawns(&mut dir, requests, now) {
            reg.handle_object_message(response);
        }
        assert_eq!(dir.len(), 1);
        assert!(reg.is_empty());

        let out = reg.drain_outgoing();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].emit, Emit::Server);
        let ObjectMessage::Despawn { view } = ObjectMessage::decode(&out[0].payload).unwrap() else {
            panic!("expected despawn");
        };
        dir.despawn(view, now).unwrap();
        assert!(dir.is_empty());
    }

    #[test]
    fn test_observer_follows_new_owner_after_claim() {
        let now = Instant::now();
        let mut c = registry("c", now);
        c.handle_object_message(ObjectMessage::FullSync {
            records: vec![ViewRecord {
                view: ViewId::new(0),
                owner: SocketId::new("a"),
                prefab: "Marker".into(),
            }],
        });
        let handle = c.handle_of(ViewId::new(0)).unwrap();
        let snap = |x: f32| {
            SyncSnapshot::new(
                ViewId::new(0),
                SyncMask::POSITION,
                Transform {
                    position: Vec3::new(x, 0.0, 0.0),
                    ..Transform::IDENTITY
                },
            )
        };

        // A has been running far longer than B, so its clock is ahead.
        c.handle_sync(SyncBatch { timestamp: 100.0, snapshots: vec![snap(1.0)] }, now);
        c.handle_object_message(ObjectMessage::OwnershipClaim {
            view: ViewId::new(0),
            owner: SocketId::new("b"),
        });
        c.handle_sync(SyncBatch { timestamp: 5.0, snapshots: vec![snap(50.0)] }, now);
        c.handle_sync(SyncBatch { timestamp: 5.05, snapshots: vec![snap(60.0)] }, now);

        for _ in 0..20 {
            c.late_update(Duration::from_millis(10));
        }
        let (applied, last) = *c.host().applied.last().unwrap();
        assert_eq!(applied, handle);
        assert!((last.position.x - 60.0).abs() < 1e-3);
        assert_eq!(c.view(handle).unwrap().owner(), &SocketId::new("b"));
    }

    #[test]
    fn test_owner_info_in_snapshot_restarts_interpolation() {
        let now = Instant::now();
        let mut c = registry("c", now);
        c.handle_object_message(ObjectMessage::FullSync {
            records: vec![ViewRecord {
                view: ViewId::new(0),
                owner: SocketId::new("a"),
                prefab: "Marker".into(),
            }],
        });
        let moved = Transform {
            position: Vec3::new(7.0, 0.0, 0.0),
            ..Transform::IDENTITY
        };

        c.handle_sync(
            SyncBatch {
                timestamp: 100.0,
                snapshots: vec![SyncSnapshot::new(ViewId::new(0), SyncMask::POSITION, Transform::IDENTITY)],
            },
            now,
        );
        // The new owner's first snapshot arrives before its claim.
        c.handle_sync(
            SyncBatch {
                timestamp: 0.5,
                snapshots: vec![
                    SyncSnapshot::new(ViewId::new(0), SyncMask::FULL, moved).with_owner(SocketId::new("b")),
                ],
            },
            now,
        );

        c.late_update(Duration::from_millis(10));
        let (_, last) = *c.host().applied.last().unwrap();
        assert_eq!(last.position, moved.position);
    }
}
