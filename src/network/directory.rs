//! Relay-side record of the networked views live in one room.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{PendingId, SocketId, ViewId};
use crate::protocol::{ObjectMessage, ViewRecord};

use super::allocator::IdAllocator;

// ============================================================================
// ObjectDirectory
// ============================================================================

/// Authoritative id allocation and ownership table for a room.
#[derive(Debug, Clone)]
pub struct ObjectDirectory {
    views: BTreeMap<i32, ViewRecord>,
    allocator: IdAllocator,
}

impl ObjectDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new(quarantine: Duration) -> Self {
        Self {
            views: BTreeMap::new(),
            allocator: IdAllocator::new(quarantine),
        }
    }

    /// Allocates a global id for a spawn request and records the view.
    ///
    /// Returns the [`ObjectMessage::SpawnResponse`] to broadcast.
    pub fn spawn(
        &mut self,
        owner: SocketId,
        pending: PendingId,
        prefab: String,
        now: Instant,
    ) -> ObjectMessage {
        let global = self.allocator.allocate(now);

        debug!(view = %global, owner = %owner, prefab = %prefab, "View allocated");

        self.views.insert(
            global.as_i32(),
            ViewRecord {
                view: global,
                owner: owner.clone(),
                prefab: prefab.clone(),
            },
        );

        ObjectMessage::SpawnResponse {
            owner,
            pending,
            prefab,
            global,
        }
    }

    /// Records a new owner. Last writer wins.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ViewNotFound`] if the view is not live.
    pub fn claim(&mut self, view: ViewId, owner: SocketId) -> Result<()> {
        let record = self
            .views
            .get_mut(&view.as_i32())
            .ok_or_else(|| Error::view_not_found(view))?;

        debug!(view = %view, from = %record.owner, to = %owner, "Ownership moved");
        record.owner = owner;
        Ok(())
    }

    /// Removes a view and quarantines its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ViewNotFound`] if the view is not live.
    pub fn despawn(&mut self, view: ViewId, now: Instant) -> Result<ViewRecord> {
        let record = self
            .views
            .remove(&view.as_i32())
            .ok_or_else(|| Error::view_not_found(view))?;
        self.allocator.release(view, now);
        Ok(record)
    }

    /// Removes every view owned by `owner`, returning their ids.
    pub fn retire_owner(&mut self, owner: &SocketId, now: Instant) -> Vec<ViewId> {
        let retired: Vec<ViewId> = self
            .views
            .values()
            .filter(|record| &record.owner == owner)
            .map(|record| record.view)
            .collect();

        for view in &retired {
            self.views.remove(&view.as_i32());
            self.allocator.release(*view, now);
        }

        if !retired.is_empty() {
            debug!(owner = %owner, count = retired.len(), "Retired views of departed owner");
        }

        retired
    }

    /// Looks up a live view.
    #[inline]
    #[must_use]
    pub fn get(&self, view: ViewId) -> Option<&ViewRecord> {
        self.views.get(&view.as_i32())
    }

    /// Live views in id order.
    #[must_use]
    pub fn records(&self) -> Vec<ViewRecord> {
        self.views.values().cloned().collect()
    }

    /// Number of live views.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Returns `true` if no views are live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Expires quarantine entries.
    pub fn maintain(&mut self, now: Instant) {
        self.allocator.expire(now);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn global_of(message: &ObjectMessage) -> ViewId {
        match message {
            ObjectMessage::SpawnResponse { global, .. } => *global,
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_two_owners_same_pending_id() {
        let mut dir = ObjectDirectory::new(Duration::from_secs(5));
        let now = Instant::now();

        let a = dir.spawn(SocketId::new("a"), PendingId::new(1), "Marker".into(), now);
        let b = dir.spawn(SocketId::new("b"), PendingId::new(1), "Marker".into(), now);

        assert_eq!(global_of(&a), ViewId::new(0));
        assert_eq!(global_of(&b), ViewId::new(1));
        assert_eq!(dir.get(ViewId::new(1)).unwrap().owner, SocketId::new("b"));
    }

    #[test]
    fn test_claim_and_despawn() {
        let mut dir = ObjectDirectory::new(Duration::from_secs(5));
        let now = Instant::now();
        dir.spawn(SocketId::new("a"), PendingId::new(1), "Marker".into(), now);

        dir.claim(ViewId::new(0), SocketId::new("b")).unwrap();
        assert_eq!(dir.get(ViewId::new(0)).unwrap().owner, SocketId::new("b"));

        let removed = dir.despawn(ViewId::new(0), now).unwrap();
        assert_eq!(removed.prefab, "Marker");
        assert!(dir.is_empty());
        assert!(dir.despawn(ViewId::new(0), now).is_err());
        assert!(dir.claim(ViewId::new(0), SocketId::new("a")).is_err());
    }

    #[test]
    fn test_despawned_id_quarantined() {
        let mut dir = ObjectDirectory::new(Duration::from_secs(5));
        let now = Instant::now();
        dir.spawn(SocketId::new("a"), PendingId::new(1), "Marker".into(), now);
        dir.despawn(ViewId::new(0), now).unwrap();

        let next = dir.spawn(SocketId::new("a"), PendingId::new(2), "Marker".into(), now);
        assert_eq!(global_of(&next), ViewId::new(1));
    }

    #[test]
    fn test_retire_owner() {
        let mut dir = ObjectDirectory::new(Duration::from_secs(5));
        let now = Instant::now();
        dir.spawn(SocketId::new("a"), PendingId::new(1), "Marker".into(), now);
        dir.spawn(SocketId::new("b"), PendingId::new(1), "Marker".into(), now);
        dir.spawn(SocketId::new("a"), PendingId::new(2), "Arrow".into(), now);

        let retired = dir.retire_owner(&SocketId::new("a"), now);
        assert_eq!(retired, vec![ViewId::new(0), ViewId::new(2)]);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.records()[0].view, ViewId::new(1));
    }
}
