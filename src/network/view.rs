//! Client-side state of one networked view.

use std::time::Instant;

use crate::identifiers::{PendingId, SocketId, ViewHandle, ViewId};
use crate::protocol::Transform;

use super::interpolation::Interpolator;

/// A remotely synchronized object as seen by one client.
#[derive(Debug, Clone)]
pub struct NetworkView {
    pub(crate) handle: ViewHandle,
    pub(crate) global: ViewId,
    pub(crate) pending: Option<PendingId>,
    pub(crate) owner: SocketId,
    pub(crate) prefab: String,
    pub(crate) is_owner: bool,
    pub(crate) grace_until: Option<Instant>,
    pub(crate) force_owner_info: bool,
    pub(crate) last_sent: Option<Transform>,
    pub(crate) interpolator: Interpolator,
}

impl NetworkView {
    pub(crate) fn local(handle: ViewHandle, pending: PendingId, owner: SocketId, prefab: String) -> Self {
        Self {
            handle,
            global: ViewId::PENDING,
            pending: Some(pending),
            owner,
            prefab,
            is_owner: true,
            grace_until: None,
            force_owner_info: false,
            last_sent: None,
            interpolator: Interpolator::new(),
        }
    }

    pub(crate) fn remote(handle: ViewHandle, global: ViewId, owner: SocketId, prefab: String) -> Self {
        Self {
            handle,
            global,
            pending: None,
            owner,
            prefab,
            is_owner: false,
            grace_until: None,
            force_owner_info: false,
            last_sent: None,
            interpolator: Interpolator::new(),
        }
    }

    /// Local handle.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> ViewHandle {
        self.handle
    }

    /// Global id, [`ViewId::PENDING`] until the spawn resolves.
    #[inline]
    #[must_use]
    pub fn global_id(&self) -> ViewId {
        self.global
    }

    /// Placeholder id used in the spawn request, for locally spawned views.
    #[inline]
    #[must_use]
    pub fn pending_id(&self) -> Option<PendingId> {
        self.pending
    }

    /// Current owner.
    #[inline]
    #[must_use]
    pub fn owner(&self) -> &SocketId {
        &self.owner
    }

    /// Prefab key.
    #[inline]
    #[must_use]
    pub fn prefab(&self) -> &str {
        &self.prefab
    }

    /// Returns `true` if this client sends updates for the view.
    #[inline]
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Returns `true` once a global id is known.
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.global.is_pending()
    }

    pub(crate) fn in_grace(&self, now: Instant) -> bool {
        self.grace_until.is_some_and(|until| now < until)
    }
}
