//! Snapshot interpolation for views owned by other clients.
//!
//! Each remote view keeps a replay clock that starts at the timestamp of the
//! first snapshot and then advances with local frame time. Between the
//! previous and the latest snapshot the displayed transform is
//!
//! ```text
//! step = clamp((clock - last_ts) / (target_ts - last_ts), 0, 1)
//! ```
//!
//! with linear interpolation for position and scale and slerp for rotation.

use std::time::Duration;

use crate::protocol::Transform;

/// Replay state of one remote view.
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    state: Option<Segment>,
}

#[derive(Debug, Clone)]
struct Segment {
    start: Transform,
    target: Transform,
    last_ts: f64,
    target_ts: f64,
    clock: f64,
}

impl Segment {
    fn step(&self) -> f32 {
        let span = self.target_ts - self.last_ts;
        if span <= 0.0 {
            return 1.0;
        }
        ((self.clock - self.last_ts) / span).clamp(0.0, 1.0) as f32
    }

    fn current(&self) -> Transform {
        self.start.interpolate(&self.target, self.step())
    }
}

impl Interpolator {
    /// Creates an idle interpolator.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once a snapshot has been received.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Latest target, if any.
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&Transform> {
        self.state.as_ref().map(|s| &s.target)
    }

    /// Feeds a snapshot taken at `timestamp`.
    ///
    /// Returns `false` for a snapshot older than the current target.
    pub fn push(&mut self, timestamp: f64, target: Transform) -> bool {
        if self.state.is_none() {
            self.state = Some(Segment {
                start: target,
                target,
                last_ts: timestamp,
                target_ts: timestamp,
                clock: timestamp,
            });
            return true;
        }
        let Some(segment) = self.state.as_mut() else {
            return false;
        };

        if timestamp < segment.target_ts {
            return false;
        }

        segment.start = segment.current();
        segment.last_ts = segment.target_ts;
        segment.target = target;
        segment.target_ts = timestamp;
        if segment.clock < segment.last_ts {
            segment.clock = segment.last_ts;
        }
        true
    }

    /// Advances the replay clock and returns the transform to display.
    pub fn advance(&mut self, dt: Duration) -> Option<Transform> {
        let segment = self.state.as_mut()?;
        segment.clock += dt.as_secs_f64();
        Some(segment.current())
    }

    /// Forgets all state; the next snapshot snaps into place.
    pub fn reset(&mut self) {
        self.state = None;
    }
}
