//! The tracking strategy contract shared by every tracker.

use std::sync::atomic::{AtomicU64, Ordering};

use opencv::core::{Mat, Point2f};

use crate::error::Result;
use crate::geometry::Contour;

/// Identity of a tracker instance. Clones get a fresh identity.
pub type TrackerId = u64;

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_tracker_id() -> TrackerId {
    NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed)
}

/// A strategy that follows an object from frame to frame.
pub trait ObjectTracker: Send {
    /// Locate the object in `frame` (grayscale). `Ok(None)` means not tracked.
    fn track(&mut self, frame: &Mat) -> Result<Option<Contour>>;

    /// Externally supplied location. An empty slice means "object lost".
    fn reinforcement(&mut self, location: &[Point2f]);

    /// Deep copy including owned sub-trackers.
    fn clone_box(&self) -> Box<dyn ObjectTracker>;

    fn id(&self) -> TrackerId;

    /// Refresh `cached` with the latest result and report whether it changed
    /// since the previous poll. Synchronous trackers always report `true`.
    fn poll_result(&mut self, _cached: &mut Contour) -> bool {
        true
    }
}

impl Clone for Box<dyn ObjectTracker> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
