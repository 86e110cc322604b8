//! Priority-ordered composition of trackers.
//!
//! Priorities are tie-break numbers: the smallest value that produced a result
//! wins the merge, and results flow as reinforcement from larger values into
//! every tracker with a smaller one.

use opencv::core::{Mat, Point2f};
use tracing::{debug, warn};

use crate::error::Result;
use crate::geometry::{quadrangle_area, Contour};
use crate::tracking::tracker::{next_tracker_id, ObjectTracker, TrackerId};

/// Results covering less than this many px² are treated as non-detections.
pub const DEFAULT_MINIMUM_AREA: f64 = 2000.0;

struct TrackerEntry {
    tracker: Box<dyn ObjectTracker>,
    priority: f32,
    result: Contour,
}

pub struct CascadeTracker {
    id: TrackerId,
    minimum_area: f64,
    /// Sorted by ascending priority value.
    entries: Vec<TrackerEntry>,
}

impl CascadeTracker {
    pub fn new(minimum_area: f64) -> Self {
        Self {
            id: next_tracker_id(),
            minimum_area,
            entries: Vec::new(),
        }
    }

    /// Add `tracker`, replacing any member with the same identity.
    pub fn enable_tracker(&mut self, tracker: Box<dyn ObjectTracker>, priority: f32) {
        let id = tracker.id();
        self.entries.retain(|e| e.tracker.id() != id);
        let at = self.entries.partition_point(|e| e.priority <= priority);
        self.entries.insert(
            at,
            TrackerEntry {
                tracker,
                priority,
                result: Contour::new(),
            },
        );
    }

    /// Remove the member with identity `id` and hand it back.
    pub fn disable_tracker(&mut self, id: TrackerId) -> Option<Box<dyn ObjectTracker>> {
        let index = self.entries.iter().position(|e| e.tracker.id() == id)?;
        Some(self.entries.remove(index).tracker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop undersized fresh results and push fresh results down the cascade.
    fn internal_reinforcement(&mut self) {
        for i in 0..self.entries.len() {
            let entry = &mut self.entries[i];
            let updated = entry.tracker.poll_result(&mut entry.result);
            if !updated || entry.result.is_empty() {
                continue;
            }

            if quadrangle_area(&entry.result) < self.minimum_area {
                debug!(priority = entry.priority, "Discarding undersized result");
                entry.result.clear();
                entry.tracker.reinforcement(&[]);
                continue;
            }

            let priority = entry.priority;
            let location = entry.result.clone();
            for (j, other) in self.entries.iter_mut().enumerate() {
                if j != i && priority > other.priority {
                    other.tracker.reinforcement(&location);
                }
            }
        }
    }

    fn merge_results(&self) -> Option<Contour> {
        self.entries
            .iter()
            .find(|e| !e.result.is_empty())
            .map(|e| e.result.clone())
    }
}

impl Default for CascadeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MINIMUM_AREA)
    }
}

impl ObjectTracker for CascadeTracker {
    fn track(&mut self, frame: &Mat) -> Result<Option<Contour>> {
        self.internal_reinforcement();

        for entry in &mut self.entries {
            match entry.tracker.track(frame) {
                Ok(Some(result)) => entry.result = result,
                Ok(None) => entry.result.clear(),
                Err(e) => {
                    warn!(priority = entry.priority, error = %e, "Tracker failed on frame");
                    entry.result.clear();
                }
            }
        }

        Ok(self.merge_results())
    }

    fn reinforcement(&mut self, location: &[Point2f]) {
        for entry in &mut self.entries {
            entry.tracker.reinforcement(location);
        }
    }

    fn clone_box(&self) -> Box<dyn ObjectTracker> {
        let mut copy = CascadeTracker::new(self.minimum_area);
        copy.entries = self
            .entries
            .iter()
            .map(|e| TrackerEntry {
                tracker: e.tracker.clone_box(),
                priority: e.priority,
                result: e.result.clone(),
            })
            .collect();
        Box::new(copy)
    }

    fn id(&self) -> TrackerId {
        self.id
    }
}
