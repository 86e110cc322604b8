//! Status snapshot shared between the model actor and its handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::geometry::Contour;
use crate::tracking::TrackingState;

/// Last published state and location of a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSnapshot {
    pub state: TrackingState,
    /// Empty when the target is not located.
    pub location: Contour,
}

/// Written only by the actor; read by anyone holding the handle.
pub struct SharedModelState {
    snapshot: RwLock<ModelSnapshot>,
    /// A background recognition is in flight.
    recognizing: AtomicBool,
    /// Some caller's `track` request is queued or being processed.
    cycle: AtomicBool,
}

impl SharedModelState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        self.snapshot.read().clone()
    }

    pub fn state(&self) -> TrackingState {
        self.snapshot.read().state
    }

    pub fn location(&self) -> Contour {
        self.snapshot.read().location.clone()
    }

    pub(crate) fn publish(&self, state: TrackingState, location: &[opencv::core::Point2f]) {
        let mut snapshot = self.snapshot.write();
        snapshot.state = state;
        snapshot.location.clear();
        snapshot.location.extend_from_slice(location);
    }

    pub fn is_recognizing(&self) -> bool {
        self.recognizing.load(Ordering::SeqCst)
    }

    pub(crate) fn set_recognizing(&self, value: bool) {
        self.recognizing.store(value, Ordering::SeqCst);
    }

    /// Claim the tracking cycle; `false` when another caller holds it.
    pub(crate) fn try_begin_cycle(&self) -> bool {
        self.cycle
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_cycle(&self) {
        self.cycle.store(false, Ordering::SeqCst);
    }
}

impl Default for SharedModelState {
    fn default() -> Self {
        Self {
            snapshot: RwLock::new(ModelSnapshot::default()),
            recognizing: AtomicBool::new(false),
            cycle: AtomicBool::new(false),
        }
    }
}
