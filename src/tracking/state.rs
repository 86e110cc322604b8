//! Lifecycle state of an image tracking model.

/// State of a tracking model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    /// No target set.
    #[default]
    Invalid,
    /// Target not seen in the last processed frame.
    Undetected,
    /// Target found by whole-frame search after being absent.
    Appeared,
    /// Target followed from the previous frame.
    Tracked,
    /// Whole-frame recognition in flight; `track` calls are no-ops.
    InProcess,
}

impl TrackingState {
    /// States in which `track` runs the tracker cascade synchronously.
    pub fn is_following(&self) -> bool {
        matches!(self, Self::Appeared | Self::Tracked)
    }
}
