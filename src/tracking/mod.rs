//! Object trackers and their composition.
//!
//! - [`RecognitionBasedTracker`]: full-frame recognition on every frame
//! - [`FeatureSubstitutionTracker`]: recognition in a window around the last location
//! - [`MedianFlowTracker`]: pyramidal Lucas-Kanade with forward-backward filtering
//! - [`AsyncTracker`]: runs a tracker on a worker thread
//! - [`CascadeTracker`]: priority-ordered composition with internal reinforcement
//! - [`ImageContourStabilizator`]: temporal smoothing of the output quadrangle

pub mod async_tracker;
pub mod cascade;
pub mod feature_substitution;
pub mod median_flow;
pub mod params;
pub mod recognition_based;
pub mod stabilizer;
pub mod state;
pub mod tracker;

pub use async_tracker::AsyncTracker;
pub use cascade::{CascadeTracker, DEFAULT_MINIMUM_AREA};
pub use feature_substitution::FeatureSubstitutionTracker;
pub use median_flow::{MedianFlowParams, MedianFlowTracker};
pub use params::{StabilizationParams, TrackingParams};
pub use recognition_based::RecognitionBasedTracker;
pub use stabilizer::{ImageContourStabilizator, StabilizationError, StabilizationStatus};
pub use state::TrackingState;
pub use tracker::{next_tracker_id, ObjectTracker, TrackerId};
