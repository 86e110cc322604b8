//! Tracker that re-recognizes the target in the whole frame on every call.

use opencv::core::{Mat, Point2f};
use tracing::debug;

use crate::error::Result;
use crate::features::{FeaturesExtractingParams, RecognitionParams};
use crate::geometry::Contour;
use crate::recognition::{ImageObject, ImageRecognizer};
use crate::tracking::tracker::{next_tracker_id, ObjectTracker, TrackerId};

pub struct RecognitionBasedTracker {
    id: TrackerId,
    target: ImageObject,
    scene_params: FeaturesExtractingParams,
    recognition_params: RecognitionParams,
}

impl RecognitionBasedTracker {
    pub fn new(
        target: ImageObject,
        scene_params: FeaturesExtractingParams,
        recognition_params: RecognitionParams,
    ) -> Self {
        Self {
            id: next_tracker_id(),
            target,
            scene_params,
            recognition_params,
        }
    }
}

impl ObjectTracker for RecognitionBasedTracker {
    fn track(&mut self, frame: &Mat) -> Result<Option<Contour>> {
        let scene = ImageObject::from_image(frame, &self.scene_params, &[])?;
        if scene.is_empty() {
            debug!("No features in frame");
            return Ok(None);
        }
        ImageRecognizer::new()?.recognize(&self.target, &scene, &self.recognition_params, 0.0)
    }

    /// Whole-frame search has no history to correct.
    fn reinforcement(&mut self, _location: &[Point2f]) {}

    fn clone_box(&self) -> Box<dyn ObjectTracker> {
        Box::new(Self::new(
            self.target.clone(),
            self.scene_params,
            self.recognition_params,
        ))
    }

    fn id(&self) -> TrackerId {
        self.id
    }
}
