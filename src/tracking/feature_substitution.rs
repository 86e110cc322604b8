//! Tracker that searches near the last location and swaps its template for the
//! latest appearance of the object after every successful step.

use opencv::core::{Mat, Point2f};
use tracing::debug;

use crate::error::Result;
use crate::features::{FeaturesExtractingParams, RecognitionParams};
use crate::geometry::{contour_resize, Contour};
use crate::recognition::{ImageObject, ImageRecognizer};
use crate::tracking::tracker::{next_tracker_id, ObjectTracker, TrackerId};

/// Shrink applied to the location when extracting the template; also used as
/// the recognizer's ignore factor.
const OBJECT_SCALING_FACTOR: f32 = 0.85;

/// Smallest growth of the search window around the last location.
const MIN_EXPECTED_OFFSET: f32 = 0.2;

pub struct FeatureSubstitutionTracker {
    id: TrackerId,
    features_params: FeaturesExtractingParams,
    recognition_params: RecognitionParams,
    expected_offset: f32,
    location: Contour,
    target: Option<ImageObject>,
}

impl FeatureSubstitutionTracker {
    pub fn new(
        features_params: FeaturesExtractingParams,
        recognition_params: RecognitionParams,
        expected_offset: f32,
    ) -> Self {
        Self {
            id: next_tracker_id(),
            features_params,
            recognition_params,
            expected_offset,
            location: Contour::new(),
            target: None,
        }
    }

    /// Search window: the last location grown about its centroid.
    fn expected_area(&self) -> Contour {
        contour_resize(
            &self.location,
            1.0 + self.expected_offset.max(MIN_EXPECTED_OFFSET),
        )
    }

    fn extract_template(&self, frame: &Mat, location: &[Point2f]) -> Result<ImageObject> {
        let mut template = ImageObject::from_image(
            frame,
            &self.features_params,
            &contour_resize(location, OBJECT_SCALING_FACTOR),
        )?;
        template.set_contour(location.to_vec());
        Ok(template)
    }
}

impl ObjectTracker for FeatureSubstitutionTracker {
    fn track(&mut self, frame: &Mat) -> Result<Option<Contour>> {
        if self.target.is_none() {
            if self.location.is_empty() {
                return Ok(None);
            }
            self.target = Some(self.extract_template(frame, &self.location)?);
        }
        let Some(target) = self.target.as_ref() else {
            return Ok(None);
        };

        let scene = ImageObject::from_image(frame, &self.features_params, &self.expected_area())?;
        let found = ImageRecognizer::new()?.recognize(
            target,
            &scene,
            &self.recognition_params,
            OBJECT_SCALING_FACTOR,
        )?;

        match found {
            Some(location) => {
                self.target = Some(self.extract_template(frame, &location)?);
                self.location = location.clone();
                Ok(Some(location))
            }
            None => {
                debug!("Feature substitution lost the object");
                self.location.clear();
                self.target = None;
                Ok(None)
            }
        }
    }

    fn reinforcement(&mut self, location: &[Point2f]) {
        self.target = None;
        if location.len() < 3 {
            self.location.clear();
        } else {
            self.location = location.to_vec();
        }
    }

    fn clone_box(&self) -> Box<dyn ObjectTracker> {
        Box::new(Self {
            id: next_tracker_id(),
            features_params: self.features_params,
            recognition_params: self.recognition_params,
            expected_offset: self.expected_offset,
            location: self.location.clone(),
            target: self.target.clone(),
        })
    }

    fn id(&self) -> TrackerId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{DescriptorType, KeypointType};
    use crate::test_support::{assert_contour_near, flat_image, scene_with_target, square};

    fn gftt_params() -> FeaturesExtractingParams {
        FeaturesExtractingParams {
            keypoints_type: KeypointType::Gftt,
            descriptors_type: DescriptorType::Orb,
            ..FeaturesExtractingParams::default()
        }
    }

    fn tracker() -> FeatureSubstitutionTracker {
        FeatureSubstitutionTracker::new(gftt_params(), RecognitionParams::new(30, 0.05, 0.1), 1.0)
    }

    #[test]
    fn test_needs_reinforcement_before_tracking() {
        let mut tracker = tracker();
        let frame = scene_with_target(640, 480, 200, 9, 200, 120);
        assert!(tracker.track(&frame).unwrap().is_none());
    }

    #[test]
    fn test_follows_small_motion() {
        let mut tracker = tracker();
        let start = square(200.0, 120.0, 200.0);
        tracker.reinforcement(&start);

        let frame = scene_with_target(640, 480, 200, 9, 200, 120);
        // The template is taken from this frame, so it is found where it was put.
        let first = tracker.track(&frame).unwrap().unwrap();
        assert_contour_near(&first, &start, 1.5);

        let moved = scene_with_target(640, 480, 200, 9, 210, 126);
        let found = tracker.track(&moved).unwrap().unwrap();
        assert_contour_near(&found, &square(210.0, 126.0, 200.0), 3.0);
    }

    #[test]
    fn test_loss_clears_state() {
        let mut tracker = tracker();
        tracker.reinforcement(&square(200.0, 120.0, 200.0));
        tracker
            .track(&scene_with_target(640, 480, 200, 9, 200, 120))
            .unwrap();

        assert!(tracker.track(&flat_image(640, 480, 128)).unwrap().is_none());
        // Without a new reinforcement nothing is tracked, even on a good frame.
        assert!(tracker
            .track(&scene_with_target(640, 480, 200, 9, 200, 120))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reinforcement_on_empty_frame_fails() {
        let mut tracker = tracker();
        tracker.reinforcement(&square(200.0, 120.0, 200.0));
        assert!(tracker.track(&flat_image(640, 480, 128)).unwrap().is_none());
    }

    #[test]
    fn test_short_reinforcement_clears_location() {
        let mut tracker = tracker();
        tracker.reinforcement(&[Point2f::new(1.0, 1.0), Point2f::new(2.0, 2.0)]);
        assert!(tracker
            .track(&scene_with_target(640, 480, 200, 9, 200, 120))
            .unwrap()
            .is_none());
    }
}
