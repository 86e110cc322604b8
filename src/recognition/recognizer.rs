//! Single-shot homography recognition of a target inside a scene.

use opencv::core::Point2f;
use opencv::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::features::{FeatureMatcher, RecognitionParams};
use crate::geometry::{
    check_accessory, contour_resize, is_possible_quadrangle_corners, Contour, Homography,
    MINIMUM_NUMBER_OF_FEATURES, NUMBER_OF_QUADRANGLE_CORNERS,
};
use crate::recognition::image_object::ImageObject;

/// Locates targets in a scene by matching features and fitting a homography.
pub struct ImageRecognizer {
    matcher: FeatureMatcher,
}

impl ImageRecognizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            matcher: FeatureMatcher::new()?,
        })
    }

    /// Project `target`'s contour into `scene`.
    ///
    /// With `ignore_factor > 0` only correspondences whose target point lies in
    /// the target contour shrunk by that factor are used. Returns `Ok(None)`
    /// when the target is not found.
    pub fn recognize(
        &self,
        target: &ImageObject,
        scene: &ImageObject,
        params: &RecognitionParams,
        ignore_factor: f32,
    ) -> Result<Option<Contour>> {
        let (target_features, scene_features) = (target.features(), scene.features());
        if target_features.len() < MINIMUM_NUMBER_OF_FEATURES
            || scene_features.len() < MINIMUM_NUMBER_OF_FEATURES
        {
            return Ok(None);
        }

        let matches = self
            .matcher
            .match_features(target_features, scene_features, params)?;
        if matches.len() < MINIMUM_NUMBER_OF_FEATURES {
            debug!(matches = matches.len(), "Not enough matches");
            return Ok(None);
        }

        let significant_area =
            (ignore_factor > f32::EPSILON).then(|| contour_resize(target.contour(), ignore_factor));

        let mut target_points = Vec::with_capacity(matches.len());
        let mut scene_points = Vec::with_capacity(matches.len());
        for m in &matches {
            let target_pt: Point2f = target_features.keypoints.get(m.query_idx as usize)?.pt();
            if let Some(area) = &significant_area {
                if !check_accessory(target_pt, area) {
                    continue;
                }
            }
            target_points.push(target_pt);
            scene_points.push(scene_features.keypoints.get(m.train_idx as usize)?.pt());
        }

        let Some(homography) = Homography::estimate(&target_points, &scene_points)? else {
            debug!(points = target_points.len(), "Homography estimation failed");
            return Ok(None);
        };

        let Some(projected) = homography.project_contour(target.contour()) else {
            return Ok(None);
        };

        if projected.len() == NUMBER_OF_QUADRANGLE_CORNERS
            && !is_possible_quadrangle_corners(&projected)
        {
            debug!("Projected contour is not a plausible quadrangle");
            return Ok(None);
        }

        Ok(Some(projected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeaturesExtractingParams;
    use crate::test_support::{assert_contour_near, flat_image, scene_with_target, square, textured_image};

    fn target_object() -> ImageObject {
        ImageObject::from_image(
            &textured_image(200, 200, 77),
            &FeaturesExtractingParams::default(),
            &[],
        )
        .unwrap()
    }

    fn scene_object(scene: &opencv::core::Mat) -> ImageObject {
        ImageObject::from_image(scene, &FeaturesExtractingParams::orb(1.2, 5000), &[]).unwrap()
    }

    #[test]
    fn test_recognizes_pasted_target() {
        let target = target_object();
        assert!(target.features().len() >= 50);

        let scene = scene_object(&scene_with_target(640, 480, 200, 77, 200, 120));
        let recognizer = ImageRecognizer::new().unwrap();
        let params = RecognitionParams::new(15, 0.33, 0.1);

        let location = recognizer
            .recognize(&target, &scene, &params, 0.0)
            .unwrap()
            .expect("target should be found");
        assert_contour_near(&location, &square(200.0, 120.0, 200.0), 3.0);
    }

    #[test]
    fn test_absent_target_not_found() {
        let target = target_object();
        let scene = scene_object(&flat_image(640, 480, 128));
        let recognizer = ImageRecognizer::new().unwrap();
        let found = recognizer
            .recognize(&target, &scene, &RecognitionParams::default(), 0.0)
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_empty_target_not_found() {
        let scene = scene_object(&scene_with_target(320, 240, 120, 5, 100, 60));
        let recognizer = ImageRecognizer::new().unwrap();
        let found = recognizer
            .recognize(&ImageObject::new(), &scene, &RecognitionParams::default(), 0.0)
            .unwrap();
        assert!(found.is_none());
    }
}
