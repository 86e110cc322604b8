//! Pluggable keypoint detection + descriptor computation over an image region.

use opencv::core::{KeyPoint, Mat, Point2f, Rect, Size, Vector};
use opencv::features2d::Feature2DTrait;
use opencv::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::features::feature_pack::{DescriptorType, FeaturePack, KeypointType};
use crate::geometry::{check_accessory, clipped_bounding_rect, MINIMUM_NUMBER_OF_FEATURES};

/// Regions narrower or shorter than this (px) are not searched.
pub const MIN_REGION_SIZE: i32 = 5;

/// Recognition-rate metric: region size and keypoints in region coordinates.
pub type RecognitionRateFn = fn(Size, &Vector<KeyPoint>) -> f32;

/// Finds keypoints in an image.
pub trait KeypointDetector: Send {
    fn detect(&mut self, image: &Mat, keypoints: &mut Vector<KeyPoint>) -> Result<()>;
}

/// Computes one descriptor row per keypoint. May drop keypoints it cannot describe.
pub trait DescriptorComputer: Send {
    fn compute(
        &mut self,
        image: &Mat,
        keypoints: &mut Vector<KeyPoint>,
        descriptors: &mut Mat,
    ) -> Result<()>;
}

impl<P: Feature2DTrait + Send> KeypointDetector for P {
    fn detect(&mut self, image: &Mat, keypoints: &mut Vector<KeyPoint>) -> Result<()> {
        Feature2DTrait::detect(self, image, keypoints, &Mat::default())?;
        Ok(())
    }
}

impl<P: Feature2DTrait + Send> DescriptorComputer for P {
    fn compute(
        &mut self,
        image: &Mat,
        keypoints: &mut Vector<KeyPoint>,
        descriptors: &mut Mat,
    ) -> Result<()> {
        Feature2DTrait::compute(self, image, keypoints, descriptors)?;
        Ok(())
    }
}

/// Default metric: 0 below the homography minimum, a fixed midpoint otherwise.
pub fn default_recognition_rate(_size: Size, keypoints: &Vector<KeyPoint>) -> f32 {
    if keypoints.len() < MINIMUM_NUMBER_OF_FEATURES {
        0.0
    } else {
        0.5
    }
}

const RATE_GRID_CELLS: usize = 10;

/// Statistical metric: spatial uniformity over a 10x10 grid times a
/// saturation curve over the keypoint count.
pub fn statistical_recognition_rate(size: Size, keypoints: &Vector<KeyPoint>) -> f32 {
    let n = keypoints.len();
    if n < MINIMUM_NUMBER_OF_FEATURES || size.width <= 0 || size.height <= 0 {
        return 0.0;
    }

    let cell_width = (size.width as f32 / RATE_GRID_CELLS as f32).max(1.0);
    let cell_height = (size.height as f32 / RATE_GRID_CELLS as f32).max(1.0);

    let mut counts = [[0usize; RATE_GRID_CELLS]; RATE_GRID_CELLS];
    for kp in keypoints.iter() {
        let pt = kp.pt();
        let cx = ((pt.x.max(0.0) / cell_width) as usize).min(RATE_GRID_CELLS - 1);
        let cy = ((pt.y.max(0.0) / cell_height) as usize).min(RATE_GRID_CELLS - 1);
        counts[cx][cy] += 1;
    }

    let cells = (RATE_GRID_CELLS * RATE_GRID_CELLS) as f64;
    let expected = n as f64 / cells;
    let deviation: f64 = counts
        .iter()
        .flatten()
        .map(|&c| {
            let d = c as f64 - expected;
            d * d / expected
        })
        .sum();

    // Worst case: every keypoint in a single cell.
    let worst = (cells - 1.0) * expected + (n as f64 - expected).powi(2) / expected;
    let distribution = 1.0 - deviation / worst;
    let cardinality = 1.0 - 0.9f64.powi(n as i32 - 3);

    (distribution * cardinality).clamp(0.0, 1.0) as f32
}

/// Keypoint detector + descriptor computer pair with a recognition-rate metric.
pub struct FeatureExtractor {
    keypoints_type: KeypointType,
    descriptors_type: DescriptorType,
    detector: Option<Box<dyn KeypointDetector>>,
    computer: Option<Box<dyn DescriptorComputer>>,
    rate_metric: RecognitionRateFn,
}

impl FeatureExtractor {
    /// Unconfigured extractor; `extract` yields nothing until both halves are set.
    pub fn new() -> Self {
        Self {
            keypoints_type: KeypointType::Orb,
            descriptors_type: DescriptorType::Orb,
            detector: None,
            computer: None,
            rate_metric: default_recognition_rate,
        }
    }

    pub fn set_feature_detector(&mut self, detector: Box<dyn KeypointDetector>, kind: KeypointType) {
        self.detector = Some(detector);
        self.keypoints_type = kind;
    }

    pub fn set_descriptor_computer(
        &mut self,
        computer: Box<dyn DescriptorComputer>,
        kind: DescriptorType,
    ) {
        self.computer = Some(computer);
        self.descriptors_type = kind;
    }

    pub fn set_recognition_rate_metric(&mut self, metric: RecognitionRateFn) {
        self.rate_metric = metric;
    }

    /// Extract features from `image`, restricted to the polygon `roi` when it is
    /// non-empty.
    ///
    /// Returns `Ok(None)` when the extractor is not configured or the region is
    /// smaller than [`MIN_REGION_SIZE`].
    pub fn extract(&mut self, image: &Mat, roi: &[Point2f]) -> Result<Option<FeaturePack>> {
        let (Some(detector), Some(computer)) = (self.detector.as_mut(), self.computer.as_mut())
        else {
            debug!("Feature extractor has no detector or descriptor computer");
            return Ok(None);
        };

        let image_size = image.size()?;
        let bbox = if roi.is_empty() {
            Rect::new(0, 0, image_size.width, image_size.height)
        } else {
            clipped_bounding_rect(roi, image_size)
        };
        if bbox.width < MIN_REGION_SIZE || bbox.height < MIN_REGION_SIZE {
            debug!(
                width = bbox.width,
                height = bbox.height,
                "Region too small for feature extraction"
            );
            return Ok(None);
        }

        let region = Mat::roi(image, bbox)?.try_clone()?;
        let mut detected = Vector::<KeyPoint>::new();
        detector.detect(&region, &mut detected)?;

        let mut keypoints = Vector::<KeyPoint>::with_capacity(detected.len());
        for mut kp in detected.iter() {
            if !roi.is_empty() {
                let pt = kp.pt();
                let shifted = Point2f::new(pt.x + bbox.x as f32, pt.y + bbox.y as f32);
                if !check_accessory(shifted, roi) {
                    continue;
                }
                kp.set_pt(shifted);
            }
            keypoints.push(kp);
        }

        let mut descriptors = Mat::default();
        if !keypoints.is_empty() {
            computer.compute(image, &mut keypoints, &mut descriptors)?;
        }

        let recognition_rate = (self.rate_metric)(bbox.size(), &detected);

        Ok(Some(FeaturePack {
            keypoints_type: self.keypoints_type,
            descriptors_type: self.descriptors_type,
            keypoints,
            descriptors,
            recognition_rate,
        }))
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_keypoints(n_side: usize, step: f32) -> Vector<KeyPoint> {
        let mut kps = Vector::<KeyPoint>::new();
        for i in 0..n_side {
            for j in 0..n_side {
                let x = step / 2.0 + i as f32 * step;
                let y = step / 2.0 + j as f32 * step;
                kps.push(KeyPoint::new_coords(x, y, 7.0, -1.0, 0.0, 0, -1).unwrap());
            }
        }
        kps
    }

    #[test]
    fn test_default_rate() {
        let size = Size::new(100, 100);
        assert_eq!(default_recognition_rate(size, &grid_keypoints(1, 10.0)), 0.0);
        assert_eq!(default_recognition_rate(size, &grid_keypoints(2, 10.0)), 0.5);
    }

    #[test]
    fn test_statistical_rate_prefers_uniform_spread() {
        let size = Size::new(100, 100);
        let uniform = grid_keypoints(10, 10.0);

        let mut clustered = Vector::<KeyPoint>::new();
        for _ in 0..100 {
            clustered.push(KeyPoint::new_coords(3.0, 3.0, 7.0, -1.0, 0.0, 0, -1).unwrap());
        }

        let uniform_rate = statistical_recognition_rate(size, &uniform);
        let clustered_rate = statistical_recognition_rate(size, &clustered);
        assert!(uniform_rate > 0.99, "uniform rate {uniform_rate}");
        assert_relative_eq!(clustered_rate, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_statistical_rate_saturates_with_count() {
        let size = Size::new(100, 100);
        let few = statistical_recognition_rate(size, &grid_keypoints(2, 50.0));
        let many = statistical_recognition_rate(size, &grid_keypoints(10, 10.0));
        assert!(few < many);
        assert!(few < 0.5);
    }

    #[test]
    fn test_unconfigured_extractor_yields_nothing() {
        let image = Mat::new_rows_cols_with_default(
            64,
            64,
            opencv::core::CV_8UC1,
            opencv::core::Scalar::all(0.0),
        )
        .unwrap();
        let mut extractor = FeatureExtractor::new();
        assert!(extractor.extract(&image, &[]).unwrap().is_none());
    }

    #[test]
    fn test_keypoints_outside_polygon_are_dropped() {
        let image = crate::test_support::textured_image(200, 200, 17);
        let mut extractor = crate::features::OrbExtractorFactory::new(1.2, 1000)
            .build()
            .unwrap();

        let square = crate::test_support::square(20.0, 20.0, 160.0);
        let triangle = [square[0], square[1], square[3]];
        let whole = extractor.extract(&image, &square).unwrap().unwrap();
        let half = extractor.extract(&image, &triangle).unwrap().unwrap();

        assert!(!half.keypoints.is_empty());
        assert!(half.keypoints.len() < whole.keypoints.len());
        assert!(half.is_consistent());
        for kp in half.keypoints.iter() {
            assert!(check_accessory(kp.pt(), &triangle), "{:?} outside", kp.pt());
        }
    }
}
