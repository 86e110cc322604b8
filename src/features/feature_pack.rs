//! Keypoints and descriptors extracted from one image region.

use opencv::core::{KeyPoint, Mat, Point2f, Vector};
use opencv::prelude::*;

/// Keypoint detector family used to build a [`FeaturePack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypointType {
    Orb,
    Gftt,
    Fast,
}

/// Descriptor family used to build a [`FeaturePack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorType {
    Orb,
    Brisk,
}

/// Keypoints plus a parallel descriptor matrix (one row per keypoint).
#[derive(Clone)]
pub struct FeaturePack {
    pub keypoints_type: KeypointType,
    pub descriptors_type: DescriptorType,
    pub keypoints: Vector<KeyPoint>,
    pub descriptors: Mat,
    /// Confidence in [0, 1] that this pack supports future recognition.
    pub recognition_rate: f32,
}

impl FeaturePack {
    pub fn new() -> Self {
        Self {
            keypoints_type: KeypointType::Orb,
            descriptors_type: DescriptorType::Orb,
            keypoints: Vector::new(),
            descriptors: Mat::default(),
            recognition_rate: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Keypoint positions in image coordinates.
    pub fn points(&self) -> Vec<Point2f> {
        self.keypoints.iter().map(|kp| kp.pt()).collect()
    }

    /// Keypoint count matches descriptor row count.
    pub fn is_consistent(&self) -> bool {
        if self.keypoints.is_empty() {
            return self.descriptors.empty() || self.descriptors.rows() == 0;
        }
        self.descriptors.rows() as usize == self.keypoints.len()
    }
}

impl Default for FeaturePack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FeaturePack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeaturePack")
            .field("keypoints_type", &self.keypoints_type)
            .field("descriptors_type", &self.descriptors_type)
            .field("keypoints", &self.keypoints.len())
            .field("descriptor_rows", &self.descriptors.rows())
            .field("descriptor_cols", &self.descriptors.cols())
            .field("recognition_rate", &self.recognition_rate)
            .finish()
    }
}
