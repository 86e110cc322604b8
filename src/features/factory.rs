//! Ready-made extractor configurations.

use opencv::features2d::{self, FastFeatureDetector, GFTTDetector, BRISK, ORB};

use crate::config::{self, EngineConfig};
use crate::error::Result;
use crate::features::extractor::{statistical_recognition_rate, FeatureExtractor};
use crate::features::feature_pack::{DescriptorType, KeypointType};

/// ORB detector with the given pyramid scale factor and feature budget.
fn create_orb(scale_factor: f32, max_features: i32) -> Result<opencv::core::Ptr<ORB>> {
    Ok(ORB::create(
        max_features,
        scale_factor,
        8,
        31,
        0,
        2,
        features2d::ORB_ScoreType::HARRIS_SCORE,
        31,
        20,
    )?)
}

/// Builds an ORB detector + ORB descriptor extractor rated with the
/// statistical metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbExtractorFactory {
    pub scale_factor: f32,
    pub max_features: i32,
}

impl Default for OrbExtractorFactory {
    fn default() -> Self {
        Self {
            scale_factor: 1.2,
            max_features: 800,
        }
    }
}

impl OrbExtractorFactory {
    pub fn new(scale_factor: f32, max_features: i32) -> Self {
        Self {
            scale_factor,
            max_features,
        }
    }

    pub fn build(&self) -> Result<FeatureExtractor> {
        let mut extractor = FeatureExtractor::new();
        extractor.set_feature_detector(
            Box::new(create_orb(self.scale_factor, self.max_features)?),
            KeypointType::Orb,
        );
        extractor.set_descriptor_computer(
            Box::new(create_orb(self.scale_factor, self.max_features)?),
            DescriptorType::Orb,
        );
        extractor.set_recognition_rate_metric(statistical_recognition_rate);
        Ok(extractor)
    }
}

/// Combines any supported keypoint detector with any supported descriptor,
/// rated with the default metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicExtractorFactory {
    pub keypoints_type: KeypointType,
    pub descriptors_type: DescriptorType,
}

impl BasicExtractorFactory {
    pub fn new(keypoints_type: KeypointType, descriptors_type: DescriptorType) -> Self {
        Self {
            keypoints_type,
            descriptors_type,
        }
    }

    pub fn build(&self) -> Result<FeatureExtractor> {
        let mut extractor = FeatureExtractor::new();
        match self.keypoints_type {
            KeypointType::Orb => extractor
                .set_feature_detector(Box::new(ORB::create_def()?), KeypointType::Orb),
            KeypointType::Gftt => extractor
                .set_feature_detector(Box::new(GFTTDetector::create_def()?), KeypointType::Gftt),
            KeypointType::Fast => extractor.set_feature_detector(
                Box::new(FastFeatureDetector::create_def()?),
                KeypointType::Fast,
            ),
        }
        match self.descriptors_type {
            DescriptorType::Orb => extractor
                .set_descriptor_computer(Box::new(ORB::create_def()?), DescriptorType::Orb),
            DescriptorType::Brisk => extractor
                .set_descriptor_computer(Box::new(BRISK::create_def()?), DescriptorType::Brisk),
        }
        Ok(extractor)
    }
}

/// What to extract and with which detector settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeaturesExtractingParams {
    pub keypoints_type: KeypointType,
    pub descriptors_type: DescriptorType,
    /// ORB pyramid scale factor (ORB/ORB only).
    pub orb_scale_factor: f32,
    /// ORB feature budget (ORB/ORB only).
    pub orb_max_features: i32,
}

impl Default for FeaturesExtractingParams {
    fn default() -> Self {
        Self {
            keypoints_type: KeypointType::Orb,
            descriptors_type: DescriptorType::Orb,
            orb_scale_factor: 1.2,
            orb_max_features: 1000,
        }
    }
}

impl FeaturesExtractingParams {
    pub fn orb(scale_factor: f32, max_features: i32) -> Self {
        Self {
            orb_scale_factor: scale_factor,
            orb_max_features: max_features,
            ..Self::default()
        }
    }

    /// Target-object extraction settings.
    pub fn object_from_config(config: &EngineConfig) -> Self {
        Self::orb(
            config.double_or(config::OBJECT_SCALE_FACTOR, 1.2) as f32,
            config.int_or(config::OBJECT_MAX_KEYPOINTS_NUM, 1000) as i32,
        )
    }

    /// Scene extraction settings.
    pub fn scene_from_config(config: &EngineConfig) -> Self {
        Self::orb(
            config.double_or(config::SCENE_SCALE_FACTOR, 1.2) as f32,
            config.int_or(config::SCENE_MAX_KEYPOINTS_NUM, 5000) as i32,
        )
    }

    /// ORB/ORB pairs get the tuned ORB factory; anything else the basic one.
    pub fn build_extractor(&self) -> Result<FeatureExtractor> {
        if self.keypoints_type == KeypointType::Orb && self.descriptors_type == DescriptorType::Orb
        {
            OrbExtractorFactory::new(self.orb_scale_factor, self.orb_max_features).build()
        } else {
            BasicExtractorFactory::new(self.keypoints_type, self.descriptors_type).build()
        }
    }
}
