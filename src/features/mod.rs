//! Feature extraction and matching.
//!
//! - `feature_pack`: keypoints + descriptors + recognition rate
//! - `extractor`: pluggable detector/descriptor pair over an image region
//! - `factory`: ORB and basic extractor configurations
//! - `matcher`: brute-force matching with quota selection

pub mod extractor;
pub mod factory;
pub mod feature_pack;
pub mod matcher;

pub use extractor::{
    default_recognition_rate, statistical_recognition_rate, DescriptorComputer, FeatureExtractor,
    KeypointDetector, RecognitionRateFn,
};
pub use factory::{BasicExtractorFactory, FeaturesExtractingParams, OrbExtractorFactory};
pub use feature_pack::{DescriptorType, FeaturePack, KeypointType};
pub use matcher::{select_best_matches, FeatureMatcher, RecognitionParams};
