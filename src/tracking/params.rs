//! Tracking and stabilization parameters.

use crate::config::{self, EngineConfig};
use crate::features::{FeaturesExtractingParams, RecognitionParams};

/// Contour stabilization settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilizationParams {
    pub enabled: bool,
    /// Number of past contours kept.
    pub history_amount: usize,
    /// Shift threshold relative to the contour area.
    pub tolerant_shift: f64,
    /// Constant added to the relative shift threshold (px).
    pub tolerant_shift_extra: f64,
    pub stabilization_speed: f64,
    pub stabilization_acceleration: f64,
}

impl Default for StabilizationParams {
    fn default() -> Self {
        Self {
            enabled: true,
            history_amount: 3,
            tolerant_shift: 0.00006,
            tolerant_shift_extra: 1.3,
            stabilization_speed: 0.3,
            stabilization_acceleration: 0.1,
        }
    }
}

impl StabilizationParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        let d = Self::default();
        Self {
            enabled: config.bool_or(config::TRACKING_USE_STABLIZATION, d.enabled),
            history_amount: config
                .int_or(config::TRACKING_HISTORY_AMOUNT, d.history_amount as i64)
                .max(0) as usize,
            tolerant_shift: config
                .double_or(config::TRACKING_STABLIZATION_TOLERANT_SHIFT, d.tolerant_shift),
            tolerant_shift_extra: d.tolerant_shift_extra,
            stabilization_speed: config
                .double_or(config::TRACKING_STABLIZATION_SPEED, d.stabilization_speed),
            stabilization_acceleration: config.double_or(
                config::TRACKING_STABLIZATION_ACCELERATION,
                d.stabilization_acceleration,
            ),
        }
    }
}

/// Per-frame settings for continuous tracking of one target.
///
/// Stabilization settings belong to the model instead, so they survive a
/// save and load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingParams {
    pub frames_features_extracting: FeaturesExtractingParams,
    pub recognition: RecognitionParams,
    /// Fraction by which the search window around the last location grows.
    pub expected_offset: f64,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            frames_features_extracting: FeaturesExtractingParams::orb(1.2, 5000),
            recognition: RecognitionParams::default(),
            expected_offset: 0.0,
        }
    }
}

impl TrackingParams {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            frames_features_extracting: FeaturesExtractingParams::scene_from_config(config),
            recognition: RecognitionParams::from_config(config),
            expected_offset: config.double_or(config::TRACKING_EXPECTED_OFFSET, 0.0),
        }
    }
}
