//! Engine configuration snapshot.
//!
//! An [`EngineConfig`] is built once (usually with the documented defaults plus
//! a handful of overrides) and passed down to whatever needs it. Typed getters
//! fall back to the documented default when a key is absent or holds a value of
//! another type.

use std::collections::HashMap;

pub const OBJECT_SCALE_FACTOR: &str = "MV_IMAGE_RECOGNITION_OBJECT_SCALE_FACTOR";
pub const OBJECT_MAX_KEYPOINTS_NUM: &str = "MV_IMAGE_RECOGNITION_OBJECT_MAX_KEYPOINTS_NUM";
pub const SCENE_SCALE_FACTOR: &str = "MV_IMAGE_RECOGNITION_SCENE_SCALE_FACTOR";
pub const SCENE_MAX_KEYPOINTS_NUM: &str = "MV_IMAGE_RECOGNITION_SCENE_MAX_KEYPOINTS_NUM";
pub const MIN_MATCH_NUM: &str = "MV_IMAGE_RECOGNITION_MIN_MATCH_NUM";
pub const REQ_MATCH_PART: &str = "MV_IMAGE_RECOGNITION_REQ_MATCH_PART";
pub const TOLERANT_MATCH_PART_ERR: &str = "MV_IMAGE_RECOGNITION_TOLERANT_MATCH_PART_ERR";
pub const TRACKING_HISTORY_AMOUNT: &str = "MV_IMAGE_TRACKING_HISTORY_AMOUNT";
pub const TRACKING_EXPECTED_OFFSET: &str = "MV_IMAGE_TRACKING_EXPECTED_OFFSET";
pub const TRACKING_USE_STABLIZATION: &str = "MV_IMAGE_TRACKING_USE_STABLIZATION";
pub const TRACKING_STABLIZATION_TOLERANT_SHIFT: &str =
    "MV_IMAGE_TRACKING_STABLIZATION_TOLERANT_SHIFT";
pub const TRACKING_STABLIZATION_SPEED: &str = "MV_IMAGE_TRACKING_STABLIZATION_SPEED";
pub const TRACKING_STABLIZATION_ACCELERATION: &str =
    "MV_IMAGE_TRACKING_STABLIZATION_ACCELERATION";

/// A single named attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Double(f64),
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Named-attribute configuration with engine-supplied defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    values: HashMap<String, AttributeValue>,
    defaults: HashMap<&'static str, AttributeValue>,
}

impl EngineConfig {
    /// Configuration holding only the engine defaults.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            defaults: default_attributes(),
        }
    }

    pub fn set_double(&mut self, key: &str, value: f64) -> &mut Self {
        self.values
            .insert(key.to_string(), AttributeValue::Double(value));
        self
    }

    pub fn set_int(&mut self, key: &str, value: i64) -> &mut Self {
        self.values.insert(key.to_string(), AttributeValue::Int(value));
        self
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.values.insert(key.to_string(), AttributeValue::Bool(value));
        self
    }

    pub fn set_string(&mut self, key: &str, value: &str) -> &mut Self {
        self.values
            .insert(key.to_string(), AttributeValue::Str(value.to_string()));
        self
    }

    fn lookup(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key).or_else(|| self.defaults.get(key))
    }

    /// Double attribute. Integer attributes are widened.
    pub fn double(&self, key: &str) -> Option<f64> {
        match self.lookup(key)? {
            AttributeValue::Double(v) => Some(*v),
            AttributeValue::Int(v) => Some(*v as f64),
            _ => self.default_of(key).and_then(|d| match d {
                AttributeValue::Double(v) => Some(*v),
                _ => None,
            }),
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.lookup(key)? {
            AttributeValue::Int(v) => Some(*v),
            _ => self.default_of(key).and_then(|d| match d {
                AttributeValue::Int(v) => Some(*v),
                _ => None,
            }),
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.lookup(key)? {
            AttributeValue::Bool(v) => Some(*v),
            _ => self.default_of(key).and_then(|d| match d {
                AttributeValue::Bool(v) => Some(*v),
                _ => None,
            }),
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.lookup(key)? {
            AttributeValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }

    fn default_of(&self, key: &str) -> Option<&AttributeValue> {
        self.defaults.get(key)
    }

    /// Double attribute, or `fallback` when the key is unknown.
    pub fn double_or(&self, key: &str, fallback: f64) -> f64 {
        self.double(key).unwrap_or(fallback)
    }

    pub fn int_or(&self, key: &str, fallback: i64) -> i64 {
        self.int(key).unwrap_or(fallback)
    }

    pub fn bool_or(&self, key: &str, fallback: bool) -> bool {
        self.bool(key).unwrap_or(fallback)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_attributes() -> HashMap<&'static str, AttributeValue> {
    use AttributeValue::*;
    HashMap::from([
        (OBJECT_SCALE_FACTOR, Double(1.2)),
        (OBJECT_MAX_KEYPOINTS_NUM, Int(1000)),
        (SCENE_SCALE_FACTOR, Double(1.2)),
        (SCENE_MAX_KEYPOINTS_NUM, Int(5000)),
        (MIN_MATCH_NUM, Int(30)),
        (REQ_MATCH_PART, Double(0.05)),
        (TOLERANT_MATCH_PART_ERR, Double(0.1)),
        (TRACKING_HISTORY_AMOUNT, Int(3)),
        (TRACKING_EXPECTED_OFFSET, Double(0.0)),
        (TRACKING_USE_STABLIZATION, Bool(true)),
        (TRACKING_STABLIZATION_TOLERANT_SHIFT, Double(0.00006)),
        (TRACKING_STABLIZATION_SPEED, Double(0.3)),
        (TRACKING_STABLIZATION_ACCELERATION, Double(0.1)),
    ])
}
