//! Recognition target: a contour plus the features extracted inside it.

use std::path::Path;

use opencv::core::{Mat, Point2f};
use opencv::prelude::*;
use tracing::{debug, info};

use crate::error::Result;
use crate::features::{FeaturePack, FeaturesExtractingParams};
use crate::geometry::{full_image_contour, Contour};
use crate::recognition::serialization::{
    read_image_object, read_text_file, write_image_object, write_text_file, TokenReader,
};

/// Features of an image region together with the polygon they came from.
#[derive(Debug, Clone)]
pub struct ImageObject {
    contour: Contour,
    features: FeaturePack,
    is_empty: bool,
    label: Option<i32>,
}

impl ImageObject {
    /// Empty object: no contour, no features, no label.
    pub fn new() -> Self {
        Self {
            contour: Contour::new(),
            features: FeaturePack::new(),
            is_empty: true,
            label: None,
        }
    }

    /// Extract an object from `image` inside `roi` (whole image when empty).
    pub fn from_image(
        image: &Mat,
        params: &FeaturesExtractingParams,
        roi: &[Point2f],
    ) -> Result<Self> {
        let mut object = Self::new();
        object.fill(image, params, roi)?;
        Ok(object)
    }

    pub(crate) fn from_parts(
        contour: Contour,
        features: FeaturePack,
        is_empty: bool,
        label: Option<i32>,
    ) -> Self {
        Self {
            contour,
            features,
            is_empty,
            label,
        }
    }

    /// Re-extract features from `image` inside `roi`; the contour becomes `roi`
    /// (or the full image frame when `roi` is empty).
    pub fn fill(
        &mut self,
        image: &Mat,
        params: &FeaturesExtractingParams,
        roi: &[Point2f],
    ) -> Result<()> {
        self.contour = if roi.is_empty() {
            full_image_contour(image.cols(), image.rows())
        } else {
            roi.to_vec()
        };

        let mut extractor = params.build_extractor()?;
        self.features = extractor
            .extract(image, &self.contour)?
            .unwrap_or_default();
        self.is_empty = self.features.is_empty();

        debug!(
            keypoints = self.features.len(),
            rate = self.features.recognition_rate,
            "Image object filled"
        );
        Ok(())
    }

    /// True until the object holds at least one keypoint.
    pub fn is_empty(&self) -> bool {
        self.is_empty || self.features.is_empty()
    }

    pub fn recognition_rate(&self) -> f32 {
        self.features.recognition_rate
    }

    pub fn contour(&self) -> &[Point2f] {
        &self.contour
    }

    pub fn set_contour(&mut self, contour: Contour) {
        self.contour = contour;
    }

    pub fn label(&self) -> Option<i32> {
        self.label
    }

    pub fn set_label(&mut self, label: i32) {
        self.label = Some(label);
    }

    pub fn features(&self) -> &FeaturePack {
        &self.features
    }

    pub fn serialize(&self) -> Result<String> {
        let mut out = String::new();
        write_image_object(&mut out, self)?;
        Ok(out)
    }

    pub fn deserialize(text: &str) -> Result<Self> {
        let mut reader = TokenReader::new(text);
        let object = read_image_object(&mut reader)?;
        reader.finish()?;
        Ok(object)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        write_text_file(path, &self.serialize()?)?;
        info!(path = %path.display(), "Image object saved");
        Ok(())
    }

    /// Replace `self` with the object stored at `path`. On failure `self` is untouched.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let loaded = Self::deserialize(&read_text_file(path)?)?;
        *self = loaded;
        info!(path = %path.display(), "Image object loaded");
        Ok(())
    }
}

impl Default for ImageObject {
    fn default() -> Self {
        Self::new()
    }
}
