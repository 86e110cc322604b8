//! Entry points for collaborators: single-shot recognition and continuous
//! tracking. Each reports through a callback invoked exactly once per
//! successful call.

use opencv::core::Point2f;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Result, TrackingError};
use crate::features::{FeaturesExtractingParams, RecognitionParams};
use crate::recognition::{ImageObject, ImageRecognizer};
use crate::source::PixelBuffer;
use crate::system::ImageTrackingModel;
use crate::tracking::TrackingParams;

/// Location of a recognized or tracked object.
pub type Quadrangle = [Point2f; 4];

fn to_quadrangle(contour: &[Point2f]) -> Option<Quadrangle> {
    Quadrangle::try_from(contour).ok()
}

/// Look for every target in `scene`.
///
/// `on_recognized` receives the targets and, in the same order, the location
/// of each one or `None` when it was not found. Empty targets are never found.
pub fn recognize<F>(
    scene: &PixelBuffer,
    targets: &[ImageObject],
    config: &EngineConfig,
    on_recognized: F,
) -> Result<()>
where
    F: FnOnce(&[ImageObject], &[Option<Quadrangle>]),
{
    if targets.is_empty() {
        return Err(TrackingError::invalid_input("no targets to recognize"));
    }

    let gray = scene.to_grayscale()?;
    let scene_object = ImageObject::from_image(
        &gray,
        &FeaturesExtractingParams::scene_from_config(config),
        &[],
    )?;
    let params = RecognitionParams::from_config(config);
    let recognizer = ImageRecognizer::new()?;

    let mut locations = Vec::with_capacity(targets.len());
    for (index, target) in targets.iter().enumerate() {
        if target.is_empty() {
            warn!(index, "Skipping empty target");
            locations.push(None);
            continue;
        }
        let found = recognizer.recognize(target, &scene_object, &params, 0.0)?;
        debug!(index, found = found.is_some(), "Target recognition");
        locations.push(found.as_deref().and_then(to_quadrangle));
    }

    on_recognized(targets, &locations);
    Ok(())
}

/// Feed one frame to `model`.
///
/// `on_tracked` receives the target location or `None` when it is not
/// located. While the model searches the whole frame in the background, calls
/// return the last known state without doing any work.
pub fn track<F>(
    frame: &PixelBuffer,
    model: &ImageTrackingModel,
    config: &EngineConfig,
    on_tracked: F,
) -> Result<()>
where
    F: FnOnce(Option<Quadrangle>),
{
    let gray = frame.to_grayscale()?;
    let params = TrackingParams::from_config(config);
    let location = model.track(&gray, &params)?;
    on_tracked(location.as_deref().and_then(to_quadrangle));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::source::Colorspace;
    use crate::system::ModelOptions;
    use crate::test_support::{assert_contour_near, scene_with_target, square, textured_image};
    use crate::tracking::TrackingState;

    fn recognition_config() -> EngineConfig {
        let mut config = EngineConfig::new();
        config
            .set_int(config::MIN_MATCH_NUM, 15)
            .set_double(config::REQ_MATCH_PART, 0.33);
        config
    }

    fn target(config: &EngineConfig) -> ImageObject {
        ImageObject::from_image(
            &textured_image(200, 200, 31),
            &FeaturesExtractingParams::object_from_config(config),
            &[],
        )
        .unwrap()
    }

    fn scene() -> PixelBuffer {
        PixelBuffer::from_gray_mat(&scene_with_target(640, 480, 200, 31, 200, 120)).unwrap()
    }

    #[test]
    fn test_recognize_reports_every_target_once() {
        let config = recognition_config();
        let targets = vec![target(&config), ImageObject::new()];

        let mut calls = 0;
        recognize(&scene(), &targets, &config, |objects, locations| {
            calls += 1;
            assert_eq!(objects.len(), 2);
            assert_eq!(locations.len(), 2);
            let found = locations[0].expect("target should be found");
            assert_contour_near(&found, &square(200.0, 120.0, 200.0), 3.0);
            assert!(locations[1].is_none());
        })
        .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_recognize_without_targets_fails() {
        let result = recognize(&scene(), &[], &EngineConfig::new(), |_, _| {
            panic!("callback must not run");
        });
        assert!(matches!(result, Err(TrackingError::InvalidInput(_))));
    }

    #[test]
    fn test_track_through_pixel_buffer() {
        let config = recognition_config();
        let model = ImageTrackingModel::with_options(ModelOptions {
            asynchronous: false,
        })
        .unwrap();
        model.set_target(&target(&config)).unwrap();

        let mut reported = None;
        track(&scene(), &model, &config, |location| reported = location).unwrap();
        let found = reported.expect("target should be found");
        assert_contour_near(&found, &square(200.0, 120.0, 200.0), 3.0);
        assert_eq!(model.state(), TrackingState::Appeared);
    }

    #[test]
    fn test_track_rejects_unsupported_colorspace() {
        let model = ImageTrackingModel::with_options(ModelOptions {
            asynchronous: false,
        })
        .unwrap();
        let frame = PixelBuffer::new(vec![0; 64 * 64 * 2], 64, 64, Colorspace::RGB565).unwrap();
        let result = track(&frame, &model, &EngineConfig::new(), |_| {
            panic!("callback must not run");
        });
        assert!(matches!(result, Err(TrackingError::UnsupportedColorspace(_))));
    }

    #[test]
    fn test_track_on_invalid_model() {
        let model = ImageTrackingModel::with_options(ModelOptions {
            asynchronous: false,
        })
        .unwrap();
        let result = track(&scene(), &model, &EngineConfig::new(), |_| {});
        assert!(matches!(result, Err(TrackingError::InvalidModel)));
    }
}
