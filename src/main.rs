use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use opencv::imgcodecs;
use opencv::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use image_tracking::api;
use image_tracking::config::EngineConfig;
use image_tracking::features::FeaturesExtractingParams;
use image_tracking::recognition::ImageObject;
use image_tracking::source::PixelBuffer;
use image_tracking::system::ImageTrackingModel;
use image_tracking::tracking::StabilizationParams;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

fn read_gray(path: &Path) -> Result<PixelBuffer> {
    let image = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_GRAYSCALE)
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    if image.empty() {
        bail!("Failed to read image {}", path.display());
    }
    PixelBuffer::from_gray_mat(&image).with_context(|| format!("Bad image {}", path.display()))
}

fn frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(target_path), Some(frames_dir)) = (args.next(), args.next()) else {
        bail!("usage: image-tracking <target-image> <frames-dir> [model-output]");
    };
    let model_output = args.next();

    let config = EngineConfig::new();

    let target_image = read_gray(Path::new(&target_path))?;
    let target = ImageObject::from_image(
        &target_image.to_grayscale()?,
        &FeaturesExtractingParams::object_from_config(&config),
        &[],
    )
    .context("Failed to extract target features")?;
    if target.is_empty() {
        bail!("Target image {} has too few features", target_path);
    }
    info!(
        features = target.features().len(),
        rate = target.recognition_rate(),
        "Target loaded"
    );

    let frames = frame_paths(Path::new(&frames_dir))?;
    info!("Tracking over {} frames from {}", frames.len(), frames_dir);

    // Single-shot recognition on the first frame, for reference.
    if let Some(first) = frames.first() {
        let scene = read_gray(first)?;
        api::recognize(&scene, std::slice::from_ref(&target), &config, |_, locations| {
            match locations.first().copied().flatten() {
                Some(corners) => info!(?corners, "Target recognized in first frame"),
                None => info!("Target not recognized in first frame"),
            }
        })?;
    }

    let model = ImageTrackingModel::new()?;
    model.set_target(&target)?;
    model.set_stabilization(&StabilizationParams::from_config(&config))?;

    let mut located = 0usize;
    for (index, path) in frames.iter().enumerate() {
        let frame = match read_gray(path) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping frame {}: {:#}", path.display(), e);
                continue;
            }
        };
        api::track(&frame, &model, &config, |location| match location {
            Some(corners) => {
                located += 1;
                info!(frame = index, state = ?model.state(), ?corners, "Target located");
            }
            None => info!(frame = index, state = ?model.state(), "Target not located"),
        })?;
    }

    info!("Target located in {}/{} frames", located, frames.len());

    if let Some(output) = model_output {
        model.wait_idle()?;
        model
            .save(&output)
            .with_context(|| format!("Failed to save tracking model to {}", output))?;
        info!("Tracking model written to {}", output);
    }

    Ok(())
}
