//! Synthetic images for tests.

use opencv::core::{Mat, Point2f};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::source::mat_from_bytes;

/// Grayscale block noise: `block` x `block` squares of random intensity.
/// Seeded, so images are identical across runs.
pub fn textured_pixels(width: usize, height: usize, block: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let bw = width.div_ceil(block);
    let bh = height.div_ceil(block);
    let levels: Vec<u8> = (0..bw * bh).map(|_| rng.gen()).collect();

    let mut pixels = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            pixels[y * width + x] = levels[(y / block) * bw + x / block];
        }
    }
    pixels
}

pub fn textured_image(width: usize, height: usize, seed: u64) -> Mat {
    mat_from_bytes(&textured_pixels(width, height, 8, seed), height, 1).unwrap()
}

pub fn flat_image(width: usize, height: usize, value: u8) -> Mat {
    mat_from_bytes(&vec![value; width * height], height, 1).unwrap()
}

/// Flat gray scene with a textured `target_size` square pasted at `(x, y)`.
pub fn scene_with_target(
    width: usize,
    height: usize,
    target_size: usize,
    seed: u64,
    x: usize,
    y: usize,
) -> Mat {
    let target = textured_pixels(target_size, target_size, 8, seed);
    let mut pixels = vec![128u8; width * height];
    for ty in 0..target_size {
        let row = (y + ty) * width + x;
        pixels[row..row + target_size]
            .copy_from_slice(&target[ty * target_size..(ty + 1) * target_size]);
    }
    mat_from_bytes(&pixels, height, 1).unwrap()
}

/// Axis-aligned square contour, clockwise from the top-left corner.
pub fn square(x: f32, y: f32, side: f32) -> Vec<Point2f> {
    vec![
        Point2f::new(x, y),
        Point2f::new(x + side, y),
        Point2f::new(x + side, y + side),
        Point2f::new(x, y + side),
    ]
}

pub fn assert_contour_near(actual: &[Point2f], expected: &[Point2f], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "contour sizes differ");
    for (a, e) in actual.iter().zip(expected) {
        assert!(
            (a.x - e.x).abs() <= tolerance && (a.y - e.y).abs() <= tolerance,
            "corner {a:?} is not within {tolerance}px of {e:?}"
        );
    }
}
