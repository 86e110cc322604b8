//! Planar homography estimation between matched point sets.

use nalgebra::{Matrix3, Vector3};
use opencv::calib3d;
use opencv::core::{Mat, Point2f, Vector};
use opencv::prelude::*;

use crate::error::Result;
use crate::geometry::contour::MINIMUM_NUMBER_OF_FEATURES;

/// RANSAC reprojection threshold in pixels.
const RANSAC_REPROJ_THRESHOLD: f64 = 3.0;

/// 3x3 projective transform mapping target-plane points into the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(pub Matrix3<f64>);

impl Homography {
    /// Robustly estimate the homography `src -> dst`.
    ///
    /// Returns `Ok(None)` when there are fewer than 4 correspondences or the
    /// estimator gives up (degenerate configuration).
    pub fn estimate(src: &[Point2f], dst: &[Point2f]) -> Result<Option<Self>> {
        if src.len() != dst.len() || src.len() < MINIMUM_NUMBER_OF_FEATURES {
            return Ok(None);
        }

        let src_pts = Vector::<Point2f>::from_slice(src);
        let dst_pts = Vector::<Point2f>::from_slice(dst);
        let mut mask = Mat::default();
        let h = calib3d::find_homography(
            &src_pts,
            &dst_pts,
            &mut mask,
            calib3d::RANSAC,
            RANSAC_REPROJ_THRESHOLD,
        )?;

        if h.empty() || h.rows() != 3 || h.cols() != 3 {
            return Ok(None);
        }

        let matrix = mat3_to_matrix3(&h)?;
        if !matrix.iter().all(|v| v.is_finite()) {
            return Ok(None);
        }
        Ok(Some(Self(matrix)))
    }

    /// Apply the transform to one point. Points mapped to infinity yield `None`.
    pub fn project(&self, p: Point2f) -> Option<Point2f> {
        let v = self.0 * Vector3::new(p.x as f64, p.y as f64, 1.0);
        if v.z.abs() < f64::EPSILON {
            return None;
        }
        Some(Point2f::new((v.x / v.z) as f32, (v.y / v.z) as f32))
    }

    /// Apply the transform to every contour vertex.
    pub fn project_contour(&self, contour: &[Point2f]) -> Option<Vec<Point2f>> {
        contour.iter().map(|p| self.project(*p)).collect()
    }
}

/// Convert an OpenCV 3x3 `CV_64F` Mat to nalgebra.
fn mat3_to_matrix3(mat: &Mat) -> Result<Matrix3<f64>> {
    let mut arr = [0.0f64; 9];
    for (i, v) in arr.iter_mut().enumerate() {
        *v = *mat.at::<f64>(i as i32)?;
    }
    Ok(Matrix3::from_row_slice(&arr))
}
