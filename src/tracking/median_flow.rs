//! Median-flow tracker: a grid of points inside the last bounding box is
//! propagated with pyramidal Lucas-Kanade, filtered by forward-backward error
//! and patch cross-correlation, and the surviving displacements vote for the
//! new box.

use opencv::core::{self, Mat, Point2f, Rect2f, Size, TermCriteria, Vector};
use opencv::imgproc;
use opencv::prelude::*;
use opencv::video;
use tracing::debug;

use crate::error::Result;
use crate::geometry::{bounding_box, distance, Contour};
use crate::tracking::tracker::{next_tracker_id, ObjectTracker, TrackerId};

const FLOAT_EPS: f32 = 1e-6;

/// Side of the square patches compared by normalized cross-correlation.
const NCC_PATCH_SIDE: i32 = 30;

/// Median residual (px) at which confidence reaches zero.
const MAX_MEDIAN_RESIDUAL: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MedianFlowParams {
    /// Grid points per box side.
    pub points_in_grid: usize,
    pub window_size: Size,
    pub pyramid_max_level: i32,
}

impl Default for MedianFlowParams {
    fn default() -> Self {
        Self {
            points_in_grid: 10,
            window_size: Size::new(3, 3),
            pyramid_max_level: 5,
        }
    }
}

pub struct MedianFlowTracker {
    id: TrackerId,
    params: MedianFlowParams,
    termination: TermCriteria,
    /// Location corners relative to the bounding box, in [0, 1].
    start_location: Vec<Point2f>,
    bounding_box: Rect2f,
    image: Mat,
    pyramid: Vector<Mat>,
    is_init: bool,
    confidence: f32,
}

impl MedianFlowTracker {
    pub fn new(params: MedianFlowParams) -> Result<Self> {
        Ok(Self {
            id: next_tracker_id(),
            params,
            termination: TermCriteria::new(
                core::TermCriteria_Type::COUNT as i32 | core::TermCriteria_Type::EPS as i32,
                20,
                0.3,
            )?,
            start_location: Vec::new(),
            bounding_box: Rect2f::default(),
            image: Mat::default(),
            pyramid: Vector::new(),
            is_init: false,
            confidence: 0.0,
        })
    }

    /// Confidence of the last successful update, in [0, 1].
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    fn build_pyramid(&self, image: &Mat) -> Result<Vector<Mat>> {
        let mut pyramid = Vector::<Mat>::new();
        video::build_optical_flow_pyramid(
            image,
            &mut pyramid,
            self.params.window_size,
            self.params.pyramid_max_level,
            true,
            core::BORDER_REFLECT_101,
            core::BORDER_CONSTANT,
            false,
        )?;
        Ok(pyramid)
    }

    fn init(&mut self, frame: &Mat) -> Result<bool> {
        if frame.empty() {
            return Ok(false);
        }
        self.image = frame.try_clone()?;
        self.pyramid = self.build_pyramid(&self.image)?;
        self.is_init = true;
        Ok(true)
    }

    fn update(&mut self, frame: &Mat) -> Result<bool> {
        if !self.is_init || frame.empty() {
            return Ok(false);
        }

        if frame.rows() != self.image.rows() || frame.cols() != self.image.cols() {
            let fx = frame.cols() as f32 / self.image.cols() as f32;
            let fy = frame.rows() as f32 / self.image.rows() as f32;
            let mut resized = Mat::default();
            imgproc::resize(
                &self.image,
                &mut resized,
                frame.size()?,
                0.0,
                0.0,
                imgproc::INTER_LINEAR,
            )?;
            self.image = resized;
            self.pyramid = self.build_pyramid(&self.image)?;
            self.bounding_box = Rect2f::new(
                self.bounding_box.x * fx,
                self.bounding_box.y * fy,
                self.bounding_box.width * fx,
                self.bounding_box.height * fy,
            );
        }

        let Some((new_box, new_pyramid)) = self.median_flow(frame)? else {
            return Ok(false);
        };
        self.image = frame.try_clone()?;
        self.pyramid = new_pyramid;
        self.bounding_box = new_box;
        Ok(true)
    }

    fn grid_points(&self) -> Vector<Point2f> {
        let b = self.bounding_box;
        let n = self.params.points_in_grid;
        let step_x = b.width / n as f32;
        let step_y = b.height / n as f32;
        let mut points = Vector::<Point2f>::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                points.push(Point2f::new(
                    b.x + 0.5 * step_x + step_x * j as f32,
                    b.y + 0.5 * step_y + step_y * i as f32,
                ));
            }
        }
        points
    }

    fn optical_flow(
        &self,
        from: &Vector<Mat>,
        to: &Vector<Mat>,
        points: &Vector<Point2f>,
    ) -> Result<(Vector<Point2f>, Vector<u8>)> {
        let mut moved = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut errors = Vector::<f32>::new();
        video::calc_optical_flow_pyr_lk(
            from,
            to,
            points,
            &mut moved,
            &mut status,
            &mut errors,
            self.params.window_size,
            self.params.pyramid_max_level,
            self.termination,
            0,
            1e-4,
        )?;
        Ok((moved, status))
    }

    /// One median-flow step from the stored image to `frame`.
    fn median_flow(&mut self, frame: &Mat) -> Result<Option<(Rect2f, Vector<Mat>)>> {
        let old_points = self.grid_points();
        let new_pyramid = self.build_pyramid(frame)?;

        let (new_points, status) = self.optical_flow(&self.pyramid, &new_pyramid, &old_points)?;
        let (back_points, back_status) =
            self.optical_flow(&new_pyramid, &self.pyramid, &new_points)?;

        let old: Vec<Point2f> = old_points.to_vec();
        let new: Vec<Point2f> = new_points.to_vec();
        let status = status.to_vec();
        let back_status = back_status.to_vec();

        let di: Vec<Point2f> = old
            .iter()
            .zip(&new)
            .zip(&status)
            .filter(|&(_, &s)| s == 1)
            .map(|((o, n), _)| Point2f::new(n.x - o.x, n.y - o.y))
            .collect();

        // Forward-backward consistency.
        let fb_errors: Vec<f32> = old
            .iter()
            .zip(back_points.iter())
            .map(|(o, b)| distance(*o, b))
            .collect();
        let fb_median = median(&fb_errors) + FLOAT_EPS;
        let mut keep: Vec<bool> = fb_errors
            .iter()
            .zip(&back_status)
            .map(|(&e, &s)| s == 1 && e < fb_median)
            .collect();

        // Cross-correlation of the neighbourhoods.
        let patch = Size::new(NCC_PATCH_SIDE, NCC_PATCH_SIDE);
        let mut ncc = Vec::with_capacity(old.len());
        for (o, n) in old.iter().zip(&new) {
            ncc.push(normalized_cross_correlation(&self.image, frame, *o, *n, patch)?);
        }
        let ncc_median = median(&ncc) - FLOAT_EPS;
        for (k, &c) in keep.iter_mut().zip(&ncc) {
            *k = *k && c > ncc_median;
        }

        let (kept_old, kept_new): (Vec<Point2f>, Vec<Point2f>) = old
            .iter()
            .zip(&new)
            .zip(&keep)
            .filter(|&(_, &k)| k)
            .map(|((o, n), _)| (*o, *n))
            .unzip();

        if kept_old.is_empty() || di.is_empty() {
            debug!("Median flow kept no points");
            return Ok(None);
        }

        let (candidate, shift) = vote(&kept_old, &kept_new, self.bounding_box);

        let residuals: Vec<f32> = di
            .iter()
            .map(|d| {
                let (rx, ry) = (d.x - shift.x, d.y - shift.y);
                (rx * rx + ry * ry).sqrt()
            })
            .collect();
        self.confidence = (MAX_MEDIAN_RESIDUAL - median(&residuals)) / MAX_MEDIAN_RESIDUAL;
        if self.confidence < 0.0 {
            self.confidence = 0.0;
            debug!("Median flow residual too large");
            return Ok(None);
        }

        Ok(Some((candidate, new_pyramid)))
    }
}

/// Upper median (the element at index `len / 2` once sorted); 0 for empty input.
pub fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    let mid = sorted.len() / 2;
    let (_, m, _) = sorted.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// New box from matched points: median translation, median pairwise scale.
/// Also returns the voted translation.
pub fn vote(old: &[Point2f], new: &[Point2f], old_box: Rect2f) -> (Rect2f, Point2f) {
    let n = old.len();
    if n == 1 {
        let shift = Point2f::new(new[0].x - old[0].x, new[0].y - old[0].y);
        let moved = Rect2f::new(old_box.x + shift.x, old_box.y + shift.y, old_box.width, old_box.height);
        return (moved, shift);
    }

    let dx: Vec<f32> = old.iter().zip(new).map(|(o, p)| p.x - o.x).collect();
    let dy: Vec<f32> = old.iter().zip(new).map(|(o, p)| p.y - o.y).collect();
    let shift = Point2f::new(median(&dx), median(&dy));

    let mut ratios = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in 0..i {
            let od = distance(old[i], old[j]);
            let nd = distance(new[i], new[j]);
            ratios.push(if od == 0.0 { 0.0 } else { nd / od });
        }
    }
    let scale = median(&ratios);

    let cx = old_box.x + old_box.width / 2.0 + shift.x;
    let cy = old_box.y + old_box.height / 2.0 + shift.y;
    let width = scale * old_box.width;
    let height = scale * old_box.height;
    (
        Rect2f::new(cx - width / 2.0, cy - height / 2.0, width, height),
        shift,
    )
}

/// NCC of the patches around `old_pt` and `new_pt`. A flat patch correlates as 0.
fn normalized_cross_correlation(
    old_image: &Mat,
    new_image: &Mat,
    old_pt: Point2f,
    new_pt: Point2f,
    patch: Size,
) -> Result<f32> {
    let mut p1 = Mat::default();
    let mut p2 = Mat::default();
    imgproc::get_rect_sub_pix(old_image, patch, old_pt, &mut p1, -1)?;
    imgproc::get_rect_sub_pix(new_image, patch, new_pt, &mut p2, -1)?;

    let a = p1.data_bytes()?;
    let b = p2.data_bytes()?;
    let n = a.len().min(b.len()) as f64;
    if n == 0.0 {
        return Ok(0.0);
    }

    let (mut s1, mut s2, mut q1, mut q2, mut prod) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        s1 += x;
        s2 += y;
        q1 += x * x;
        q2 += y * y;
        prod += x * y;
    }
    let sq1 = (q1 - s1 * s1 / n).max(0.0).sqrt();
    let sq2 = (q2 - s2 * s2 / n).max(0.0).sqrt();
    if sq1 < f64::EPSILON || sq2 < f64::EPSILON {
        return Ok(0.0);
    }
    Ok(((prod - s1 * s2 / n) / sq1 / sq2) as f32)
}

impl ObjectTracker for MedianFlowTracker {
    fn track(&mut self, frame: &Mat) -> Result<Option<Contour>> {
        if !self.is_init {
            if self.start_location.is_empty() || !self.init(frame)? {
                return Ok(None);
            }
        } else if !self.update(frame)? {
            self.is_init = false;
            self.start_location.clear();
            return Ok(None);
        }

        let b = self.bounding_box;
        Ok(Some(
            self.start_location
                .iter()
                .map(|p| Point2f::new(b.x + b.width * p.x, b.y + b.height * p.y))
                .collect(),
        ))
    }

    fn reinforcement(&mut self, location: &[Point2f]) {
        self.is_init = false;

        let bbox = (location.len() >= 3)
            .then(|| bounding_box(location))
            .flatten()
            .filter(|&(_, _, w, h)| w > 0.0 && h > 0.0);
        let Some((x, y, width, height)) = bbox else {
            self.start_location.clear();
            self.bounding_box = Rect2f::default();
            return;
        };

        self.bounding_box = Rect2f::new(x, y, width, height);
        self.start_location = location
            .iter()
            .map(|p| Point2f::new((p.x - x) / width, (p.y - y) / height))
            .collect();
    }

    fn clone_box(&self) -> Box<dyn ObjectTracker> {
        Box::new(Self {
            id: next_tracker_id(),
            params: self.params,
            termination: self.termination,
            start_location: self.start_location.clone(),
            bounding_box: self.bounding_box,
            image: self.image.clone(),
            pyramid: self.pyramid.clone(),
            is_init: self.is_init,
            confidence: self.confidence,
        })
    }

    fn id(&self) -> TrackerId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{assert_contour_near, flat_image, scene_with_target, square};
    use approx::assert_relative_eq;

    fn model_params() -> MedianFlowParams {
        MedianFlowParams {
            points_in_grid: 10,
            window_size: Size::new(16, 16),
            pyramid_max_level: 16,
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 3.0);
    }

    #[test]
    fn test_vote_translation_and_scale() {
        let old = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(10.0, 0.0),
            Point2f::new(0.0, 10.0),
            Point2f::new(10.0, 10.0),
        ];
        let new: Vec<Point2f> = old
            .iter()
            .map(|p| Point2f::new(2.0 * p.x + 5.0, 2.0 * p.y + 5.0))
            .collect();
        let (b, _) = vote(&old, &new, Rect2f::new(0.0, 0.0, 10.0, 10.0));
        assert_relative_eq!(b.width, 20.0, epsilon = 1e-4);
        assert_relative_eq!(b.height, 20.0, epsilon = 1e-4);
    }

    #[test]
    fn test_needs_reinforcement() {
        let mut tracker = MedianFlowTracker::new(model_params()).unwrap();
        let frame = scene_with_target(320, 240, 100, 4, 100, 60);
        assert!(tracker.track(&frame).unwrap().is_none());
    }

    #[test]
    fn test_follows_translation() {
        let mut tracker = MedianFlowTracker::new(model_params()).unwrap();
        tracker.reinforcement(&square(200.0, 120.0, 200.0));

        let first = tracker
            .track(&scene_with_target(640, 480, 200, 13, 200, 120))
            .unwrap()
            .unwrap();
        assert_contour_near(&first, &square(200.0, 120.0, 200.0), 0.01);

        let moved = tracker
            .track(&scene_with_target(640, 480, 200, 13, 204, 123))
            .unwrap()
            .unwrap();
        assert_contour_near(&moved, &square(204.0, 123.0, 200.0), 3.0);
        assert!(tracker.confidence() > 0.5);
    }

    #[test]
    fn test_fails_when_object_disappears() {
        let mut tracker = MedianFlowTracker::new(model_params()).unwrap();
        tracker.reinforcement(&square(200.0, 120.0, 200.0));
        tracker
            .track(&scene_with_target(640, 480, 200, 13, 200, 120))
            .unwrap();

        assert!(tracker.track(&flat_image(640, 480, 128)).unwrap().is_none());
        // Lost until reinforced again.
        assert!(tracker
            .track(&scene_with_target(640, 480, 200, 13, 200, 120))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_empty_reinforcement_resets() {
        let mut tracker = MedianFlowTracker::new(model_params()).unwrap();
        tracker.reinforcement(&square(10.0, 10.0, 50.0));
        tracker.reinforcement(&[]);
        assert!(tracker
            .track(&scene_with_target(320, 240, 100, 4, 100, 60))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rescales_box_when_frame_size_changes() {
        let small = scene_with_target(320, 240, 100, 4, 100, 60);
        let mut large = Mat::default();
        imgproc::resize(
            &small,
            &mut large,
            Size::new(640, 480),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .unwrap();

        let mut tracker = MedianFlowTracker::new(model_params()).unwrap();
        tracker.reinforcement(&square(100.0, 60.0, 100.0));
        let first = tracker.track(&small).unwrap().unwrap();
        assert_contour_near(&first, &square(100.0, 60.0, 100.0), 0.01);

        let scaled = tracker.track(&large).unwrap().unwrap();
        assert_contour_near(&scaled, &square(200.0, 120.0, 200.0), 1.0);
    }

    #[test]
    fn test_clone_is_independent() {
        let frame = scene_with_target(640, 480, 200, 13, 200, 120);
        let mut original = MedianFlowTracker::new(model_params()).unwrap();
        original.reinforcement(&square(200.0, 120.0, 200.0));
        original.track(&frame).unwrap();

        let mut copy = original.clone_box();
        original.reinforcement(&[]);
        assert!(original.track(&frame).unwrap().is_none());

        let followed = copy.track(&frame).unwrap().unwrap();
        assert_contour_near(&followed, &square(200.0, 120.0, 200.0), 1.0);
    }
}
