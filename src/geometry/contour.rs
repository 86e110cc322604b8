//! Contour utilities: polygon membership, scaling, areas and the plausibility
//! check applied to recognized quadrangles.

use opencv::core::{Point2f, Rect, Size};

/// Ordered polygon delimiting an object's location (usually 4 corners).
pub type Contour = Vec<Point2f>;

/// Number of corners in a quadrangle contour.
pub const NUMBER_OF_QUADRANGLE_CORNERS: usize = 4;

/// Minimum number of correspondences needed to solve a planar homography.
pub const MINIMUM_NUMBER_OF_FEATURES: usize = 4;

/// Maximum allowed mismatch between the two diagonal decompositions of a quadrangle.
const QUADRANGLE_AREA_EPSILON: f64 = 0.1;

/// Smallest accepted area (px²) for a recognized quadrangle.
pub const MIN_SIZE_OF_DETECTED_AREA: f64 = 64.0;

/// Euclidean distance between two points.
#[inline]
pub fn distance(a: Point2f, b: Point2f) -> f32 {
    let dx = (a.x - b.x) as f64;
    let dy = (a.y - b.y) as f64;
    (dx * dx + dy * dy).sqrt() as f32
}

/// Triangle area from side lengths (Heron's formula).
pub fn triangle_area(p1: Point2f, p2: Point2f, p3: Point2f) -> f64 {
    let a = distance(p1, p2) as f64;
    let b = distance(p2, p3) as f64;
    let c = distance(p3, p1) as f64;
    let p = (a + b + c) / 2.0;
    let squared = p * (p - a) * (p - b) * (p - c);
    if squared > 0.0 {
        squared.sqrt()
    } else {
        0.0
    }
}

/// Area of a quadrangle split along the 0-2 diagonal.
///
/// Returns 0 for contours that are not quadrangles.
pub fn quadrangle_area(corners: &[Point2f]) -> f64 {
    if corners.len() != NUMBER_OF_QUADRANGLE_CORNERS {
        return 0.0;
    }
    triangle_area(corners[0], corners[1], corners[2])
        + triangle_area(corners[0], corners[3], corners[2])
}

/// Whether four corners form a plausible (convex, non self-intersecting,
/// large enough) quadrangle.
///
/// The area computed through the 0-2 diagonal must agree with the area computed
/// through the 1-3 diagonal; a folded or concave quadrangle breaks the equality.
pub fn is_possible_quadrangle_corners(corners: &[Point2f]) -> bool {
    if corners.len() != NUMBER_OF_QUADRANGLE_CORNERS {
        return false;
    }

    let first_semi_area = triangle_area(corners[0], corners[2], corners[1])
        + triangle_area(corners[0], corners[2], corners[3]);
    let second_semi_area = triangle_area(corners[1], corners[3], corners[2])
        + triangle_area(corners[1], corners[3], corners[0]);

    if (first_semi_area - second_semi_area).abs() > QUADRANGLE_AREA_EPSILON {
        return false;
    }

    first_semi_area + second_semi_area >= MIN_SIZE_OF_DETECTED_AREA
}

/// Ray-casting point-in-polygon test.
pub fn check_accessory(point: Point2f, region: &[Point2f]) -> bool {
    if region.len() < 3 {
        return false;
    }

    let mut inside = false;
    let n = region.len();
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (region[i], region[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Centroid of the contour vertices.
pub fn centroid(contour: &[Point2f]) -> Point2f {
    if contour.is_empty() {
        return Point2f::new(0.0, 0.0);
    }
    let (sx, sy) = contour
        .iter()
        .fold((0.0f64, 0.0f64), |(sx, sy), p| (sx + p.x as f64, sy + p.y as f64));
    let n = contour.len() as f64;
    Point2f::new((sx / n) as f32, (sy / n) as f32)
}

/// Scale a contour about its centroid.
pub fn contour_resize(contour: &[Point2f], scaling: f32) -> Contour {
    let centre = centroid(contour);
    contour
        .iter()
        .map(|p| {
            Point2f::new(
                (p.x - centre.x) * scaling + centre.x,
                (p.y - centre.y) * scaling + centre.y,
            )
        })
        .collect()
}

/// Axis-aligned float bounding box as `(x, y, width, height)`.
pub fn bounding_box(contour: &[Point2f]) -> Option<(f32, f32, f32, f32)> {
    let first = contour.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some((min_x, min_y, max_x - min_x, max_y - min_y))
}

/// Integer bounding box of the contour clipped to an image of `size`.
pub fn clipped_bounding_rect(contour: &[Point2f], size: Size) -> Rect {
    let Some((x, y, w, h)) = bounding_box(contour) else {
        return Rect::new(0, 0, 0, 0);
    };
    let left = (x.floor() as i32).clamp(0, size.width);
    let top = (y.floor() as i32).clamp(0, size.height);
    let right = ((x + w).ceil() as i32 + 1).clamp(0, size.width);
    let bottom = ((y + h).ceil() as i32 + 1).clamp(0, size.height);
    Rect::new(left, top, (right - left).max(0), (bottom - top).max(0))
}

/// Contour covering a whole `width` x `height` image, clockwise from the origin.
pub fn full_image_contour(width: i32, height: i32) -> Contour {
    vec![
        Point2f::new(0.0, 0.0),
        Point2f::new(width as f32, 0.0),
        Point2f::new(width as f32, height as f32),
        Point2f::new(0.0, height as f32),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square(x: f32, y: f32, side: f32) -> Contour {
        vec![
            Point2f::new(x, y),
            Point2f::new(x + side, y),
            Point2f::new(x + side, y + side),
            Point2f::new(x, y + side),
        ]
    }

    #[test]
    fn test_quadrangle_area_of_square() {
        assert_relative_eq!(quadrangle_area(&square(10.0, 20.0, 30.0)), 900.0, epsilon = 1e-3);
    }

    #[test]
    fn test_triangle_area_degenerate() {
        let a = Point2f::new(0.0, 0.0);
        let b = Point2f::new(1.0, 1.0);
        let c = Point2f::new(2.0, 2.0);
        assert_relative_eq!(triangle_area(a, b, c), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_possible_quadrangle_accepts_square() {
        assert!(is_possible_quadrangle_corners(&square(0.0, 0.0, 100.0)));
    }

    #[test]
    fn test_possible_quadrangle_rejects_self_intersecting() {
        // Bow-tie: corners 2 and 3 swapped.
        let corners = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(100.0, 0.0),
            Point2f::new(0.0, 100.0),
            Point2f::new(100.0, 100.0),
        ];
        assert!(!is_possible_quadrangle_corners(&corners));
    }

    #[test]
    fn test_possible_quadrangle_rejects_concave() {
        let corners = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(100.0, 0.0),
            Point2f::new(20.0, 20.0),
            Point2f::new(0.0, 100.0),
        ];
        assert!(!is_possible_quadrangle_corners(&corners));
    }

    #[test]
    fn test_possible_quadrangle_rejects_tiny_area() {
        // 7x7 = 49 px² is under the 64 px² floor.
        assert!(!is_possible_quadrangle_corners(&square(5.0, 5.0, 7.0)));
        assert!(is_possible_quadrangle_corners(&square(5.0, 5.0, 9.0)));
    }

    #[test]
    fn test_possible_quadrangle_requires_four_points() {
        let triangle = vec![
            Point2f::new(0.0, 0.0),
            Point2f::new(100.0, 0.0),
            Point2f::new(0.0, 100.0),
        ];
        assert!(!is_possible_quadrangle_corners(&triangle));
    }

    #[test]
    fn test_check_accessory() {
        let region = square(0.0, 0.0, 10.0);
        assert!(check_accessory(Point2f::new(5.0, 5.0), &region));
        assert!(!check_accessory(Point2f::new(15.0, 5.0), &region));
        assert!(!check_accessory(Point2f::new(5.0, -1.0), &region));
        assert!(!check_accessory(Point2f::new(5.0, 5.0), &region[..2]));
    }

    #[test]
    fn test_contour_resize_about_centroid() {
        let resized = contour_resize(&square(0.0, 0.0, 10.0), 0.5);
        assert_relative_eq!(resized[0].x, 2.5);
        assert_relative_eq!(resized[0].y, 2.5);
        assert_relative_eq!(resized[2].x, 7.5);
        assert_relative_eq!(resized[2].y, 7.5);
    }

    #[test]
    fn test_clipped_bounding_rect() {
        let rect = clipped_bounding_rect(&square(-5.0, 10.0, 20.0), Size::new(100, 100));
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 10);
        assert_eq!(rect.width, 16);
        assert_eq!(rect.height, 21);
    }
}
