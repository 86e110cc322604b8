//! Geometry utilities: contours, quadrangle checks and planar homographies.

pub mod contour;
pub mod homography;

pub use contour::{
    bounding_box, centroid, check_accessory, clipped_bounding_rect, contour_resize, distance,
    full_image_contour, is_possible_quadrangle_corners, quadrangle_area, triangle_area, Contour,
    MINIMUM_NUMBER_OF_FEATURES, NUMBER_OF_QUADRANGLE_CORNERS,
};
pub use homography::Homography;
