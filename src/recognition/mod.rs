//! Recognition targets, homography recognition and persistence.

pub mod image_object;
pub mod recognizer;
pub mod serialization;

pub use image_object::ImageObject;
pub use recognizer::ImageRecognizer;
