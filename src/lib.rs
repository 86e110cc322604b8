pub mod api;
pub mod config;
pub mod error;
pub mod features;
pub mod geometry;
pub mod recognition;
pub mod source;
pub mod system;
pub mod tracking;

#[cfg(test)]
mod test_support;

pub use error::{Result, TrackingError};
