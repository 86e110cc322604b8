//! Tracking model orchestration.
//!
//! [`ImageTrackingModel`] is a handle to an actor thread that owns the target,
//! the tracker cascade and the stabilizer. Commands reach the actor over a
//! bounded channel; whole-frame recognition after a loss runs on a separate
//! worker thread so `track` never waits for it. State and location are
//! published to a [`SharedModelState`] snapshot readable without the actor.

pub mod messages;
pub mod shared_state;
mod tracking_model;

pub use shared_state::{ModelSnapshot, SharedModelState};
pub use tracking_model::{ImageTrackingModel, ModelOptions};
