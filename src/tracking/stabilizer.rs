//! Temporal smoothing of tracked quadrangles.
//!
//! Each corner is compared with its last stabilized position. Moves within the
//! tolerated shift are treated as jitter and pulled toward a weighted average of
//! the recent history. Larger moves are followed toward the raw corner. Either
//! way the pull rate is the stabilization speed plus the acceleration scaled by
//! the displacement in units of the tolerated shift, so a jump of many
//! tolerances passes through almost at once while jitter is damped.

use std::collections::VecDeque;

use opencv::core::Point2f;
use thiserror::Error;
use tracing::debug;

use crate::geometry::{distance, quadrangle_area, Contour, NUMBER_OF_QUADRANGLE_CORNERS};
use crate::tracking::params::StabilizationParams;

/// Outcome of a successful [`ImageContourStabilizator::stabilize`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizationStatus {
    Stabilized,
    /// History still filling up; the contour was passed through unchanged.
    TooShortHistory,
    /// Stabilization switched off; the contour was passed through unchanged.
    Disabled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StabilizationError {
    #[error("Invalid stabilization settings: {0}")]
    InvalidSettings(String),
    #[error("Only quadrangles can be stabilized, got {0} points")]
    UnsupportedContourType(usize),
}

#[derive(Debug, Clone, Default)]
pub struct ImageContourStabilizator {
    history: VecDeque<Contour>,
    history_amount: usize,
    last_stabilized: Contour,
}

impl ImageContourStabilizator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the history, e.g. after the object was lost.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_stabilized.clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn validate(params: &StabilizationParams) -> Result<(), StabilizationError> {
        if params.history_amount < 1 {
            return Err(StabilizationError::InvalidSettings(
                "history amount must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&params.stabilization_speed) {
            return Err(StabilizationError::InvalidSettings(format!(
                "speed {} is outside [0, 1]",
                params.stabilization_speed
            )));
        }
        if params.stabilization_acceleration < 0.0
            || params.tolerant_shift < 0.0
            || params.tolerant_shift_extra < 0.0
        {
            return Err(StabilizationError::InvalidSettings(
                "negative acceleration or tolerated shift".into(),
            ));
        }
        Ok(())
    }

    /// Smooth `contour` in place.
    ///
    /// The history is fed even while stabilization is disabled, so switching
    /// it on does not restart the warm-up.
    pub fn stabilize(
        &mut self,
        contour: &mut Contour,
        params: &StabilizationParams,
    ) -> Result<StabilizationStatus, StabilizationError> {
        Self::validate(params)?;
        if contour.len() != NUMBER_OF_QUADRANGLE_CORNERS {
            return Err(StabilizationError::UnsupportedContourType(contour.len()));
        }

        if params.history_amount != self.history_amount {
            self.reset();
            self.history_amount = params.history_amount;
        }

        self.history.push_back(contour.clone());
        while self.history.len() > self.history_amount {
            self.history.pop_front();
        }

        if !params.enabled {
            self.last_stabilized = contour.clone();
            return Ok(StabilizationStatus::Disabled);
        }

        if self.history.len() < self.history_amount || self.last_stabilized.is_empty() {
            self.last_stabilized = contour.clone();
            debug!(
                have = self.history.len(),
                need = self.history_amount,
                "Moving history too short"
            );
            return Ok(StabilizationStatus::TooShortHistory);
        }

        let smoothed = self.weighted_history();
        let tolerant_shift = (quadrangle_area(contour) * params.tolerant_shift
            + params.tolerant_shift_extra) as f32;
        let speed = params.stabilization_speed as f32;
        let acceleration = params.stabilization_acceleration as f32;

        for i in 0..NUMBER_OF_QUADRANGLE_CORNERS {
            let last = self.last_stabilized[i];
            let raw = contour[i];
            let shift = distance(raw, last);
            let target = if shift <= tolerant_shift { smoothed[i] } else { raw };
            let rate = (speed + acceleration * shift / tolerant_shift.max(f32::EPSILON)).min(1.0);
            contour[i] = Point2f::new(
                last.x + (target.x - last.x) * rate,
                last.y + (target.y - last.y) * rate,
            );
        }

        self.last_stabilized = contour.clone();
        Ok(StabilizationStatus::Stabilized)
    }

    /// Average of the history, newer contours weighted linearly heavier.
    fn weighted_history(&self) -> Contour {
        let mut sum = [(0.0f64, 0.0f64); NUMBER_OF_QUADRANGLE_CORNERS];
        let mut total = 0.0f64;
        for (k, past) in self.history.iter().enumerate() {
            let weight = (k + 1) as f64;
            total += weight;
            for (acc, p) in sum.iter_mut().zip(past) {
                acc.0 += weight * p.x as f64;
                acc.1 += weight * p.y as f64;
            }
        }
        sum.iter()
            .map(|&(x, y)| Point2f::new((x / total) as f32, (y / total) as f32))
            .collect()
    }
}
