//! Descriptor matching with quota-based selection of the best matches.

use opencv::core::{DMatch, Mat, NORM_HAMMING, Vector};
use opencv::features2d::BFMatcher;
use opencv::prelude::*;
use tracing::{debug, warn};

use crate::config::{self, EngineConfig};
use crate::error::Result;
use crate::features::feature_pack::FeaturePack;
use crate::geometry::MINIMUM_NUMBER_OF_FEATURES;

/// Tolerance used when the quota has to be pinned just above the floor.
const DEFAULT_ALLOWABLE_ERROR: usize = 2;

/// Match-count quota used before homography estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionParams {
    /// Hard floor on the number of kept matches.
    pub min_matches_number: usize,
    /// Fraction of all matches to keep.
    pub required_matches_part: f64,
    /// Allowed deviation from the required count, as a fraction of it.
    pub tolerant_matches_part_error: f64,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            min_matches_number: 30,
            required_matches_part: 0.05,
            tolerant_matches_part_error: 0.1,
        }
    }
}

impl RecognitionParams {
    pub fn new(
        min_matches_number: usize,
        required_matches_part: f64,
        tolerant_matches_part_error: f64,
    ) -> Self {
        Self {
            min_matches_number,
            required_matches_part,
            tolerant_matches_part_error,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let defaults = Self::default();
        Self {
            min_matches_number: config
                .int_or(config::MIN_MATCH_NUM, defaults.min_matches_number as i64)
                .max(0) as usize,
            required_matches_part: config
                .double_or(config::REQ_MATCH_PART, defaults.required_matches_part),
            tolerant_matches_part_error: config.double_or(
                config::TOLERANT_MATCH_PART_ERR,
                defaults.tolerant_matches_part_error,
            ),
        }
    }

    /// Desired match count and its tolerance for `total` matches, or `None`
    /// when the quota does not apply and every match should be kept.
    pub fn quota(&self, total: usize) -> Option<(usize, usize)> {
        let min = self.min_matches_number;
        let mut desired = (self.required_matches_part * total as f64) as usize;
        let mut tolerance = (self.tolerant_matches_part_error * desired as f64) as usize;

        if total.saturating_sub(tolerance) <= min || desired + tolerance >= total {
            return None;
        }

        if desired.saturating_sub(tolerance) < min {
            let upper = desired + tolerance;
            if upper > min {
                desired = (min + upper) / 2;
                tolerance = upper - desired;
            } else {
                desired = min + DEFAULT_ALLOWABLE_ERROR;
                tolerance = DEFAULT_ALLOWABLE_ERROR;
            }
        }
        Some((desired, tolerance))
    }
}

/// Reorder `matches` so that its first `k` entries are the `k` lowest-distance
/// matches, with `k` within `desired ± tolerance`, and return `k`.
///
/// Each round partitions the active window around a support distance linearly
/// interpolated between the window's min and max at the desired rank, then
/// narrows to the side holding that rank. When there are fewer than
/// `desired + tolerance` matches all of them are kept.
pub fn select_best_matches(matches: &mut [DMatch], desired: usize, tolerance: usize) -> usize {
    let n = matches.len();
    if desired + tolerance > n {
        return n;
    }
    let lower = desired.saturating_sub(tolerance);
    let upper = desired + tolerance;

    let (mut lo, mut hi) = (0usize, n);
    loop {
        if hi <= lo + 1 {
            return desired;
        }

        let window = &matches[lo..hi];
        let (min, max) = window.iter().fold((f32::MAX, f32::MIN), |(mn, mx), m| {
            (mn.min(m.distance), mx.max(m.distance))
        });
        if min >= max {
            // Everything left ties; any split is as good as another.
            return desired;
        }

        let t = ((desired - lo) as f32 / (hi - lo - 1) as f32).clamp(0.0, 1.0);
        let support = min + (max - min) * t;

        let (lt, gt) = partition_three_way(&mut matches[lo..hi], support);
        let (lt, gt) = (lo + lt, lo + gt);

        if (lower..=upper).contains(&lt) {
            return lt;
        }
        if (lower..=upper).contains(&gt) {
            return gt;
        }
        if (lt..=gt).contains(&desired) {
            return desired;
        }
        if desired < lt {
            hi = lt;
        } else {
            lo = gt;
        }
    }
}

/// Dutch-flag partition: `< support`, `== support`, `> support`.
/// Returns the bounds `(lt, gt)` of the middle band.
fn partition_three_way(matches: &mut [DMatch], support: f32) -> (usize, usize) {
    let (mut lt, mut i, mut gt) = (0usize, 0usize, matches.len());
    while i < gt {
        let d = matches[i].distance;
        if d < support {
            matches.swap(lt, i);
            lt += 1;
            i += 1;
        } else if d > support {
            gt -= 1;
            matches.swap(i, gt);
        } else {
            i += 1;
        }
    }
    (lt, gt)
}

/// Brute-force Hamming matcher between a target pack (query) and a scene pack (train).
pub struct FeatureMatcher {
    matcher: BFMatcher,
}

impl FeatureMatcher {
    pub fn new() -> Result<Self> {
        let matcher = BFMatcher::new(NORM_HAMMING, false)?;
        Ok(Self { matcher })
    }

    /// Nearest-descriptor matches from `target` into `scene`, filtered by the quota.
    pub fn match_features(
        &self,
        target: &FeaturePack,
        scene: &FeaturePack,
        params: &RecognitionParams,
    ) -> Result<Vec<DMatch>> {
        if target.descriptors.empty() || scene.descriptors.empty() {
            return Ok(Vec::new());
        }

        let mut raw = Vector::<DMatch>::new();
        self.matcher
            .train_match(&target.descriptors, &scene.descriptors, &mut raw, &Mat::default())?;
        let mut matches = raw.to_vec();

        let total = matches.len();
        if let Some((desired, tolerance)) = params.quota(total) {
            let kept = select_best_matches(&mut matches, desired, tolerance);
            if kept >= MINIMUM_NUMBER_OF_FEATURES {
                matches.truncate(kept);
            } else {
                warn!(total, kept, "Wrong filtration of feature matches, keeping all");
            }
        }

        debug!(total, kept = matches.len(), "Matched features");
        Ok(matches)
    }
}
