//! Frame-to-frame identity assignment.
//!
//! Matching is greedy nearest-neighbour: every (identity, region) pair within
//! the maximum travel distance is a candidate, candidates are taken in order
//! of ascending distance (ties broken by identity creation order, then region
//! index), and each identity and region is used at most once. Persistence and
//! distance defaults are tuned against this policy; it is not an optimal
//! assignment.

mod follower;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub use follower::{
    label_color, next_state, Follower, FollowerState, LifecycleTiming, Trail, SMOOTHING_FACTOR,
    TRAIL_CAPACITY,
};

use crate::detect::DetectedRegion;
use crate::error::ConfigurationError;
use crate::shape::DEFAULT_CIRCULARITY_THRESHOLD;
use crate::Point;

pub const DEFAULT_MAXIMUM_DISTANCE: f32 = 32.0;

/// Runtime-mutable tracking parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerParams {
    /// Furthest a region may travel between frames and keep its identity.
    pub maximum_distance: f32,
    /// How long an active identity survives unmatched.
    #[serde(with = "millis")]
    pub persistence: Duration,
    /// How long a new identity must persist before it is confirmed.
    #[serde(with = "millis")]
    pub nascent_time: Duration,
    pub circularity_threshold: f32,
    /// Drop regions failing the shape filter before matching.
    pub gate_on_circularity: bool,
}

impl Default for TrackerParams {
    fn default() -> Self {
        let timing = LifecycleTiming::default();
        Self {
            maximum_distance: DEFAULT_MAXIMUM_DISTANCE,
            persistence: timing.dying,
            nascent_time: timing.nascent,
            circularity_threshold: DEFAULT_CIRCULARITY_THRESHOLD,
            gate_on_circularity: false,
        }
    }
}

impl TrackerParams {
    /// Reject values the tracker cannot run with. Config loading and live
    /// updates both go through this.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let distance = self.maximum_distance;
        if !distance.is_finite() || distance <= 0.0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "maximum_distance",
                reason: format!("must be a finite number greater than zero, got {}", distance),
            });
        }
        if !self.circularity_threshold.is_finite() {
            return Err(ConfigurationError::InvalidParameter {
                name: "circularity_threshold",
                reason: format!("must be a finite number, got {}", self.circularity_threshold),
            });
        }
        Ok(())
    }

    pub fn timing(&self) -> LifecycleTiming {
        LifecycleTiming {
            nascent: self.nascent_time,
            dying: self.persistence,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// An identity removed from the tracker this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetiredFollower {
    pub label: u32,
    pub last_position: Point,
}

/// What one call to `IdentityTracker::track` changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackStep {
    /// (label, region index) pairs matched this frame.
    pub matched: Vec<(u32, usize)>,
    /// Labels created this frame.
    pub spawned: Vec<u32>,
    pub retired: Vec<RetiredFollower>,
}

pub struct IdentityTracker {
    params: TrackerParams,
    /// Live identities in creation order.
    followers: Vec<Follower>,
    next_label: u32,
}

impl IdentityTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            followers: Vec::new(),
            next_label: 0,
        }
    }

    pub fn params(&self) -> TrackerParams {
        self.params
    }

    /// Takes effect from the next call to `track`.
    pub fn set_params(&mut self, params: TrackerParams) {
        self.params = params;
    }

    pub fn followers(&self) -> &[Follower] {
        &self.followers
    }

    pub fn get(&self, label: u32) -> Option<&Follower> {
        self.followers.iter().find(|f| f.label() == label)
    }

    pub fn len(&self) -> usize {
        self.followers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.followers.is_empty()
    }

    /// Advance every identity by one frame. `now` is the time since the
    /// session started and must not go backwards between calls.
    pub fn track(&mut self, regions: &[DetectedRegion], now: Duration) -> TrackStep {
        let timing = self.params.timing();
        let max_distance = self.params.maximum_distance;

        let mut candidates = Vec::new();
        for (fi, follower) in self.followers.iter().enumerate() {
            for (ri, region) in regions.iter().enumerate() {
                let distance = (region.position - follower.raw_position()).norm();
                if distance <= max_distance {
                    candidates.push((distance, fi, ri));
                }
            }
        }
        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut follower_match = vec![None; self.followers.len()];
        let mut region_taken = vec![false; regions.len()];
        for (_, fi, ri) in candidates {
            if follower_match[fi].is_none() && !region_taken[ri] {
                follower_match[fi] = Some(ri);
                region_taken[ri] = true;
            }
        }

        let mut step = TrackStep::default();
        for (follower, matched) in self.followers.iter_mut().zip(follower_match) {
            match matched {
                Some(ri) => {
                    let region = &regions[ri];
                    follower.observe(region.position, region.index, now, &timing);
                    step.matched.push((follower.label(), region.index));
                }
                None => follower.miss(now, &timing),
            }
        }

        self.followers.retain(|f| {
            if f.state() == FollowerState::Retired {
                log::debug!("follower {} retired", f.label());
                step.retired.push(RetiredFollower {
                    label: f.label(),
                    last_position: f.smoothed_position(),
                });
                false
            } else {
                true
            }
        });

        for (region, taken) in regions.iter().zip(region_taken) {
            if taken {
                continue;
            }
            let label = self.next_label;
            self.next_label += 1;
            log::debug!(
                "follower {} spawned at ({:.1}, {:.1})",
                label,
                region.position.x,
                region.position.y
            );
            self.followers
                .push(Follower::spawn(label, region.position, region.index, now));
            step.spawned.push(label);
        }

        self.debug_check_invariants();
        step
    }

    fn debug_check_invariants(&self) {
        if cfg!(debug_assertions) {
            let mut seen = HashSet::new();
            for f in &self.followers {
                debug_assert!(seen.insert(f.label()), "duplicate label {}", f.label());
                debug_assert!(f.trail().len() <= TRAIL_CAPACITY);
                debug_assert!(f.state() != FollowerState::Retired);
            }
        }
    }
}

impl Default for IdentityTracker {
    fn default() -> Self {
        Self::new(TrackerParams::default())
    }
}
