//! Per-identity lifecycle.
//!
//! ```text
//!            matched, age >= nascent          matched
//!  Pending ---------------------------> Confirmed ------> Active <----+
//!     |                                     |              |  ^        |
//!     | unmatched                 unmatched |    unmatched |  | matched|
//!     v                                     v              v  |        |
//!  Retired <------------------------------------------- Dying ---------+
//!                  unmatched for >= dying time
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::Point;

pub const TRAIL_CAPACITY: usize = 30;

/// Weight of the new raw observation in the exponential smoother.
pub const SMOOTHING_FACTOR: f32 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FollowerState {
    Pending,
    Confirmed,
    Active,
    Dying,
    Retired,
}

impl FollowerState {
    /// States that are visible to protocol consumers.
    pub fn is_alive(self) -> bool {
        matches!(self, Self::Confirmed | Self::Active | Self::Dying)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleTiming {
    /// How long a new identity must keep matching before it confirms.
    pub nascent: Duration,
    /// How long an active identity may go unmatched before it retires.
    pub dying: Duration,
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        Self {
            nascent: Duration::from_millis(500),
            dying: Duration::from_secs(1),
        }
    }
}

/// Pure transition function.
///
/// `age` is the time since the identity was created; `dying_for` is the
/// time since it entered `Dying`, if it has.
pub fn next_state(
    state: FollowerState,
    matched: bool,
    age: Duration,
    dying_for: Option<Duration>,
    timing: &LifecycleTiming,
) -> FollowerState {
    use FollowerState::*;
    match (state, matched) {
        (Pending, true) if age >= timing.nascent => Confirmed,
        (Pending, true) => Pending,
        (Confirmed, true) | (Active, true) | (Dying, true) => Active,
        (Active, false) => Dying,
        (Dying, false) => match dying_for {
            Some(elapsed) if elapsed < timing.dying => Dying,
            _ => Retired,
        },
        (Pending, false) | (Confirmed, false) | (Retired, _) => Retired,
    }
}

/// Bounded history of smoothed positions, oldest first.
#[derive(Clone, Debug, Default)]
pub struct Trail {
    points: VecDeque<Point>,
}

impl Trail {
    pub fn push(&mut self, p: Point) {
        self.points.push_back(p);
        while self.points.len() > TRAIL_CAPACITY {
            self.points.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }
}

/// Presentation color for a label: full saturation and value, hue drawn
/// from an RNG seeded by the label so it is stable across runs.
pub fn label_color(label: u32) -> [u8; 3] {
    let mut rng = StdRng::seed_from_u64((label as u64) << 24);
    hsv_to_rgb(rng.gen_range(0.0..360.0), 1.0, 1.0)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r, g, b].map(|ch| ((ch + m) * 255.0).round() as u8)
}

/// One tracked object.
#[derive(Clone, Debug)]
pub struct Follower {
    label: u32,
    state: FollowerState,
    raw_position: Point,
    smoothed_position: Point,
    trail: Trail,
    born_at: Duration,
    dying_since: Option<Duration>,
    color: Option<[u8; 3]>,
    region: Option<usize>,
}

impl Follower {
    pub(crate) fn spawn(label: u32, position: Point, region: usize, now: Duration) -> Self {
        Self {
            label,
            state: FollowerState::Pending,
            raw_position: position,
            smoothed_position: position,
            trail: Trail::default(),
            born_at: now,
            dying_since: None,
            color: None,
            region: Some(region),
        }
    }

    pub fn label(&self) -> u32 {
        self.label
    }

    pub fn state(&self) -> FollowerState {
        self.state
    }

    /// Latest matched centroid.
    pub fn raw_position(&self) -> Point {
        self.raw_position
    }

    pub fn smoothed_position(&self) -> Point {
        self.smoothed_position
    }

    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    pub fn born_at(&self) -> Duration {
        self.born_at
    }

    pub fn dying_since(&self) -> Option<Duration> {
        self.dying_since
    }

    /// Assigned once the identity confirms.
    pub fn color(&self) -> Option<[u8; 3]> {
        self.color
    }

    /// Index of the region matched this frame.
    pub fn region(&self) -> Option<usize> {
        self.region
    }

    fn transition(&mut self, matched: bool, now: Duration, timing: &LifecycleTiming) {
        let age = now.saturating_sub(self.born_at);
        let dying_for = self.dying_since.map(|since| now.saturating_sub(since));
        let next = next_state(self.state, matched, age, dying_for, timing);
        if next != self.state {
            log::debug!("follower {}: {:?} -> {:?}", self.label, self.state, next);
        }
        self.state = next;
    }

    /// The identity was matched to a region at `position`.
    pub(crate) fn observe(
        &mut self,
        position: Point,
        region: usize,
        now: Duration,
        timing: &LifecycleTiming,
    ) {
        self.transition(true, now, timing);
        self.raw_position = position;
        self.smoothed_position = self
            .smoothed_position
            .coords
            .lerp(&position.coords, SMOOTHING_FACTOR)
            .into();
        self.dying_since = None;
        self.region = Some(region);
        match self.state {
            FollowerState::Confirmed => self.color = Some(label_color(self.label)),
            FollowerState::Active => self.trail.push(self.smoothed_position),
            _ => {}
        }
    }

    /// The identity found no region this frame.
    pub(crate) fn miss(&mut self, now: Duration, timing: &LifecycleTiming) {
        self.transition(false, now, timing);
        self.region = None;
        match self.state {
            FollowerState::Dying if self.dying_since.is_none() => self.dying_since = Some(now),
            FollowerState::Retired => self.trail.clear(),
            _ => {}
        }
    }
}
