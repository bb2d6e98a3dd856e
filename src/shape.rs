//! Circularity shape filter.
//!
//! circularity = 4 * pi * area / perimeter^2, 1.0 for a circle and smaller
//! for elongated or ragged shapes.

use serde::Serialize;

use crate::detect::DetectedRegion;

pub const DEFAULT_CIRCULARITY_THRESHOLD: f32 = 0.25;

/// `None` for a zero, negative or non-finite perimeter.
pub fn circularity(arc_length: f32, area: f32) -> Option<f32> {
    if !(arc_length.is_finite() && arc_length > 0.0) {
        return None;
    }
    Some(4.0 * std::f32::consts::PI * area / (arc_length * arc_length))
}

/// Per-region diagnostics for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ShapeVerdict {
    pub index: usize,
    pub circularity: Option<f32>,
    pub passed: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ShapeFilter {
    threshold: f32,
}

impl Default for ShapeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_CIRCULARITY_THRESHOLD)
    }
}

impl ShapeFilter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Strictly above the threshold passes; an undefined circularity fails.
    pub fn passes(&self, region: &DetectedRegion) -> bool {
        circularity(region.arc_length, region.area).is_some_and(|c| c > self.threshold)
    }

    pub fn evaluate(&self, regions: &[DetectedRegion]) -> Vec<ShapeVerdict> {
        regions
            .iter()
            .map(|region| {
                let circularity = circularity(region.arc_length, region.area);
                ShapeVerdict {
                    index: region.index,
                    circularity,
                    passed: circularity.is_some_and(|c| c > self.threshold),
                }
            })
            .collect()
    }
}
