use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::detect::result::DetectedRegion;
use crate::frame::GrayImage;

/// Segmentation parameters shared by all detectors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Intensity above which a pixel belongs to a blob.
    pub threshold: f32,
    /// Regions smaller than a disk of this radius are dropped.
    pub min_area_radius: f32,
    /// Regions larger than a disk of this radius are dropped.
    pub max_area_radius: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold: 240.0,
            min_area_radius: 10.0,
            max_area_radius: 50.0,
        }
    }
}

impl DetectorParams {
    /// Accepted pixel-area range derived from the radius bounds.
    pub fn area_range(&self) -> (f32, f32) {
        let pi = std::f32::consts::PI;
        (
            pi * self.min_area_radius * self.min_area_radius,
            pi * self.max_area_radius * self.max_area_radius,
        )
    }
}

/// Blob detector seam.
///
/// Runs on the rectified grayscale image and returns the frame's regions in
/// index order. Implementations must not keep the image beyond the call.
pub trait RegionDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectedRegion>>;

    /// Apply new segmentation parameters. Takes effect on the next frame.
    fn configure(&mut self, _params: &DetectorParams) {}
}
