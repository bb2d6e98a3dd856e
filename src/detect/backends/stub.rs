use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::RegionDetector;
use crate::detect::result::DetectedRegion;
use crate::frame::GrayImage;

/// Detector that replays scripted region lists, one per call, ignoring the
/// image. Returns no regions once the script runs out.
#[derive(Default)]
pub struct ScriptedDetector {
    frames: VecDeque<Vec<DetectedRegion>>,
}

impl ScriptedDetector {
    pub fn new<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Vec<DetectedRegion>>,
    {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn push(&mut self, regions: Vec<DetectedRegion>) {
        self.frames.push_back(regions);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl RegionDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _image: &GrayImage) -> Result<Vec<DetectedRegion>> {
        Ok(self.frames.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;

    #[test]
    fn scripted_detector_replays_in_order() {
        let image = GrayImage::new(4, 4);
        let mut detector = ScriptedDetector::new([
            vec![DetectedRegion::disk(0, Point::new(1.0, 1.0), 1.0)],
            vec![],
        ]);
        assert_eq!(detector.detect(&image).unwrap().len(), 1);
        assert!(detector.detect(&image).unwrap().is_empty());
        assert_eq!(detector.remaining(), 0);
        assert!(detector.detect(&image).unwrap().is_empty());
    }
}
