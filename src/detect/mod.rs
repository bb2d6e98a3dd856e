mod backend;
mod backends;
mod result;

pub use backend::{DetectorParams, RegionDetector};
pub use backends::{ScriptedDetector, ThresholdDetector};
pub use result::{BoundingRect, DetectedRegion};
