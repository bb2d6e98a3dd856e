//! Capture sources.
//!
//! - `stub://...`: synthetic scene of moving bright disks (testing, demos)
//! - a directory of PNG/JPEG frames (feature: ingest-images)
//! - `/dev/video*` V4L2 devices (feature: ingest-v4l2)
//!
//! Every source hands out packed RGB `RawFrame`s through `grab`. Paced and
//! file sources return without calling back when no new frame is due; the
//! V4L2 source waits on the driver for the next buffer, bounded by a
//! dequeue timeout after which it also returns without a frame.

#[cfg(feature = "ingest-images")]
pub mod images;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::frame::RawFrame;

#[cfg(feature = "ingest-images")]
pub use images::ImageSequenceSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

pub const DEFAULT_SOURCE_URL: &str = "stub://touch";

/// Where frames come from and at what size and rate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// `stub://name`, a frame directory, or a V4L2 device path.
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Frames per second; 0 disables pacing.
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

/// Pluggable camera.
pub trait CaptureSource: Send {
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Width and height of the frames `grab` delivers.
    fn frame_size(&self) -> (u32, u32);

    /// Deliver at most one new frame to `on_frame`. Returns whether a frame
    /// was delivered.
    fn grab(&mut self, on_frame: &mut dyn FnMut(RawFrame)) -> Result<bool>;

    /// Sources without exposure control ignore this.
    fn set_exposure(&mut self, _exposure: i32) -> Result<()> {
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Pick a backend from the URL.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn CaptureSource>> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())));
    }
    if settings.url.starts_with("/dev/video") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Source::new(settings.clone())));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!("V4L2 capture requires the ingest-v4l2 feature");
        }
    }
    if settings.url.contains("://") {
        anyhow::bail!("unsupported capture URL '{}'", settings.url);
    }
    #[cfg(feature = "ingest-images")]
    {
        Ok(Box::new(ImageSequenceSource::new(settings.clone())?))
    }
    #[cfg(not(feature = "ingest-images"))]
    {
        anyhow::bail!("frame directories require the ingest-images feature")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_urls_open_the_synthetic_source() -> Result<()> {
        let source = open_source(&SourceSettings::default())?;
        assert_eq!(source.name(), "synthetic");
        Ok(())
    }

    #[test]
    fn network_urls_are_rejected() {
        let settings = SourceSettings {
            url: "rtsp://camera".into(),
            ..SourceSettings::default()
        };
        assert!(open_source(&settings).is_err());
    }
}
