//! V4L2 capture source.
//!
//! Opens a local device node (e.g. /dev/video0) in RGB3 and streams through
//! memory-mapped buffers. Exposure is written to the absolute-exposure
//! camera control when the device has one.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::{CaptureSource, SourceSettings, SourceStats};
use crate::frame::RawFrame;

/// V4L2_CID_EXPOSURE_ABSOLUTE
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
/// V4L2_CID_EXPOSURE_AUTO
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
/// V4L2_EXPOSURE_MANUAL
const EXPOSURE_MANUAL: i64 = 1;
/// Longest `grab` waits for the driver to fill a buffer.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct V4l2Source {
    settings: SourceSettings,
    state: Option<V4l2State>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.settings.target_fps == 0 {
            2_000
        } else {
            (1000 / self.settings.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl CaptureSource for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn start(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.url)
            .with_context(|| format!("open v4l2 device {}", self.settings.url))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = device.set_format(&format).context("set v4l2 RGB3 format")?;
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            anyhow::bail!("{} does not deliver RGB3 frames", self.settings.url);
        }

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.settings.url,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })?;
                stream.set_timeout(DEQUEUE_TIMEOUT);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: started {} ({}x{})",
            self.settings.url,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.state.take().is_some() {
            log::info!("V4l2Source: stopped {}", self.settings.url);
        }
        Ok(())
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.active_width, self.active_height)
    }

    fn grab(&mut self, on_frame: &mut dyn FnMut(RawFrame)) -> Result<bool> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(false);
        };
        let buf = match state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
        {
            Ok(buf) => buf,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => return Ok(false),
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        let frame = RawFrame::new(buf, self.active_width, self.active_height)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        on_frame(frame);
        Ok(true)
    }

    fn set_exposure(&mut self, exposure: i32) -> Result<()> {
        use v4l::control::{Control, Value};

        if self.state.is_none() {
            return Ok(());
        }
        // The streaming handle is mutably borrowed by its buffer stream;
        // controls go through a second handle on the same node.
        let device = v4l::Device::with_path(&self.settings.url)
            .with_context(|| format!("open v4l2 control handle {}", self.settings.url))?;
        let manual = Control {
            id: CID_EXPOSURE_AUTO,
            value: Value::Integer(EXPOSURE_MANUAL),
        };
        if let Err(err) = device.set_control(manual) {
            log::debug!("V4l2Source: manual exposure mode unavailable: {}", err);
        }
        device
            .set_control(Control {
                id: CID_EXPOSURE_ABSOLUTE,
                value: Value::Integer(exposure as i64),
            })
            .with_context(|| format!("set exposure {} on {}", exposure, self.settings.url))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.settings.url.clone(),
        }
    }
}
