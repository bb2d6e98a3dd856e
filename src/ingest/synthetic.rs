//! Synthetic source for `stub://` URLs.
//!
//! Renders a dark frame with bright fingertip-sized disks. Two disks orbit
//! the frame center in opposite directions; the second one lifts off for
//! three seconds out of every six. Motion is derived from the frame count,
//! so output does not depend on wall-clock time.

use anyhow::Result;
use std::time::{Duration, Instant};

use super::{CaptureSource, SourceSettings, SourceStats};
use crate::frame::RawFrame;

const BACKGROUND: u8 = 20;
const DISK_RADIUS: f32 = 14.0;
const ORBIT_RADIUS: f32 = 100.0;
const ORBIT_PERIOD_S: f32 = 4.0;
const LIFT_PERIOD_S: f32 = 6.0;
/// Frame rate used for motion when pacing is disabled.
const NOMINAL_FPS: f32 = 30.0;

pub struct SyntheticSource {
    settings: SourceSettings,
    running: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    exposure: i32,
    paced: bool,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Self {
        Self {
            settings,
            running: false,
            frame_count: 0,
            last_frame_at: None,
            exposure: 55,
            paced: true,
        }
    }

    /// Deliver a frame on every grab while keeping `target_fps` as the
    /// motion rate.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn frame_interval(&self) -> Option<Duration> {
        (self.paced && self.settings.target_fps > 0)
            .then(|| Duration::from_secs_f64(1.0 / self.settings.target_fps as f64))
    }

    /// Disk centers for frame `n`.
    pub fn disk_centers(&self, n: u64) -> Vec<(f32, f32)> {
        let fps = match self.settings.target_fps {
            0 => NOMINAL_FPS,
            fps => fps as f32,
        };
        let t = n as f32 / fps;
        let cx = self.settings.width as f32 / 2.0;
        let cy = self.settings.height as f32 / 2.0;
        let phase = std::f32::consts::TAU * t / ORBIT_PERIOD_S;

        let mut centers = vec![(
            cx + ORBIT_RADIUS * phase.cos(),
            cy + ORBIT_RADIUS * phase.sin(),
        )];
        if (t % LIFT_PERIOD_S) < LIFT_PERIOD_S / 2.0 {
            centers.push((
                cx - ORBIT_RADIUS * 0.5 * phase.cos(),
                cy + ORBIT_RADIUS * 0.5 * phase.sin(),
            ));
        }
        centers
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.settings.width as usize, self.settings.height as usize);
        let brightness = (100 + self.exposure * 3).clamp(0, 255) as u8;
        let mut pixels = vec![BACKGROUND; w * h * 3];
        let r2 = DISK_RADIUS * DISK_RADIUS;
        for (dx, dy) in self.disk_centers(self.frame_count) {
            let x0 = (dx - DISK_RADIUS).floor().max(0.0) as usize;
            let y0 = (dy - DISK_RADIUS).floor().max(0.0) as usize;
            let x1 = ((dx + DISK_RADIUS).ceil() as usize).min(w.saturating_sub(1));
            let y1 = ((dy + DISK_RADIUS).ceil() as usize).min(h.saturating_sub(1));
            for y in y0..=y1 {
                for x in x0..=x1 {
                    let (fx, fy) = (x as f32 - dx, y as f32 - dy);
                    if fx * fx + fy * fy <= r2 {
                        let i = (y * w + x) * 3;
                        pixels[i..i + 3].fill(brightness);
                    }
                }
            }
        }
        pixels
    }
}

impl CaptureSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        log::info!("SyntheticSource: started {} (synthetic)", self.settings.url);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        log::info!("SyntheticSource: stopped {}", self.settings.url);
        Ok(())
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.settings.width, self.settings.height)
    }

    fn grab(&mut self, on_frame: &mut dyn FnMut(RawFrame)) -> Result<bool> {
        if !self.running {
            return Ok(false);
        }
        if let (Some(interval), Some(last)) = (self.frame_interval(), self.last_frame_at) {
            if last.elapsed() < interval {
                return Ok(false);
            }
        }
        let frame = RawFrame::new(self.render(), self.settings.width, self.settings.height)?;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        on_frame(frame);
        Ok(true)
    }

    fn set_exposure(&mut self, exposure: i32) -> Result<()> {
        self.exposure = exposure;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.settings.url.clone(),
        }
    }
}
