//! Frame-directory source.
//!
//! Replays the PNG/JPEG files of a local directory in file-name order,
//! looping at the end. Frames of a different size are resized to the
//! configured resolution.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{CaptureSource, SourceSettings, SourceStats};
use crate::frame::RawFrame;

pub struct ImageSequenceSource {
    settings: SourceSettings,
    files: Vec<PathBuf>,
    cursor: usize,
    running: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let files = list_frames(Path::new(&settings.url))?;
        if files.is_empty() {
            return Err(anyhow!("no PNG/JPEG frames in {}", settings.url));
        }
        Ok(Self {
            settings,
            files,
            cursor: 0,
            running: false,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn load(&self, path: &Path) -> Result<RawFrame> {
        let decoded = image::open(path).with_context(|| format!("decode {}", path.display()))?;
        let (width, height) = decoded.dimensions();
        let decoded = if (width, height) != (self.settings.width, self.settings.height) {
            decoded.resize_exact(
                self.settings.width,
                self.settings.height,
                image::imageops::FilterType::Triangle,
            )
        } else {
            decoded
        };
        let rgb = decoded.into_rgb8();
        let (width, height) = rgb.dimensions();
        RawFrame::new(rgb.into_raw(), width, height)
    }
}

fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read frame directory {}", dir.display()))?
    {
        let path = entry?.path();
        let is_frame = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
            .unwrap_or(false);
        if is_frame {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl CaptureSource for ImageSequenceSource {
    fn name(&self) -> &'static str {
        "images"
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        log::info!(
            "ImageSequenceSource: started {} ({} frames)",
            self.settings.url,
            self.files.len()
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.settings.width, self.settings.height)
    }

    fn grab(&mut self, on_frame: &mut dyn FnMut(RawFrame)) -> Result<bool> {
        if !self.running {
            return Ok(false);
        }
        if self.settings.target_fps > 0 {
            let interval = Duration::from_secs_f64(1.0 / self.settings.target_fps as f64);
            if self.last_frame_at.is_some_and(|last| last.elapsed() < interval) {
                return Ok(false);
            }
        }
        let path = self.files[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.files.len();
        let frame = self.load(&path).map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.last_error = None;
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        on_frame(frame);
        Ok(true)
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.settings.url.clone(),
        }
    }
}
