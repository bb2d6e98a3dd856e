//! Frame containers.
//!
//! - `RawFrame`: packed RGB8 pixels as delivered by a capture source.
//! - `GrayImage`: single-channel 8-bit image, the working format of the
//!   rectifier and detectors.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

/// One color frame from a capture source. Pixels are packed RGB8, row-major.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    captured_at: Instant,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "raw frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Time since the source produced this frame.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Luma conversion (ITU-R BT.601 weights, integer arithmetic).
    pub fn to_gray(&self) -> GrayImage {
        let data = self
            .data
            .chunks_exact(3)
            .map(|px| {
                let luma = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
                ((luma + 500) / 1000) as u8
            })
            .collect();
        GrayImage {
            width: self.width as usize,
            height: self.height as usize,
            data,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height {
            return Err(anyhow!(
                "gray image {}x{} needs {} bytes, got {}",
                width,
                height,
                width * height,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.data[y * self.width + x] = value;
    }

    /// Gaussian smoothing with standard deviation `sigma`, edges clamped.
    /// A non-positive `sigma` returns the image unchanged.
    pub fn gaussian_blur(&self, sigma: f32) -> GrayImage {
        if sigma <= 0.0 || self.data.is_empty() {
            return self.clone();
        }
        let Some(buffer) =
            image::GrayImage::from_raw(self.width as u32, self.height as u32, self.data.clone())
        else {
            return self.clone();
        };
        let blurred = imageproc::filter::gaussian_blur_f32(&buffer, sigma);
        GrayImage {
            width: self.width,
            height: self.height,
            data: blurred.into_raw(),
        }
    }
}
