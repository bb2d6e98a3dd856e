use anyhow::Result;

use crate::detect::backend::{DetectorParams, RegionDetector};
use crate::detect::result::{BoundingRect, DetectedRegion};
use crate::frame::GrayImage;

/// CPU blob detector: binary threshold followed by 4-connected component
/// labelling.
///
/// Area is the component's pixel count. Arc length is the number of pixel
/// edges separating the component from background (crack-edge perimeter),
/// which overestimates a smooth contour by up to 4/pi.
#[derive(Default)]
pub struct ThresholdDetector {
    params: DetectorParams,
    labels: Vec<u32>,
    stack: Vec<(usize, usize)>,
}

impl ThresholdDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn params(&self) -> DetectorParams {
        self.params
    }
}

struct Component {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    area: usize,
    edges: usize,
}

impl RegionDetector for ThresholdDetector {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn detect(&mut self, image: &GrayImage) -> Result<Vec<DetectedRegion>> {
        let (w, h) = (image.width, image.height);
        let threshold = self.params.threshold;
        let (min_area, max_area) = self.params.area_range();
        let is_fg = |x: usize, y: usize| image.get(x, y) as f32 > threshold;

        self.labels.clear();
        self.labels.resize(w * h, 0);
        let mut regions = Vec::new();
        let mut next_label = 0u32;

        for y0 in 0..h {
            for x0 in 0..w {
                if self.labels[y0 * w + x0] != 0 || !is_fg(x0, y0) {
                    continue;
                }
                next_label += 1;
                self.labels[y0 * w + x0] = next_label;
                self.stack.push((x0, y0));
                let mut c = Component {
                    min_x: x0,
                    min_y: y0,
                    max_x: x0,
                    max_y: y0,
                    area: 0,
                    edges: 0,
                };

                while let Some((x, y)) = self.stack.pop() {
                    c.area += 1;
                    c.min_x = c.min_x.min(x);
                    c.min_y = c.min_y.min(y);
                    c.max_x = c.max_x.max(x);
                    c.max_y = c.max_y.max(y);

                    let neighbours = [
                        (x.checked_sub(1), Some(y)),
                        ((x + 1 < w).then_some(x + 1), Some(y)),
                        (Some(x), y.checked_sub(1)),
                        (Some(x), (y + 1 < h).then_some(y + 1)),
                    ];
                    for (nx, ny) in neighbours {
                        let (Some(nx), Some(ny)) = (nx, ny) else {
                            c.edges += 1;
                            continue;
                        };
                        if !is_fg(nx, ny) {
                            c.edges += 1;
                            continue;
                        }
                        let idx = ny * w + nx;
                        if self.labels[idx] == 0 {
                            self.labels[idx] = next_label;
                            self.stack.push((nx, ny));
                        }
                    }
                }

                let area = c.area as f32;
                if area < min_area || area > max_area {
                    continue;
                }
                let bounds = BoundingRect {
                    x: c.min_x as f32,
                    y: c.min_y as f32,
                    width: (c.max_x - c.min_x + 1) as f32,
                    height: (c.max_y - c.min_y + 1) as f32,
                };
                regions.push(DetectedRegion::from_bounds(
                    regions.len(),
                    bounds,
                    c.edges as f32,
                    area,
                ));
            }
        }

        Ok(regions)
    }

    fn configure(&mut self, params: &DetectorParams) {
        self.params = *params;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paint_square(image: &mut GrayImage, x0: usize, y0: usize, side: usize, value: u8) {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.set(x, y, value);
            }
        }
    }

    fn small_params() -> DetectorParams {
        DetectorParams {
            threshold: 128.0,
            min_area_radius: 1.0,
            max_area_radius: 20.0,
        }
    }

    #[test]
    fn finds_separate_blobs_in_scan_order() -> Result<()> {
        let mut image = GrayImage::new(64, 48);
        paint_square(&mut image, 40, 5, 6, 255);
        paint_square(&mut image, 10, 20, 4, 255);

        let mut detector = ThresholdDetector::new(small_params());
        let regions = detector.detect(&image)?;

        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].index, 0);
        assert_eq!(regions[0].area, 36.0);
        assert_eq!(regions[0].arc_length, 24.0);
        assert_eq!(regions[0].position.x, 43.0);
        assert_eq!(regions[0].position.y, 8.0);
        assert_eq!(regions[1].index, 1);
        assert_eq!(regions[1].area, 16.0);
        Ok(())
    }

    #[test]
    fn area_radius_bounds_filter_regions() -> Result<()> {
        let mut image = GrayImage::new(64, 48);
        paint_square(&mut image, 2, 2, 1, 255);
        paint_square(&mut image, 20, 20, 10, 255);

        let mut detector = ThresholdDetector::new(small_params());
        detector.configure(&DetectorParams {
            min_area_radius: 2.0,
            ..small_params()
        });
        let regions = detector.detect(&image)?;

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].area, 100.0);
        Ok(())
    }

    #[test]
    fn dim_pixels_are_background() -> Result<()> {
        let mut image = GrayImage::new(16, 16);
        paint_square(&mut image, 4, 4, 5, 100);
        let mut detector = ThresholdDetector::new(small_params());
        assert!(detector.detect(&image)?.is_empty());
        Ok(())
    }
}
