//! Perspective rectification.
//!
//! The calibration quadrilateral is given in camera pixels, ordered
//! top-left, top-right, bottom-right, bottom-left:
//!
//! ```text
//!  (0,0)          (W-1,0)
//!     0 ---------- 1
//!     |            |
//!     3 ---------- 2
//!  (0,H-1)        (W-1,H-1)
//! ```
//!
//! `W`×`H` is the camera frame size. `PerspectiveRectifier` maps the
//! quadrilateral onto the canonical output rectangle, whose size is set
//! independently. Until calibrated the quadrilateral is the whole camera
//! frame. The projective matrix is solved lazily the first time it is
//! needed after the corners change and cached until the next change.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::frame::GrayImage;
use crate::Point;

/// Canonical output resolution.
pub const OUTPUT_WIDTH: u32 = 640;
pub const OUTPUT_HEIGHT: u32 = 480;

/// Twice the triangle area below which three corners count as collinear.
const MIN_DOUBLE_AREA: f64 = 1e-3;

/// Width and height in pixels. Used for both the camera frame and the
/// canonical output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl Default for OutputSize {
    fn default() -> Self {
        Self {
            width: OUTPUT_WIDTH,
            height: OUTPUT_HEIGHT,
        }
    }
}

impl OutputSize {
    /// Corners of the canonical rectangle in the same order as the
    /// calibration quadrilateral.
    pub fn corners(&self) -> [Point; 4] {
        let r = (self.width - 1) as f32;
        let b = (self.height - 1) as f32;
        [
            Point::new(0.0, 0.0),
            Point::new(r, 0.0),
            Point::new(r, b),
            Point::new(0.0, b),
        ]
    }

    /// Map rectified coordinates into `[0, 1]`. The canonical corners land
    /// exactly on 0 and 1.
    pub fn normalize(&self, p: Point) -> Point {
        let sx = (self.width.max(2) - 1) as f32;
        let sy = (self.height.max(2) - 1) as f32;
        Point::new((p.x / sx).clamp(0.0, 1.0), (p.y / sy).clamp(0.0, 1.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    /// Axis-aligned scale taking the full `from` rectangle onto `to`.
    pub fn scaling(from: OutputSize, to: OutputSize) -> Self {
        let sx = (to.width.max(2) - 1) as f64 / (from.width.max(2) - 1) as f64;
        let sy = (to.height.max(2) - 1) as f64 / (from.height.max(2) - 1) as f64;
        Self::new(Matrix3::new(sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0))
    }

    #[inline]
    pub fn apply(&self, p: Point) -> Point {
        let v = self.h * Vector3::new(p.x as f64, p.y as f64, 1.0);
        Point2::new((v[0] / v[2]) as f32, (v[1] / v[2]) as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

/// Similarity transform that moves the centroid to the origin and scales
/// the mean distance to sqrt(2). Keeps the 8x8 solve well conditioned for
/// pixel-sized inputs.
fn conditioning(pts: &[Point; 4]) -> ([Point2<f64>; 4], Matrix3<f64>) {
    let cx = pts.iter().map(|p| p.x as f64).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p.y as f64).sum::<f64>() / 4.0;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-12 {
        2.0_f64.sqrt() / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts.map(|p| Point2::new(s * (p.x as f64 - cx), s * (p.y as f64 - cy)));
    (out, t)
}

/// Solve `dst ~ H * src` from four correspondences.
pub fn homography_from_4pt(src: &[Point; 4], dst: &[Point; 4]) -> Option<Homography> {
    let (src_n, t_src) = conditioning(src);
    let (dst_n, t_dst) = conditioning(dst);

    // h33 fixed to 1; two rows per correspondence.
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for k in 0..4 {
        let (x, y) = (src_n[k].x, src_n[k].y);
        let (u, v) = (dst_n[k].x, dst_n[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = r0 + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);
    let h = t_dst.try_inverse()? * hn * t_src;
    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h / scale))
}

/// Reject quadrilaterals with coincident corners or any three corners on
/// one line.
pub fn check_quadrilateral(corners: &[Point; 4]) -> Result<(), ConfigurationError> {
    for i in 0..4 {
        for j in (i + 1)..4 {
            if (corners[i] - corners[j]).norm() < 1e-3 {
                return Err(ConfigurationError::Degenerate {
                    reason: format!("corners {} and {} coincide", i, j),
                });
            }
        }
    }
    for (i, j, k) in [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)] {
        let ab = corners[j] - corners[i];
        let ac = corners[k] - corners[i];
        let double_area = ab.x as f64 * ac.y as f64 - ab.y as f64 * ac.x as f64;
        if double_area.abs() < MIN_DOUBLE_AREA {
            return Err(ConfigurationError::Degenerate {
                reason: format!("corners {}, {} and {} are collinear", i, j, k),
            });
        }
    }
    Ok(())
}

pub struct PerspectiveRectifier {
    frame: OutputSize,
    size: OutputSize,
    corners: [Point; 4],
    valid_corners: [Point; 4],
    valid: Homography,
    dirty: bool,
}

impl PerspectiveRectifier {
    /// Rectifier for camera frames of the output size; starts as the
    /// identity map.
    pub fn new(size: OutputSize) -> Self {
        Self::with_frame_size(size, size)
    }

    /// Starts with the full camera frame mapped onto the output rectangle.
    pub fn with_frame_size(frame: OutputSize, size: OutputSize) -> Self {
        let corners = frame.corners();
        Self {
            frame,
            size,
            corners,
            valid_corners: corners,
            valid: Homography::scaling(frame, size),
            dirty: false,
        }
    }

    pub fn output_size(&self) -> OutputSize {
        self.size
    }

    pub fn frame_size(&self) -> OutputSize {
        self.frame
    }

    /// Adopt the size of the frames actually delivered. An uncalibrated
    /// rectifier follows the new frame; a calibrated one keeps its corners.
    pub fn set_frame_size(&mut self, frame: OutputSize) {
        if frame == self.frame {
            return;
        }
        let uncalibrated = self.corners == self.frame.corners();
        log::info!(
            "camera frame size {}x{} -> {}x{}",
            self.frame.width,
            self.frame.height,
            frame.width,
            frame.height
        );
        self.frame = frame;
        if uncalibrated {
            self.reset();
        }
    }

    pub fn corners(&self) -> [Point; 4] {
        self.corners
    }

    /// Replace the source quadrilateral.
    ///
    /// Input that is not exactly four points is ignored and reported as
    /// `Ok(false)`. Degenerate quadrilaterals are rejected and leave the
    /// current transform in place.
    pub fn set_corners(&mut self, points: &[Point]) -> Result<bool, ConfigurationError> {
        let Ok(corners) = <[Point; 4]>::try_from(points) else {
            log::debug!(
                "ignoring calibration update with {} points",
                points.len()
            );
            return Ok(false);
        };
        check_quadrilateral(&corners)?;
        self.corners = corners;
        self.dirty = true;
        Ok(true)
    }

    /// Restore the full camera frame.
    pub fn reset(&mut self) {
        self.corners = self.frame.corners();
        self.dirty = true;
    }

    /// Camera-to-canonical map, solving it if the corners changed.
    pub fn homography(&mut self) -> Homography {
        if self.dirty {
            self.dirty = false;
            match homography_from_4pt(&self.corners, &self.size.corners()) {
                Some(h) => {
                    self.valid = h;
                    self.valid_corners = self.corners;
                }
                None => {
                    log::warn!("calibration quadrilateral has no projective solution; keeping previous transform");
                    self.corners = self.valid_corners;
                }
            }
        }
        self.valid
    }

    pub fn transform(&mut self, p: Point) -> Point {
        self.homography().apply(p)
    }

    /// Canonical-to-camera map.
    pub fn inverse_transform(&mut self, p: Point) -> Option<Point> {
        self.homography().inverse().map(|h| h.apply(p))
    }

    pub fn normalize(&self, p: Point) -> Point {
        self.size.normalize(p)
    }

    pub fn rectify_image(&mut self, image: &GrayImage) -> GrayImage {
        let h = self.homography();
        warp_perspective_nearest(image, &h, self.size)
    }
}

/// Inverse-mapped warp with nearest-neighbour sampling. Pixels that map
/// outside the source are black.
pub fn warp_perspective_nearest(src: &GrayImage, h: &Homography, size: OutputSize) -> GrayImage {
    let (out_w, out_h) = (size.width as usize, size.height as usize);
    let mut out = GrayImage::new(out_w, out_h);
    let Some(inv) = h.inverse() else {
        return out;
    };
    for y in 0..out_h {
        for x in 0..out_w {
            let p = inv.apply(Point::new(x as f32, y as f32));
            let (sx, sy) = (p.x.round(), p.y.round());
            if sx >= 0.0 && sy >= 0.0 && (sx as usize) < src.width && (sy as usize) < src.height {
                out.set(x, y, src.get(sx as usize, sy as usize));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point, b: Point, tol: f32) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "expected ({:.4},{:.4}) ~ ({:.4},{:.4}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn skewed() -> [Point; 4] {
        [
            Point::new(52.0, 31.0),
            Point::new(601.0, 12.0),
            Point::new(628.0, 455.0),
            Point::new(20.0, 470.0),
        ]
    }

    #[test]
    fn full_frame_corners_give_identity() {
        let mut r = PerspectiveRectifier::new(OutputSize::default());
        r.set_corners(&OutputSize::default().corners()).unwrap();
        let center = r.transform(Point::new(319.5, 239.5));
        assert_close(center, Point::new(319.5, 239.5), 1e-3);
        assert_close(r.normalize(center), Point::new(0.5, 0.5), 1e-5);
    }

    #[test]
    fn source_corners_land_on_canonical_corners() {
        let mut r = PerspectiveRectifier::new(OutputSize::default());
        assert!(r.set_corners(&skewed()).unwrap());
        let canonical = r.output_size().corners();
        for (src, dst) in skewed().iter().zip(canonical.iter()) {
            assert_close(r.transform(*src), *dst, 1e-2);
        }
    }

    #[test]
    fn inverse_round_trips_canonical_corners() {
        let mut r = PerspectiveRectifier::new(OutputSize::default());
        r.set_corners(&skewed()).unwrap();
        for (dst, src) in r.output_size().corners().iter().zip(skewed().iter()) {
            let back = r.inverse_transform(*dst).expect("invertible");
            assert_close(back, *src, 1e-2);
        }
    }

    #[test]
    fn wrong_point_count_is_ignored() {
        let mut r = PerspectiveRectifier::new(OutputSize::default());
        let before = r.corners();
        assert!(!r.set_corners(&skewed()[..3]).unwrap());
        assert_eq!(r.corners(), before);
    }

    #[test]
    fn collinear_corners_are_rejected_and_transform_kept() {
        let mut r = PerspectiveRectifier::new(OutputSize::default());
        r.set_corners(&skewed()).unwrap();
        let before = r.homography();

        let collinear = [
            Point::new(0.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(200.0, 200.0),
            Point::new(0.0, 300.0),
        ];
        let err = r.set_corners(&collinear).unwrap_err();
        assert!(matches!(err, ConfigurationError::Degenerate { .. }));
        assert_eq!(r.homography(), before);
        assert_eq!(r.corners(), skewed());
    }

    #[test]
    fn duplicate_corners_are_rejected() {
        let mut r = PerspectiveRectifier::new(OutputSize::default());
        let dup = [
            Point::new(10.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(600.0, 400.0),
            Point::new(5.0, 400.0),
        ];
        assert!(r.set_corners(&dup).is_err());
    }

    #[test]
    fn default_corners_cover_the_camera_frame() {
        let camera = OutputSize {
            width: 640,
            height: 480,
        };
        let output = OutputSize {
            width: 1024,
            height: 768,
        };
        let mut r = PerspectiveRectifier::with_frame_size(camera, output);
        assert_eq!(r.corners(), camera.corners());
        assert_close(r.transform(Point::new(639.0, 479.0)), Point::new(1023.0, 767.0), 1e-3);
        let center = r.transform(Point::new(319.5, 239.5));
        assert_close(r.normalize(center), Point::new(0.5, 0.5), 1e-5);

        r.set_corners(&skewed()).unwrap();
        r.reset();
        assert_eq!(r.corners(), camera.corners());
        assert_close(r.transform(Point::new(319.5, 239.5)), Point::new(511.5, 383.5), 1e-3);
    }

    #[test]
    fn frame_size_change_only_moves_uncalibrated_corners() {
        let small = OutputSize {
            width: 320,
            height: 240,
        };
        let mut r = PerspectiveRectifier::new(OutputSize::default());
        r.set_frame_size(small);
        assert_eq!(r.corners(), small.corners());
        let center = r.transform(Point::new(159.5, 119.5));
        assert_close(r.normalize(center), Point::new(0.5, 0.5), 1e-5);

        let mut calibrated = PerspectiveRectifier::new(OutputSize::default());
        calibrated.set_corners(&skewed()).unwrap();
        calibrated.set_frame_size(small);
        assert_eq!(calibrated.corners(), skewed());
    }

    #[test]
    fn identity_warp_copies_pixels() {
        let size = OutputSize {
            width: 4,
            height: 3,
        };
        let src = GrayImage::from_raw(4, 3, (0..12).collect()).unwrap();
        let out = warp_perspective_nearest(&src, &Homography::identity(), size);
        assert_eq!(out, src);
    }
}
