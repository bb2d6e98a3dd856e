use serde::Serialize;

use crate::Point;

/// Axis-aligned bounding rectangle in rectified pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingRect {
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One blob found in the current frame.
///
/// `index` is the position of the region within this frame's detection
/// output. It is stable for the duration of one frame only.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedRegion {
    pub index: usize,
    pub position: Point,
    pub bounds: BoundingRect,
    /// Contour perimeter.
    pub arc_length: f32,
    /// Contour area.
    pub area: f32,
}

impl DetectedRegion {
    /// Region positioned at the center of its bounding rectangle.
    pub fn from_bounds(index: usize, bounds: BoundingRect, arc_length: f32, area: f32) -> Self {
        Self {
            index,
            position: bounds.center(),
            bounds,
            arc_length,
            area,
        }
    }

    /// Circular region of the given radius centered at `position`, with
    /// exact circle perimeter and area.
    pub fn disk(index: usize, position: Point, radius: f32) -> Self {
        Self {
            index,
            position,
            bounds: BoundingRect {
                x: position.x - radius,
                y: position.y - radius,
                width: 2.0 * radius,
                height: 2.0 * radius,
            },
            arc_length: 2.0 * std::f32::consts::PI * radius,
            area: std::f32::consts::PI * radius * radius,
        }
    }
}
