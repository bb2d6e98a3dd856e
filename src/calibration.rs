//! Interactive editing of the calibration quadrilateral.
//!
//! Edits happen on a draft copy in camera pixel space; the rectifier only
//! sees the quadrilateral once it is committed.

use crate::Point;
use nalgebra::Vector2;

#[derive(Clone, Debug)]
pub struct CalibrationEditor {
    active: bool,
    draft: [Point; 4],
    picked: Option<usize>,
    pick_offset: Vector2<f32>,
}

impl Default for CalibrationEditor {
    fn default() -> Self {
        Self {
            active: false,
            draft: [Point::origin(); 4],
            picked: None,
            pick_offset: Vector2::zeros(),
        }
    }
}

impl CalibrationEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start editing from `corners`.
    pub fn enter(&mut self, corners: [Point; 4]) {
        self.active = true;
        self.draft = corners;
        self.picked = None;
        self.pick_offset = Vector2::zeros();
    }

    /// Stop editing and hand back the draft.
    pub fn exit(&mut self) -> [Point; 4] {
        self.active = false;
        self.picked = None;
        self.draft
    }

    pub fn draft(&self) -> [Point; 4] {
        self.draft
    }

    pub fn picked(&self) -> Option<usize> {
        self.picked
    }

    /// Select the corner nearest the pointer. Returns its index, or `None`
    /// when not editing.
    pub fn pick_closest(&mut self, pointer: Point) -> Option<usize> {
        if !self.active {
            return None;
        }
        let (index, corner) = self
            .draft
            .iter()
            .enumerate()
            .min_by(|a, b| {
                let da = (a.1 - pointer).norm_squared();
                let db = (b.1 - pointer).norm_squared();
                da.total_cmp(&db)
            })?;
        self.pick_offset = corner - pointer;
        self.picked = Some(index);
        Some(index)
    }

    /// Move the picked corner with the pointer, keeping the grab offset.
    pub fn drag(&mut self, pointer: Point) -> bool {
        match (self.active, self.picked) {
            (true, Some(index)) => {
                self.draft[index] = pointer + self.pick_offset;
                true
            }
            _ => false,
        }
    }

    pub fn release(&mut self) {
        self.picked = None;
    }

    pub fn set_draft(&mut self, corners: [Point; 4]) {
        self.draft = corners;
    }
}
