//! Cursor protocol emission.
//!
//! Lifecycle state is turned into TUIO 2D cursor events, one committed
//! `ProtocolFrame` per processing cycle. Each alive identity owns a session
//! id for as long as it is alive:
//!
//! - first cycle an identity is alive: ADD, then UPDATE
//! - every later cycle it is alive (including while dying): UPDATE
//! - the cycle it retires: REMOVE, after all ADD/UPDATE events
//!
//! Coordinates are normalized to `[0, 1]`.

pub mod osc;
mod sink;

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub use sink::{CursorSink, JsonLinesSink, MemorySink, UdpSink, DEFAULT_TUIO_ADDR};

use crate::rectify::OutputSize;
use crate::tracker::{Follower, RetiredFollower};
use crate::Point;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CursorEvent {
    Add {
        session_id: u32,
        x: f32,
        y: f32,
    },
    Update {
        session_id: u32,
        x: f32,
        y: f32,
        /// Velocity in normalized units per second.
        vx: f32,
        vy: f32,
        /// Change of speed in normalized units per second squared.
        acceleration: f32,
    },
    Remove {
        session_id: u32,
    },
}

impl CursorEvent {
    pub fn session_id(&self) -> u32 {
        match *self {
            Self::Add { session_id, .. }
            | Self::Update { session_id, .. }
            | Self::Remove { session_id } => session_id,
        }
    }
}

/// One atomic batch of cursor events.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProtocolFrame {
    pub sequence: u64,
    /// Session time at frame start.
    #[serde(serialize_with = "secs_f64")]
    pub time: Duration,
    pub events: Vec<CursorEvent>,
    /// Session ids alive after this frame, ascending.
    pub alive: Vec<u32>,
}

fn secs_f64<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Clone, Copy, Debug)]
struct CursorHandle {
    session_id: u32,
    position: Point,
    time: Duration,
    speed: f32,
}

/// Maps identity labels to protocol session ids and builds frames.
#[derive(Default)]
pub struct CursorEmitter {
    handles: BTreeMap<u32, CursorHandle>,
    next_session_id: u32,
    sequence: u64,
}

impl CursorEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session id currently held by `label`.
    pub fn session_id(&self, label: u32) -> Option<u32> {
        self.handles.get(&label).map(|h| h.session_id)
    }

    pub fn live_cursors(&self) -> usize {
        self.handles.len()
    }

    /// Sequence number of the last frame begun.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn begin_frame(&mut self, time: Duration) -> FrameBuilder<'_> {
        self.sequence += 1;
        FrameBuilder {
            frame: ProtocolFrame {
                sequence: self.sequence,
                time,
                events: Vec::new(),
                alive: Vec::new(),
            },
            removals: Vec::new(),
            emitter: self,
        }
    }

    /// Build the frame for one tracking step.
    ///
    /// `followers` is the tracker's live set after the step, `retired` the
    /// identities it dropped during the step.
    pub fn emit(
        &mut self,
        followers: &[Follower],
        retired: &[RetiredFollower],
        size: OutputSize,
        time: Duration,
    ) -> ProtocolFrame {
        let mut frame = self.begin_frame(time);
        for follower in followers.iter().filter(|f| f.state().is_alive()) {
            let position = size.normalize(follower.smoothed_position());
            if !frame.is_tracked(follower.label()) {
                frame.add_cursor(follower.label(), position);
            }
            frame.update_cursor(follower.label(), position);
        }
        for r in retired {
            frame.remove_cursor(r.label);
        }
        frame.commit()
    }
}

/// A frame under construction. REMOVE events are held back until `commit`
/// so they always follow every ADD and UPDATE.
pub struct FrameBuilder<'a> {
    emitter: &'a mut CursorEmitter,
    frame: ProtocolFrame,
    removals: Vec<CursorEvent>,
}

impl FrameBuilder<'_> {
    pub fn is_tracked(&self, label: u32) -> bool {
        self.emitter.handles.contains_key(&label)
    }

    /// Allocate a session id for `label`. A label that already holds one
    /// keeps it.
    pub fn add_cursor(&mut self, label: u32, position: Point) -> u32 {
        if let Some(handle) = self.emitter.handles.get(&label) {
            return handle.session_id;
        }
        let session_id = self.emitter.next_session_id;
        self.emitter.next_session_id += 1;
        self.emitter.handles.insert(
            label,
            CursorHandle {
                session_id,
                position,
                time: self.frame.time,
                speed: 0.0,
            },
        );
        self.frame.events.push(CursorEvent::Add {
            session_id,
            x: position.x,
            y: position.y,
        });
        session_id
    }

    /// No-op for labels without a session id.
    pub fn update_cursor(&mut self, label: u32, position: Point) {
        let time = self.frame.time;
        let Some(handle) = self.emitter.handles.get_mut(&label) else {
            return;
        };
        let dt = time.saturating_sub(handle.time).as_secs_f32();
        let (vx, vy, acceleration) = if dt > 0.0 {
            let vx = (position.x - handle.position.x) / dt;
            let vy = (position.y - handle.position.y) / dt;
            let speed = (vx * vx + vy * vy).sqrt();
            let acceleration = (speed - handle.speed) / dt;
            handle.speed = speed;
            (vx, vy, acceleration)
        } else {
            (0.0, 0.0, 0.0)
        };
        handle.position = position;
        handle.time = time;
        self.frame.events.push(CursorEvent::Update {
            session_id: handle.session_id,
            x: position.x,
            y: position.y,
            vx,
            vy,
            acceleration,
        });
    }

    /// No-op for labels without a session id.
    pub fn remove_cursor(&mut self, label: u32) {
        if let Some(handle) = self.emitter.handles.remove(&label) {
            self.removals.push(CursorEvent::Remove {
                session_id: handle.session_id,
            });
        }
    }

    pub fn commit(mut self) -> ProtocolFrame {
        self.frame.events.append(&mut self.removals);
        let mut alive: Vec<u32> = self
            .emitter
            .handles
            .values()
            .map(|h| h.session_id)
            .collect();
        alive.sort_unstable();
        self.frame.alive = alive;
        self.frame
    }
}
