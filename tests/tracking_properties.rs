use std::time::Duration;

use finger_tracker::shape::{circularity, ShapeFilter};
use finger_tracker::tuio::{CursorEmitter, CursorEvent, ProtocolFrame};
use finger_tracker::{
    DetectedRegion, FollowerState, IdentityTracker, OutputSize, PerspectiveRectifier, Point,
};

const FRAME_MS: u64 = 33;

fn t(frame: u64) -> Duration {
    Duration::from_millis(frame * FRAME_MS)
}

fn region(index: usize, x: f32, y: f32) -> DetectedRegion {
    DetectedRegion::disk(index, Point::new(x, y), 12.0)
}

struct Harness {
    tracker: IdentityTracker,
    emitter: CursorEmitter,
    frames: Vec<ProtocolFrame>,
}

impl Harness {
    fn new() -> Self {
        Self {
            tracker: IdentityTracker::default(),
            emitter: CursorEmitter::new(),
            frames: Vec::new(),
        }
    }

    fn step(&mut self, regions: &[DetectedRegion], frame: u64) -> &ProtocolFrame {
        let step = self.tracker.track(regions, t(frame));
        let committed = self.emitter.emit(
            self.tracker.followers(),
            &step.retired,
            OutputSize::default(),
            t(frame),
        );
        self.frames.push(committed);
        self.frames.last().unwrap()
    }

    fn count(&self, pred: impl Fn(&CursorEvent) -> bool) -> usize {
        self.frames
            .iter()
            .flat_map(|f| f.events.iter())
            .filter(|e| pred(e))
            .count()
    }

    fn adds(&self) -> usize {
        self.count(|e| matches!(e, CursorEvent::Add { .. }))
    }

    fn removes(&self) -> usize {
        self.count(|e| matches!(e, CursorEvent::Remove { .. }))
    }
}

#[test]
fn moving_region_keeps_its_label() {
    let mut tracker = IdentityTracker::default();
    let first = tracker.track(&[region(0, 10.0, 10.0)], t(0));
    assert_eq!(first.spawned, vec![0]);

    for n in 1..200u64 {
        let x = 10.0 + 20.0 * n as f32;
        let step = tracker.track(&[region(0, x, 10.0)], t(n));
        assert!(step.spawned.is_empty(), "respawned at frame {}", n);
        assert_eq!(step.matched, vec![(0, 0)]);
    }
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.get(0).unwrap().state(), FollowerState::Active);
}

#[test]
fn distant_regions_get_distinct_labels() {
    let mut tracker = IdentityTracker::default();
    let step = tracker.track(&[region(0, 100.0, 100.0), region(1, 200.0, 100.0)], t(0));
    assert_eq!(step.spawned, vec![0, 1]);

    for n in 1..30 {
        let step = tracker.track(&[region(0, 100.0, 100.0), region(1, 200.0, 100.0)], t(n));
        assert_eq!(step.matched, vec![(0, 0), (1, 1)]);
    }
}

#[test]
fn short_lived_region_never_adds() {
    let mut h = Harness::new();
    // Present for ~430ms, gone for one frame, back for ~400ms.
    for n in 0..=13 {
        h.step(&[region(0, 300.0, 200.0)], n);
    }
    h.step(&[], 14);
    for n in 15..=27 {
        h.step(&[region(0, 300.0, 200.0)], n);
    }

    assert_eq!(h.adds(), 0);
    assert_eq!(h.removes(), 0);
    assert!(h.frames.iter().all(|f| f.alive.is_empty()));
    let labels: Vec<u32> = h.tracker.followers().iter().map(|f| f.label()).collect();
    assert_eq!(labels, vec![1]);
    assert_eq!(h.tracker.followers()[0].state(), FollowerState::Pending);
}

#[test]
fn brief_dropout_keeps_identity_without_remove() {
    let mut h = Harness::new();
    for n in 0..=30 {
        h.step(&[region(0, 300.0, 200.0)], n);
    }
    assert_eq!(h.adds(), 1);
    assert_eq!(h.tracker.get(0).unwrap().state(), FollowerState::Active);

    let session = h.emitter.session_id(0).unwrap();

    // ~860ms without a match. The dying identity is still reported.
    for n in 31..=57 {
        let frame = h.step(&[], n).clone();
        assert_eq!(h.tracker.get(0).unwrap().state(), FollowerState::Dying);
        let updates = frame
            .events
            .iter()
            .filter(|e| {
                matches!(e, CursorEvent::Update { session_id, .. } if *session_id == session)
            })
            .count();
        assert_eq!(updates, 1, "frame {}", n);
        assert_eq!(frame.events.len(), 1, "frame {}", n);
        assert_eq!(frame.alive, vec![session]);
    }
    for n in 58..=70 {
        h.step(&[region(0, 302.0, 201.0)], n);
    }

    let follower = h.tracker.get(0).unwrap();
    assert_eq!(follower.state(), FollowerState::Active);
    assert_eq!(follower.dying_since(), None);
    assert_eq!(h.adds(), 1);
    assert_eq!(h.removes(), 0);
    assert_eq!(h.frames.last().unwrap().alive, vec![0]);
}

#[test]
fn long_dropout_removes_exactly_once() {
    let mut h = Harness::new();
    for n in 0..=30 {
        h.step(&[region(0, 300.0, 200.0)], n);
    }
    let session = h.emitter.session_id(0).unwrap();

    // First miss at frame 31; 31 frames later is 1023ms of dying.
    let mut removed_at = None;
    for n in 31..=70 {
        let frame = h.step(&[], n);
        if frame
            .events
            .contains(&CursorEvent::Remove { session_id: session })
        {
            assert!(removed_at.is_none());
            removed_at = Some(n);
        }
    }
    assert_eq!(removed_at, Some(62));
    assert_eq!(h.removes(), 1);
    assert!(h.tracker.is_empty());
    assert_eq!(h.emitter.session_id(0), None);

    let step = h.tracker.track(&[region(0, 300.0, 200.0)], t(71));
    assert_eq!(step.spawned.len(), 1);
    assert_ne!(step.spawned[0], 0);
}

#[test]
fn remove_follows_updates_in_the_same_frame() {
    let mut h = Harness::new();
    for n in 0..=20 {
        h.step(&[region(0, 100.0, 100.0), region(1, 400.0, 300.0)], n);
    }
    for n in 21..=60 {
        h.step(&[region(0, 100.0, 100.0)], n);
    }

    let removal = h
        .frames
        .iter()
        .find(|f| f.events.iter().any(|e| matches!(e, CursorEvent::Remove { .. })))
        .unwrap();
    assert!(matches!(removal.events.last(), Some(CursorEvent::Remove { .. })));
    assert!(matches!(removal.events[0], CursorEvent::Update { .. }));

    let add_frame = h
        .frames
        .iter()
        .position(|f| f.events.iter().any(|e| matches!(e, CursorEvent::Add { .. })))
        .unwrap();
    let remove_frame = h.frames.iter().position(|f| f == removal).unwrap();
    assert!(remove_frame > add_frame + 1);
}

#[test]
fn add_is_followed_by_update_in_the_first_alive_frame() {
    let mut h = Harness::new();
    let mut first_alive = None;
    for n in 0..=20 {
        let frame = h.step(&[region(0, 319.5, 239.5)], n);
        if first_alive.is_none() && !frame.alive.is_empty() {
            first_alive = Some(frame.clone());
        }
    }
    let frame = first_alive.unwrap();
    assert_eq!(frame.events.len(), 2);
    assert!(matches!(frame.events[0], CursorEvent::Add { session_id: 0, .. }));
    match frame.events[1] {
        CursorEvent::Update { session_id, x, y, .. } => {
            assert_eq!(session_id, 0);
            assert!((x - 0.5).abs() < 1e-5);
            assert!((y - 0.5).abs() < 1e-5);
        }
        other => panic!("expected update, got {:?}", other),
    }
}

#[test]
fn smoothing_halves_the_error_every_frame() {
    let mut tracker = IdentityTracker::default();
    for n in 0..5 {
        tracker.track(&[region(0, 0.0, 0.0)], t(n));
    }
    let mut previous_error = 30.0f32;
    for n in 5..20 {
        tracker.track(&[region(0, 30.0, 0.0)], t(n));
        let error = 30.0 - tracker.get(0).unwrap().smoothed_position().x;
        assert!(
            (error - previous_error * 0.5).abs() < 1e-4,
            "frame {}: error {} after {}",
            n,
            error,
            previous_error
        );
        previous_error = error;
    }
}

#[test]
fn circle_metrics_score_one_and_zero_perimeter_fails() {
    let area = 400.0f32;
    let perimeter = 2.0 * (std::f32::consts::PI * area).sqrt();
    let score = circularity(perimeter, area).unwrap();
    assert!((score - 1.0).abs() < 1e-5);

    assert_eq!(circularity(0.0, area), None);
    let degenerate = DetectedRegion {
        arc_length: 0.0,
        ..region(0, 10.0, 10.0)
    };
    let filter = ShapeFilter::default();
    assert!(!filter.passes(&degenerate));
    assert!(filter.passes(&region(1, 10.0, 10.0)));
}

#[test]
fn inverse_maps_canonical_corners_to_the_quadrilateral() {
    let mut rectifier = PerspectiveRectifier::new(OutputSize::default());
    let quad = [
        Point::new(42.0, 31.0),
        Point::new(598.0, 12.0),
        Point::new(621.0, 455.0),
        Point::new(18.0, 470.0),
    ];
    assert!(rectifier.set_corners(&quad).unwrap());

    for (canonical, expected) in OutputSize::default().corners().iter().zip(quad.iter()) {
        let back = rectifier.inverse_transform(*canonical).unwrap();
        assert!((back - expected).norm() < 1e-2, "{:?} vs {:?}", back, expected);
    }
}

#[test]
fn frame_center_normalizes_to_half() {
    let mut rectifier = PerspectiveRectifier::new(OutputSize::default());
    rectifier
        .set_corners(&[
            Point::new(0.0, 0.0),
            Point::new(639.0, 0.0),
            Point::new(639.0, 479.0),
            Point::new(0.0, 479.0),
        ])
        .unwrap();
    let rectified = rectifier.transform(Point::new(319.5, 239.5));
    assert!((rectified - Point::new(319.5, 239.5)).norm() < 1e-3);
    let normalized = rectifier.normalize(rectified);
    assert!((normalized.x - 0.5).abs() < 1e-5);
    assert!((normalized.y - 0.5).abs() < 1e-5);
}

#[test]
fn two_close_frames_smooth_to_the_midpoint() {
    let mut tracker = IdentityTracker::default();
    tracker.track(&[region(0, 100.0, 100.0)], t(0));
    tracker.track(&[region(0, 110.0, 108.0)], t(1));
    assert_eq!(tracker.len(), 1);
    let smoothed = tracker.get(0).unwrap().smoothed_position();
    assert!((smoothed - Point::new(105.0, 104.0)).norm() < 1e-4);
}
