//! Per-frame orchestration.
//!
//! One worker owns the capture source, the detector and the sink, and runs
//! acquire → rectify → blur → detect → filter → track → emit. Everything readers
//! can see (calibration, parameters, identities, the latest image, the
//! label→session map) lives in one `SharedState` behind a single mutex.
//! The worker takes it briefly to read the homography, then once more for
//! detect+filter+track+emit. Grabbing, grayscale conversion, warping,
//! blurring and sending happen outside the lock.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::calibration::CalibrationEditor;
use crate::config::{CalibrationFile, RuntimeParams};
use crate::detect::{DetectedRegion, RegionDetector};
use crate::frame::{GrayImage, RawFrame};
use crate::ingest::CaptureSource;
use crate::rectify::{warp_perspective_nearest, OutputSize, PerspectiveRectifier};
use crate::shape::{ShapeFilter, ShapeVerdict};
use crate::tracker::{FollowerState, IdentityTracker, TrackerParams};
use crate::tuio::{CursorEmitter, CursorSink, ProtocolFrame};
use crate::Point;

const IDLE_SLEEP: Duration = Duration::from_millis(2);
/// Sigma of a 9x9 Gaussian kernel. Suppresses sensor speckle and the
/// staircase edges of the nearest-neighbour warp before segmentation.
pub const BLUR_SIGMA: f32 = 1.7;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_emitted: u64,
    pub emit_failures: u64,
    pub live_identities: usize,
}

/// Read-only copy of one identity.
#[derive(Clone, Debug, PartialEq)]
pub struct FollowerView {
    pub label: u32,
    pub state: FollowerState,
    pub position: Point,
    pub raw_position: Point,
    pub color: Option<[u8; 3]>,
    pub trail: Vec<Point>,
    pub session_id: Option<u32>,
}

/// What the last processed frame produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameSnapshot {
    pub sequence: u64,
    pub followers: Vec<FollowerView>,
    /// Circularity per detected region, in detector index order.
    pub diagnostics: Vec<ShapeVerdict>,
}

struct SharedState {
    rectifier: PerspectiveRectifier,
    shape: ShapeFilter,
    tracker: IdentityTracker,
    emitter: CursorEmitter,
    calibration: CalibrationEditor,
    runtime: RuntimeParams,
    runtime_dirty: bool,
    latest_image: Option<Arc<GrayImage>>,
    diagnostics: Vec<ShapeVerdict>,
    stats: PipelineStats,
}

impl SharedState {
    fn new(
        frame: OutputSize,
        output: OutputSize,
        tracker: TrackerParams,
        runtime: RuntimeParams,
    ) -> Self {
        Self {
            rectifier: PerspectiveRectifier::with_frame_size(frame, output),
            shape: ShapeFilter::new(tracker.circularity_threshold),
            tracker: IdentityTracker::new(tracker),
            emitter: CursorEmitter::new(),
            calibration: CalibrationEditor::new(),
            runtime,
            runtime_dirty: true,
            latest_image: None,
            diagnostics: Vec::new(),
            stats: PipelineStats::default(),
        }
    }
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    // A panic mid-cycle is a defect; readers still get the last state.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Pipeline {
    shared: Arc<Mutex<SharedState>>,
    source: Box<dyn CaptureSource>,
    detector: Box<dyn RegionDetector>,
    sink: Box<dyn CursorSink>,
    started_at: Instant,
}

impl Pipeline {
    pub fn new(
        output: OutputSize,
        tracker: TrackerParams,
        source: Box<dyn CaptureSource>,
        detector: Box<dyn RegionDetector>,
        sink: Box<dyn CursorSink>,
    ) -> Self {
        let (width, height) = source.frame_size();
        let frame = OutputSize { width, height };
        Self {
            shared: Arc::new(Mutex::new(SharedState::new(
                frame,
                output,
                tracker,
                RuntimeParams::default(),
            ))),
            source,
            detector,
            sink,
            started_at: Instant::now(),
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: self.shared.clone(),
        }
    }

    /// Push pending exposure and detector parameters to the backends.
    fn sync_runtime_params(&mut self) {
        let pending = {
            let mut state = lock(&self.shared);
            std::mem::take(&mut state.runtime_dirty).then_some(state.runtime)
        };
        let Some(params) = pending else {
            return;
        };
        self.detector.configure(&params.detector);
        if let Err(err) = self.source.set_exposure(params.exposure) {
            log::warn!("exposure {} not applied: {}", params.exposure, err);
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.source.start()?;
        self.started_at = Instant::now();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.source.stop()
    }

    /// Grab at most one frame and process it at the current session time.
    /// `Ok(None)` when the source had nothing new.
    pub fn poll(&mut self) -> Result<Option<ProtocolFrame>> {
        let now = self.started_at.elapsed();
        self.poll_at(now)
    }

    /// `poll` with an explicit session time, for replays.
    pub fn poll_at(&mut self, now: Duration) -> Result<Option<ProtocolFrame>> {
        self.sync_runtime_params();
        let mut grabbed = None;
        self.source.grab(&mut |frame| grabbed = Some(frame))?;
        match grabbed {
            Some(frame) => self.process_frame(&frame, now).map(Some),
            None => Ok(None),
        }
    }

    /// Run one full cycle on `frame`. `now` is the session time and must not
    /// go backwards.
    ///
    /// Identity state is updated before the frame is handed to the sink, so
    /// a failed send loses only that frame's wire output.
    pub fn process_frame(&mut self, frame: &RawFrame, now: Duration) -> Result<ProtocolFrame> {
        self.sync_runtime_params();
        let gray = frame.to_gray();

        let (homography, size, calibrating) = {
            let mut state = lock(&self.shared);
            state.rectifier.set_frame_size(OutputSize {
                width: frame.width,
                height: frame.height,
            });
            (
                state.rectifier.homography(),
                state.rectifier.output_size(),
                state.calibration.is_active(),
            )
        };
        let rectified =
            warp_perspective_nearest(&gray, &homography, size).gaussian_blur(BLUR_SIGMA);

        let committed = {
            let mut guard = lock(&self.shared);
            let state = &mut *guard;

            let regions = self.detector.detect(&rectified)?;
            let verdicts = state.shape.evaluate(&regions);
            let params = state.tracker.params();
            let regions: Vec<DetectedRegion> = if params.gate_on_circularity {
                regions
                    .into_iter()
                    .zip(&verdicts)
                    .filter(|(_, verdict)| verdict.passed)
                    .map(|(region, _)| region)
                    .collect()
            } else {
                regions
            };

            let step = state.tracker.track(&regions, now);
            let committed = state
                .emitter
                .emit(state.tracker.followers(), &step.retired, size, now);

            state.diagnostics = verdicts;
            state.latest_image = Some(Arc::new(if calibrating { gray } else { rectified }));
            state.stats.frames_processed += 1;
            committed
        };

        match self.sink.send(&committed) {
            Ok(()) => {
                lock(&self.shared).stats.frames_emitted += 1;
                Ok(committed)
            }
            Err(err) => {
                lock(&self.shared).stats.emit_failures += 1;
                Err(err.context(format!("emit frame {}", committed.sequence)))
            }
        }
    }

    /// Start the source and run the loop on a dedicated thread.
    pub fn spawn(mut self) -> Result<PipelineWorker> {
        self.start()?;
        let handle = self.handle();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run(&shutdown_thread))
            .context("spawn pipeline worker")?;
        Ok(PipelineWorker {
            handle,
            shutdown,
            join: Some(join),
        })
    }

    fn run(mut self, shutdown: &AtomicBool) {
        let mut failing = false;
        while !shutdown.load(Ordering::SeqCst) {
            match self.poll() {
                Ok(Some(_)) => failing = false,
                Ok(None) => std::thread::sleep(IDLE_SLEEP),
                Err(err) => {
                    // Only the first failure of a run of failures is logged.
                    if !failing {
                        log::warn!("pipeline cycle failed: {:#}", err);
                    }
                    failing = true;
                    std::thread::sleep(IDLE_SLEEP);
                }
            }
        }
        if let Err(err) = self.stop() {
            log::warn!("capture source did not stop cleanly: {}", err);
        }
        log::info!("pipeline stopped");
    }
}

pub struct PipelineWorker {
    handle: PipelineHandle,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PipelineWorker {
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Finish the current cycle and stop. No further frames are accepted.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("pipeline worker thread panicked"))?;
        }
        Ok(())
    }
}

/// Caller-facing surface, usable from any thread while the worker runs.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Mutex<SharedState>>,
}

impl PipelineHandle {
    /// Rectified grayscale of the last frame, or the unrectified one while
    /// calibrating.
    pub fn latest_image(&self) -> Option<Arc<GrayImage>> {
        lock(&self.shared).latest_image.clone()
    }

    pub fn output_size(&self) -> OutputSize {
        lock(&self.shared).rectifier.output_size()
    }

    pub fn corners(&self) -> [Point; 4] {
        lock(&self.shared).rectifier.corners()
    }

    /// See `PerspectiveRectifier::set_corners`.
    pub fn set_corners(&self, corners: &[Point]) -> Result<bool> {
        let applied = lock(&self.shared).rectifier.set_corners(corners)?;
        Ok(applied)
    }

    pub fn reset_corners(&self) {
        lock(&self.shared).rectifier.reset();
    }

    pub fn tracker_params(&self) -> TrackerParams {
        lock(&self.shared).tracker.params()
    }

    /// Applies from the next frame; live identities are kept. Invalid
    /// parameters are rejected and the current ones stay in effect.
    pub fn set_tracker_params(&self, params: TrackerParams) -> Result<()> {
        params.validate()?;
        let mut state = lock(&self.shared);
        state.shape.set_threshold(params.circularity_threshold);
        state.tracker.set_params(params);
        Ok(())
    }

    pub fn runtime_params(&self) -> RuntimeParams {
        lock(&self.shared).runtime
    }

    pub fn set_runtime_params(&self, params: RuntimeParams) {
        let mut state = lock(&self.shared);
        state.runtime = params;
        state.runtime_dirty = true;
    }

    pub fn is_calibrating(&self) -> bool {
        lock(&self.shared).calibration.is_active()
    }

    pub fn enter_calibration(&self) {
        let mut state = lock(&self.shared);
        let corners = state.rectifier.corners();
        state.calibration.enter(corners);
        log::info!("calibration mode on");
    }

    /// Leave calibration mode. Uncommitted edits are dropped.
    pub fn exit_calibration(&self) {
        lock(&self.shared).calibration.exit();
        log::info!("calibration mode off");
    }

    pub fn calibration_draft(&self) -> [Point; 4] {
        lock(&self.shared).calibration.draft()
    }

    pub fn pick_closest_corner(&self, x: f32, y: f32) -> Option<usize> {
        lock(&self.shared).calibration.pick_closest(Point::new(x, y))
    }

    pub fn drag_corner(&self, x: f32, y: f32) -> bool {
        lock(&self.shared).calibration.drag(Point::new(x, y))
    }

    pub fn release_corner(&self) {
        lock(&self.shared).calibration.release();
    }

    /// Apply the edited quadrilateral. A degenerate draft is rejected and
    /// the previous transform stays in effect.
    pub fn commit_calibration(&self) -> Result<()> {
        let mut state = lock(&self.shared);
        let draft = state.calibration.draft();
        match state.rectifier.set_corners(&draft) {
            Ok(_) => {
                log::info!(
                    "calibration committed: {}",
                    draft
                        .iter()
                        .map(|p| format!("({:.1}, {:.1})", p.x, p.y))
                        .collect::<Vec<_>>()
                        .join(" ")
                );
                Ok(())
            }
            Err(err) => {
                log::warn!("calibration rejected: {}", err);
                let current = state.rectifier.corners();
                state.calibration.set_draft(current);
                Err(err.into())
            }
        }
    }

    /// Current calibration in its persisted form.
    pub fn calibration_file(&self) -> CalibrationFile {
        let state = lock(&self.shared);
        CalibrationFile::from_parts(state.rectifier.corners(), &state.runtime)
    }

    /// Restore a persisted calibration. Camera and detection settings are
    /// applied even when the stored quadrilateral is rejected.
    pub fn apply_calibration_file(&self, file: &CalibrationFile) -> Result<()> {
        let mut state = lock(&self.shared);
        state.runtime = file.runtime_params();
        state.runtime_dirty = true;
        state.rectifier.set_corners(&file.corners())?;
        Ok(())
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        let state = lock(&self.shared);
        let followers = state
            .tracker
            .followers()
            .iter()
            .map(|f| FollowerView {
                label: f.label(),
                state: f.state(),
                position: f.smoothed_position(),
                raw_position: f.raw_position(),
                color: f.color(),
                trail: f.trail().iter().copied().collect(),
                session_id: state.emitter.session_id(f.label()),
            })
            .collect();
        FrameSnapshot {
            sequence: state.emitter.sequence(),
            followers,
            diagnostics: state.diagnostics.clone(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let state = lock(&self.shared);
        PipelineStats {
            live_identities: state.tracker.len(),
            ..state.stats
        }
    }
}
