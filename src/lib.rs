//! Finger Tracker
//!
//! Turns camera frames from an overhead or IR camera into persistent,
//! uniquely labelled touch points streamed as TUIO 2D cursors.
//!
//! # Architecture
//!
//! Data flows strictly downstream every frame:
//!
//! 1. **Capture**: a `CaptureSource` hands out packed RGB frames.
//! 2. **Rectify**: a projective map from the calibration quadrilateral to
//!    the canonical output rectangle removes camera perspective, and a
//!    Gaussian blur suppresses speckle.
//! 3. **Detect**: a `RegionDetector` finds bright blobs in the rectified
//!    grayscale image.
//! 4. **Filter**: circularity diagnostics, optionally gating tracking.
//! 5. **Track**: greedy nearest-neighbour identity assignment with a
//!    pending → confirmed → active → dying → retired lifecycle.
//! 6. **Emit**: ADD/UPDATE/REMOVE cursor events committed as one frame.
//!
//! # Module Structure
//!
//! - `frame`: RGB frames and grayscale images (with blur)
//! - `ingest`: capture sources (synthetic, image directories, V4L2)
//! - `rectify`: perspective rectification
//! - `detect`: blob detection backends
//! - `shape`: circularity filter
//! - `tracker`: identity assignment and lifecycle
//! - `tuio`: cursor protocol emission and transports
//! - `calibration`: calibration quadrilateral editing
//! - `pipeline`: per-frame orchestration and the shared state
//! - `config`: daemon configuration and calibration persistence

pub mod calibration;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod rectify;
pub mod shape;
pub mod tracker;
pub mod tuio;

/// 2D point in camera or rectified pixel space.
pub type Point = nalgebra::Point2<f32>;

pub use calibration::CalibrationEditor;
pub use config::{CalibrationFile, RuntimeParams, TrackerdConfig};
pub use detect::{DetectedRegion, DetectorParams, RegionDetector, ScriptedDetector, ThresholdDetector};
pub use error::ConfigurationError;
pub use frame::{GrayImage, RawFrame};
pub use ingest::{open_source, CaptureSource, SourceSettings, SyntheticSource};
pub use pipeline::{FollowerView, FrameSnapshot, Pipeline, PipelineHandle, PipelineStats, PipelineWorker};
pub use rectify::{Homography, OutputSize, PerspectiveRectifier};
pub use shape::{circularity, ShapeFilter, ShapeVerdict};
pub use tracker::{Follower, FollowerState, IdentityTracker, TrackStep, TrackerParams};
pub use tuio::{CursorEmitter, CursorEvent, CursorSink, MemorySink, ProtocolFrame, UdpSink};
