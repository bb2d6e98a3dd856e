use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorParams;
use crate::ingest::{SourceSettings, DEFAULT_SOURCE_URL};
use crate::rectify::OutputSize;
use crate::tracker::TrackerParams;
use crate::tuio::DEFAULT_TUIO_ADDR;
use crate::Point;

const DEFAULT_CALIBRATION_PATH: &str = "settings.json";
const DEFAULT_SOURCE_NAME: &str = "finger-tracker";
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_EXPOSURE: i32 = 55;

#[derive(Debug, Deserialize, Default)]
struct TrackerdConfigFile {
    source: Option<SourceConfigFile>,
    output: Option<OutputConfigFile>,
    tuio: Option<TuioConfigFile>,
    tracker: Option<TrackerConfigFile>,
    calibration_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TuioConfigFile {
    addr: Option<String>,
    source_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    maximum_distance: Option<f32>,
    persistence_ms: Option<u64>,
    nascent_ms: Option<u64>,
    circularity_threshold: Option<f32>,
    gate_on_circularity: Option<bool>,
}

/// Daemon configuration: JSON file named by `FINGER_CONFIG`, then
/// `FINGER_*` environment overrides.
#[derive(Debug, Clone)]
pub struct TrackerdConfig {
    pub source: SourceSettings,
    pub output: OutputSize,
    pub tuio_addr: String,
    pub tuio_source_name: String,
    pub tracker: TrackerParams,
    pub calibration_path: PathBuf,
}

impl Default for TrackerdConfig {
    fn default() -> Self {
        Self::from_file(TrackerdConfigFile::default())
    }
}

impl TrackerdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FINGER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerdConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let tuio = file.tuio.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let defaults = TrackerParams::default();
        let canonical = OutputSize::default();

        Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
            },
            output: OutputSize {
                width: output.width.unwrap_or(canonical.width),
                height: output.height.unwrap_or(canonical.height),
            },
            tuio_addr: tuio.addr.unwrap_or_else(|| DEFAULT_TUIO_ADDR.to_string()),
            tuio_source_name: tuio
                .source_name
                .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string()),
            tracker: TrackerParams {
                maximum_distance: tracker.maximum_distance.unwrap_or(defaults.maximum_distance),
                persistence: tracker
                    .persistence_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.persistence),
                nascent_time: tracker
                    .nascent_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.nascent_time),
                circularity_threshold: tracker
                    .circularity_threshold
                    .unwrap_or(defaults.circularity_threshold),
                gate_on_circularity: tracker
                    .gate_on_circularity
                    .unwrap_or(defaults.gate_on_circularity),
            },
            calibration_path: file
                .calibration_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_PATH)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("FINGER_SOURCE") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(addr) = std::env::var("FINGER_TUIO_ADDR") {
            if !addr.trim().is_empty() {
                self.tuio_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("FINGER_CALIBRATION_PATH") {
            if !path.trim().is_empty() {
                self.calibration_path = PathBuf::from(path);
            }
        }
        if let Ok(distance) = std::env::var("FINGER_MAX_DISTANCE") {
            self.tracker.maximum_distance = distance
                .trim()
                .parse()
                .map_err(|_| anyhow!("FINGER_MAX_DISTANCE must be a number"))?;
        }
        if let Ok(persistence) = std::env::var("FINGER_PERSISTENCE_MS") {
            let millis: u64 = persistence.trim().parse().map_err(|_| {
                anyhow!("FINGER_PERSISTENCE_MS must be an integer number of milliseconds")
            })?;
            self.tracker.persistence = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }
        if self.output.width < 2 || self.output.height < 2 {
            return Err(anyhow!("output width and height must be at least 2"));
        }
        self.tuio_addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("invalid TUIO address '{}'", self.tuio_addr))?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TrackerdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// Parameters for the camera and detector, settable while running.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuntimeParams {
    pub exposure: i32,
    pub detector: DetectorParams,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            exposure: DEFAULT_EXPOSURE,
            detector: DetectorParams::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraSection {
    pub exposure: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSection {
    pub threshold: f32,
    pub min_area_radius: f32,
    pub max_area_radius: f32,
}

/// Persisted calibration: the source quadrilateral as
/// `[x0, y0, x1, y1, x2, y2, x3, y3]` (top-left, top-right, bottom-right,
/// bottom-left) plus camera and detection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub rect: [f32; 8],
    pub camera: CameraSection,
    pub tracker: DetectionSection,
}

impl Default for CalibrationFile {
    fn default() -> Self {
        Self::from_parts(OutputSize::default().corners(), &RuntimeParams::default())
    }
}

impl CalibrationFile {
    pub fn from_parts(corners: [Point; 4], params: &RuntimeParams) -> Self {
        let mut rect = [0.0; 8];
        for (slot, corner) in rect.chunks_exact_mut(2).zip(corners.iter()) {
            slot[0] = corner.x;
            slot[1] = corner.y;
        }
        Self {
            rect,
            camera: CameraSection {
                exposure: params.exposure,
            },
            tracker: DetectionSection {
                threshold: params.detector.threshold,
                min_area_radius: params.detector.min_area_radius,
                max_area_radius: params.detector.max_area_radius,
            },
        }
    }

    pub fn corners(&self) -> [Point; 4] {
        let r = &self.rect;
        [
            Point::new(r[0], r[1]),
            Point::new(r[2], r[3]),
            Point::new(r[4], r[5]),
            Point::new(r[6], r[7]),
        ]
    }

    pub fn runtime_params(&self) -> RuntimeParams {
        RuntimeParams {
            exposure: self.camera.exposure,
            detector: DetectorParams {
                threshold: self.tracker.threshold,
                min_area_radius: self.tracker.min_area_radius,
                max_area_radius: self.tracker.max_area_radius,
            },
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid calibration {}", path.display()))
    }

    /// `None` when the file does not exist yet.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Pretty-printed with four-space indentation.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = Vec::with_capacity(256);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)
            .context("failed to encode calibration")?;
        out.push(b'\n');
        std::fs::write(path, out)
            .with_context(|| format!("failed to write calibration {}", path.display()))
    }
}
