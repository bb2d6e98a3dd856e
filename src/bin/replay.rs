//! replay - deterministic end-to-end run on the synthetic source
//!
//! Drives the full pipeline with simulated time and prints every committed
//! protocol frame to stdout as one JSON object per line.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;

use finger_tracker::tuio::JsonLinesSink;
use finger_tracker::{
    OutputSize, Pipeline, RuntimeParams, SourceSettings, SyntheticSource, ThresholdDetector,
    TrackerParams,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Simulated duration in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Frames per second of the synthetic camera.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Omit frames that carry no cursor events.
    #[arg(long)]
    skip_empty: bool,
    /// Maximum travel distance per frame.
    #[arg(long, env = "FINGER_MAX_DISTANCE")]
    max_distance: Option<f32>,
    /// Detection threshold (0-255).
    #[arg(long)]
    threshold: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let output = OutputSize::default();
    let source = SyntheticSource::new(SourceSettings {
        url: "stub://replay".to_string(),
        width: output.width,
        height: output.height,
        target_fps: args.fps,
    })
    .unpaced();

    let mut tracker = TrackerParams::default();
    if let Some(distance) = args.max_distance {
        tracker.maximum_distance = distance;
    }
    let mut runtime = RuntimeParams::default();
    if let Some(threshold) = args.threshold {
        runtime.detector.threshold = threshold;
    }

    let sink = JsonLinesSink::new(std::io::stdout()).skip_empty(args.skip_empty);
    let mut pipeline = Pipeline::new(
        output,
        tracker,
        Box::new(source),
        Box::new(ThresholdDetector::new(runtime.detector)),
        Box::new(sink),
    );
    let handle = pipeline.handle();
    handle.set_runtime_params(runtime);
    pipeline.start()?;

    let total_frames = args.seconds.saturating_mul(args.fps as u64);
    let frame_time = Duration::from_secs_f64(1.0 / args.fps as f64);
    for n in 0..total_frames {
        let now = frame_time.mul_f64(n as f64);
        if pipeline.poll_at(now)?.is_none() {
            return Err(anyhow!("synthetic source delivered no frame at {:?}", now));
        }
    }
    pipeline.stop()?;

    let stats = handle.stats();
    eprintln!("replay summary:");
    eprintln!("  frames processed: {}", stats.frames_processed);
    eprintln!("  frames emitted: {}", stats.frames_emitted);
    eprintln!("  identities at end: {}", stats.live_identities);
    Ok(())
}
