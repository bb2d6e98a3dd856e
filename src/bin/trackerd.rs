//! trackerd - camera multitouch tracking daemon
//!
//! This daemon:
//! 1. Loads configuration (FINGER_CONFIG + FINGER_* overrides)
//! 2. Restores the calibration quadrilateral and camera/detector settings
//! 3. Runs the capture → rectify → detect → track pipeline on a worker thread
//! 4. Streams TUIO 2D cursors over UDP
//! 5. Saves the calibration on shutdown (Ctrl-C)

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::time::Duration;

use finger_tracker::{
    config::TrackerdConfig, open_source, CalibrationFile, Pipeline, ThresholdDetector, UdpSink,
};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TrackerdConfig::load()?;
    let source = open_source(&config.source)?;
    let sink = UdpSink::connect(&config.tuio_addr, &config.tuio_source_name)?;
    let calibration = CalibrationFile::load_optional(&config.calibration_path)?;

    let runtime = calibration
        .as_ref()
        .map(|c| c.runtime_params())
        .unwrap_or_default();
    let pipeline = Pipeline::new(
        config.output,
        config.tracker,
        source,
        Box::new(ThresholdDetector::new(runtime.detector)),
        Box::new(sink),
    );
    let handle = pipeline.handle();
    match &calibration {
        Some(file) => match handle.apply_calibration_file(file) {
            Ok(()) => log::info!(
                "calibration restored from {}",
                config.calibration_path.display()
            ),
            Err(e) => log::warn!(
                "calibration quadrilateral in {} not applied ({}); camera and detection settings restored",
                config.calibration_path.display(),
                e
            ),
        },
        None => log::info!(
            "no calibration at {}; using the full frame",
            config.calibration_path.display()
        ),
    }

    let worker = pipeline.spawn()?;
    log::info!(
        "trackerd running. source={} tuio={} output={}x{}",
        config.source.url,
        config.tuio_addr,
        config.output.width,
        config.output.height
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("trackerd waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(HEALTH_INTERVAL) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let stats = handle.stats();
                log::info!(
                    "health frames={} emitted={} emit_failures={} identities={}",
                    stats.frames_processed,
                    stats.frames_emitted,
                    stats.emit_failures,
                    stats.live_identities
                );
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("shutdown signal received, stopping pipeline...");
    worker.stop()?;
    handle
        .calibration_file()
        .save(&config.calibration_path)?;
    log::info!("calibration saved to {}", config.calibration_path.display());

    Ok(())
}
