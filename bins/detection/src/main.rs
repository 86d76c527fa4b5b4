use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use detect_config::DetectConfig;
use detect_core::{Detector, IouTracker, NullDetector, TimedDetector};
use detect_engine::DetectEngine;
use ivis_contracts::ModelInfo;
use ivis_core::Runtime;

/// Detection service: consumes frame contracts, reads pixels from the
/// shared memory ring, runs inference and tracking, publishes results.
#[derive(Parser, Debug)]
#[command(name = "detection")]
struct Args {
    /// Optional TOML config file; env overlays it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bus transport
    #[arg(long, value_parser = ["tcp", "zmq"], default_value = "tcp")]
    bus: String,
}

fn build_detector(config: &DetectConfig) -> anyhow::Result<Box<dyn Detector>> {
    let model = ModelInfo {
        name: config.model_name.clone(),
        version: config.model_version.clone(),
        threshold: Some(config.model_threshold),
        input_size: Some(vec![config.frame_height, config.frame_width]),
    };
    // Model backends plug in behind the Detector trait; "null" keeps the
    // transport path running without one.
    let inner: Box<dyn Detector> = match config.model_name.as_str() {
        "null" => Box::new(NullDetector::new(model)),
        other => anyhow::bail!("unknown model '{other}' (no detector backend linked)"),
    };
    if config.inference_timeout_sec > 0.0 {
        let timeout = Duration::from_secs_f64(config.inference_timeout_sec);
        return Ok(Box::new(TimedDetector::new(inner, timeout)));
    }
    Ok(inner)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.bus == "zmq" {
        anyhow::bail!("the zmq transport needs a build with the ivis-bus `zmq` feature");
    }
    let mut config = match &args.config {
        Some(path) => DetectConfig::load(path.display().to_string())?,
        None => DetectConfig::defaults(),
    };
    config.overlay_env()?;
    info!(config = %config.summary(), "detection configured");

    let detector = build_detector(&config)?;
    let tracker = Box::new(IouTracker::new(
        config.tracker_max_age,
        config.tracker_init_frames,
        config.tracker_iou_threshold,
    ));

    let runtime = Runtime::install()?;
    let mut engine = DetectEngine::new(config, detector, tracker)?;
    engine.run(&runtime)?;
    Ok(())
}
