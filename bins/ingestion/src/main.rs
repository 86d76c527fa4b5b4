use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ingest_config::IngestConfig;
use ingest_engine::IngestEngine;
use ivis_core::Runtime;

/// Ingestion service: captures frames, writes pixels into the shared
/// memory ring and publishes frame contracts on the bus.
#[derive(Parser, Debug)]
#[command(name = "ingestion")]
struct Args {
    /// Source uri: raw .bgr/.raw file path or pattern://<name>
    #[arg(long)]
    source: Option<String>,

    /// How to interpret --source
    #[arg(long, value_parser = ["auto", "file", "webcam", "rtsp"], default_value = "auto")]
    source_type: String,

    /// Webcam device index (maps to webcam://<n>)
    #[arg(long)]
    webcam: Option<u32>,

    #[arg(long)]
    target_fps: Option<f64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Source color order; the published frames are always bgr
    #[arg(long, value_parser = ["bgr", "rgb"])]
    frame_color: Option<String>,

    /// Bus transport
    #[arg(long, value_parser = ["tcp", "zmq"], default_value = "tcp")]
    bus: String,

    /// Optional TOML config file; env and flags overlay it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rewind file sources at EOF
    #[arg(long = "loop", overrides_with = "no_loop")]
    video_loop: bool,

    #[arg(long = "no-loop")]
    no_loop: bool,
}

fn apply_args(config: &mut IngestConfig, args: &Args) -> anyhow::Result<()> {
    if let Some(source) = &args.source {
        config.source_url = match args.source_type.as_str() {
            // Bare webcam indexes get the scheme the source opener expects.
            "webcam" if !source.contains("://") => format!("webcam://{source}"),
            "rtsp" if !source.contains("://") => format!("rtsp://{source}"),
            _ => source.clone(),
        };
    }
    if let Some(index) = args.webcam {
        config.source_url = format!("webcam://{index}");
    }
    if let Some(fps) = args.target_fps {
        config.target_fps = fps;
    }
    if let Some(width) = args.width {
        config.frame_width = width;
    }
    if let Some(height) = args.height {
        config.frame_height = height;
    }
    if let Some(color) = &args.frame_color {
        config.source_color = color.parse().map_err(anyhow::Error::msg)?;
    }
    if args.video_loop {
        config.video_loop = true;
    }
    if args.no_loop {
        config.video_loop = false;
    }
    if args.bus == "zmq" {
        anyhow::bail!("the zmq transport needs a build with the ivis-bus `zmq` feature");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => IngestConfig::load(path.display().to_string())?,
        None => IngestConfig::defaults(),
    };
    config.overlay_env()?;
    apply_args(&mut config, &args)?;
    info!(config = %config.summary(), "ingestion configured");

    let runtime = Runtime::install()?;
    let mut engine = IngestEngine::new(config)?;
    let feedback = engine.start_adaptive_feedback(runtime.clone());

    let outcome = engine.run(&runtime);
    runtime.request_stop();
    if let Some(handle) = feedback {
        let _ = handle.join();
    }
    outcome?;
    Ok(())
}
