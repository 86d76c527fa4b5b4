use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ivis_core::Runtime;
use view_config::ViewConfig;
use view_engine::LiveView;

/// Live view service: correlates frames with results and serves the
/// annotated MJPEG stream.
#[derive(Parser, Debug)]
#[command(name = "liveview")]
struct Args {
    /// Optional TOML config file; env overlays it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bus transport
    #[arg(long, value_parser = ["tcp", "zmq"], default_value = "tcp")]
    bus: String,
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
        Some(path) => ViewConfig::load(path.display().to_string())?,
        None => ViewConfig::defaults(),
    };
    config.overlay_env()?;
    info!(stream = %config.mjpeg_bind, "live view configured");

    let runtime = Runtime::install()?;
    let view = LiveView::new(config);
    view.run(&runtime)?;
    Ok(())
}
