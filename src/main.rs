use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use framerelay::config::{ProcessorKind, SinkConfig};
use framerelay::{FrameRelay, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay streamed video frames through a processing pipeline")]
struct Args {
    #[arg(short, long, env = "FRAMERELAY_CONFIG", help = "YAML configuration file")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Listen address, e.g. 0.0.0.0:6789")]
    listen: Option<SocketAddr>,

    #[arg(short, long, help = "Concurrent decodes across all sessions")]
    workers: Option<usize>,

    #[arg(short, long, value_parser = parse_processor, help = "passthrough or features")]
    processor: Option<ProcessorKind>,

    #[arg(long, help = "Write the latest frame to this image file")]
    snapshot: Option<PathBuf>,

    #[arg(long, help = "Throughput window in milliseconds")]
    metrics_window_ms: Option<u64>,

    #[arg(long, help = "Do not draw the throughput gauge")]
    no_overlay: bool,
}

fn parse_processor(value: &str) -> Result<ProcessorKind, String> {
    match value {
        "passthrough" => Ok(ProcessorKind::Passthrough),
        "features" => Ok(ProcessorKind::Features),
        "pose" => Err("the pose processor needs a host-supplied model".into()),
        other => Err(format!("unknown processor '{}'", other)),
    }
}

impl Args {
    fn into_config(self) -> Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RelayConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(workers) = self.workers {
            config.decode_workers = workers;
        }
        if let Some(kind) = self.processor {
            config.processor.kind = kind;
        }
        if let Some(path) = self.snapshot {
            config.sink = SinkConfig::Snapshot { path };
        }
        if let Some(window) = self.metrics_window_ms {
            config.metrics_window_ms = window;
        }
        if self.no_overlay {
            config.overlay_metrics = false;
        }

        config.validate()?;
        Ok(config)
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("framerelay=info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let relay = FrameRelay::start(config).await.context("starting relay")?;
    info!("Send frames to ws://{}", relay.local_addr());

    shutdown_signal().await?;
    let stats = relay.stats();
    relay.shutdown().await?;
    info!(
        sessions = stats.sessions_accepted,
        received = stats.frames_received,
        rendered = stats.frames_rendered,
        dropped = stats.frames_dropped,
        "Relay shut down"
    );
    Ok(())
}
