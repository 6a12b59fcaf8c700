//! posture-monitor: periodic posture checks against a vision model.
//!
//! Usage:
//!   posture-monitor watch --frame /tmp/webcam.jpg
//!   posture-monitor check --image snapshot.png
//!   echo '```json {"posture":"bad"} ```' | posture-monitor extract

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use posture_monitor::config::Config;
use posture_monitor::feedback::{ChannelSink, ConsoleRenderer, FeedbackPresenter};
use posture_monitor::frame::{FileFrameSource, StaticFrameSource};
use posture_monitor::http::{self, ControlState};
use posture_monitor::monitor::{CheckOutcome, Monitor};
use posture_monitor::{GeminiVisionClient, extract_verdict};

#[derive(Parser)]
#[command(name = "posture-monitor")]
#[command(about = "Periodic webcam posture checks via a vision model", long_about = None)]
struct Cli {
    /// Disable ANSI colors in log output
    #[arg(long, global = true)]
    no_ansi: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the latest captured frame on a timer until Ctrl-C (default)
    Watch {
        /// Milliseconds between checks
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Still image kept fresh by an external capture process
        #[arg(long)]
        frame: Option<PathBuf>,
        /// Expose the local control surface on this address
        #[arg(long)]
        http_bind: Option<SocketAddr>,
    },
    /// Run one check against an image file and print the verdict as JSON
    Check {
        #[arg(long)]
        image: PathBuf,
    },
    /// Run only verdict extraction on TEXT (reads stdin when omitted)
    Extract { text: Option<String> },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    init_tracing(&config, cli.no_ansi);

    let command = cli.command.unwrap_or(Commands::Watch {
        interval_ms: None,
        frame: None,
        http_bind: None,
    });
    match command {
        Commands::Watch {
            interval_ms,
            frame,
            http_bind,
        } => watch(config, interval_ms, frame, http_bind).await,
        Commands::Check { image } => check_once(config, image).await,
        Commands::Extract { text } => extract(text),
    }
}

fn init_tracing(config: &Config, no_ansi: bool) {
    let filter = EnvFilter::try_new(&config.runtime.log_level)
        .unwrap_or_else(|_| EnvFilter::new("posture_monitor=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!no_ansi)
        .with_writer(std::io::stderr)
        .init();
}

fn log_credential(config: &Config) {
    match config.runtime.gemini_api_key.as_deref() {
        Some(key) => info!("GEMINI_API_KEY loaded (length: {})", key.len()),
        None => warn!("GEMINI_API_KEY missing; every check will report a credential error"),
    }
}

async fn watch(
    config: Config,
    interval_ms: Option<u64>,
    frame: Option<PathBuf>,
    http_bind: Option<SocketAddr>,
) -> Result<()> {
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.monitor.check_interval());
    let frame_path = frame.unwrap_or_else(|| config.camera.frame_path.clone());
    log_credential(&config);
    info!(
        "Model {} | frame {} | feedback shown for {}s",
        config.inference.model,
        frame_path.display(),
        config.monitor.feedback_display().as_secs()
    );

    let frames = Arc::new(FileFrameSource::new(frame_path, config.camera.max_frame_age()));
    let client = Arc::new(GeminiVisionClient::from_config(&config)?);
    let (sink, rx) = ChannelSink::new();
    let presenter = tokio::spawn(
        FeedbackPresenter::new(ConsoleRenderer::stdout(), config.monitor.feedback_display()).run(rx),
    );

    let monitor = Arc::new(
        Monitor::builder(frames, client, Arc::new(sink))
            .check_timeout(config.monitor.check_timeout())
            .build(),
    );

    let mut status_rx = monitor.subscribe_status();
    let status_log = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            debug!("Monitor status: {:?}", status);
        }
    });

    monitor.start(interval)?;

    let shutdown = CancellationToken::new();
    let control = http_bind.or(config.control.http_bind).map(|addr| {
        let state = ControlState {
            monitor: monitor.clone(),
            default_interval: interval,
        };
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(addr, state, token).await {
                error!("Control surface stopped: {}", e);
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    monitor.stop();
    shutdown.cancel();
    if let Some(handle) = control {
        let _ = handle.await;
    }
    status_log.abort();
    presenter.abort();
    Ok(())
}

async fn check_once(config: Config, image: PathBuf) -> Result<()> {
    log_credential(&config);
    let frames = Arc::new(StaticFrameSource::from_path(&image)?);
    let client = Arc::new(GeminiVisionClient::from_config(&config)?);
    let (sink, _rx) = ChannelSink::new();
    let monitor = Monitor::builder(frames, client, Arc::new(sink))
        .check_timeout(config.monitor.check_timeout())
        .build();

    match monitor.run_one_check().await {
        CheckOutcome::Completed(verdict) => {
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        CheckOutcome::Skipped => anyhow::bail!("check skipped: another check is in flight"),
    }
}

fn extract(text: Option<String>) -> Result<()> {
    let text = match text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let extracted = extract_verdict(&text)?;
    println!("{}", serde_json::to_string_pretty(&extracted)?);
    Ok(())
}
