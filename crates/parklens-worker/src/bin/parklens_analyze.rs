//! Analyze one dashcam video with Gemini and write `analysis_<video>.json`
//! into the current directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use parklens_models::{GpsPoint, DEFAULT_END_OFFSET_DEG};
use parklens_worker::config::DEFAULT_GEMINI_MODEL;
use parklens_worker::{GeminiClient, GeminiRunner};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "parklens-analyze", about = "ParkLens Gemini video analyzer")]
struct Args {
    /// Path to the video file
    #[arg(long)]
    video: PathBuf,

    /// Gemini model version
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    model: String,

    /// Skip video optimization (FPS reduction)
    #[arg(long)]
    no_optimize: bool,

    /// Start GPS coordinates 'lat,lon'
    #[arg(long, alias = "start_gps", allow_hyphen_values = true)]
    start_gps: Option<GpsPoint>,

    /// End GPS coordinates 'lat,lon'; derived from the start when omitted
    #[arg(long, alias = "end_gps", allow_hyphen_values = true)]
    end_gps: Option<GpsPoint>,

    /// Prompt template
    #[arg(long, env = "PROMPT_FILE", default_value = "gemini_prompt.md")]
    prompt_file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    let gps = match (args.start_gps, args.end_gps) {
        (Some(start), Some(end)) => Some((start, end)),
        (Some(start), None) => Some((start, start.offset(DEFAULT_END_OFFSET_DEG))),
        (None, Some(_)) => {
            warn!("--end-gps given without --start-gps; telemetry disabled");
            None
        }
        (None, None) => None,
    };

    let client = GeminiClient::from_env()?;
    let runner = GeminiRunner::new(client, args.model, args.prompt_file)
        .with_optimize(!args.no_optimize);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling analysis");
            cancel_tx.send_replace(true);
        }
    });

    let work_dir = std::env::current_dir().context("cannot resolve current directory")?;
    info!("Analyzing {} with {}", args.video.display(), runner.model());

    let outcome = runner
        .analyze(&args.video, &work_dir, gps, cancel_rx)
        .await
        .with_context(|| format!("analysis of {} failed", args.video.display()))?;

    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    Ok(())
}

/// Logs go to stderr so stdout carries only the result.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parklens=info,parklens_worker=info,parklens_media=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false),
            )
            .with(env_filter)
            .init();
    }
}
