use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenvy::dotenv;
use remote_rpa::recorder::{
    DEFAULT_BUFFER_SECONDS, DEFAULT_FPS, ForegroundBrowser, Recorder, RecorderConfig,
    default_recordings_dir,
};
use remote_rpa::screen::XcapScreen;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Records screen frames and input events. Escape starts and stops a session.
#[derive(Debug, Parser)]
#[command(name = "recorder", version)]
struct Args {
    /// Parent directory for `recording_<timestamp>` sessions.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// How much recent history the frame buffer keeps.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SECONDS)]
    buffer_seconds: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    remote_rpa::init_tracing();
    let args = Args::parse();

    let output_dir = args.output_dir.unwrap_or_else(default_recordings_dir);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let config = RecorderConfig::new(&output_dir, args.fps, args.buffer_seconds);
    let recorder = Arc::new(Recorder::new(
        config,
        Arc::new(XcapScreen),
        Arc::new(ForegroundBrowser),
    ));

    info!("=== Task Recorder ===");
    info!("Press ESC to start recording, ESC again to stop");
    info!("Press Ctrl+C in the terminal to exit");
    info!(output = %output_dir.display(), "sessions are saved here");

    let (failed_tx, failed_rx) = tokio::sync::oneshot::channel();
    {
        let recorder = Arc::clone(&recorder);
        std::thread::Builder::new()
            .name("input-listener".into())
            .spawn(move || {
                if let Err(e) = rdev::listen(move |event| recorder.handle(&event)) {
                    let _ = failed_tx.send(format!("{e:?}"));
                }
            })
            .context("failed to start the input listener")?;
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to wait for Ctrl+C")?;
            info!("Program terminated by user");
        }
        Ok(reason) = failed_rx => {
            error!("input listener stopped: {reason}");
            recorder.stop()?;
            return Err(anyhow!("input listener failed: {reason}"));
        }
    }

    if let Some(metadata) = recorder.stop()? {
        info!(
            events = metadata.total_events,
            frames = metadata.total_frames,
            "final session saved"
        );
    }
    Ok(())
}
