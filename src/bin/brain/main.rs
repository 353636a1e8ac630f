use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use remote_rpa::artifact::TASK_FILE;
use remote_rpa::perception::OmniParserClient;
use remote_rpa::planner::{AnthropicPlanner, DEFAULT_MODEL};
use remote_rpa::{BrainLoop, BrainOptions, BrainPaths, LoopExit, Poller, TokioSleeper};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Watches for screenshots, parses them and decides the next UI action.
#[derive(Debug, Parser)]
#[command(name = "brain", version)]
struct Args {
    /// Where the hands machine drops `screenshot_<i>.png`.
    #[arg(long, default_value = "imgs")]
    images_dir: PathBuf,

    /// Where `result_<i>.json` and labeled screenshots are written.
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    #[arg(long, default_value = TASK_FILE)]
    task_file: PathBuf,

    /// Screen parsing service endpoint.
    #[arg(long, env = "PERCEPTION_URL", default_value = "http://127.0.0.1:8000/parse")]
    perception_url: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Only show the planner this many previous steps.
    #[arg(long)]
    history_window: Option<usize>,

    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,

    #[arg(long)]
    max_steps: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    remote_rpa::init_tracing();
    let args = Args::parse();

    let planner = AnthropicPlanner::from_env(&args.model).context("planner is not configured")?;
    let perceiver = OmniParserClient::new(&args.perception_url);

    for dir in [&args.images_dir, &args.results_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted");
                cancel.cancel();
            }
        });
    }

    let paths = BrainPaths {
        images_dir: args.images_dir,
        results_dir: args.results_dir,
        task_file: args.task_file,
    };
    let poller = Poller::new(Duration::from_millis(args.poll_ms), Arc::new(TokioSleeper))
        .with_cancellation(cancel);
    let options = BrainOptions {
        max_steps: args.max_steps,
        history_window: args.history_window,
        ..BrainOptions::default()
    };

    info!(model = %args.model, perception = %args.perception_url, "brain ready");
    let brain = BrainLoop::new(paths, Arc::new(perceiver), Arc::new(planner), poller, options);
    match brain.run().await? {
        LoopExit::Cancelled { steps } => info!(steps, "stopped by user"),
        LoopExit::StepLimit { steps } => info!(steps, "step limit reached"),
    }
    Ok(())
}
