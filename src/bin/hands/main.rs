use anyhow::{Context, Result, bail};
use clap::Parser;
use dotenvy::dotenv;
use remote_rpa::executor::DEFAULT_MAX_CONSECUTIVE_ERRORS;
use remote_rpa::hands::{self, InputDriver, Key, RdevInput};
use remote_rpa::screen::XcapScreen;
use remote_rpa::{Executor, ExecutorOptions, LoopExit, Poller, RemoteConfig, ScpChannel, TokioSleeper};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Time for the browser to load the page before going fullscreen.
const PAGE_LOAD_DELAY: Duration = Duration::from_secs(15);

/// Executes the remote brain's decisions on this machine.
#[derive(Debug, Parser)]
#[command(name = "hands", version)]
struct Args {
    /// Goal for the brain. Prompted for on stdin when omitted.
    #[arg(long)]
    task: Option<String>,

    /// Page to open fullscreen before the first screenshot.
    #[arg(long)]
    url: Option<String>,

    /// Interval between existence checks on the remote side.
    #[arg(long, default_value_t = 1000)]
    poll_ms: u64,

    /// Stop after this many steps. Runs until interrupted by default.
    #[arg(long)]
    max_steps: Option<u64>,

    /// Give up after this many failed brain steps in a row.
    #[arg(long, default_value_t = DEFAULT_MAX_CONSECUTIVE_ERRORS)]
    max_consecutive_errors: u32,
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    remote_rpa::init_tracing();
    let args = Args::parse();

    let config = RemoteConfig::from_env().context("remote configuration is incomplete")?;

    let task = match args.task {
        Some(task) => task,
        None => prompt("Please enter a task: ")?,
    };
    if task.is_empty() {
        bail!("task must not be empty");
    }

    let input = Arc::new(RdevInput);
    if let Some(url) = &args.url {
        info!(%url, "opening page");
        hands::open_in_browser(url)?;
        tokio::time::sleep(PAGE_LOAD_DELAY).await;
        input.press_key(Key::FullScreen)?;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing the current wait");
                cancel.cancel();
            }
        });
    }

    let channel = Arc::new(ScpChannel::new(&config.remote_user, &config.remote_host));
    let poller = Poller::new(Duration::from_millis(args.poll_ms), Arc::new(TokioSleeper))
        .with_cancellation(cancel);
    let options = ExecutorOptions {
        max_steps: args.max_steps,
        max_consecutive_errors: args.max_consecutive_errors,
        ..ExecutorOptions::default()
    };

    info!(remote = %format!("{}@{}", config.remote_user, config.remote_host), "starting executor");
    let mut executor = Executor::new(config, channel, input, Arc::new(XcapScreen), poller, options);
    match executor.run(&task).await? {
        LoopExit::Cancelled { steps } => info!(steps, "stopped by user"),
        LoopExit::StepLimit { steps } => info!(steps, "step limit reached"),
    }
    Ok(())
}
