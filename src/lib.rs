//! Closed-loop remote UI automation over a file transfer channel, plus a
//! standalone screen and input recorder.
//!
//! The `hands` binary runs on the machine being automated: it captures the
//! screen, pushes screenshots, waits for decisions and injects input. The
//! `brain` binary runs where the models live: it waits for screenshots,
//! perceives and plans, and writes one decision per step. The two only share
//! files named by step index.

pub mod artifact;
pub mod brain;
pub mod channel;
pub mod config;
pub mod context;
pub mod elements;
pub mod executor;
pub mod hands;
pub mod perception;
pub mod planner;
pub mod poller;
pub mod recorder;
pub mod screen;
pub mod types;

pub use brain::{BrainLoop, BrainOptions, BrainPaths};
pub use channel::{LocalChannel, ScpChannel, TransferChannel};
pub use config::RemoteConfig;
pub use executor::{Executor, ExecutorOptions};
pub use poller::{Attempts, Poller, TokioSleeper};
pub use types::{Action, BoundingBox, Decision, LoopExit, StepOutcome, TaskSpec};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
