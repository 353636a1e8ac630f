//! The hands side of the loop.
//!
//! ```text
//! seed ─▶ AwaitDecision(i) ─▶ Download(i) ─▶ Act(i) ─▶ Capture(i+1) ─▶ AwaitDecision(i+1)
//!              ▲                   │ pull failed
//!              └───────────────────┘
//! ```
//!
//! Exactly one step is in flight at any time: artifact `i + 1` is never
//! probed before artifact `i` has been downloaded and acted on.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifact::{self, ArtifactError};
use crate::channel::{TransferChannel, TransferError};
use crate::config::RemoteConfig;
use crate::hands::{InputDriver, InputError, Key};
use crate::poller::{PollError, Poller};
use crate::screen::{self, CaptureError, ScreenCapture};
use crate::types::{Action, Decision, LoopExit, StepOutcome, TaskSpec};

pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Fixed delays that give the UI time to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub after_click: Duration,
    pub wait_action: Duration,
    pub before_capture: Duration,
    pub after_capture: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            after_click: Duration::from_secs(1),
            wait_action: Duration::from_secs(5),
            before_capture: Duration::from_secs(1),
            after_capture: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub pacing: Pacing,
    /// Stop after this many completed steps.
    pub max_steps: Option<u64>,
    /// Abort once this many error outcomes arrive in a row.
    pub max_consecutive_errors: u32,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            pacing: Pacing::default(),
            max_steps: None,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("failed to publish {what}: {source}")]
    Publish {
        what: String,
        #[source]
        source: TransferError,
    },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("brain reported {count} failed steps in a row; last: {last_reason}")]
    TooManyErrors { count: u32, last_reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorState {
    AwaitDecision(u64),
    Download(u64),
    Act(u64, StepOutcome),
    Capture(u64),
    Finished(LoopExit),
}

pub struct Executor {
    config: RemoteConfig,
    channel: Arc<dyn TransferChannel>,
    input: Arc<dyn InputDriver>,
    screen: Arc<dyn ScreenCapture>,
    poller: Poller,
    options: ExecutorOptions,
    completed: u64,
    consecutive_errors: u32,
}

impl Executor {
    pub fn new(
        config: RemoteConfig,
        channel: Arc<dyn TransferChannel>,
        input: Arc<dyn InputDriver>,
        screen: Arc<dyn ScreenCapture>,
        poller: Poller,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            config,
            channel,
            input,
            screen,
            poller,
            options,
            completed: 0,
            consecutive_errors: 0,
        }
    }

    /// Number of steps fully acted on so far.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Publish the task and the first screenshot, then drive the loop.
    pub async fn run(&mut self, task: &str) -> Result<LoopExit, ExecutorError> {
        match self.seed(task).await {
            Ok(()) => {}
            Err(ExecutorError::Poll(PollError::Cancelled)) => {
                return Ok(LoopExit::Cancelled { steps: 0 });
            }
            Err(e) => return Err(e),
        }
        self.drive(ExecutorState::AwaitDecision(0)).await
    }

    pub async fn seed(&mut self, task: &str) -> Result<(), ExecutorError> {
        let local = self.config.task_local_path.clone();
        artifact::write_json_atomic(
            &local,
            &TaskSpec {
                task: task.to_string(),
            },
        )?;
        info!(path = %local.display(), "task saved");
        self.publish("task", &local, &self.config.remote_task())
            .await?;
        self.capture(0).await
    }

    /// Run the state machine from `state` until it finishes.
    pub async fn drive(&mut self, mut state: ExecutorState) -> Result<LoopExit, ExecutorError> {
        loop {
            state = match self.advance(state).await {
                Ok(ExecutorState::Finished(exit)) => return Ok(exit),
                Ok(next) => next,
                Err(ExecutorError::Poll(PollError::Cancelled)) => {
                    info!(steps = self.completed, "executor cancelled");
                    return Ok(LoopExit::Cancelled {
                        steps: self.completed,
                    });
                }
                Err(e) => return Err(e),
            };
        }
    }

    /// Perform one transition.
    pub async fn advance(&mut self, state: ExecutorState) -> Result<ExecutorState, ExecutorError> {
        match state {
            ExecutorState::AwaitDecision(step) => {
                let remote = self.config.remote_result(step);
                info!(step, "waiting for {remote}");
                let channel = &self.channel;
                self.poller
                    .until(&remote, || channel.exists(&remote))
                    .await?;
                Ok(ExecutorState::Download(step))
            }
            ExecutorState::Download(step) => self.download(step).await,
            ExecutorState::Act(step, outcome) => {
                self.act(step, &outcome).await?;
                self.completed = step + 1;
                match self.options.max_steps {
                    Some(max) if self.completed >= max => {
                        info!(steps = self.completed, "step limit reached");
                        Ok(ExecutorState::Finished(LoopExit::StepLimit {
                            steps: self.completed,
                        }))
                    }
                    _ => Ok(ExecutorState::Capture(step + 1)),
                }
            }
            ExecutorState::Capture(step) => {
                self.capture(step).await?;
                Ok(ExecutorState::AwaitDecision(step))
            }
            ExecutorState::Finished(exit) => Ok(ExecutorState::Finished(exit)),
        }
    }

    async fn download(&mut self, step: u64) -> Result<ExecutorState, ExecutorError> {
        let result_remote = self.config.remote_result(step);
        let result_local = self.config.local_result(step);
        if let Err(e) = self.channel.pull(&result_remote, &result_local).await {
            warn!(step, "failed to download {result_remote}: {e}");
            self.poller.pause(self.poller.interval()).await?;
            return Ok(ExecutorState::AwaitDecision(step));
        }
        info!(step, "downloaded {}", result_local.display());

        let outcome = match artifact::read_json::<StepOutcome>(&result_local) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(step, "unreadable decision artifact: {e}");
                StepOutcome::error(format!("unreadable decision artifact: {e}"))
            }
        };

        // A decision is only acted on once its labeled screenshot is here too.
        // Error outcomes proceed without it.
        let labeled_remote = self.config.remote_labeled(step);
        let labeled_local = self.config.local_labeled(step);
        if let Err(e) = self.channel.pull(&labeled_remote, &labeled_local).await {
            match outcome {
                StepOutcome::Decision(_) => {
                    warn!(step, "failed to download {labeled_remote}: {e}");
                    self.poller.pause(self.poller.interval()).await?;
                    return Ok(ExecutorState::AwaitDecision(step));
                }
                StepOutcome::Error { .. } => {
                    warn!(step, "no labeled screenshot for failed step: {e}");
                }
            }
        }
        Ok(ExecutorState::Act(step, outcome))
    }

    async fn act(&mut self, step: u64, outcome: &StepOutcome) -> Result<(), ExecutorError> {
        match outcome {
            StepOutcome::Decision(decision) => {
                self.consecutive_errors = 0;
                if let Err(e) = self.perform(decision).await {
                    match e {
                        ExecutorError::Poll(_) => return Err(e),
                        other => error!(step, "action failed: {other}"),
                    }
                }
                Ok(())
            }
            StepOutcome::Error { reason } => {
                self.consecutive_errors += 1;
                warn!(
                    step,
                    consecutive = self.consecutive_errors,
                    "brain could not decide: {reason}"
                );
                if self.consecutive_errors >= self.options.max_consecutive_errors {
                    return Err(ExecutorError::TooManyErrors {
                        count: self.consecutive_errors,
                        last_reason: reason.clone(),
                    });
                }
                Ok(())
            }
        }
    }

    async fn perform(&self, decision: &Decision) -> Result<(), ExecutorError> {
        let pacing = self.options.pacing;
        match (&decision.action, decision.coordinates) {
            (Action::Click, Some(bbox)) => {
                let (x, y) = bbox.center();
                self.input.click(x, y)?;
                self.poller.pause(pacing.after_click).await?;
            }
            (Action::Type, Some(bbox)) => {
                let (x, y) = bbox.center();
                self.input.click(x, y)?;
                info!("Typing {:?} at {:?}", decision.details, bbox);
                self.input.type_text(&decision.details)?;
                self.input.press_key(Key::Enter)?;
            }
            (Action::Wait, _) => {
                self.poller.pause(pacing.wait_action).await?;
            }
            (action, coordinates) => {
                warn!(
                    %action,
                    has_coordinates = coordinates.is_some(),
                    "Unsupported action or missing coordinates"
                );
            }
        }
        Ok(())
    }

    /// Capture `screenshot_<step>.png` and push it until the push succeeds.
    pub async fn capture(&mut self, step: u64) -> Result<(), ExecutorError> {
        let pacing = self.options.pacing;
        self.poller.pause(pacing.before_capture).await?;

        let local = self.config.local_screenshot(step);
        let image = self.screen.grab()?;
        screen::save_png(&image, &local)?;
        info!(step, path = %local.display(), "screenshot saved");

        self.poller.pause(pacing.after_capture).await?;
        self.publish("screenshot", &local, &self.config.remote_screenshot(step))
            .await
    }

    async fn publish(
        &self,
        what: &str,
        local: &Path,
        remote: &str,
    ) -> Result<(), ExecutorError> {
        let channel = &self.channel;
        let failure: Mutex<Option<TransferError>> = Mutex::new(None);
        let last_failure = &failure;
        let pushed = self
            .poller
            .until(remote, move || async move {
                match channel.push(local, remote).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("failed to push {what} to {remote}: {e}");
                        *last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                        false
                    }
                }
            })
            .await;

        match pushed {
            Ok(_) => {
                info!("{what} pushed to {remote}");
                Ok(())
            }
            Err(exhausted @ PollError::Exhausted { .. }) => {
                match failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
                    Some(source) => Err(ExecutorError::Publish {
                        what: what.to_string(),
                        source,
                    }),
                    None => Err(exhausted.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
