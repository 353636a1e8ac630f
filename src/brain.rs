//! The brain side of the loop: perceive, plan, resolve, emit.
//!
//! Every step index produces exactly one `result_<i>.json`, either a resolved
//! decision or an explicit error, always preceded by
//! `labeled_screenshot_<i>.png`. The executor can therefore pull both files as
//! soon as the result exists.

use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::{self, ArtifactError, TASK_FILE};
use crate::context::TaskContext;
use crate::perception::{self, Perceiver};
use crate::planner::{self, Planner};
use crate::poller::{PollError, Poller};
use crate::screen;
use crate::types::{LoopExit, StepOutcome, TaskSpec};

pub const DEFAULT_SETTLE: Duration = Duration::from_secs(3);

/// Directories the brain watches and writes, all on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrainPaths {
    pub images_dir: PathBuf,
    pub results_dir: PathBuf,
    pub task_file: PathBuf,
}

impl Default for BrainPaths {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("imgs"),
            results_dir: PathBuf::from("results"),
            task_file: PathBuf::from(TASK_FILE),
        }
    }
}

impl BrainPaths {
    pub fn screenshot(&self, step: u64) -> PathBuf {
        self.images_dir.join(artifact::screenshot_name(step))
    }

    pub fn result(&self, step: u64) -> PathBuf {
        self.results_dir.join(artifact::result_name(step))
    }

    pub fn labeled(&self, step: u64) -> PathBuf {
        self.results_dir.join(artifact::labeled_screenshot_name(step))
    }
}

#[derive(Debug, Error)]
pub enum BrainError {
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrainOptions {
    /// Delay between seeing a screenshot and reading it.
    pub settle: Duration,
    pub max_steps: Option<u64>,
    /// Render only this many past steps into the planner prompt.
    pub history_window: Option<usize>,
}

impl Default for BrainOptions {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            max_steps: None,
            history_window: None,
        }
    }
}

pub struct BrainLoop {
    paths: BrainPaths,
    perceiver: Arc<dyn Perceiver>,
    planner: Arc<dyn Planner>,
    poller: Poller,
    options: BrainOptions,
}

impl BrainLoop {
    pub fn new(
        paths: BrainPaths,
        perceiver: Arc<dyn Perceiver>,
        planner: Arc<dyn Planner>,
        poller: Poller,
        options: BrainOptions,
    ) -> Self {
        Self {
            paths,
            perceiver,
            planner,
            poller,
            options,
        }
    }

    pub async fn run(&self) -> Result<LoopExit, BrainError> {
        let mut context = match self.await_task().await {
            Ok(context) => context,
            Err(BrainError::Poll(PollError::Cancelled)) => {
                return Ok(LoopExit::Cancelled { steps: 0 });
            }
            Err(e) => return Err(e),
        };

        let mut step = 0;
        loop {
            if let Some(max) = self.options.max_steps {
                if step >= max {
                    info!(steps = step, "step limit reached");
                    return Ok(LoopExit::StepLimit { steps: step });
                }
            }
            match self.run_step(step, &mut context).await {
                Ok(_) => step += 1,
                Err(BrainError::Poll(PollError::Cancelled)) => {
                    info!(steps = step, "brain cancelled");
                    return Ok(LoopExit::Cancelled { steps: step });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait for `task.json` and parse it once.
    pub async fn await_task(&self) -> Result<TaskContext, BrainError> {
        let path = self.paths.task_file.as_path();
        info!("Waiting for {} to be available...", path.display());
        self.poller
            .until(&path.display().to_string(), move || file_exists(path))
            .await?;
        let spec: TaskSpec = artifact::read_json(path)?;
        info!(task = %spec.task, "task received");
        Ok(TaskContext::new(spec.task).with_window(self.options.history_window))
    }

    /// Wait for screenshot `step`, decide, and emit the outcome.
    pub async fn run_step(
        &self,
        step: u64,
        context: &mut TaskContext,
    ) -> Result<StepOutcome, BrainError> {
        let screenshot = self.paths.screenshot(step);
        let target = screenshot.as_path();
        self.poller
            .until(&screenshot.display().to_string(), move || file_exists(target))
            .await?;
        self.poller.pause(self.options.settle).await?;

        let outcome = self.decide(step, context).await?;
        artifact::write_json_atomic(&self.paths.result(step), &outcome)?;
        match &outcome {
            StepOutcome::Decision(decision) => info!(step, "decided: {}", decision.summary()),
            StepOutcome::Error { reason } => warn!(step, "step failed: {reason}"),
        }
        context.record(step, outcome.summary());
        Ok(outcome)
    }

    /// Perceive, plan and resolve. Only local I/O on our own output is fatal;
    /// every other failure becomes an error outcome.
    async fn decide(&self, step: u64, context: &TaskContext) -> Result<StepOutcome, BrainError> {
        let labeled = self.paths.labeled(step);
        let png = match artifact::read_bytes(&self.paths.screenshot(step)) {
            Ok(png) => png,
            Err(e) => {
                artifact::write_atomic(&labeled, &placeholder_png())?;
                return Ok(StepOutcome::error(format!("unreadable screenshot: {e}")));
            }
        };

        let perception = match self.perceiver.perceive(&png).await {
            Ok(perception) => perception,
            Err(e) => {
                artifact::write_atomic(&labeled, &png)?;
                return Ok(StepOutcome::error(format!("perception failed: {e}")));
            }
        };
        let annotated = match perception.annotated_png {
            Some(annotated) => annotated,
            None => perception::annotate(&png, &perception.elements).unwrap_or_else(|e| {
                warn!(step, "could not annotate screenshot: {e}");
                png.clone()
            }),
        };
        artifact::write_atomic(&labeled, &annotated)?;
        info!(step, elements = perception.elements.len(), "screen parsed");

        let reply = match self
            .planner
            .plan(&context.render(), &perception.elements.prompt_block())
            .await
        {
            Ok(reply) => reply,
            Err(e) => return Ok(StepOutcome::error(format!("planner failed: {e}"))),
        };
        let planned = match planner::parse_reply(&reply) {
            Ok(planned) => planned,
            Err(e) => return Ok(StepOutcome::error(e.to_string())),
        };
        match perception.elements.resolve(&planned.element) {
            Ok(bbox) => Ok(StepOutcome::Decision(planned.into_decision(bbox))),
            Err(e) => Ok(StepOutcome::error(e.to_string())),
        }
    }
}

/// Stands in for the labeled image when there is no screenshot to label.
fn placeholder_png() -> Vec<u8> {
    screen::encode_png(&RgbaImage::new(1, 1)).unwrap_or_default()
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
