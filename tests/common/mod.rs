#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use remote_rpa::channel::{LocalChannel, TransferChannel, TransferError};
use remote_rpa::config::RemoteConfig;
use remote_rpa::elements::ElementSet;
use remote_rpa::executor::{ExecutorOptions, Pacing};
use remote_rpa::hands::{InputDriver, InputError, Key};
use remote_rpa::perception::{Perceiver, Perception, PerceptionError};
use remote_rpa::planner::{PlanError, Planner};
use remote_rpa::poller::{Poller, Sleeper};
use remote_rpa::screen::{CaptureError, ScreenCapture};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const POLL: Duration = Duration::from_millis(250);

/// Chronological record of everything the fakes observed.
#[derive(Clone, Default)]
pub struct OpLog(Arc<Mutex<Vec<String>>>);

impl OpLog {
    pub fn push(&self, op: impl Into<String>) {
        self.0.lock().unwrap().push(op.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }

    pub fn count(&self, op: &str) -> usize {
        self.ops().iter().filter(|o| o.as_str() == op).count()
    }
}

/// Sleeper that returns immediately, remembers every requested duration and
/// optionally fires a cancellation token on its `n`th call.
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    pub fn cancelling_after(calls: usize, token: CancellationToken) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            cancel_after: Some((calls, token)),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let calls = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        if let Some((limit, token)) = &self.cancel_after {
            if calls >= *limit {
                token.cancel();
            }
        }
        // Lets a concurrently joined loop make progress.
        tokio::task::yield_now().await;
    }
}

pub fn poller(sleeper: Arc<RecordingSleeper>, cancel: CancellationToken) -> Poller {
    Poller::new(POLL, sleeper).with_cancellation(cancel)
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputCall {
    Click(f64, f64),
    Type(String),
    Press(Key),
}

pub struct FakeInput {
    calls: Mutex<Vec<InputCall>>,
    log: OpLog,
}

impl FakeInput {
    pub fn new(log: OpLog) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            log,
        }
    }

    pub fn calls(&self) -> Vec<InputCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl InputDriver for FakeInput {
    fn click(&self, x: f64, y: f64) -> Result<(), InputError> {
        self.log.push(format!("click {x},{y}"));
        self.calls.lock().unwrap().push(InputCall::Click(x, y));
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), InputError> {
        self.log.push(format!("type {text}"));
        self.calls
            .lock()
            .unwrap()
            .push(InputCall::Type(text.to_string()));
        Ok(())
    }

    fn press_key(&self, key: Key) -> Result<(), InputError> {
        self.log.push(format!("press {key:?}"));
        self.calls.lock().unwrap().push(InputCall::Press(key));
        Ok(())
    }
}

/// Solid-colour 8x8 screen.
pub struct FakeScreen;

impl ScreenCapture for FakeScreen {
    fn grab(&self) -> Result<RgbaImage, CaptureError> {
        Ok(RgbaImage::from_pixel(8, 8, Rgba([30, 30, 30, 255])))
    }
}

pub fn png_bytes() -> Vec<u8> {
    remote_rpa::screen::encode_png(&FakeScreen.grab().unwrap()).unwrap()
}

/// [`LocalChannel`] that logs each operation by file name, and can be told
/// to fail a number of pulls.
pub struct LoggingChannel {
    inner: LocalChannel,
    log: OpLog,
    failing_pulls: AtomicUsize,
}

impl LoggingChannel {
    pub fn new(log: OpLog) -> Self {
        Self {
            inner: LocalChannel,
            log,
            failing_pulls: AtomicUsize::new(0),
        }
    }

    pub fn failing_pulls(self, count: usize) -> Self {
        self.failing_pulls.store(count, Ordering::SeqCst);
        self
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl TransferChannel for LoggingChannel {
    async fn push(&self, local: &Path, remote: &str) -> Result<(), TransferError> {
        self.log.push(format!("push {}", file_name(remote)));
        self.inner.push(local, remote).await
    }

    async fn exists(&self, remote: &str) -> bool {
        self.log.push(format!("exists {}", file_name(remote)));
        self.inner.exists(remote).await
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), TransferError> {
        self.log.push(format!("pull {}", file_name(remote)));
        let failing = self.failing_pulls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_pulls.store(failing - 1, Ordering::SeqCst);
            return Err(TransferError::Failed {
                command: format!("scp {remote}"),
                status: "exit status: 1".into(),
                stderr: "connection reset".into(),
            });
        }
        self.inner.pull(remote, local).await
    }
}

/// Both sides of the exchange inside one temp dir: `brain/` plays the remote
/// machine and `hands/` the local one.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["brain/imgs", "brain/results", "hands/imgs", "hands/results"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        Self { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn remote(&self, rel: &str) -> String {
        self.path(rel).to_str().unwrap().to_string()
    }

    pub fn config(&self) -> RemoteConfig {
        RemoteConfig {
            remote_user: "gpu".into(),
            remote_host: "brain.local".into(),
            img_remote_base: self.remote("brain/imgs"),
            img_local_base: self.path("hands/imgs"),
            results_remote_base: self.remote("brain/results"),
            results_local_base: self.path("hands/results"),
            task_remote_base: self.remote("brain"),
            task_local_path: self.path("hands/task.json"),
        }
    }

    pub fn brain_paths(&self) -> remote_rpa::BrainPaths {
        remote_rpa::BrainPaths {
            images_dir: self.path("brain/imgs"),
            results_dir: self.path("brain/results"),
            task_file: self.path("brain/task.json"),
        }
    }

    /// Place `result_<step>.json` and its labeled screenshot on the brain side.
    pub fn publish_result(&self, step: u64, json: serde_json::Value) {
        std::fs::write(
            self.path(&format!("brain/results/labeled_screenshot_{step}.png")),
            png_bytes(),
        )
        .unwrap();
        std::fs::write(
            self.path(&format!("brain/results/result_{step}.json")),
            serde_json::to_vec(&json).unwrap(),
        )
        .unwrap();
    }
}

/// No settle delays, so the recorded sleeps are only poll intervals.
pub fn instant_options(max_steps: Option<u64>) -> ExecutorOptions {
    ExecutorOptions {
        pacing: Pacing {
            after_click: Duration::ZERO,
            wait_action: Duration::from_secs(5),
            before_capture: Duration::ZERO,
            after_capture: Duration::ZERO,
        },
        max_steps,
        ..ExecutorOptions::default()
    }
}

/// Planner that replays canned replies and remembers each task prompt.
pub struct ScriptedPlanner {
    replies: Mutex<VecDeque<String>>,
    tasks: Mutex<Vec<String>>,
}

impl ScriptedPlanner {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Vec<String> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, task: &str, _elements: &str) -> Result<String, PlanError> {
        self.tasks.lock().unwrap().push(task.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(PlanError::EmptyReply)
    }
}

/// Perceiver that sees the same elements on every screenshot.
pub struct StaticPerceiver {
    elements: ElementSet,
}

impl StaticPerceiver {
    pub fn new(elements: ElementSet) -> Self {
        Self { elements }
    }
}

#[async_trait]
impl Perceiver for StaticPerceiver {
    async fn perceive(&self, _screenshot_png: &[u8]) -> Result<Perception, PerceptionError> {
        Ok(Perception {
            elements: self.elements.clone(),
            annotated_png: None,
        })
    }
}

pub fn planner_reply(action: &str, element: &str, details: &str) -> String {
    format!(
        "{{\n    \"ACTION\": \"{action}\",\n    \"ELEMENT\": \"{element}\",\n    \"DETAILS\": \"{details}\"\n}}"
    )
}
