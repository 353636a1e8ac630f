//! The recorder: a frame thread feeding a ring buffer, plus input callbacks
//! that snapshot the newest frame and append events.
//!
//! Input arrives on the listener thread through [`Recorder::handle`] while
//! frames and URL changes arrive on the frame thread. Both only touch the
//! ring and the event log under their own locks.

use chrono::{DateTime, Local};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use super::browser::UrlProbe;
use super::events::{EventError, EventLog, MouseButton, PressState, RecordedEvent};
use super::ring::FrameRing;
use super::session::{DebugLog, SessionError, SessionLayout, SessionMetadata, SessionStore};
use crate::screen::{self, ScreenCapture};

pub const DEFAULT_FPS: u32 = 10;
pub const DEFAULT_BUFFER_SECONDS: u32 = 3;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error("could not start the frame thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Where sessions go and how densely frames are sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    pub frame_interval: Duration,
    pub buffer_capacity: usize,
}

impl RecorderConfig {
    /// `fps` frames per second, keeping the last `buffer_seconds` of them.
    pub fn new(output_dir: impl Into<PathBuf>, fps: u32, buffer_seconds: u32) -> Self {
        let fps = fps.max(1);
        Self {
            output_dir: output_dir.into(),
            frame_interval: Duration::from_secs(1) / fps,
            buffer_capacity: fps.saturating_mul(buffer_seconds.max(1)) as usize,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::new(default_recordings_dir(), DEFAULT_FPS, DEFAULT_BUFFER_SECONDS)
    }
}

pub fn default_recordings_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remote-rpa")
        .join("Recordings")
}

/// A captured screen image stamped with seconds since the session started.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub elapsed: f64,
}

/// Result of an Escape press.
#[derive(Debug, Clone, PartialEq)]
pub enum Toggle {
    Started(PathBuf),
    Stopped(SessionMetadata),
}

struct Session {
    layout: SessionLayout,
    log: DebugLog,
    started_at: DateTime<Local>,
    clock: Instant,
    ring: Mutex<FrameRing<Arc<Frame>>>,
    events: EventLog,
    current_url: Mutex<Option<String>>,
    snapshots: AtomicU64,
}

impl Session {
    fn elapsed(&self) -> f64 {
        self.clock.elapsed().as_secs_f64()
    }

    fn current_url(&self) -> Option<String> {
        self.current_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Save the newest buffered frame for an event of `kind`. Returns the
    /// session-relative path and the frame's capture time, or `None` when
    /// nothing is buffered yet or the write fails.
    fn snapshot(&self, kind: &str) -> Option<(String, f64)> {
        let frame = self
            .ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest()
            .cloned()?;
        let seq = self.snapshots.fetch_add(1, Ordering::Relaxed);
        let (path, relative) = self
            .layout
            .frame_path(kind, (frame.elapsed * 1000.0) as u64, seq);
        match screen::save_png(&frame.image, &path) {
            Ok(()) => {
                self.log.log(format!("Saved frame: {}", path.display()));
                Some((relative, frame.elapsed))
            }
            Err(e) => {
                self.log.log(format!("Frame save error: {e}"));
                None
            }
        }
    }

    /// One frame-thread iteration: grab a frame, then look for a URL change.
    fn tick(&self, screen: &dyn ScreenCapture, urls: &dyn UrlProbe) {
        match screen.grab() {
            Ok(image) => {
                let frame = Frame {
                    image,
                    elapsed: self.elapsed(),
                };
                self.ring
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(Arc::new(frame));
            }
            Err(e) => self.log.log(format!("Frame capture error: {e}")),
        }

        let Some(url) = urls.current_url() else {
            return;
        };
        {
            let mut current = self
                .current_url
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() == Some(url.as_str()) {
                return;
            }
            *current = Some(url.clone());
        }
        let frame = self.snapshot("browser_navigation");
        match RecordedEvent::browser_navigation(&url, self.elapsed()) {
            Ok(event) => {
                let event = match frame {
                    Some((frame, captured_at)) => event.with_frame(frame, captured_at),
                    None => event,
                };
                self.events.push(event);
                self.log.log(format!("Recorded browser navigation to: {url}"));
            }
            Err(e) => self.log.log(format!("Error tracking window: {e}")),
        }
    }

    /// Attach frame and web context, then append.
    fn record(&self, kind: &str, event: RecordedEvent) {
        let event = match self.snapshot(kind) {
            Some((frame, captured_at)) => event.with_frame(frame, captured_at),
            None => event,
        };
        let event = match self.current_url() {
            Some(url) => event.with_web_context(url),
            None => event,
        };
        self.events.push(event);
    }
}

struct Active {
    session: Arc<Session>,
    stop: mpsc::Sender<()>,
    frames: JoinHandle<()>,
}

/// Records sessions on demand. Shared between the listener thread and
/// whatever stops the process, so every method takes `&self`.
pub struct Recorder {
    config: RecorderConfig,
    screen: Arc<dyn ScreenCapture>,
    urls: Arc<dyn UrlProbe>,
    active: Mutex<Option<Active>>,
    cursor: Mutex<(f64, f64)>,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        screen: Arc<dyn ScreenCapture>,
        urls: Arc<dyn UrlProbe>,
    ) -> Self {
        Self {
            config,
            screen,
            urls,
            active: Mutex::new(None),
            cursor: Mutex::new((0.0, 0.0)),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Directory of the session in progress.
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.session.layout.root().to_path_buf())
    }

    /// Begin a fresh session. Starting while already recording returns the
    /// current session's directory.
    pub fn start(&self) -> Result<PathBuf, RecorderError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            return Ok(current.session.layout.root().to_path_buf());
        }

        let started_at = Local::now();
        let layout = SessionLayout::create(&self.config.output_dir, started_at)?;
        let log = DebugLog::new(layout.debug_log_path());
        log.log("Starting new recording session");
        if !self.urls.supported() {
            log.log("Unsupported platform for browser URL detection");
        }

        let session = Arc::new(Session {
            layout,
            log,
            started_at,
            clock: Instant::now(),
            ring: Mutex::new(FrameRing::new(self.config.buffer_capacity)),
            events: EventLog::new(),
            current_url: Mutex::new(None),
            snapshots: AtomicU64::new(0),
        });

        let (stop, stopped) = mpsc::channel::<()>();
        let frames = {
            let session = Arc::clone(&session);
            let screen = Arc::clone(&self.screen);
            let urls = Arc::clone(&self.urls);
            let interval = self.config.frame_interval;
            std::thread::Builder::new()
                .name("recorder-frames".into())
                .spawn(move || {
                    session.log.log("Starting frame recording");
                    loop {
                        session.tick(screen.as_ref(), urls.as_ref());
                        match stopped.recv_timeout(interval) {
                            Err(RecvTimeoutError::Timeout) => continue,
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })
                .map_err(RecorderError::Spawn)?
        };

        let root = session.layout.root().to_path_buf();
        session.log.log("Recording started successfully");
        info!(session = %root.display(), "recording started");
        *active = Some(Active {
            session,
            stop,
            frames,
        });
        Ok(root)
    }

    /// Stop the frame thread and seal the session. Returns `None` when
    /// nothing was being recorded.
    pub fn stop(&self) -> Result<Option<SessionMetadata>, RecorderError> {
        let Some(Active {
            session,
            stop,
            frames,
        }) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(None);
        };

        session.log.log("Stopping recording session");
        let _ = stop.send(());
        if frames.join().is_err() {
            warn!("frame thread panicked");
        }

        let duration = session.elapsed();
        let store = SessionStore::new(session.layout.clone());
        match store.seal(session.events.drain_sorted(), session.started_at, duration) {
            Ok(metadata) => {
                session.log.log("Session data saved successfully");
                info!(
                    session = %session.layout.root().display(),
                    events = metadata.total_events,
                    frames = metadata.total_frames,
                    "recording saved"
                );
                Ok(Some(metadata))
            }
            Err(e) => {
                session.log.log(format!("Error saving session data: {e}"));
                Err(e.into())
            }
        }
    }

    pub fn toggle(&self) -> Result<Toggle, RecorderError> {
        match self.stop()? {
            Some(metadata) => Ok(Toggle::Stopped(metadata)),
            None => self.start().map(Toggle::Started),
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| Arc::clone(&active.session))
    }

    /// Record a button press or release. Ignored while not recording.
    pub fn on_click(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        state: PressState,
    ) -> Result<(), RecorderError> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        let event = RecordedEvent::mouse_click(x, y, button, state, session.elapsed())?;
        session.record("click", event);
        session.log.log(format!("Recorded click event at ({x}, {y})"));
        Ok(())
    }

    /// Record a key press. Ignored while not recording.
    pub fn on_key(&self, key: &str) -> Result<(), RecorderError> {
        let Some(session) = self.session() else {
            return Ok(());
        };
        let event = RecordedEvent::key_press(key, session.elapsed())?;
        session.record("keypress", event);
        session.log.log(format!("Recorded key press: {key}"));
        Ok(())
    }

    /// Feed one event from `rdev::listen`. Escape toggles recording and is
    /// never itself recorded.
    pub fn handle(&self, event: &rdev::Event) {
        let outcome = match event.event_type {
            rdev::EventType::MouseMove { x, y } => {
                *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = (x, y);
                Ok(())
            }
            rdev::EventType::KeyPress(rdev::Key::Escape) => match self.toggle() {
                Ok(Toggle::Started(dir)) => {
                    info!("Recording in progress to {}. Press ESC to stop...", dir.display());
                    Ok(())
                }
                Ok(Toggle::Stopped(_)) => {
                    info!("Press ESC to start a new recording or Ctrl+C to exit");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            rdev::EventType::KeyPress(key) => {
                let name = event
                    .name
                    .clone()
                    .filter(|name| !name.trim().is_empty() && !name.chars().any(char::is_control))
                    .unwrap_or_else(|| format!("{key:?}"));
                self.on_key(&name)
            }
            rdev::EventType::ButtonPress(button) => {
                let (x, y) = *self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
                self.on_click(x, y, button.into(), PressState::Pressed)
            }
            rdev::EventType::ButtonRelease(button) => {
                let (x, y) = *self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
                self.on_click(x, y, button.into(), PressState::Released)
            }
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            error!("recorder: {e}");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.is_recording() {
            if let Err(e) = self.stop() {
                error!("could not save recording on shutdown: {e}");
            }
        }
    }
}
