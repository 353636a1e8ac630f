//! On-disk layout of one recording session.
//!
//! ```text
//! recording_<YYYYmmdd_HHMMSS>/
//!   frames/          PNG snapshots referenced by events
//!   events.json      every event, ordered by timestamp
//!   metadata.json    counts and timing, written last
//!   debug.log        timestamped diagnostic lines
//! ```
//!
//! A session is sealed exactly once: `events.json` and `metadata.json` are
//! created with no-clobber renames, so a second seal fails instead of
//! overwriting what the first one wrote.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::events::{self, RecordedEvent};

pub const FRAMES_DIR: &str = "frames";
pub const EVENTS_FILE: &str = "events.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const DEBUG_LOG_FILE: &str = "debug.log";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("session {0} is already sealed")]
    AlreadySealed(PathBuf),
}

impl SessionError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        SessionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Paths inside one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    /// Create `recording_<timestamp>` and its `frames/` directory under
    /// `parent`. A numeric suffix is appended when a session started in the
    /// same second already owns the name.
    pub fn create(parent: &Path, started_at: DateTime<Local>) -> Result<Self, SessionError> {
        std::fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;
        let base = format!("recording_{}", started_at.format("%Y%m%d_%H%M%S"));

        let mut suffix = 0u32;
        loop {
            let name = match suffix {
                0 => base.clone(),
                n => format!("{base}_{n}"),
            };
            let root = parent.join(name);
            match std::fs::create_dir(&root) {
                Ok(()) => {
                    let layout = Self { root };
                    let frames = layout.frames_dir();
                    std::fs::create_dir(&frames).map_err(|e| SessionError::io(&frames, e))?;
                    return Ok(layout);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(SessionError::io(&root, e)),
            }
        }
    }

    /// Wrap an existing session directory.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join(FRAMES_DIR)
    }

    pub fn events_path(&self) -> PathBuf {
        self.root.join(EVENTS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    pub fn debug_log_path(&self) -> PathBuf {
        self.root.join(DEBUG_LOG_FILE)
    }

    /// Absolute path and session-relative name for a frame snapshot.
    pub fn frame_path(&self, kind: &str, elapsed_ms: u64, seq: u64) -> (PathBuf, String) {
        let file = format!("{kind}_{elapsed_ms}_{seq}.png");
        (
            self.frames_dir().join(&file),
            format!("{FRAMES_DIR}/{file}"),
        )
    }

    pub fn count_frames(&self) -> Result<usize, SessionError> {
        let dir = self.frames_dir();
        let entries = std::fs::read_dir(&dir).map_err(|e| SessionError::io(&dir, e))?;
        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| SessionError::io(&dir, e))?;
            if entry.path().extension().is_some_and(|ext| ext == "png") {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Append-only `debug.log` with local wall-clock timestamps.
#[derive(Debug, Clone)]
pub struct DebugLog {
    path: PathBuf,
}

impl DebugLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Failures here are reported through `tracing` and otherwise ignored.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!(target: "recorder", "{message}");
        let line = format!(
            "{}: {message}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f")
        );
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!("could not write {}: {e}", self.path.display());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeCounts {
    pub mouse_clicks: usize,
    pub key_presses: usize,
    pub browser_navigations: usize,
    pub web_events: usize,
}

impl EventTypeCounts {
    pub fn tally(events: &[RecordedEvent]) -> Self {
        let mut counts = Self::default();
        for event in events {
            match event {
                RecordedEvent::MouseClick { .. } => counts.mouse_clicks += 1,
                RecordedEvent::KeyPress { .. } => counts.key_presses += 1,
                RecordedEvent::BrowserNavigation { .. } => counts.browser_navigations += 1,
            }
            if event.is_web() {
                counts.web_events += 1;
            }
        }
        counts
    }
}

/// Contents of `metadata.json`. Start and end are Unix seconds; duration is
/// measured on the session's monotonic clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_start: f64,
    pub session_end: f64,
    pub duration: f64,
    pub total_events: usize,
    pub total_frames: usize,
    pub event_types: EventTypeCounts,
}

/// A session read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SealedSession {
    pub metadata: SessionMetadata,
    pub events: Vec<RecordedEvent>,
}

fn unix_seconds(at: DateTime<Local>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Persists the final state of a session.
pub struct SessionStore {
    layout: SessionLayout,
}

impl SessionStore {
    pub fn new(layout: SessionLayout) -> Self {
        Self { layout }
    }

    pub fn is_sealed(&self) -> bool {
        self.layout.metadata_path().exists()
    }

    /// Write `events.json` then `metadata.json`. Events are sorted by
    /// timestamp first. Fails with [`SessionError::AlreadySealed`] if either
    /// file exists.
    pub fn seal(
        &self,
        mut events: Vec<RecordedEvent>,
        started_at: DateTime<Local>,
        duration: f64,
    ) -> Result<SessionMetadata, SessionError> {
        if self.is_sealed() || self.layout.events_path().exists() {
            return Err(SessionError::AlreadySealed(self.layout.root.clone()));
        }
        events::sort_by_timestamp(&mut events);

        let metadata = SessionMetadata {
            session_start: unix_seconds(started_at),
            session_end: unix_seconds(Local::now()),
            duration,
            total_events: events.len(),
            total_frames: self.layout.count_frames()?,
            event_types: EventTypeCounts::tally(&events),
        };

        self.write_once(&self.layout.events_path(), &events)?;
        self.write_once(&self.layout.metadata_path(), &metadata)?;
        Ok(metadata)
    }

    fn write_once<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), SessionError> {
        let json = serde_json::to_vec_pretty(value).map_err(|source| SessionError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.layout.root)
            .map_err(|e| SessionError::io(&self.layout.root, e))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| SessionError::io(path, e))?;
        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                SessionError::AlreadySealed(self.layout.root.clone())
            } else {
                SessionError::io(path, e.error)
            }
        })?;
        Ok(())
    }

    pub fn load(root: &Path) -> Result<SealedSession, SessionError> {
        let layout = SessionLayout::open(root);
        Ok(SealedSession {
            metadata: read_json(&layout.metadata_path())?,
            events: read_json(&layout.events_path())?,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SessionError> {
    let bytes = std::fs::read(path).map_err(|e| SessionError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|source| SessionError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::events::{MouseButton, PressState};
    use chrono::TimeZone;

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn layout_uses_start_time_and_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let first = SessionLayout::create(dir.path(), started()).unwrap();
        let second = SessionLayout::create(dir.path(), started()).unwrap();

        assert_eq!(first.root(), dir.path().join("recording_20240309_140507"));
        assert_eq!(second.root(), dir.path().join("recording_20240309_140507_1"));
        assert!(first.frames_dir().is_dir());
    }

    #[test]
    fn frame_paths_are_session_relative() {
        let layout = SessionLayout::open("/tmp/recording_x");
        let (abs, rel) = layout.frame_path("click", 1500, 2);
        assert_eq!(rel, "frames/click_1500_2.png");
        assert_eq!(abs, Path::new("/tmp/recording_x/frames/click_1500_2.png"));
    }

    #[test]
    fn tally_counts_each_type_and_web_context() {
        let events = vec![
            RecordedEvent::mouse_click(1.0, 2.0, MouseButton::Left, PressState::Pressed, 0.1)
                .unwrap()
                .with_web_context("https://x.test"),
            RecordedEvent::key_press("a", 0.2).unwrap(),
            RecordedEvent::browser_navigation("https://x.test", 0.3).unwrap(),
        ];
        assert_eq!(
            EventTypeCounts::tally(&events),
            EventTypeCounts {
                mouse_clicks: 1,
                key_presses: 1,
                browser_navigations: 1,
                web_events: 1,
            }
        );
    }

    #[test]
    fn seal_sorts_events_and_refuses_a_second_seal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SessionLayout::create(dir.path(), started()).unwrap();
        std::fs::write(layout.frames_dir().join("click_1_0.png"), b"png").unwrap();
        let store = SessionStore::new(layout.clone());

        let events = vec![
            RecordedEvent::key_press("b", 2.0).unwrap(),
            RecordedEvent::key_press("a", 1.0).unwrap(),
        ];
        let metadata = store.seal(events, started(), 2.5).unwrap();
        assert_eq!(metadata.total_events, 2);
        assert_eq!(metadata.total_frames, 1);
        assert_eq!(metadata.duration, 2.5);

        let loaded = SessionStore::load(layout.root()).unwrap();
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.events[0].timestamp(), 1.0);

        let again = store.seal(Vec::new(), started(), 0.0);
        assert!(matches!(again, Err(SessionError::AlreadySealed(_))));
        assert_eq!(SessionStore::load(layout.root()).unwrap().events.len(), 2);
    }

    #[test]
    fn debug_log_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = DebugLog::new(dir.path().join(DEBUG_LOG_FILE));
        log.log("first");
        log.log("second");

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": first"));
        // "YYYY-mm-dd HH:MM:SS.ffffff"
        assert_eq!(lines[1].find(": second"), Some(26));
    }
}
