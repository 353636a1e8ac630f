//! Screen and input recording, independent of the automation loops.

mod browser;
mod capture;
mod events;
mod ring;
mod session;

pub use browser::{ForegroundBrowser, NoBrowser, UrlProbe};
pub use capture::{
    DEFAULT_BUFFER_SECONDS, DEFAULT_FPS, Frame, Recorder, RecorderConfig, RecorderError, Toggle,
    default_recordings_dir,
};
pub use events::{
    EventContext, EventError, EventLog, MouseButton, PressState, RecordedEvent, sort_by_timestamp,
};
pub use ring::FrameRing;
pub use session::{
    DEBUG_LOG_FILE, DebugLog, EVENTS_FILE, EventTypeCounts, FRAMES_DIR, METADATA_FILE,
    SealedSession, SessionError, SessionLayout, SessionMetadata, SessionStore,
};
