//! Recorded user events.
//!
//! Every event is a tagged object (`"type": "mouse_click" | "key_press" |
//! "browser_navigation"`) stamped with seconds since the session started.
//! Constructors reject values that would make `events.json` ambiguous, such as
//! negative or non-finite timestamps and empty keys or URLs.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EventError {
    #[error("timestamp must be finite and non-negative, got {0}")]
    Timestamp(f64),
    #[error("coordinates must be finite, got ({x}, {y})")]
    Coordinates { x: f64, y: f64 },
    #[error("key press without a key name")]
    EmptyKey,
    #[error("navigation without a url")]
    EmptyUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Unknown(u8),
}

impl From<rdev::Button> for MouseButton {
    fn from(button: rdev::Button) -> Self {
        match button {
            rdev::Button::Left => MouseButton::Left,
            rdev::Button::Right => MouseButton::Right,
            rdev::Button::Middle => MouseButton::Middle,
            rdev::Button::Unknown(code) => MouseButton::Unknown(code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressState {
    Pressed,
    Released,
}

/// Marks an input event that happened while a browser page was in front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventContext {
    Web,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedEvent {
    MouseClick {
        x: f64,
        y: f64,
        button: MouseButton,
        state: PressState,
        timestamp: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
        /// Session time at which the attached frame was captured.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<EventContext>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    KeyPress {
        key: String,
        timestamp: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
        /// Session time at which the attached frame was captured.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<EventContext>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    BrowserNavigation {
        url: String,
        timestamp: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame: Option<String>,
        /// Session time at which the attached frame was captured.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        frame_time: Option<f64>,
    },
}

fn check_timestamp(timestamp: f64) -> Result<(), EventError> {
    if timestamp.is_finite() && timestamp >= 0.0 {
        Ok(())
    } else {
        Err(EventError::Timestamp(timestamp))
    }
}

impl RecordedEvent {
    pub fn mouse_click(
        x: f64,
        y: f64,
        button: MouseButton,
        state: PressState,
        timestamp: f64,
    ) -> Result<Self, EventError> {
        check_timestamp(timestamp)?;
        if !x.is_finite() || !y.is_finite() {
            return Err(EventError::Coordinates { x, y });
        }
        Ok(RecordedEvent::MouseClick {
            x,
            y,
            button,
            state,
            timestamp,
            frame: None,
            frame_time: None,
            context: None,
            url: None,
        })
    }

    pub fn key_press(key: impl Into<String>, timestamp: f64) -> Result<Self, EventError> {
        check_timestamp(timestamp)?;
        let key = key.into();
        if key.is_empty() {
            return Err(EventError::EmptyKey);
        }
        Ok(RecordedEvent::KeyPress {
            key,
            timestamp,
            frame: None,
            frame_time: None,
            context: None,
            url: None,
        })
    }

    pub fn browser_navigation(url: impl Into<String>, timestamp: f64) -> Result<Self, EventError> {
        check_timestamp(timestamp)?;
        let url = url.into();
        if url.trim().is_empty() {
            return Err(EventError::EmptyUrl);
        }
        Ok(RecordedEvent::BrowserNavigation {
            url,
            timestamp,
            frame: None,
            frame_time: None,
        })
    }

    /// Attach the session-relative path of the frame saved for this event and
    /// the session time that frame was captured at.
    pub fn with_frame(mut self, path: impl Into<String>, captured_at: f64) -> Self {
        match &mut self {
            RecordedEvent::MouseClick {
                frame, frame_time, ..
            }
            | RecordedEvent::KeyPress {
                frame, frame_time, ..
            }
            | RecordedEvent::BrowserNavigation {
                frame, frame_time, ..
            } => {
                *frame = Some(path.into());
                *frame_time = Some(captured_at);
            }
        }
        self
    }

    /// Tag an input event with the page it happened on. Navigation events
    /// already carry their URL and are returned unchanged.
    pub fn with_web_context(mut self, page: impl Into<String>) -> Self {
        match &mut self {
            RecordedEvent::MouseClick { context, url, .. }
            | RecordedEvent::KeyPress { context, url, .. } => {
                *context = Some(EventContext::Web);
                *url = Some(page.into());
            }
            RecordedEvent::BrowserNavigation { .. } => {}
        }
        self
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            RecordedEvent::MouseClick { timestamp, .. }
            | RecordedEvent::KeyPress { timestamp, .. }
            | RecordedEvent::BrowserNavigation { timestamp, .. } => *timestamp,
        }
    }

    pub fn frame(&self) -> Option<&str> {
        match self {
            RecordedEvent::MouseClick { frame, .. }
            | RecordedEvent::KeyPress { frame, .. }
            | RecordedEvent::BrowserNavigation { frame, .. } => frame.as_deref(),
        }
    }

    pub fn frame_time(&self) -> Option<f64> {
        match self {
            RecordedEvent::MouseClick { frame_time, .. }
            | RecordedEvent::KeyPress { frame_time, .. }
            | RecordedEvent::BrowserNavigation { frame_time, .. } => *frame_time,
        }
    }

    pub fn is_web(&self) -> bool {
        matches!(
            self,
            RecordedEvent::MouseClick {
                context: Some(EventContext::Web),
                ..
            } | RecordedEvent::KeyPress {
                context: Some(EventContext::Web),
                ..
            }
        )
    }

    /// The value of the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            RecordedEvent::MouseClick { .. } => "mouse_click",
            RecordedEvent::KeyPress { .. } => "key_press",
            RecordedEvent::BrowserNavigation { .. } => "browser_navigation",
        }
    }
}

/// Append-only event list shared by the listener and frame threads.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: RecordedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every event recorded so far, ordered by timestamp. Appends from
    /// different threads can land slightly out of order; the sort is stable
    /// so equal timestamps keep their append order.
    pub fn drain_sorted(&self) -> Vec<RecordedEvent> {
        let mut events = std::mem::take(
            &mut *self.events.lock().unwrap_or_else(PoisonError::into_inner),
        );
        sort_by_timestamp(&mut events);
        events
    }
}

pub fn sort_by_timestamp(events: &mut [RecordedEvent]) {
    events.sort_by(|a, b| a.timestamp().total_cmp(&b.timestamp()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn click_serializes_with_type_tag_and_web_context() {
        let event = RecordedEvent::mouse_click(10.0, 20.0, MouseButton::Left, PressState::Pressed, 1.5)
            .unwrap()
            .with_frame("frames/click_1400_0.png", 1.4)
            .with_web_context("https://example.com");

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "mouse_click",
                "x": 10.0,
                "y": 20.0,
                "button": "left",
                "state": "pressed",
                "timestamp": 1.5,
                "frame": "frames/click_1400_0.png",
                "frame_time": 1.4,
                "context": "web",
                "url": "https://example.com"
            })
        );
        assert!(event.is_web());
    }

    #[test]
    fn optional_fields_are_omitted() {
        let event = RecordedEvent::key_press("a", 0.25).unwrap();
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "key_press", "key": "a", "timestamp": 0.25})
        );
        assert!(!event.is_web());
    }

    #[test]
    fn navigation_ignores_web_context() {
        let event = RecordedEvent::browser_navigation("https://a.test", 2.0)
            .unwrap()
            .with_web_context("https://b.test");
        assert_eq!(
            event,
            RecordedEvent::BrowserNavigation {
                url: "https://a.test".into(),
                timestamp: 2.0,
                frame: None,
                frame_time: None,
            }
        );
        assert!(!event.is_web());
    }

    #[test]
    fn constructors_reject_invalid_values() {
        assert_eq!(
            RecordedEvent::key_press("a", -1.0),
            Err(EventError::Timestamp(-1.0))
        );
        assert!(matches!(
            RecordedEvent::key_press("a", f64::NAN),
            Err(EventError::Timestamp(_))
        ));
        assert_eq!(RecordedEvent::key_press("", 1.0), Err(EventError::EmptyKey));
        assert_eq!(
            RecordedEvent::browser_navigation("  ", 1.0),
            Err(EventError::EmptyUrl)
        );
        assert!(matches!(
            RecordedEvent::mouse_click(f64::INFINITY, 0.0, MouseButton::Left, PressState::Released, 0.0),
            Err(EventError::Coordinates { .. })
        ));
    }

    #[test]
    fn unknown_buttons_keep_their_code() {
        assert_eq!(MouseButton::from(rdev::Button::Unknown(4)), MouseButton::Unknown(4));
        assert_eq!(
            serde_json::to_value(MouseButton::Unknown(4)).unwrap(),
            json!({"unknown": 4})
        );
    }

    #[test]
    fn concurrent_appends_are_all_kept_and_sorted() {
        let log = Arc::new(EventLog::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let ts = f64::from(i * 4 + worker) / 100.0;
                        log.push(RecordedEvent::key_press("k", ts).unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = log.drain_sorted();
        assert_eq!(events.len(), 200);
        assert!(events.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
        assert!(log.is_empty());
    }
}
