use rdev::{Button, EventType, Key as RdevKey, simulate};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Gap between synthetic events; some platforms drop events sent back to back.
const EVENT_GAP: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum InputError {
    #[error("could not simulate {0}")]
    Simulate(String),
    #[error("clipboard unavailable: {0}")]
    Clipboard(#[from] arboard::Error),
    #[error("failed to open {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Keys the executor presses outside of free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    FullScreen,
}

/// The OS input-injection primitive.
pub trait InputDriver: Send + Sync {
    fn click(&self, x: f64, y: f64) -> Result<(), InputError>;
    fn type_text(&self, text: &str) -> Result<(), InputError>;
    fn press_key(&self, key: Key) -> Result<(), InputError>;
}

/// Injects events through `rdev::simulate`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RdevInput;

impl RdevInput {
    fn send(&self, event: EventType) -> Result<(), InputError> {
        simulate(&event).map_err(|_| InputError::Simulate(format!("{event:?}")))?;
        std::thread::sleep(EVENT_GAP);
        Ok(())
    }

    fn tap(&self, key: RdevKey) -> Result<(), InputError> {
        self.send(EventType::KeyPress(key))?;
        self.send(EventType::KeyRelease(key))
    }

    fn tap_with(&self, modifier: RdevKey, key: RdevKey) -> Result<(), InputError> {
        self.send(EventType::KeyPress(modifier))?;
        let tapped = self.tap(key);
        self.send(EventType::KeyRelease(modifier))?;
        tapped
    }

    /// Text with characters outside the US keyboard layout goes through the
    /// clipboard instead of keystrokes.
    fn paste(&self, text: &str) -> Result<(), InputError> {
        let mut clipboard = arboard::Clipboard::new()?;
        clipboard.set_text(text.to_string())?;
        let modifier = if cfg!(target_os = "macos") {
            RdevKey::MetaLeft
        } else {
            RdevKey::ControlLeft
        };
        self.tap_with(modifier, RdevKey::KeyV)
    }
}

impl InputDriver for RdevInput {
    fn click(&self, x: f64, y: f64) -> Result<(), InputError> {
        info!("Clicking at ({x}, {y})");
        self.send(EventType::MouseMove { x, y })?;
        self.send(EventType::ButtonPress(Button::Left))?;
        self.send(EventType::ButtonRelease(Button::Left))
    }

    fn type_text(&self, text: &str) -> Result<(), InputError> {
        let strokes: Option<Vec<(RdevKey, bool)>> = text.chars().map(keystroke).collect();
        match strokes {
            Some(strokes) => {
                debug!(chars = strokes.len(), "typing");
                for (key, shift) in strokes {
                    if shift {
                        self.tap_with(RdevKey::ShiftLeft, key)?;
                    } else {
                        self.tap(key)?;
                    }
                }
                Ok(())
            }
            None => {
                debug!("pasting text with non-keyboard characters");
                self.paste(text)
            }
        }
    }

    fn press_key(&self, key: Key) -> Result<(), InputError> {
        match key {
            Key::Enter => self.tap(RdevKey::Return),
            Key::FullScreen => self.tap(RdevKey::F11),
        }
    }
}

/// Map a character to a US-layout key and whether Shift is held.
pub fn keystroke(ch: char) -> Option<(RdevKey, bool)> {
    use RdevKey::*;
    const LETTERS: [RdevKey; 26] = [
        KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM, KeyN, KeyO,
        KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
    ];
    const DIGITS: [RdevKey; 10] = [Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9];

    let stroke = match ch {
        'a'..='z' => (LETTERS[(ch as u8 - b'a') as usize], false),
        'A'..='Z' => (LETTERS[(ch as u8 - b'A') as usize], true),
        '0'..='9' => (DIGITS[(ch as u8 - b'0') as usize], false),
        ' ' => (Space, false),
        '\n' => (Return, false),
        '\t' => (Tab, false),
        '-' => (Minus, false),
        '_' => (Minus, true),
        '=' => (Equal, false),
        '+' => (Equal, true),
        '[' => (LeftBracket, false),
        '{' => (LeftBracket, true),
        ']' => (RightBracket, false),
        '}' => (RightBracket, true),
        ';' => (SemiColon, false),
        ':' => (SemiColon, true),
        '\'' => (Quote, false),
        '"' => (Quote, true),
        ',' => (Comma, false),
        '<' => (Comma, true),
        '.' => (Dot, false),
        '>' => (Dot, true),
        '/' => (Slash, false),
        '?' => (Slash, true),
        '\\' => (BackSlash, false),
        '|' => (BackSlash, true),
        '`' => (BackQuote, false),
        '~' => (BackQuote, true),
        '!' => (Num1, true),
        '@' => (Num2, true),
        '#' => (Num3, true),
        '$' => (Num4, true),
        '%' => (Num5, true),
        '^' => (Num6, true),
        '&' => (Num7, true),
        '*' => (Num8, true),
        '(' => (Num9, true),
        ')' => (Num0, true),
        _ => return None,
    };
    Some(stroke)
}

/// Open `url` in the default browser.
pub fn open_in_browser(url: &str) -> Result<(), InputError> {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    } else if cfg!(target_os = "macos") {
        let mut c = std::process::Command::new("open");
        c.arg(url);
        c
    } else {
        let mut c = std::process::Command::new("xdg-open");
        c.arg(url);
        c
    };
    command.spawn().map_err(|source| InputError::Open {
        url: url.to_string(),
        source,
    })?;
    Ok(())
}
