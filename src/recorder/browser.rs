use tracing::debug;

/// Reports the URL of the browser tab in front, if one can be determined.
pub trait UrlProbe: Send + Sync {
    fn current_url(&self) -> Option<String>;

    /// False when this platform has no way to answer at all.
    fn supported(&self) -> bool {
        true
    }
}

/// Never sees a browser. Used where URL tracking is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowser;

impl UrlProbe for NoBrowser {
    fn current_url(&self) -> Option<String> {
        None
    }

    fn supported(&self) -> bool {
        false
    }
}

/// Queries the frontmost Chrome or Safari window through AppleScript on
/// macOS. Other platforms are unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForegroundBrowser;

#[cfg(target_os = "macos")]
const BROWSER_SCRIPTS: [(&str, &str); 2] = [
    (
        "Google Chrome",
        r#"if application "Google Chrome" is running then
    tell application "Google Chrome" to get URL of active tab of front window
end if"#,
    ),
    (
        "Safari",
        r#"if application "Safari" is running then
    tell application "Safari" to get URL of current tab of front window
end if"#,
    ),
];

impl UrlProbe for ForegroundBrowser {
    #[cfg(target_os = "macos")]
    fn current_url(&self) -> Option<String> {
        for (browser, script) in BROWSER_SCRIPTS {
            match std::process::Command::new("osascript")
                .args(["-e", script])
                .output()
            {
                Ok(output) if output.status.success() => {
                    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !url.is_empty() {
                        return Some(url);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("{browser} URL fetch error: {e}"),
            }
        }
        None
    }

    #[cfg(not(target_os = "macos"))]
    fn current_url(&self) -> Option<String> {
        debug!("browser URL detection is not available on this platform");
        None
    }

    fn supported(&self) -> bool {
        cfg!(target_os = "macos")
    }
}
