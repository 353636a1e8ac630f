use image::RgbaImage;
use std::path::Path;
use thiserror::Error;

use crate::artifact::{self, ArtifactError};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no primary monitor found")]
    NoMonitor,
    #[error("screen capture failed: {0}")]
    Platform(String),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

pub trait ScreenCapture: Send + Sync {
    /// Grab the full primary screen.
    fn grab(&self) -> Result<RgbaImage, CaptureError>;
}

/// Primary-monitor capture through `xcap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapScreen;

impl ScreenCapture for XcapScreen {
    fn grab(&self) -> Result<RgbaImage, CaptureError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| CaptureError::Platform(format!("Failed to get monitors: {e}")))?;

        let mut primary = None;
        for monitor in monitors {
            match monitor.is_primary() {
                Ok(true) => {
                    primary = Some(monitor);
                    break;
                }
                Ok(false) => continue,
                Err(e) => {
                    return Err(CaptureError::Platform(format!(
                        "Error checking monitor primary status: {e}"
                    )));
                }
            }
        }
        let primary = primary.ok_or(CaptureError::NoMonitor)?;

        primary
            .capture_image()
            .map_err(|e| CaptureError::Platform(format!("Failed to capture screen: {e}")))
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut out = std::io::Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Encode `image` as PNG and write it atomically to `path`.
pub fn save_png(image: &RgbaImage, path: &Path) -> Result<(), CaptureError> {
    let bytes = encode_png(image)?;
    artifact::write_atomic(path, &bytes)?;
    Ok(())
}
