use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgba, RgbaImage};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use thiserror::Error;

use crate::elements::ElementSet;
use crate::types::BoundingBox;

const BOX_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BOX_THICKNESS: u32 = 3;

#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("perception request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("perception service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("labeled image is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// What perception yields for one screenshot.
#[derive(Debug, Clone, Default)]
pub struct Perception {
    pub elements: ElementSet,
    /// PNG bytes with element boxes drawn, when the service renders one.
    pub annotated_png: Option<Vec<u8>>,
}

#[async_trait]
pub trait Perceiver: Send + Sync {
    async fn perceive(&self, screenshot_png: &[u8]) -> Result<Perception, PerceptionError>;
}

/// Client for an OmniParser-style screen parsing service.
///
/// Request: `{"image": <base64 png>}`. Response: `labeled_image` (base64,
/// optional), `label_coordinates` (key to `[x, y, w, h]` in pixels) and
/// `parsed_content_list` (descriptions in display order).
pub struct OmniParserClient {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    labeled_image: Option<String>,
    label_coordinates: HashMap<String, [f64; 4]>,
    #[serde(default)]
    parsed_content_list: Vec<String>,
}

impl OmniParserClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Perceiver for OmniParserClient {
    async fn perceive(&self, screenshot_png: &[u8]) -> Result<Perception, PerceptionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "image": STANDARD.encode(screenshot_png) }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PerceptionError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ParseResponse = response.json().await?;
        let boxes: BTreeMap<String, BoundingBox> = parsed
            .label_coordinates
            .into_iter()
            .map(|(key, coords)| (key, BoundingBox::from(coords)))
            .collect();
        let annotated_png = parsed
            .labeled_image
            .filter(|s| !s.is_empty())
            .map(|s| STANDARD.decode(s))
            .transpose()?;

        Ok(Perception {
            elements: ElementSet::new(boxes, parsed.parsed_content_list),
            annotated_png,
        })
    }
}

/// Draw every element box onto the screenshot and return the result as PNG.
pub fn annotate(screenshot_png: &[u8], elements: &ElementSet) -> Result<Vec<u8>, PerceptionError> {
    let mut canvas = image::load_from_memory(screenshot_png)?.to_rgba8();
    for (_, bbox) in elements.boxes() {
        draw_outline(&mut canvas, bbox);
    }
    let mut out = Cursor::new(Vec::new());
    canvas.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn draw_outline(canvas: &mut RgbaImage, bbox: &BoundingBox) {
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f64| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f64| (v.max(0.0) as u32).min(h - 1);
    let (x0, y0) = (clamp_x(bbox.x), clamp_y(bbox.y));
    let (x1, y1) = (clamp_x(bbox.x + bbox.width), clamp_y(bbox.y + bbox.height));

    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            canvas.put_pixel(x, (y0 + t).min(h - 1), BOX_COLOR);
            canvas.put_pixel(x, y1.saturating_sub(t), BOX_COLOR);
        }
        for y in y0..=y1 {
            canvas.put_pixel((x0 + t).min(w - 1), y, BOX_COLOR);
            canvas.put_pixel(x1.saturating_sub(t), y, BOX_COLOR);
        }
    }
}
