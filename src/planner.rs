use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Action, BoundingBox, Decision, null_as_empty};

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;

/// Only this many leading lines of a reply are treated as the JSON object;
/// anything after is prose the model was told not to write.
const REPLY_HEAD_LINES: usize = 4;

const SYSTEM_PROMPT: &str = r#"You are a task analyzer for a computer automation system. Given a task and a list of screen elements you must:
1. Analyze the available screen elements.
2. Return exactly one instruction for the next step, in this format:
{
    "ACTION": "[click/type/wait]",
    "ELEMENT": "Text Box/Icon Box ID X: [exact element text]",
    "DETAILS": "[text to type or additional info if needed]"
}

Rules:
- Start your reply with the instruction, before anything else.
- Only reference elements that exactly match the provided list.
- Always include the full element ID and text in your reference.
- Be specific about whether to click or type.
- If typing is needed, give the exact text to type."#;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("ANTHROPIC_API_KEY not set in environment")]
    MissingApiKey,
    #[error("planner request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("planner API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("planner returned a body that is not json: {0}")]
    InvalidBody(#[source] serde_json::Error),
    #[error("planner returned no text content")]
    EmptyReply,
    #[error("could not parse planner reply: {source}")]
    Unparsable {
        reply: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The planning service: task context plus on-screen elements in, free text out.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, task: &str, elements: &str) -> Result<String, PlanError>;
}

/// `{ACTION, ELEMENT, DETAILS}` as emitted by the planner, before resolution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlannedAction {
    #[serde(rename = "ACTION")]
    pub action: Action,
    #[serde(rename = "ELEMENT")]
    pub element: String,
    #[serde(rename = "DETAILS", default, deserialize_with = "null_as_empty")]
    pub details: String,
}

impl PlannedAction {
    pub fn into_decision(self, coordinates: BoundingBox) -> Decision {
        Decision {
            action: self.action,
            element: self.element,
            details: self.details,
            coordinates: Some(coordinates),
        }
    }
}

/// Pull the action object out of a planner reply.
///
/// The object is expected as the first four lines; the rest is cut off and a
/// closing brace appended. Replies that put the object on one line, or after
/// a preamble, fall back to the first balanced `{...}` in the text.
pub fn parse_reply(reply: &str) -> Result<PlannedAction, PlanError> {
    let cleaned = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_start();

    let head: Vec<&str> = cleaned.lines().take(REPLY_HEAD_LINES).collect();
    let truncated = format!("{}\n}}", head.join("\n"));

    match serde_json::from_str(&truncated) {
        Ok(action) => Ok(action),
        Err(source) => first_action(cleaned).ok_or_else(|| PlanError::Unparsable {
            reply: reply.to_string(),
            source,
        }),
    }
}

/// The first action object embedded anywhere in `text`.
fn first_action(text: &str) -> Option<PlannedAction> {
    text.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<PlannedAction>()
            .next()
            .and_then(Result::ok)
    })
}

/// Anthropic Messages API client.
pub struct AnthropicPlanner {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl AnthropicPlanner {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, PlanError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| PlanError::MissingApiKey)?;
        Ok(Self::new(api_key, model))
    }

    /// Point the client at a different base URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Planner for AnthropicPlanner {
    async fn plan(&self, task: &str, elements: &str) -> Result<String, PlanError> {
        let prompt = format!(
            "Task to complete: {task}\n\nAvailable screen elements:\n{elements}\n\nProvide the next step using only the available elements, formatted as specified in your system prompt."
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&json!({
                "model": self.model,
                "max_tokens": MAX_TOKENS,
                "system": SYSTEM_PROMPT,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&raw)
                .ok()
                .and_then(|body| body["error"]["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| match raw.trim() {
                    "" => "Unknown API error".to_string(),
                    text => text.to_string(),
                });
            warn!(status = status.as_u16(), "planner API error: {message}");
            return Err(PlanError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: serde_json::Value =
            serde_json::from_str(&raw).map_err(PlanError::InvalidBody)?;

        // Only the first content segment carries the instruction.
        let text = body["content"][0]["text"]
            .as_str()
            .ok_or(PlanError::EmptyReply)?;
        debug!("planner says: {text}");
        Ok(text.to_string())
    }
}
