use serde::{Deserialize, Deserializer, Serialize};

/// The UI action the planner asks the hands machine to perform.
///
/// Unknown action strings are kept verbatim so a decision survives a
/// write/read cycle unchanged; the executor treats them as no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Click,
    Type,
    Wait,
    Unsupported(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Click => "click",
            Action::Type => "type",
            Action::Wait => "wait",
            Action::Unsupported(other) => other,
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "click" => Action::Click,
            "type" => Action::Type,
            "wait" => Action::Wait,
            _ => Action::Unsupported(value),
        }
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        match value {
            Action::Unsupported(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screen-space box in `[x, y, width, height]` form, as produced by perception.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Point the executor clicks for this box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x, y, width, height]: [f64; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// Reads a missing or `null` string field as empty.
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// One resolved step directive, written by the brain and executed by the hands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "ACTION")]
    pub action: Action,
    #[serde(rename = "ELEMENT")]
    pub element: String,
    #[serde(rename = "DETAILS", default, deserialize_with = "null_as_empty")]
    pub details: String,
    #[serde(rename = "COORDINATES", default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<BoundingBox>,
}

impl Decision {
    /// One-line summary fed back into the planner's task context.
    pub fn summary(&self) -> String {
        if self.details.is_empty() {
            format!("{} {}", self.action, self.element)
        } else {
            format!("{} {} ({})", self.action, self.element, self.details)
        }
    }
}

/// Contents of `result_<i>.json`. Every step produces exactly one of these,
/// so the executor never has to infer failure from a missing file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "STATUS", rename_all = "lowercase")]
pub enum StepOutcome {
    Decision(Decision),
    Error {
        #[serde(rename = "REASON")]
        reason: String,
    },
}

impl StepOutcome {
    pub fn error(reason: impl Into<String>) -> Self {
        StepOutcome::Error {
            reason: reason.into(),
        }
    }

    pub fn summary(&self) -> String {
        match self {
            StepOutcome::Decision(decision) => decision.summary(),
            StepOutcome::Error { reason } => format!("failed: {reason}"),
        }
    }
}

/// Contents of `task.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task: String,
}

/// Why a long-running loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The cancellation token fired; `steps` cycles had completed.
    Cancelled { steps: u64 },
    /// The configured step limit was reached.
    StepLimit { steps: u64 },
}
