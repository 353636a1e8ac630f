use crate::types::BoundingBox;
use std::collections::BTreeMap;
use thiserror::Error;

const ID_MARKER: &str = "ID";
/// Zero-based position of the key in `"Text Box ID 3: Submit"`.
const KEY_TOKEN: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("element reference {element:?} has no key token")]
    Malformed { element: String },
    #[error("element key {key:?} (from {element:?}) is not on screen")]
    UnknownKey { key: String, element: String },
}

/// Per-screenshot mapping from element key to bounding box, plus the ordered
/// human-readable descriptions shown to the planner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementSet {
    boxes: BTreeMap<String, BoundingBox>,
    descriptions: Vec<String>,
}

impl ElementSet {
    pub fn new(boxes: BTreeMap<String, BoundingBox>, descriptions: Vec<String>) -> Self {
        Self {
            boxes,
            descriptions,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, bbox: BoundingBox, description: impl Into<String>) {
        self.boxes.insert(key.into(), bbox);
        self.descriptions.push(description.into());
    }

    pub fn boxes(&self) -> impl Iterator<Item = (&str, &BoundingBox)> {
        self.boxes.iter().map(|(k, b)| (k.as_str(), b))
    }

    pub fn descriptions(&self) -> &[String] {
        &self.descriptions
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Newline-joined descriptions, as sent to the planner.
    pub fn prompt_block(&self) -> String {
        self.descriptions.join("\n")
    }

    /// Map an ELEMENT reference to the box it names.
    pub fn resolve(&self, element: &str) -> Result<BoundingBox, ResolveError> {
        let key = element_key(element)?;
        self.boxes
            .get(key)
            .copied()
            .ok_or_else(|| ResolveError::UnknownKey {
                key: key.to_string(),
                element: element.to_string(),
            })
    }
}

/// Extract the element key from an ELEMENT reference.
///
/// The key is the token after `ID` with its trailing `:` removed, so both
/// `"Text Box ID 3: Submit"` and `"Text Box/Icon Box ID 3: Submit"` yield
/// `"3"`. References without an `ID` marker fall back to the fourth token.
pub fn element_key(element: &str) -> Result<&str, ResolveError> {
    let malformed = || ResolveError::Malformed {
        element: element.to_string(),
    };
    let tokens: Vec<&str> = element.split_whitespace().collect();
    let token = match tokens.iter().position(|t| *t == ID_MARKER) {
        Some(at) => tokens.get(at + 1),
        None => tokens.get(KEY_TOKEN),
    }
    .copied()
    .ok_or_else(malformed)?;
    let key = token.strip_suffix(':').unwrap_or(token);
    if key.is_empty() {
        return Err(malformed());
    }
    Ok(key)
}
