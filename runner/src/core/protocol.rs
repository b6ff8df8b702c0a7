//! Frames of the `claude --output-format stream-json` protocol.
//!
//! One JSON object per stdout line. Only the `assistant`, `user`, and
//! `result` frames carry anything the runner cares about; other frame types
//! and unknown fields are ignored. A line that is not JSON at all is fatal.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// A stdout line that could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line: {excerpt})")]
pub struct FrameError {
    pub message: String,
    pub excerpt: String,
}

/// A parsed protocol frame.
///
/// Fields that are `null` or of an unexpected type fall back to their
/// defaults rather than failing the line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Assistant {
        #[serde(default, deserialize_with = "lenient")]
        message: Message,
    },
    User {
        #[serde(default, deserialize_with = "lenient")]
        message: Message,
    },
    Result {
        #[serde(default, deserialize_with = "lenient")]
        result: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        duration_ms: Option<f64>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: MessageContent,
}

/// `message.content` is a block list in practice. A plain string, `null` or
/// anything else yields no blocks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "Value")]
pub enum MessageContent {
    Blocks(Vec<ContentBlock>),
    Text(String),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Blocks(Vec::new())
    }
}

impl From<Value> for MessageContent {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => MessageContent::Blocks(
                items
                    .into_iter()
                    .map(|item| serde_json::from_value(item).unwrap_or(ContentBlock::Other))
                    .collect(),
            ),
            Value::String(text) => MessageContent::Text(text),
            _ => MessageContent::default(),
        }
    }
}

impl MessageContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        }
    }
}

/// One entry of `message.content`; untyped or non-object entries are `Other`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default, deserialize_with = "lenient")]
        text: String,
    },
    ToolUse {
        #[serde(default, deserialize_with = "lenient")]
        name: String,
        #[serde(default, deserialize_with = "lenient")]
        input: Map<String, Value>,
    },
    ToolResult {
        #[serde(default)]
        content: Option<Value>,
    },
    #[serde(other)]
    Other,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Parse one stdout line.
///
/// Objects without a string `type` are treated as [`Frame::Other`]; only a
/// line that is not JSON is an error.
pub fn parse_frame(line: &str) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(line).map_err(|err| FrameError {
        message: format!("invalid JSON: {err}"),
        excerpt: excerpt(line),
    })?;
    if !value.get("type").is_some_and(Value::is_string) {
        return Ok(Frame::Other);
    }
    serde_json::from_value(value).map_err(|err| FrameError {
        message: format!("unexpected frame shape: {err}"),
        excerpt: excerpt(line),
    })
}

/// Flatten a `tool_result.content` value into display text.
///
/// Strings pass through; arrays concatenate each element (text blocks by
/// their `text`, other strings verbatim, anything else as compact JSON);
/// everything else is empty.
pub fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items.iter().map(element_text).collect(),
        _ => String::new(),
    }
}

fn element_text(item: &Value) -> String {
    match item {
        Value::String(text) => text.clone(),
        Value::Object(fields) => match fields.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => item.to_string(),
        },
        other => other.to_string(),
    }
}

fn excerpt(line: &str) -> String {
    const MAX: usize = 120;
    if line.chars().count() <= MAX {
        return line.to_string();
    }
    let cut: String = line.chars().take(MAX).collect();
    format!("{cut}...")
}
