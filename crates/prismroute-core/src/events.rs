//! Claude message-stream event model
//!
//! Downstream consumers speak the Claude streaming protocol: a `message_start`
//! envelope, a sequence of content blocks addressed by monotonically
//! increasing indices, a closing `message_delta` carrying the stop reason, and
//! a final `message_stop`. Events serialize with a `type` tag and frame as
//! `event: <kind>\ndata: <json>\n\n` on the wire.

use serde::{Deserialize, Serialize};

/// A single downstream stream event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlockStart,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDelta,
        usage: UsageDelta,
    },
    MessageStop,
}

/// Message envelope carried by `message_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStart {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub role: String,
    pub model: String,
    pub content: Vec<serde_json::Value>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

impl MessageStart {
    /// Build the initial assistant envelope for a fresh stream
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: model.into(),
            content: vec![],
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
        }
    }
}

/// Content block opener payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockStart {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Content block delta payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

/// Delta carried by `message_delta`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
}

/// Token usage in the `message_start` envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Token usage carried by `message_delta`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl StreamEvent {
    /// Wire name of the event, used for the SSE `event:` line
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
        }
    }

    /// Frame as a Server-Sent Events message
    pub fn to_sse(&self) -> crate::Result<String> {
        let data = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.kind(), data))
    }
}

/// Generate a fresh `msg_<uuid>` message id
pub fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4())
}

/// Generate a fresh `call_<uuid>` tool-use id
pub fn new_tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4())
}
