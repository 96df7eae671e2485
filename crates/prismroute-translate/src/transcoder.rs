//! Streaming transcoder for PaCoRe responses
//!
//! PaCoRe upstreams speak OpenAI-shaped SSE, but the assistant text carries
//! embedded `<thinking>…</thinking>` and `<tool_call>…</tool_call>` markup.
//! [`PacoreTranscoder`] consumes one upstream chunk at a time and re-emits the
//! stream as Claude message events, recognizing tags across arbitrary chunk
//! boundaries without ever leaking partial markup as visible text.
//!
//! State lives in the transcoder value itself; the caller owns one per stream
//! and drops it when the stream ends.

use crate::partial_tag::{maybe_partial_tag, WITHHOLD_WINDOW};
use prismroute_core::events::{
    new_message_id, new_tool_call_id, ContentBlockStart, ContentDelta, MessageDelta, MessageStart,
    StreamEvent, UsageDelta,
};
use std::collections::BTreeMap;

const TAG_THINKING_OPEN: &str = "<thinking>";
const TAG_THINKING_CLOSE: &str = "</thinking>";
const TAG_TOOL_CALL_OPEN: &str = "<tool_call>";
const TAG_TOOL_CALL_CLOSE: &str = "</tool_call>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Normal,
    InThinking,
    InToolCall,
}

/// Parsed body of a complete `<tool_call>` element
#[derive(Debug, Clone, PartialEq, Eq)]
struct ToolCallBody {
    name: String,
    parameters: BTreeMap<String, String>,
}

/// Stateful chunk-at-a-time transcoder from PaCoRe output to Claude events
#[derive(Debug)]
pub struct PacoreTranscoder {
    state: ParserState,
    buffer: String,
    message_started: bool,
    message_stopped: bool,
    message_id: String,
    model: String,
    next_block_index: u32,
    text_block: Option<u32>,
    thinking_block: Option<u32>,
}

impl PacoreTranscoder {
    /// Create transcoder state for a fresh stream
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            state: ParserState::Normal,
            buffer: String::new(),
            message_started: false,
            message_stopped: false,
            message_id: new_message_id(),
            model: model.into(),
            next_block_index: 0,
            text_block: None,
            thinking_block: None,
        }
    }

    /// The `msg_…` id this stream announces in `message_start`
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// True once `message_stop` has been emitted; further input is ignored
    pub fn is_finished(&self) -> bool {
        self.message_stopped
    }

    /// Feed one upstream chunk and collect the resulting downstream events.
    ///
    /// The chunk may be an OpenAI-style delta (`choices[0].delta.content`), a
    /// finish chunk (`choices[0].finish_reason`), or raw text; JSON that
    /// carries neither content nor a finish reason produces no events.
    pub fn transcode(&mut self, chunk: &str) -> Vec<StreamEvent> {
        if self.message_stopped {
            return vec![];
        }

        let mut events = Vec::new();

        match serde_json::from_str::<serde_json::Value>(chunk) {
            Ok(json) => {
                let content = json
                    .pointer("/choices/0/delta/content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if !content.is_empty() {
                    self.buffer.push_str(content);
                    self.process_buffer(&mut events);
                } else if let Some(reason) = json
                    .pointer("/choices/0/finish_reason")
                    .and_then(|v| v.as_str())
                    .filter(|r| !r.is_empty())
                {
                    self.handle_finish(reason, &mut events);
                }
            }
            Err(_) => {
                // Not an OpenAI chunk; the raw bytes are the text payload.
                self.buffer.push_str(chunk);
                self.process_buffer(&mut events);
            }
        }

        self.ensure_message_start(&mut events);
        events
    }

    /// Finalize the stream explicitly, e.g. when the upstream closes without
    /// ever sending a finish reason. Idempotent after `message_stop`.
    pub fn finalize(&mut self, finish_reason: Option<&str>) -> Vec<StreamEvent> {
        if self.message_stopped {
            return vec![];
        }
        let mut events = Vec::new();
        self.handle_finish(finish_reason.unwrap_or(""), &mut events);
        self.ensure_message_start(&mut events);
        events
    }

    /// Prepend `message_start` before the first event the stream produces
    fn ensure_message_start(&mut self, events: &mut Vec<StreamEvent>) {
        if self.message_started || events.is_empty() {
            return;
        }
        events.insert(
            0,
            StreamEvent::MessageStart {
                message: MessageStart::new(self.message_id.clone(), self.model.clone()),
            },
        );
        self.message_started = true;
    }

    fn process_buffer(&mut self, events: &mut Vec<StreamEvent>) {
        while !self.buffer.is_empty() {
            match self.state {
                ParserState::Normal => {
                    let think_idx = self.buffer.find(TAG_THINKING_OPEN);
                    let tool_idx = self.buffer.find(TAG_TOOL_CALL_OPEN);

                    let earliest = match (think_idx, tool_idx) {
                        (Some(t), Some(c)) if t < c => Some((t, true)),
                        (Some(t), None) => Some((t, true)),
                        (_, Some(c)) => Some((c, false)),
                        (None, None) => None,
                    };

                    match earliest {
                        Some((idx, is_thinking)) => {
                            let text = self.buffer[..idx].to_string();
                            self.emit_text_delta(events, &text);

                            let tag_len = if is_thinking {
                                TAG_THINKING_OPEN.len()
                            } else {
                                TAG_TOOL_CALL_OPEN.len()
                            };
                            let rest = self.buffer[idx + tag_len..].to_string();
                            self.buffer = rest;

                            if is_thinking {
                                self.state = ParserState::InThinking;
                                self.start_thinking_block(events);
                            } else {
                                // The tool_use block opens only once the full
                                // XML body has arrived.
                                self.state = ParserState::InToolCall;
                            }
                        }
                        None => {
                            if maybe_partial_tag(&self.buffer) {
                                if self.buffer.len() > WITHHOLD_WINDOW {
                                    let cut = flush_cut(&self.buffer);
                                    let text = self.buffer[..cut].to_string();
                                    self.emit_text_delta(events, &text);
                                    let rest = self.buffer[cut..].to_string();
                                    self.buffer = rest;
                                }
                                return;
                            }
                            let text = std::mem::take(&mut self.buffer);
                            self.emit_text_delta(events, &text);
                            return;
                        }
                    }
                }
                ParserState::InThinking => {
                    match self.buffer.find(TAG_THINKING_CLOSE) {
                        Some(idx) => {
                            let text = self.buffer[..idx].to_string();
                            self.emit_thinking_delta(events, &text);
                            self.stop_thinking_block(events);

                            let rest = self.buffer[idx + TAG_THINKING_CLOSE.len()..].to_string();
                            self.buffer = rest;
                            self.state = ParserState::Normal;
                        }
                        None => {
                            if maybe_partial_tag(&self.buffer) {
                                if self.buffer.len() > WITHHOLD_WINDOW {
                                    let cut = flush_cut(&self.buffer);
                                    let text = self.buffer[..cut].to_string();
                                    self.emit_thinking_delta(events, &text);
                                    let rest = self.buffer[cut..].to_string();
                                    self.buffer = rest;
                                }
                                return;
                            }
                            let text = std::mem::take(&mut self.buffer);
                            self.emit_thinking_delta(events, &text);
                            return;
                        }
                    }
                }
                ParserState::InToolCall => {
                    match self.buffer.find(TAG_TOOL_CALL_CLOSE) {
                        Some(idx) => {
                            let body = self.buffer[..idx].to_string();
                            match parse_tool_call_body(&body) {
                                Some(call) => self.emit_tool_call(events, call),
                                None => {
                                    tracing::debug!(
                                        body_len = body.len(),
                                        "dropping malformed tool_call body"
                                    );
                                }
                            }

                            let rest = self.buffer[idx + TAG_TOOL_CALL_CLOSE.len()..].to_string();
                            self.buffer = rest;
                            self.state = ParserState::Normal;
                        }
                        // Buffer until the close tag arrives; a partial
                        // tool_call must never surface as text.
                        None => return,
                    }
                }
            }
        }
    }

    fn alloc_block_index(&mut self) -> u32 {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }

    fn emit_text_delta(&mut self, events: &mut Vec<StreamEvent>, text: &str) {
        if text.is_empty() {
            return;
        }
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.alloc_block_index();
                self.text_block = Some(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlockStart::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn start_thinking_block(&mut self, events: &mut Vec<StreamEvent>) {
        self.stop_text_block(events);
        if self.thinking_block.is_none() {
            let index = self.alloc_block_index();
            self.thinking_block = Some(index);
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlockStart::Thinking {
                    thinking: String::new(),
                },
            });
        }
    }

    fn emit_thinking_delta(&mut self, events: &mut Vec<StreamEvent>, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.thinking_block.is_none() {
            self.start_thinking_block(events);
        }
        if let Some(index) = self.thinking_block {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::ThinkingDelta {
                    thinking: text.to_string(),
                },
            });
        }
    }

    fn stop_text_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(index) = self.text_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn stop_thinking_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(index) = self.thinking_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn emit_tool_call(&mut self, events: &mut Vec<StreamEvent>, call: ToolCallBody) {
        let partial_json = match serde_json::to_string(&call.parameters) {
            Ok(json) => json,
            Err(err) => {
                tracing::debug!(error = %err, "dropping unserializable tool_call parameters");
                return;
            }
        };

        self.stop_text_block(events);
        self.stop_thinking_block(events);

        let index = self.alloc_block_index();
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlockStart::ToolUse {
                id: new_tool_call_id(),
                name: call.name,
                input: serde_json::json!({}),
            },
        });
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::InputJsonDelta { partial_json },
        });
        events.push(StreamEvent::ContentBlockStop { index });
    }

    fn handle_finish(&mut self, reason: &str, events: &mut Vec<StreamEvent>) {
        self.stop_thinking_block(events);
        self.stop_text_block(events);

        let stop_reason = if reason == "tool_calls" {
            "tool_use"
        } else {
            "end_turn"
        };
        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: UsageDelta::default(),
        });
        events.push(StreamEvent::MessageStop);
        self.message_stopped = true;
    }
}

/// Largest char-boundary cut that still withholds the trailing window
fn flush_cut(s: &str) -> usize {
    let mut cut = s.len() - WITHHOLD_WINDOW;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

/// Parse the body between `<tool_call>` and `</tool_call>`.
///
/// Expected shape is a `<name>` element plus an optional `<parameters>` block
/// whose children are named values (`<location>Paris</location>`); the
/// upstream's degenerate `<parameter>V</parameter>` form parses the same way.
/// Returns `None` on any structural problem, which drops the block.
fn parse_tool_call_body(body: &str) -> Option<ToolCallBody> {
    let name = extract_tag_value(body, "name")?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut parameters = BTreeMap::new();
    if let Some(params) = extract_tag_value(body, "parameters") {
        parse_named_children(params, &mut parameters)?;
    }

    Some(ToolCallBody { name, parameters })
}

/// Parse a sequence of `<key>value</key>` children into a map
fn parse_named_children(s: &str, out: &mut BTreeMap<String, String>) -> Option<()> {
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if !rest.starts_with('<') {
            return None;
        }
        let open_end = rest.find('>')?;
        let key = &rest[1..open_end];
        if key.is_empty() || key.starts_with('/') || key.contains('<') || key.contains(char::is_whitespace) {
            return None;
        }
        let close = format!("</{}>", key);
        let after = &rest[open_end + 1..];
        let end = after.find(&close)?;
        out.insert(key.to_string(), after[..end].to_string());
        rest = after[end + close.len()..].trim_start();
    }
    Some(())
}

/// Inner text of the first `<tag>…</tag>` element, if complete
fn extract_tag_value<'a>(raw: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = raw.find(&open)? + open.len();
    let end = raw[start..].find(&close)?;
    Some(&raw[start..start + end])
}
