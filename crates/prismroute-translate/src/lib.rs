//! PrismRoute Translation Layer
//!
//! This crate converts PaCoRe upstream output into the downstream Claude
//! message-stream protocol:
//! - Streaming transcoder for mixed text/XML chunk streams
//! - Partial-tag detection for safe chunk-boundary buffering
//! - Tool-intent extraction from tag-annotated text

pub mod partial_tag;
pub mod tool_intent;
pub mod transcoder;

pub use partial_tag::{maybe_partial_tag, WITHHOLD_WINDOW};
pub use tool_intent::{parse_tool_intents, ToolIntent, ToolIntentBuffer};
pub use transcoder::PacoreTranscoder;
