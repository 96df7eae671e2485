//! PrismRoute Core Types
//!
//! This crate provides the fundamental types used throughout PrismRoute:
//! - Claude message-stream event types and SSE framing
//! - Core error types

pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{
    ContentBlockStart, ContentDelta, MessageDelta, MessageStart, StreamEvent, Usage, UsageDelta,
};
