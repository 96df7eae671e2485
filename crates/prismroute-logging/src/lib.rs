//! PrismRoute Request Logging
//!
//! This crate writes per-request log files and keeps the logs directory
//! bounded with an age + aggregate-size retention janitor.

pub mod request_logger;

pub use request_logger::{FileRequestLogger, LoggingError};
