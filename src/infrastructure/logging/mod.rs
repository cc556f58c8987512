//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - Pretty or JSON formatting on stderr
//! - Optional daily-rolling JSON file output

pub mod logger;

pub use logger::{LogFormat, LoggerImpl};
