//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces the orchestration core consumes:
//! - Transport: request/response calls to the analysis backend
//! - StreamTransport: long-lived server-push connections
//! - PayloadBuilder: per-kind request payloads from clinical context

pub mod payload_builder;
pub mod stream_transport;
pub mod transport;

pub use payload_builder::PayloadBuilder;
pub use stream_transport::{StreamConnection, StreamControl, StreamItem, StreamTransport};
pub use transport::{RawResponse, Transport, RATE_LIMITED_STATUS};
