//! In-process adapters for the transport ports.
//!
//! `mock` provides scripted transports used by the test suites and by
//! callers wiring the core without a backend.

pub mod mock;

pub use mock::{MockStreamTransport, MockTransport, ScriptedResponse, StreamLogEntry};
