//! Clinical Orchestrator - analysis session orchestration core
//!
//! Turns a stream of clinical input changes into debounced, concurrent
//! analysis requests against a backend, retries rate-limited calls with
//! exponential backoff, folds the per-kind results into one aggregate, and
//! manages long-lived streaming analyses, all per subject.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, errors and the port traits
//! - **Service Layer** (`services`): Sessions, fan-out, retry, streams
//! - **Infrastructure Layer** (`infrastructure`): HTTP transports, config, logging
//! - **Adapters** (`adapters`): In-memory transports for tests and demos
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use clinical_orchestrator::infrastructure::http::{HttpStreamTransport, HttpTransport};
//! use clinical_orchestrator::{ClinicalInput, ClinicalPayloadBuilder, ConfigLoader, SessionRegistry, SubjectId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let registry = SessionRegistry::new(
//!         &config,
//!         Arc::new(HttpTransport::new(&config.transport)?),
//!         Arc::new(HttpStreamTransport::new(&config.transport)?),
//!         Arc::new(ClinicalPayloadBuilder::new()),
//!     );
//!
//!     let session = registry.get(&SubjectId::from("1042"));
//!     let _subscription = session.subscribe(|snapshot| println!("{:?}", snapshot.state));
//!     session.on_input_changed("intermittent chest pain on exertion");
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{AnalysisError, AnalysisResult, ErrorKind};
pub use domain::models::{
    AggregateAnalysis, AnalysisKind, AnalysisOutcome, ClinicalInput, Config, History,
    SessionSnapshot, SessionState, StreamEvent, StreamEventKind, SubjectId,
};
pub use domain::ports::{PayloadBuilder, StreamTransport, Transport};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    AnalysisSession, ClinicalPayloadBuilder, RequestFanout, RetryingTransport, SessionRegistry,
    StreamSession,
};
