pub mod analysis;
pub mod config;
pub mod input;
pub mod session;
pub mod stream;

pub use analysis::{
    AggregateAnalysis, AnalysisKind, AnalysisOutcome, AnalysisRequest, ConfidenceBand, SubjectId,
    UrgencyLevel,
};
pub use config::{
    Config, ConfidenceThresholds, LoggingConfig, RetryConfig, TransportConfig, UrgencyThresholds,
};
pub use input::ClinicalInput;
pub use session::{History, SessionSnapshot, SessionState};
pub use stream::{RawStreamMessage, StreamEvent, StreamEventKind, StreamState};
