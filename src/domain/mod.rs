//! Domain layer for the clinical-analysis orchestration core
//!
//! This module contains the data model, the error taxonomy and the ports the
//! services depend on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{AnalysisError, AnalysisResult, ErrorKind};
