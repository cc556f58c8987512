// Integration tests for logging functionality
// Installs the global subscriber, so everything lives in one test.

use clinical_orchestrator::domain::models::LoggingConfig;
use clinical_orchestrator::infrastructure::logging::LoggerImpl;
use std::fs;
use tempfile::TempDir;
use tracing::{info, instrument, warn};

#[instrument(fields(subject = "901"))]
fn instrumented_dispatch(generation: u64) -> u64 {
    info!(generation, "dispatch started");
    generation + 1
}

#[test]
fn test_logging_writes_json_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = LoggingConfig {
        level: "info".to_string(),
        format: "json".to_string(),
        log_dir: Some(temp_dir.path().to_string_lossy().into_owned()),
    };

    let logger = LoggerImpl::init(&config).unwrap();

    info!(subject = "900", kind = "diagnosis", "analysis settled");
    warn!(attempt = 2, "rate limited; retrying");
    assert_eq!(instrumented_dispatch(4), 5);

    // A second install must fail rather than replace the subscriber.
    assert!(LoggerImpl::init(&config).is_err());

    // Dropping the guard flushes the non-blocking writer.
    drop(logger);

    let log_files: Vec<_> = fs::read_dir(temp_dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|s| s.contains("clinical-orchestrator.log"))
        })
        .collect();
    assert!(!log_files.is_empty(), "Log file should be created");

    let contents = fs::read_to_string(log_files[0].path()).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("log lines are JSON"))
        .collect();

    assert!(lines
        .iter()
        .any(|l| l["fields"]["message"] == "analysis settled" && l["fields"]["subject"] == "900"));
    assert!(lines.iter().any(|l| l["fields"]["attempt"] == 2));
    assert!(lines
        .iter()
        .any(|l| l["fields"]["message"] == "dispatch started" && l["span"]["name"] == "instrumented_dispatch"));
}
