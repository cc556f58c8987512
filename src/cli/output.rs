//! Output formatting utilities for the CLI.

use serde::Serialize;

use crate::domain::models::{AggregateAnalysis, AnalysisOutcome, SessionSnapshot};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;
    fn to_json(&self) -> serde_json::Value;
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Multi-line summary of an aggregate, one line per analysis kind.
pub fn format_aggregate(aggregate: &AggregateAnalysis) -> String {
    let mut lines = Vec::new();

    let confidence = match (aggregate.overall_confidence, aggregate.confidence_band) {
        (Some(value), Some(band)) => format!("{value:.2} ({band:?})"),
        _ => "n/a".to_string(),
    };
    let urgency = match (aggregate.max_urgency_score, aggregate.overall_urgency) {
        (Some(score), Some(level)) => format!("{score:.2} ({})", level.as_str()),
        _ => "n/a".to_string(),
    };
    lines.push(format!(
        "Generation {}: confidence {confidence}, urgency {urgency}",
        aggregate.generation
    ));

    for (kind, outcome) in &aggregate.outcomes {
        let detail = match outcome {
            AnalysisOutcome::Success {
                payload,
                confidence,
                urgency_score,
            } => format!(
                "confidence={confidence:.2} urgency={urgency_score:.2} {}",
                truncate(&payload.to_string(), 56)
            ),
            AnalysisOutcome::Failure {
                error_kind,
                message,
            } => format!("FAILED [{error_kind}] {message}"),
        };
        lines.push(format!("  {:<18} {detail}", kind.as_str()));
    }

    if let Some(sequence) = aggregate.last_stream_sequence {
        lines.push(format!("  stream events applied: {sequence}"));
    }
    lines.join("\n")
}

/// One-line progress view of a snapshot.
pub fn format_snapshot_line(snapshot: &SessionSnapshot) -> String {
    let mut line = format!(
        "[{}] subject={} generation={} results={} failures={}",
        snapshot.state.as_str(),
        snapshot.subject,
        snapshot.generation,
        snapshot.aggregate.success_count(),
        snapshot.aggregate.failure_count(),
    );
    if let Some(error) = &snapshot.last_error {
        line.push_str(&format!(" error={}", truncate(error, 60)));
    }
    line
}
