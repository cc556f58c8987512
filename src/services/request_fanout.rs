//! Concurrent dispatch of one trigger to every configured analysis kind.
//!
//! All legs are issued at once and awaited together. A failed leg becomes a
//! `Failure` outcome in the aggregate; it never aborts its siblings. The
//! aggregate is produced only after every dispatched leg has settled.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::retrying_transport::{RetryPolicy, RetryingTransport};
use crate::domain::errors::AnalysisError;
use crate::domain::models::{
    AggregateAnalysis, AnalysisKind, AnalysisOutcome, AnalysisRequest, Config,
    ConfidenceThresholds, SubjectId, UrgencyThresholds,
};
use crate::domain::ports::Transport;

/// Fan-out/fan-in over the analysis kinds.
#[derive(Clone)]
pub struct RequestFanout {
    transport: RetryingTransport,
    kinds: Vec<AnalysisKind>,
    confidence: ConfidenceThresholds,
    urgency: UrgencyThresholds,
}

impl RequestFanout {
    /// Duplicate kinds are dispatched once.
    pub fn new(
        transport: RetryingTransport,
        kinds: &[AnalysisKind],
        confidence: ConfidenceThresholds,
        urgency: UrgencyThresholds,
    ) -> Self {
        let mut unique = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
        }
        Self {
            transport,
            kinds: unique,
            confidence,
            urgency,
        }
    }

    pub fn from_config(inner: Arc<dyn Transport>, config: &Config) -> Self {
        let transport = RetryingTransport::new(inner, RetryPolicy::from(&config.retry));
        Self::new(
            transport,
            &config.kinds,
            config.confidence_thresholds,
            config.urgency_thresholds,
        )
    }

    pub fn kinds(&self) -> &[AnalysisKind] {
        &self.kinds
    }

    pub fn confidence_thresholds(&self) -> &ConfidenceThresholds {
        &self.confidence
    }

    pub fn urgency_thresholds(&self) -> &UrgencyThresholds {
        &self.urgency
    }

    /// Dispatch every kind `payload_for` yields a payload for and aggregate
    /// the settled outcomes.
    ///
    /// Kinds for which `payload_for` returns `None` are left out entirely and
    /// have no entry in the aggregate. Generation checks are the caller's job;
    /// `generation` is only stamped on the requests and the aggregate.
    #[instrument(skip(self, payload_for), fields(subject = %subject))]
    pub async fn dispatch<F>(
        &self,
        subject: &SubjectId,
        generation: u64,
        payload_for: F,
    ) -> AggregateAnalysis
    where
        F: Fn(AnalysisKind) -> Option<Value>,
    {
        let requests: Vec<AnalysisRequest> = self
            .kinds
            .iter()
            .filter_map(|kind| {
                let payload = payload_for(*kind);
                if payload.is_none() {
                    debug!(kind = %kind, "no payload; kind skipped");
                }
                payload.map(|payload| AnalysisRequest {
                    subject: subject.clone(),
                    kind: *kind,
                    payload,
                    submitted_at_generation: generation,
                })
            })
            .collect();

        debug!(legs = requests.len(), "dispatching analysis legs");

        let outcomes = join_all(requests.into_iter().map(|request| self.run_leg(request))).await;
        let aggregate =
            AggregateAnalysis::from_outcomes(generation, outcomes, &self.confidence, &self.urgency);

        debug!(
            successes = aggregate.success_count(),
            failures = aggregate.failure_count(),
            "fan-out settled"
        );
        aggregate
    }

    async fn run_leg(&self, request: AnalysisRequest) -> (AnalysisKind, AnalysisOutcome) {
        let kind = request.kind;
        let outcome = match self.transport.send(kind, &request.payload).await {
            Ok(response) if response.ok => AnalysisOutcome::from_body(response.body, &self.urgency),
            Ok(response) => {
                let err = AnalysisError::Endpoint {
                    status: response.status,
                    message: response.error_message(),
                };
                warn!(kind = %kind, status = response.status, "analysis endpoint returned an error");
                AnalysisOutcome::failure(&err)
            }
            Err(err) => {
                warn!(kind = %kind, error = %err, "analysis leg failed");
                AnalysisOutcome::failure(&err)
            }
        };
        (kind, outcome)
    }
}
