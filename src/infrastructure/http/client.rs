use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{build_client, join_url};
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{AnalysisKind, SubjectId, TransportConfig};
use crate::domain::ports::{RawResponse, Transport};

/// Path of the streaming diagnosis endpoint
pub const STREAM_PATH: &str = "diagnosis/stream-diagnosis";

/// Backend route of each analysis kind, relative to the base URL.
pub fn endpoint_path(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::Diagnosis => "diagnosis/comprehensive-diagnosis",
        AnalysisKind::LabTests => "diagnosis/analyze-lab-results",
        AnalysisKind::DrugInteractions => "diagnosis/analyze-drug-interactions",
        AnalysisKind::Symptoms => "diagnosis/analyze-notes",
        AnalysisKind::Treatment => "recommendations/treatment",
        AnalysisKind::Imaging => "diagnosis/analyze-imaging-results",
    }
}

/// Request/response transport over HTTP
///
/// Every response the backend produces, whatever its status, is returned as
/// a [`RawResponse`]; only failures to get a response at all are errors.
/// Rate limiting is left to the caller.
#[derive(Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            http_client: build_client(config, Some(Duration::from_secs(config.timeout_secs)))?,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, kind: AnalysisKind) -> String {
        join_url(&self.base_url, endpoint_path(kind))
    }
}

/// Parse a body as JSON, keeping non-JSON text as a string value.
fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, payload), fields(kind = %kind))]
    async fn request(&self, kind: AnalysisKind, payload: &Value) -> AnalysisResult<RawResponse> {
        let response = self
            .http_client
            .post(self.url_for(kind))
            .json(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = parse_body(response.text().await?);
        debug!(status, "analysis response received");
        Ok(RawResponse::new(status, body))
    }

    async fn clear_context(&self, subject: &SubjectId) -> AnalysisResult<()> {
        let url = join_url(
            &self.base_url,
            &format!("diagnosis/patient-context/{subject}"),
        );
        let response = self.http_client.delete(url).send().await?;

        let status = response.status();
        if status.is_success() {
            debug!(subject = %subject, "backend context cleared");
            return Ok(());
        }
        let raw = RawResponse::new(status.as_u16(), parse_body(response.text().await?));
        Err(AnalysisError::Endpoint {
            status: raw.status,
            message: raw.error_message(),
        })
    }
}
